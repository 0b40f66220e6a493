use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use clap::{ArgAction, Parser};
use itertools::Itertools;
use log::LevelFilter;

use cladefit::errors::DataError;
use cladefit::io::names_from_alignment_path;
use cladefit::models::{HypothesisTest, ModelFamily};

use crate::Result;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub(super) struct Cli {
    /// Codon alignment in fasta format, named <gene>_<clade>[_...].fasta
    #[arg(value_name = "ALIGNMENT")]
    pub(super) alignment: PathBuf,

    /// Tree file in newick format, only the first tree is used
    #[arg(value_name = "TREE_FILE")]
    pub(super) tree_file: PathBuf,

    /// Hypothesis test: branch, bsA, cmD or cmC
    #[arg(value_name = "TEST")]
    pub(super) test: String,

    /// Foreground taxa, one leaf name per line
    #[arg(value_name = "TAXA_FILE")]
    pub(super) taxa_file: PathBuf,

    /// Only fit this family of the test, can be repeated [default: both families]
    #[arg(long = "family", value_name = "FAMILY")]
    pub(super) families: Vec<String>,

    /// External fitter program
    #[arg(short, long, value_name = "PROGRAM", default_value = "cladefit-codeml")]
    pub(super) fitter: PathBuf,

    /// Extra argument passed to the fitter before the request file, can be repeated
    #[arg(long = "fitter-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub(super) fitter_args: Vec<String>,

    /// Directory for the per-fit working directories [default: system temp dir]
    #[arg(short, long, value_name = "WORK_DIR")]
    pub(super) work_dir: Option<PathBuf>,

    /// Directory the record files are written to
    #[arg(short, long, value_name = "OUT_DIR", default_value = ".")]
    pub(super) out_dir: PathBuf,

    /// Seconds a single fitter invocation may run before it is killed
    #[arg(short, long, value_name = "SECONDS")]
    pub(super) timeout: Option<u64>,

    /// Gene name, overrides the name taken from the alignment file name
    #[arg(short, long)]
    pub(super) gene: Option<String>,

    /// Clade name, overrides the name taken from the alignment file name
    #[arg(short, long)]
    pub(super) clade: Option<String>,

    /// Overwrite existing record files
    #[arg(long)]
    pub(super) overwrite: bool,

    /// Keep the working directories of the fits
    #[arg(long)]
    pub(super) keep_workdirs: bool,

    /// More detailed log output, use twice for trace output
    #[arg(short, long, action = ArgAction::Count)]
    pub(super) verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub(super) quiet: bool,
}

pub(super) struct ConfigBuilder {
    pub(super) alignment: PathBuf,
    pub(super) tree_file: PathBuf,
    pub(super) test: String,
    pub(super) taxa_file: PathBuf,
    pub(super) families: Vec<String>,
    pub(super) fitter: PathBuf,
    pub(super) fitter_args: Vec<String>,
    pub(super) work_dir: Option<PathBuf>,
    pub(super) out_dir: PathBuf,
    pub(super) timeout: Option<u64>,
    pub(super) gene: Option<String>,
    pub(super) clade: Option<String>,
    pub(super) overwrite: bool,
    pub(super) keep_workdirs: bool,
    pub(super) log_level: LevelFilter,
}

impl From<Cli> for ConfigBuilder {
    fn from(cli: Cli) -> Self {
        let log_level = match (cli.quiet, cli.verbose) {
            (true, _) => LevelFilter::Warn,
            (false, 0) => LevelFilter::Info,
            (false, 1) => LevelFilter::Debug,
            (false, _) => LevelFilter::Trace,
        };
        ConfigBuilder {
            alignment: cli.alignment,
            tree_file: cli.tree_file,
            test: cli.test,
            taxa_file: cli.taxa_file,
            families: cli.families,
            fitter: cli.fitter,
            fitter_args: cli.fitter_args,
            work_dir: cli.work_dir,
            out_dir: cli.out_dir,
            timeout: cli.timeout,
            gene: cli.gene,
            clade: cli.clade,
            overwrite: cli.overwrite,
            keep_workdirs: cli.keep_workdirs,
            log_level,
        }
    }
}

impl ConfigBuilder {
    pub(super) fn setup(self) -> Result<Config> {
        let test = self.test.parse::<HypothesisTest>()?;
        let families = if self.families.is_empty() {
            test.families().to_vec()
        } else {
            let mut families = Vec::with_capacity(self.families.len());
            for name in &self.families {
                let family = name.parse::<ModelFamily>()?;
                if !test.families().contains(&family) {
                    bail!(DataError::new(format!(
                        "Model family {family} is not part of test {test}"
                    )));
                }
                if !families.contains(&family) {
                    families.push(family);
                }
            }
            families
        };
        let (path_gene, path_clade) = names_from_alignment_path(&self.alignment);
        let Some(gene) = self.gene.or(path_gene) else {
            bail!(DataError::new(format!(
                "Cannot take the gene name from {}, expected <gene>_<clade>.fasta, use --gene",
                self.alignment.display()
            )));
        };
        let Some(clade) = self.clade.or(path_clade) else {
            bail!(DataError::new(format!(
                "Cannot take the clade name from {}, expected <gene>_<clade>.fasta, use --clade",
                self.alignment.display()
            )));
        };
        if self.timeout == Some(0) {
            bail!(DataError::new("Fitter timeout must be at least one second"));
        }
        Ok(Config {
            alignment: self.alignment,
            tree_file: self.tree_file,
            test,
            families,
            taxa_file: self.taxa_file,
            fitter: self.fitter,
            fitter_args: self.fitter_args,
            work_dir: self.work_dir,
            out_dir: self.out_dir,
            timeout: self.timeout.map(Duration::from_secs),
            gene,
            clade,
            overwrite: self.overwrite,
            keep_workdirs: self.keep_workdirs,
            log_level: self.log_level,
        })
    }
}

#[derive(Debug)]
pub(super) struct Config {
    pub(super) alignment: PathBuf,
    pub(super) tree_file: PathBuf,
    pub(super) test: HypothesisTest,
    pub(super) families: Vec<ModelFamily>,
    pub(super) taxa_file: PathBuf,
    pub(super) fitter: PathBuf,
    pub(super) fitter_args: Vec<String>,
    pub(super) work_dir: Option<PathBuf>,
    pub(super) out_dir: PathBuf,
    pub(super) timeout: Option<Duration>,
    pub(super) gene: String,
    pub(super) clade: String,
    pub(super) overwrite: bool,
    pub(super) keep_workdirs: bool,
    pub(super) log_level: LevelFilter,
}

impl Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Configuration:")?;
        writeln!(f, "  alignment: {}", self.alignment.display())?;
        writeln!(f, "  tree: {}", self.tree_file.display())?;
        writeln!(f, "  foreground taxa: {}", self.taxa_file.display())?;
        let [null, alternative] = self.test.families();
        writeln!(f, "  test: {} ({null}, {alternative})", self.test)?;
        writeln!(f, "  fitted families: {}", self.families.iter().join(", "))?;
        writeln!(f, "  gene: {}, clade: {}", self.gene, self.clade)?;
        writeln!(
            f,
            "  fitter: {} {}",
            self.fitter.display(),
            self.fitter_args.join(" ")
        )?;
        match &self.work_dir {
            Some(dir) => writeln!(f, "  working directories in: {}", dir.display())?,
            None => writeln!(f, "  working directories in: system temp dir")?,
        }
        match self.timeout {
            Some(timeout) => writeln!(f, "  fitter timeout: {}s", timeout.as_secs())?,
            None => writeln!(f, "  fitter timeout: none")?,
        }
        writeln!(f, "  output directory: {}", self.out_dir.display())?;
        write!(
            f,
            "  overwrite records: {}, keep working directories: {}",
            self.overwrite, self.keep_workdirs
        )
    }
}
