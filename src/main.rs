use std::fs;

use anyhow::{anyhow, bail, Context, Error};
use clap::Parser;
use log::{info, LevelFilter};
use tracing_subscriber::EnvFilter;

use cladefit::fitter::CommandFitter;
use cladefit::io::{read_alignment, read_foreground_taxa, read_tree};
use cladefit::session::{FitSession, RecordOutput};

mod cli;
use crate::cli::{Cli, ConfigBuilder};

type Result<T> = std::result::Result<T, Error>;

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) if !error.use_stderr() => error.exit(),
        Err(error) => {
            bail!("Unable to parse command line arguments: \n {}", error)
        }
    };
    let cfg_build: ConfigBuilder = cli.into();
    let cfg = cfg_build.setup()?;
    init_logging(cfg.log_level)?;

    info!("cladefit run started.");
    info!("{}", cfg);

    let tree = read_tree(&cfg.tree_file)?;
    let alignment = read_alignment(&cfg.alignment)?;
    let foreground = read_foreground_taxa(&cfg.taxa_file)?;

    let mut fitter = CommandFitter::new(&cfg.fitter)
        .args(cfg.fitter_args.clone())
        .timeout(cfg.timeout)
        .keep_workdirs(cfg.keep_workdirs);
    if let Some(work_dir) = &cfg.work_dir {
        fs::create_dir_all(work_dir)
            .with_context(|| format!("Could not create {}", work_dir.display()))?;
        fitter = fitter.work_root(work_dir);
    }
    fs::create_dir_all(&cfg.out_dir)
        .with_context(|| format!("Could not create {}", cfg.out_dir.display()))?;

    let session = FitSession::new(
        &tree,
        &alignment,
        &foreground,
        &fitter,
        RecordOutput {
            clade: cfg.clade.clone(),
            gene: cfg.gene.clone(),
            out_dir: cfg.out_dir.clone(),
            overwrite: cfg.overwrite,
        },
    )?;
    info!("Foreground branches: {}", session.marks());

    let outcomes = if cfg.families == cfg.test.families() {
        session.run_test(cfg.test)
    } else {
        session.run_families(&cfg.families)
    };
    let failed = outcomes
        .iter()
        .filter(|outcome| outcome.record.is_err())
        .map(|outcome| outcome.family.name())
        .collect::<Vec<_>>();
    if !failed.is_empty() {
        bail!(
            "Test {} incomplete, no record written for model(s) {}",
            cfg.test,
            failed.join(", ")
        );
    }

    info!("cladefit run finished.");
    Ok(())
}

fn init_logging(level: LevelFilter) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("Could not set up logging: {e}"))
}
