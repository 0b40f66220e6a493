use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tempfile::Builder;

use crate::fitter::{BranchStats, ClassTables, FitRequest, FitResult, Fitter};
use crate::io::{write_newick_to_file, write_sequences_to_file};
use crate::models::{CodemlSettings, ModelType};
use crate::Result;

pub static ALIGNMENT_FILE: &str = "alignment.fasta";
pub static TREE_FILE: &str = "tree.newick";
pub static REQUEST_FILE: &str = "request.json";
pub static RESULT_FILE: &str = "result.json";
pub static CLASSES_FILE: &str = "classes.json";
pub static LOG_FILE: &str = "fitter.log";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Serialize)]
struct RequestFile<'a> {
    family: &'a str,
    run_label: String,
    model_type: ModelType,
    settings: CodemlSettings,
    fix_blength: i8,
    omega: f64,
    alignment: &'static str,
    tree: &'static str,
    nodes: Vec<NodeEntry<'a>>,
}

#[derive(Serialize)]
struct NodeEntry<'a> {
    id: usize,
    parent: Option<usize>,
    name: &'a str,
    blen: f64,
    mark: u8,
}

#[derive(Deserialize)]
struct ResultFile {
    lnl: Option<f64>,
    model_type: Option<ModelType>,
    #[serde(default)]
    branches: Vec<BranchEntry>,
}

#[derive(Deserialize)]
struct BranchEntry {
    node: usize,
    w: f64,
    mark: u8,
}

/// Fitter running an external program in a fresh working directory per invocation.
///
/// The directory receives the alignment, the tree with ` #1` after every foreground branch and
/// a `request.json` describing the fit. The program is started as
/// `<program> [args...] request.json` from inside the directory and must leave a `result.json`
/// behind, plus a `classes.json` with the site class tables for site and branch-site models.
#[derive(Debug, Clone)]
pub struct CommandFitter {
    program: PathBuf,
    args: Vec<String>,
    work_root: PathBuf,
    timeout: Option<Duration>,
    keep_workdirs: bool,
}

impl CommandFitter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_root: std::env::temp_dir(),
            timeout: None,
            keep_workdirs: false,
        }
    }

    /// Appends arguments passed to the program before the request file.
    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = work_root.into();
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn keep_workdirs(mut self, keep: bool) -> Self {
        self.keep_workdirs = keep;
        self
    }

    fn write_inputs(&self, dir: &Path, request: &FitRequest) -> Result<()> {
        write_sequences_to_file(request.alignment.records(), &dir.join(ALIGNMENT_FILE))?;
        let newick = request
            .tree
            .to_marked_newick(|idx| request.marks.contains(idx));
        write_newick_to_file(&[newick], &dir.join(TREE_FILE))?;

        let nodes = request
            .tree
            .iter()
            .map(|node| NodeEntry {
                id: usize::from(node.idx),
                parent: node.parent.map(usize::from),
                name: &node.id,
                blen: node.blen,
                mark: u8::from(request.marks.contains(&node.idx)),
            })
            .collect();
        let request_file = RequestFile {
            family: request.family.name(),
            run_label: request.run_label(),
            model_type: request.family.model_type(),
            settings: request.family.settings(),
            fix_blength: request.condition.blen_init.fix_blength(),
            omega: request.condition.omega,
            alignment: ALIGNMENT_FILE,
            tree: TREE_FILE,
            nodes,
        };
        let file = File::create(dir.join(REQUEST_FILE))?;
        serde_json::to_writer_pretty(file, &request_file)?;
        Ok(())
    }

    fn run_program(&self, dir: &Path) -> Result<()> {
        let log = File::create(dir.join(LOG_FILE))?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(REQUEST_FILE)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .spawn()
            .with_context(|| format!("Could not start fitter {}", self.program.display()))?;

        let status = match self.timeout {
            None => child.wait()?,
            Some(timeout) => {
                let start = Instant::now();
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if start.elapsed() >= timeout {
                        child.kill()?;
                        child.wait()?;
                        bail!("timed out after {} s", timeout.as_secs_f64());
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        };
        if !status.success() {
            bail!("fitter exited with {status}");
        }
        Ok(())
    }

    fn read_result(&self, dir: &Path, request: &FitRequest) -> Result<FitResult> {
        let content = fs::read_to_string(dir.join(RESULT_FILE))
            .with_context(|| format!("No {RESULT_FILE} written by the fitter"))?;
        let parsed: ResultFile = serde_json::from_str(&content)
            .with_context(|| format!("Malformed {RESULT_FILE}"))?;

        let mut entries = parsed.branches;
        let mut branches = Vec::with_capacity(entries.len());
        for idx in request.tree.postorder.iter() {
            if let Some(pos) = entries.iter().position(|b| b.node == usize::from(idx)) {
                let entry = entries.swap_remove(pos);
                branches.push(BranchStats {
                    node: *idx,
                    omega: entry.w,
                    foreground: entry.mark == 1,
                });
            }
        }
        if let Some(entry) = entries.first() {
            bail!("{RESULT_FILE} refers to unknown node {}", entry.node);
        }

        let model_type = parsed
            .model_type
            .unwrap_or_else(|| request.family.model_type());
        let mut result = FitResult {
            family: request.family,
            condition: request.condition,
            model_name: request.run_label(),
            model_type,
            lnl: parsed.lnl.unwrap_or(f64::NEG_INFINITY),
            branches,
            classes: ClassTables::new(),
            workdir: None,
        };
        if model_type.has_site_classes() {
            result.classes = read_classes(dir)?;
        }
        Ok(result)
    }
}

fn read_classes(dir: &Path) -> Result<ClassTables> {
    let content = fs::read_to_string(dir.join(CLASSES_FILE))
        .with_context(|| format!("No {CLASSES_FILE} written by the fitter"))?;
    let classes = serde_json::from_str(&content)
        .with_context(|| format!("Malformed {CLASSES_FILE}"))?;
    Ok(classes)
}

impl Fitter for CommandFitter {
    fn fit(&self, request: &FitRequest) -> Result<FitResult> {
        let label = request.run_label();
        fs::create_dir_all(&self.work_root)?;
        let dir = Builder::new()
            .prefix(&format!("{label}."))
            .tempdir_in(&self.work_root)?;
        debug!("Running {label} in {}", dir.path().display());

        let outcome = self
            .write_inputs(dir.path(), request)
            .and_then(|_| self.run_program(dir.path()))
            .and_then(|_| self.read_result(dir.path(), request));

        match outcome {
            Ok(mut result) => {
                result.workdir = Some(dir.keep());
                Ok(result)
            }
            Err(e) => {
                if self.keep_workdirs {
                    let path = dir.keep();
                    info!("Keeping working directory {} of {label}", path.display());
                }
                Err(e)
            }
        }
    }

    fn reload(&self, result: &mut FitResult) -> Result<()> {
        let dir = result
            .workdir
            .clone()
            .ok_or_else(|| anyhow!("No fitter output left to reload for {}", result.model_name))?;
        debug!(
            "Reloading {} as a {} model from {}",
            result.model_name,
            result.model_type,
            dir.display()
        );
        result.classes = read_classes(&dir)?;
        Ok(())
    }

    fn release(&self, result: &mut FitResult) {
        let Some(dir) = &result.workdir else {
            return;
        };
        if self.keep_workdirs {
            info!("Keeping working directory {}", dir.display());
            return;
        }
        match fs::remove_dir_all(dir) {
            Ok(()) => result.workdir = None,
            Err(e) => warn!("Could not remove working directory {}: {e}", dir.display()),
        }
    }
}
