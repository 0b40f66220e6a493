use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::bail;

use crate::fitter::{BranchStats, ClassTables, FitRequest, FitResult, Fitter};
use crate::models::{ModelType, RecordSchema, PROPORTIONS, SITE_OMEGAS};
use crate::Result;

type LnlFn = Box<dyn Fn(&FitRequest) -> Option<f64> + Send + Sync>;

/// Fitter returning canned log-likelihoods, `None` makes the invocation fail.
///
/// Foreground branches get omega 2.5 and background branches 0.4, site class tables are
/// filled with `0.1 * (class + 1)` proportions and `class + 0.5` omegas.
pub(crate) struct StubFitter {
    lnl: LnlFn,
    pub(crate) fail_reload: bool,
    pub(crate) calls: Mutex<Vec<String>>,
    pub(crate) reloads: Mutex<Vec<String>>,
    pub(crate) released: Mutex<Vec<String>>,
}

pub(crate) static FG_OMEGA: f64 = 2.5;
pub(crate) static BG_OMEGA: f64 = 0.4;

impl StubFitter {
    pub(crate) fn new(lnl: impl Fn(&FitRequest) -> Option<f64> + Send + Sync + 'static) -> Self {
        Self {
            lnl: Box::new(lnl),
            fail_reload: false,
            calls: Mutex::new(Vec::new()),
            reloads: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn constant(lnl: f64) -> Self {
        Self::new(move |_| Some(lnl))
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn reloads(&self) -> Vec<String> {
        self.reloads.lock().unwrap().clone()
    }

    pub(crate) fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }
}

pub(crate) fn class_tables(schema: RecordSchema) -> ClassTables {
    let table = |classes: usize, offset: f64| -> Vec<f64> {
        (0..classes).map(|c| c as f64 + offset).collect()
    };
    let proportions = |classes: usize| -> Vec<f64> {
        (0..classes).map(|c| 0.1 * (c + 1) as f64).collect()
    };
    match schema {
        RecordSchema::SiteClasses { classes } => ClassTables::from([
            (PROPORTIONS.to_string(), proportions(classes)),
            (SITE_OMEGAS.to_string(), table(classes, 0.5)),
        ]),
        RecordSchema::BranchSiteClasses {
            classes,
            background,
            foreground,
        } => ClassTables::from([
            (PROPORTIONS.to_string(), proportions(classes)),
            (background.to_string(), table(classes, 0.5)),
            (foreground.to_string(), table(classes, 1.5)),
        ]),
        RecordSchema::SingleRate | RecordSchema::BranchPartition => ClassTables::new(),
    }
}

impl Fitter for StubFitter {
    fn fit(&self, request: &FitRequest) -> Result<FitResult> {
        let label = request.run_label();
        self.calls.lock().unwrap().push(label.clone());
        let Some(lnl) = (self.lnl)(request) else {
            bail!("fitter exited with exit status: 1");
        };
        let tree = request.tree;
        let branches = tree
            .postorder
            .iter()
            .filter(|idx| **idx != tree.root)
            .map(|idx| {
                let foreground = request.marks.contains(idx);
                BranchStats {
                    node: *idx,
                    omega: if foreground { FG_OMEGA } else { BG_OMEGA },
                    foreground,
                }
            })
            .collect();
        let model_type = request.family.model_type();
        let classes = if model_type.has_site_classes() {
            class_tables(request.family.schema())
        } else {
            ClassTables::new()
        };
        Ok(FitResult {
            family: request.family,
            condition: request.condition,
            model_name: label.clone(),
            model_type,
            lnl,
            branches,
            classes,
            workdir: Some(PathBuf::from(label)),
        })
    }

    fn reload(&self, result: &mut FitResult) -> Result<()> {
        self.reloads.lock().unwrap().push(result.model_name.clone());
        if self.fail_reload || result.model_type != ModelType::BranchSite {
            bail!("no site class output for {}", result.model_name);
        }
        result.classes = class_tables(result.family.schema());
        Ok(())
    }

    fn release(&self, result: &mut FitResult) {
        if let Some(dir) = result.workdir.take() {
            self.released
                .lock()
                .unwrap()
                .push(dir.to_string_lossy().to_string());
        }
    }
}
