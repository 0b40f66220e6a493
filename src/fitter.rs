use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::alignment::Alignment;
use crate::marking::MarkSet;
use crate::models::{ModelFamily, ModelType, StartingCondition};
use crate::tree::{NodeIdx, Tree};
use crate::Result;

mod command_fitter;
pub use command_fitter::CommandFitter;

/// Per site class parameter tables keyed by table name, e.g. `proportions` or `w`.
pub type ClassTables = BTreeMap<String, Vec<f64>>;

/// Fitted omega of one branch, identified by the node below it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchStats {
    pub node: NodeIdx,
    pub omega: f64,
    pub foreground: bool,
}

/// Everything the fitter needs for one fit of one family from one starting condition.
#[derive(Debug, Clone, Copy)]
pub struct FitRequest<'a> {
    pub tree: &'a Tree,
    pub alignment: &'a Alignment,
    pub marks: &'a MarkSet,
    pub family: ModelFamily,
    pub condition: StartingCondition,
}

impl FitRequest<'_> {
    pub fn run_label(&self) -> String {
        self.family.run_label(&self.condition)
    }
}

/// Outcome of one fitter invocation.
///
/// Branch statistics are stored in postorder of the fitted tree.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub family: ModelFamily,
    pub condition: StartingCondition,
    pub model_name: String,
    pub model_type: ModelType,
    pub lnl: f64,
    pub branches: Vec<BranchStats>,
    pub classes: ClassTables,
    /// Working directory the fitter output was read from, if it still exists.
    pub workdir: Option<PathBuf>,
}

impl FitResult {
    /// Result with no parameters and a log-likelihood of −∞.
    pub fn failed(family: ModelFamily, condition: StartingCondition) -> Self {
        Self {
            family,
            condition,
            model_name: family.run_label(&condition),
            model_type: family.model_type(),
            lnl: f64::NEG_INFINITY,
            branches: Vec::new(),
            classes: ClassTables::new(),
            workdir: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        !self.lnl.is_finite()
    }

    pub fn branch(&self, node: &NodeIdx) -> Option<&BranchStats> {
        self.branches.iter().find(|b| b.node == *node)
    }
}

/// External program fitting a codon model family to an alignment on a marked tree.
pub trait Fitter: Send + Sync {
    /// Runs one blocking fit.
    fn fit(&self, request: &FitRequest) -> Result<FitResult>;

    /// Re-reads the per site class output of a finished fit into `result`, interpreting it
    /// according to the already updated `result.model_type`.
    fn reload(&self, result: &mut FitResult) -> Result<()>;

    /// Called once the driver no longer needs the fitter output of `result`.
    fn release(&self, _result: &mut FitResult) {}
}

#[cfg(test)]
#[cfg_attr(coverage, coverage(off))]
mod tests;
