use std::path::{Path, PathBuf};

use anyhow::bail;
use log::{error, info};

use crate::alignment::Alignment;
use crate::driver::{select_best, ModelFitDriver};
use crate::errors::FitError;
use crate::extract::{extract, StatisticsRecord};
use crate::fitter::Fitter;
use crate::io::{record_path, validate_taxa_ids, write_record};
use crate::marking::{compute_mark_set, MarkSet};
use crate::models::{HypothesisTest, ModelFamily};
use crate::tree::Tree;
use crate::Result;

/// Where and under which names the statistics records are written.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutput {
    pub clade: String,
    pub gene: String,
    pub out_dir: PathBuf,
    pub overwrite: bool,
}

impl RecordOutput {
    pub fn path(&self, family: ModelFamily) -> PathBuf {
        record_path(&self.out_dir, &self.clade, &self.gene, family.name())
    }
}

/// Outcome of one family of a hypothesis test.
#[derive(Debug)]
pub struct FamilyOutcome {
    pub family: ModelFamily,
    pub record: Result<(StatisticsRecord, PathBuf)>,
}

/// Fitting session for one tree, alignment and foreground taxa list.
///
/// The mark set is computed once when the session is created and shared read-only by every fit.
pub struct FitSession<'a, F: Fitter> {
    tree: &'a Tree,
    alignment: &'a Alignment,
    marks: MarkSet,
    fitter: &'a F,
    output: RecordOutput,
}

impl<'a, F: Fitter> FitSession<'a, F> {
    /// Checks that tree and alignment describe the same taxa and marks the foreground branches.
    /// Fails before anything is fitted if a foreground taxon is not a leaf of the tree.
    pub fn new(
        tree: &'a Tree,
        alignment: &'a Alignment,
        foreground_taxa: &[String],
        fitter: &'a F,
        output: RecordOutput,
    ) -> Result<Self> {
        validate_taxa_ids(tree, alignment)?;
        let marks = compute_mark_set(tree, foreground_taxa)?;
        Ok(Self {
            tree,
            alignment,
            marks,
            fitter,
            output,
        })
    }

    pub fn marks(&self) -> &MarkSet {
        &self.marks
    }

    /// Fits all starting conditions of the family and extracts the record of the best fit.
    pub fn fit_family(&self, family: ModelFamily) -> Result<StatisticsRecord> {
        let driver = ModelFitDriver::new(self.tree, self.alignment, &self.marks, self.fitter);
        let results = driver.run_family(family);
        let best = select_best(family, &results)?;
        if best.is_failed() {
            bail!(FitError::NoFitsProduced {
                family: family.name().to_string(),
                attempted: results.len(),
            });
        }
        extract(best, &self.output.clade, &self.output.gene, &self.marks)
    }

    /// Fits the family and writes its record, returning the record and the file it went to.
    pub fn run_family(&self, family: ModelFamily) -> Result<(StatisticsRecord, PathBuf)> {
        let record = self.fit_family(family)?;
        let path = self.output.path(family);
        write_record(&record, &path, self.output.overwrite)?;
        info!(
            "Results for the best model {} written to {}",
            family,
            path.display()
        );
        Ok((record, path))
    }

    /// Runs the families of the test in order. A family that fails is logged and reported in
    /// its outcome, the remaining families still run.
    pub fn run_test(&self, test: HypothesisTest) -> Vec<FamilyOutcome> {
        info!(
            "Running test {} on {} with foreground {}.",
            test,
            self.output.gene,
            self.marks
        );
        self.run_families(&test.families())
    }

    /// Runs the given families in order, with the same failure isolation as [`Self::run_test`].
    pub fn run_families(&self, families: &[ModelFamily]) -> Vec<FamilyOutcome> {
        families
            .iter()
            .map(|&family| {
                let record = self.run_family(family);
                if let Err(e) = &record {
                    error!("Model {family} failed: {e:#}");
                }
                FamilyOutcome { family, record }
            })
            .collect()
    }

    pub fn out_dir(&self) -> &Path {
        &self.output.out_dir
    }
}
