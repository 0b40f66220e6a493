use anyhow::bail;
use log::{debug, info, warn};

use crate::alignment::Alignment;
use crate::errors::FitError;
use crate::fitter::{FitRequest, FitResult, Fitter};
use crate::marking::MarkSet;
use crate::models::{Completion, ModelFamily, StartingCondition};
use crate::tree::Tree;
use crate::Result;

/// Runs the starting condition grid of model families against one marked tree and alignment.
pub struct ModelFitDriver<'a, F: Fitter> {
    tree: &'a Tree,
    alignment: &'a Alignment,
    marks: &'a MarkSet,
    fitter: &'a F,
}

impl<'a, F: Fitter> ModelFitDriver<'a, F> {
    pub fn new(
        tree: &'a Tree,
        alignment: &'a Alignment,
        marks: &'a MarkSet,
        fitter: &'a F,
    ) -> Self {
        Self {
            tree,
            alignment,
            marks,
            fitter,
        }
    }

    /// Fits the family once per starting condition of its grid and returns the results in
    /// enumeration order. A failed fit is logged and returned with a log-likelihood of −∞,
    /// so the result always has one entry per starting condition.
    pub fn run_family(&self, family: ModelFamily) -> Vec<FitResult> {
        let grid = family.grid();
        info!(
            "Fitting model {} ({}) from {} starting conditions.",
            family,
            family.settings(),
            grid.len()
        );
        let results = run_grid(self, family, grid);
        let failed = results.iter().filter(|r| r.is_failed()).count();
        if failed > 0 {
            warn!(
                "{} of {} fits of model {} failed.",
                failed,
                results.len(),
                family
            );
        }
        results
    }

    fn run_condition(&self, family: ModelFamily, condition: StartingCondition) -> FitResult {
        let request = FitRequest {
            tree: self.tree,
            alignment: self.alignment,
            marks: self.marks,
            family,
            condition,
        };
        info!(
            "Testing model {} with starting branch length option {} and initial omega {:?}w.",
            family,
            condition.blen_init.label(),
            condition.omega
        );
        let outcome = self
            .fitter
            .fit(&request)
            .and_then(|result| self.complete(result));

        match outcome {
            Ok(mut result) => {
                self.fitter.release(&mut result);
                if result.lnl.is_nan() {
                    warn!("Fit {} returned NaN log-likelihood.", result.model_name);
                    result.lnl = f64::NEG_INFINITY;
                }
                info!(
                    "Fit of model {} ({}) finished with log-likelihood {}.",
                    family,
                    condition.label(),
                    result.lnl
                );
                result
            }
            Err(e) => {
                let error = FitError::FitterInvocationFailed {
                    family: family.name().to_string(),
                    condition: condition.label(),
                    reason: format!("{e:#}"),
                };
                warn!("{error}");
                FitResult::failed(family, condition)
            }
        }
    }

    /// Applies the post-processing the family needs after the base fitter call.
    fn complete(&self, mut result: FitResult) -> Result<FitResult> {
        match result.family.completion() {
            Completion::Direct => Ok(result),
            Completion::ReloadAs(model_type) => {
                debug!(
                    "Declaring {} a {} model and reloading its site classes.",
                    result.model_name, model_type
                );
                result.model_type = model_type;
                if let Err(e) = self.fitter.reload(&mut result) {
                    self.fitter.release(&mut result);
                    return Err(e);
                }
                Ok(result)
            }
        }
    }
}

cfg_if::cfg_if! {
if #[cfg(feature = "par-grid")] {
fn run_grid<F: Fitter>(
    driver: &ModelFitDriver<F>,
    family: ModelFamily,
    grid: Vec<StartingCondition>,
) -> Vec<FitResult> {
    use rayon::prelude::*;
    grid.into_par_iter()
        .map(|condition| driver.run_condition(family, condition))
        .collect()
}
} else {
fn run_grid<F: Fitter>(
    driver: &ModelFitDriver<F>,
    family: ModelFamily,
    grid: Vec<StartingCondition>,
) -> Vec<FitResult> {
    grid.into_iter()
        .map(|condition| driver.run_condition(family, condition))
        .collect()
}
}
}

/// Returns the fit with the highest log-likelihood, the earliest one on exact ties.
/// Bails with [`FitError::NoFitsProduced`] if there are no results.
///
/// # Example
/// ```
/// use cladefit::driver::select_best;
/// use cladefit::fitter::FitResult;
/// use cladefit::models::ModelFamily;
///
/// let family = ModelFamily::M0;
/// let mut results: Vec<FitResult> = family
///     .grid()
///     .into_iter()
///     .map(|c| FitResult::failed(family, c))
///     .collect();
/// results[2].lnl = -10.0;
/// results[4].lnl = -10.0;
/// let best = select_best(family, &results).unwrap();
/// assert_eq!(best.model_name, "M0.bl_1.2w");
/// ```
pub fn select_best(family: ModelFamily, results: &[FitResult]) -> Result<&FitResult> {
    let Some((first, rest)) = results.split_first() else {
        bail!(FitError::NoFitsProduced {
            family: family.name().to_string(),
            attempted: 0,
        });
    };
    let mut best = first;
    for result in rest {
        if result.lnl > best.lnl {
            best = result;
        }
    }
    info!(
        "Best fit of model {} is {} with log-likelihood {}.",
        family, best.model_name, best.lnl
    );
    Ok(best)
}
