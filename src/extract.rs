use std::fmt::{self, Display};
use std::str::FromStr;

use anyhow::{bail, Error};
use itertools::Itertools;
use log::info;

use crate::errors::{DataError, FitError};
use crate::fitter::FitResult;
use crate::marking::MarkSet;
use crate::models::{RecordSchema, PROPORTIONS, SITE_OMEGAS};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteClass {
    pub proportion: f64,
    pub omega: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchSiteClass {
    pub proportion: f64,
    pub background: f64,
    pub foreground: f64,
}

/// Family specific part of a statistics record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValues {
    SingleRate { omega: f64 },
    BranchPartition { background: f64, foreground: f64 },
    SiteClasses(Vec<SiteClass>),
    BranchSiteClasses(Vec<BranchSiteClass>),
}

impl RecordValues {
    fn fields(&self) -> Vec<f64> {
        match self {
            RecordValues::SingleRate { omega } => vec![*omega],
            RecordValues::BranchPartition {
                background,
                foreground,
            } => vec![*background, *foreground],
            RecordValues::SiteClasses(classes) => classes
                .iter()
                .flat_map(|c| [c.proportion, c.omega])
                .collect(),
            RecordValues::BranchSiteClasses(classes) => classes
                .iter()
                .flat_map(|c| [c.proportion, c.background, c.foreground])
                .collect(),
        }
    }

    fn from_fields(fields: &[f64]) -> Result<Self> {
        Ok(match fields.len() {
            1 => RecordValues::SingleRate { omega: fields[0] },
            2 => RecordValues::BranchPartition {
                background: fields[0],
                foreground: fields[1],
            },
            6 => RecordValues::SiteClasses(
                fields
                    .chunks_exact(2)
                    .map(|c| SiteClass {
                        proportion: c[0],
                        omega: c[1],
                    })
                    .collect(),
            ),
            9 | 12 => RecordValues::BranchSiteClasses(
                fields
                    .chunks_exact(3)
                    .map(|c| BranchSiteClass {
                        proportion: c[0],
                        background: c[1],
                        foreground: c[2],
                    })
                    .collect(),
            ),
            n => bail!(DataError::new(format!(
                "Record has {n} model values, no model family writes that many"
            ))),
        })
    }
}

/// One output row: clade, gene, model family, log-likelihood and the family specific values.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsRecord {
    pub clade: String,
    pub gene: String,
    pub model: String,
    pub lnl: f64,
    pub values: RecordValues,
}

impl Display for StatisticsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{}",
            self.clade,
            self.gene,
            self.model,
            self.lnl,
            self.values.fields().iter().join(",")
        )
    }
}

impl FromStr for StatisticsRecord {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let fields = line.trim_end().split(',').collect::<Vec<_>>();
        if fields.len() < 5 {
            bail!(DataError::new(format!(
                "Record has {} fields, expected at least 5",
                fields.len()
            )));
        }
        let numbers = fields[3..]
            .iter()
            .map(|field| {
                field.trim().parse::<f64>().map_err(|_| {
                    Error::new(DataError::new(format!("Invalid number in record: {field}")))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(StatisticsRecord {
            clade: fields[0].to_string(),
            gene: fields[1].to_string(),
            model: fields[2].to_string(),
            lnl: numbers[0],
            values: RecordValues::from_fields(&numbers[1..])?,
        })
    }
}

/// Builds the statistics record of a best fit, reading only its parameter tables.
///
/// For the branch partition the foreground omega is taken from the most recently marked node
/// whose branch the fitter tagged foreground, the background omega from the first unmarked
/// branch in postorder tagged background. A parameter missing from the fit is reported as
/// [`FitError::SchemaMismatch`].
pub fn extract(
    best: &FitResult,
    clade: &str,
    gene: &str,
    marks: &MarkSet,
) -> Result<StatisticsRecord> {
    let family = best.family;
    let mismatch = |key: &str| schema_mismatch(best, key);

    let values = match family.schema() {
        RecordSchema::SingleRate => match best.branches.first() {
            Some(branch) => RecordValues::SingleRate {
                omega: branch.omega,
            },
            None => bail!(mismatch("w")),
        },
        RecordSchema::BranchPartition => {
            let foreground = marks
                .iter()
                .rev()
                .filter_map(|idx| best.branch(idx))
                .find(|branch| branch.foreground)
                .ok_or_else(|| mismatch("foreground w"))?;
            let background = best
                .branches
                .iter()
                .find(|branch| !marks.contains(&branch.node) && !branch.foreground)
                .ok_or_else(|| mismatch("background w"))?;
            RecordValues::BranchPartition {
                background: background.omega,
                foreground: foreground.omega,
            }
        }
        RecordSchema::SiteClasses { classes } => {
            let proportions = class_table(best, PROPORTIONS, classes)?;
            let omegas = class_table(best, SITE_OMEGAS, classes)?;
            RecordValues::SiteClasses(
                proportions
                    .iter()
                    .zip(omegas)
                    .map(|(proportion, omega)| SiteClass {
                        proportion: *proportion,
                        omega: *omega,
                    })
                    .collect(),
            )
        }
        RecordSchema::BranchSiteClasses {
            classes,
            background,
            foreground,
        } => {
            let proportions = class_table(best, PROPORTIONS, classes)?;
            let background = class_table(best, background, classes)?;
            let foreground = class_table(best, foreground, classes)?;
            RecordValues::BranchSiteClasses(
                itertools::izip!(proportions, background, foreground)
                    .map(|(proportion, background, foreground)| BranchSiteClass {
                        proportion: *proportion,
                        background: *background,
                        foreground: *foreground,
                    })
                    .collect(),
            )
        }
    };

    let record = StatisticsRecord {
        clade: clade.to_string(),
        gene: gene.to_string(),
        model: family.name().to_string(),
        lnl: best.lnl,
        values,
    };
    info!("Results for the best model {}: {}", best.model_name, record);
    Ok(record)
}

fn schema_mismatch(best: &FitResult, key: &str) -> FitError {
    FitError::SchemaMismatch {
        family: best.family.name().to_string(),
        key: key.to_string(),
    }
}

fn class_table<'a>(best: &'a FitResult, key: &str, classes: usize) -> Result<&'a [f64]> {
    match best.classes.get(key) {
        Some(values) if values.len() >= classes => Ok(&values[..classes]),
        _ => bail!(schema_mismatch(best, key)),
    }
}

#[cfg(test)]
#[cfg_attr(coverage, coverage(off))]
mod tests;
