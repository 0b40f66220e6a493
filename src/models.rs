use std::fmt::{self, Display};
use std::str::FromStr;

use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};

use crate::errors::{DataError, FitError};
use crate::Result;

/// Initial omega values tried by every family that does not restrict omega.
pub static OMEGAS: &[f64] = &[0.2, 0.7, 1.2];
/// Omega of the null-restricted branch-site model, fixed during the fit.
pub static NULL_OMEGAS: &[f64] = &[1.0];

/// How the fitter initialises branch lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchLengthInit {
    /// Start from the branch lengths of the input tree.
    Fixed,
    /// Start from random branch lengths.
    Random,
}

impl BranchLengthInit {
    pub const ALL: [BranchLengthInit; 2] = [BranchLengthInit::Fixed, BranchLengthInit::Random];

    /// Value of the codeml `fix_blength` option.
    pub fn fix_blength(&self) -> i8 {
        match self {
            BranchLengthInit::Fixed => 1,
            BranchLengthInit::Random => -1,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BranchLengthInit::Fixed => "bl",
            BranchLengthInit::Random => "random",
        }
    }
}

/// One seed of a multi-start fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartingCondition {
    pub blen_init: BranchLengthInit,
    pub omega: f64,
}

impl StartingCondition {
    pub fn new(blen_init: BranchLengthInit, omega: f64) -> Self {
        Self { blen_init, omega }
    }

    /// Short label, e.g. `bl_0.7w` or `random_1.0w`.
    pub fn label(&self) -> String {
        format!("{}_{:?}w", self.blen_init.label(), self.omega)
    }
}

impl Display for StartingCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Kind of model a fit declares itself to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelType {
    Null,
    Branch,
    Site,
    BranchSite,
    User,
}

impl ModelType {
    /// Whether fits of this type come with per site class tables.
    pub fn has_site_classes(&self) -> bool {
        matches!(self, ModelType::Site | ModelType::BranchSite)
    }
}

impl Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelType::Null => "null",
            ModelType::Branch => "branch",
            ModelType::Site => "site",
            ModelType::BranchSite => "branch-site",
            ModelType::User => "user",
        };
        write!(f, "{name}")
    }
}

/// Control file options of a codeml run that identify the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodemlSettings {
    pub model: u8,
    #[serde(rename = "NSsites")]
    pub ns_sites: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_omega: Option<u8>,
    #[serde(rename = "ncatG", skip_serializing_if = "Option::is_none")]
    pub ncat_g: Option<u8>,
}

impl Display for CodemlSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model = {}, NSsites = {}", self.model, self.ns_sites)?;
        if let Some(fix_omega) = self.fix_omega {
            write!(f, ", fix_omega = {fix_omega}")?;
        }
        if let Some(ncat_g) = self.ncat_g {
            write!(f, ", ncatG = {ncat_g}")?;
        }
        Ok(())
    }
}

/// Layout of the statistics record of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSchema {
    /// One omega shared by all branches.
    SingleRate,
    /// Background and foreground branch omegas.
    BranchPartition,
    /// Proportion and omega per site class.
    SiteClasses { classes: usize },
    /// Proportion, background and foreground omega per site class, read from the tables
    /// `background` and `foreground`.
    BranchSiteClasses {
        classes: usize,
        background: &'static str,
        foreground: &'static str,
    },
}

pub static PROPORTIONS: &str = "proportions";
pub static SITE_OMEGAS: &str = "w";

/// What happens after the base fitter call of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The base call result is final.
    Direct,
    /// The declared model type is replaced and the auxiliary site class output is re-read.
    ReloadAs(ModelType),
}

/// Codon model families that can be fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    M0,
    BFree,
    BsA1,
    BsA,
    M3,
    BsD,
    M2aRel,
    BsC,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 8] = [
        ModelFamily::M0,
        ModelFamily::BFree,
        ModelFamily::BsA1,
        ModelFamily::BsA,
        ModelFamily::M3,
        ModelFamily::BsD,
        ModelFamily::M2aRel,
        ModelFamily::BsC,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ModelFamily::M0 => "M0",
            ModelFamily::BFree => "b_free",
            ModelFamily::BsA1 => "bsA1",
            ModelFamily::BsA => "bsA",
            ModelFamily::M3 => "M3",
            ModelFamily::BsD => "bsD",
            ModelFamily::M2aRel => "M2a_rel",
            ModelFamily::BsC => "bsC",
        }
    }

    /// Initial omega values of the grid.
    pub fn omegas(&self) -> &'static [f64] {
        match self {
            ModelFamily::BsA1 => NULL_OMEGAS,
            _ => OMEGAS,
        }
    }

    /// Starting conditions in enumeration order: all omegas with fixed branch lengths first,
    /// then all omegas with random branch lengths.
    pub fn grid(&self) -> Vec<StartingCondition> {
        BranchLengthInit::ALL
            .iter()
            .flat_map(|blen_init| {
                self.omegas()
                    .iter()
                    .map(|omega| StartingCondition::new(*blen_init, *omega))
            })
            .collect()
    }

    /// Label of one fit, e.g. `bsA.random_1.2w`.
    pub fn run_label(&self, condition: &StartingCondition) -> String {
        format!("{}.{}", self.name(), condition.label())
    }

    pub fn settings(&self) -> CodemlSettings {
        let (model, ns_sites, fix_omega, ncat_g) = match self {
            ModelFamily::M0 => (0, 0, None, None),
            ModelFamily::BFree => (2, 0, Some(0), None),
            ModelFamily::BsA1 => (2, 2, Some(1), None),
            ModelFamily::BsA => (2, 2, Some(0), None),
            ModelFamily::M3 => (0, 3, None, Some(3)),
            ModelFamily::BsD => (3, 3, None, Some(3)),
            ModelFamily::M2aRel => (0, 22, None, Some(3)),
            ModelFamily::BsC => (3, 2, None, None),
        };
        CodemlSettings {
            model,
            ns_sites,
            fix_omega,
            ncat_g,
        }
    }

    /// Model type the fitter is expected to report for this family.
    pub fn model_type(&self) -> ModelType {
        match self {
            ModelFamily::M0 => ModelType::Null,
            ModelFamily::BFree => ModelType::Branch,
            ModelFamily::M3 => ModelType::Site,
            ModelFamily::M2aRel => ModelType::User,
            ModelFamily::BsA1 | ModelFamily::BsA | ModelFamily::BsD | ModelFamily::BsC => {
                ModelType::BranchSite
            }
        }
    }

    pub fn completion(&self) -> Completion {
        match self {
            ModelFamily::M2aRel => Completion::ReloadAs(ModelType::BranchSite),
            _ => Completion::Direct,
        }
    }

    pub fn schema(&self) -> RecordSchema {
        match self {
            ModelFamily::M0 => RecordSchema::SingleRate,
            ModelFamily::BFree => RecordSchema::BranchPartition,
            ModelFamily::M3 | ModelFamily::M2aRel => RecordSchema::SiteClasses { classes: 3 },
            ModelFamily::BsD | ModelFamily::BsC => RecordSchema::BranchSiteClasses {
                classes: 3,
                background: "branch type 0",
                foreground: "branch type 1",
            },
            ModelFamily::BsA1 | ModelFamily::BsA => RecordSchema::BranchSiteClasses {
                classes: 4,
                background: "background w",
                foreground: "foreground w",
            },
        }
    }
}

impl Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ModelFamily {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        if name == "XX" {
            return Ok(ModelFamily::M2aRel);
        }
        match ModelFamily::ALL.iter().find(|family| family.name() == name) {
            Some(family) => Ok(*family),
            None => bail!(DataError::new(format!("Unknown model family {name}"))),
        }
    }
}

/// Named hypothesis test, a null and an alternative family fitted in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HypothesisTest {
    Branch,
    BsA,
    CmD,
    CmC,
}

impl HypothesisTest {
    pub const ALL: [HypothesisTest; 4] = [
        HypothesisTest::Branch,
        HypothesisTest::BsA,
        HypothesisTest::CmD,
        HypothesisTest::CmC,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HypothesisTest::Branch => "branch",
            HypothesisTest::BsA => "bsA",
            HypothesisTest::CmD => "cmD",
            HypothesisTest::CmC => "cmC",
        }
    }

    pub fn families(&self) -> [ModelFamily; 2] {
        match self {
            HypothesisTest::Branch => [ModelFamily::M0, ModelFamily::BFree],
            HypothesisTest::BsA => [ModelFamily::BsA1, ModelFamily::BsA],
            HypothesisTest::CmD => [ModelFamily::M3, ModelFamily::BsD],
            HypothesisTest::CmC => [ModelFamily::M2aRel, ModelFamily::BsC],
        }
    }

    /// Test names with their families, e.g. `branch (M0, b_free)`.
    pub fn listing() -> Vec<String> {
        HypothesisTest::ALL
            .iter()
            .map(|test| {
                let [null, alt] = test.families();
                format!("{} ({null}, {alt})", test.name())
            })
            .collect()
    }
}

impl Display for HypothesisTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HypothesisTest {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match HypothesisTest::ALL.iter().find(|test| test.name() == name) {
            Some(test) => Ok(*test),
            None => bail!(FitError::UnknownTest {
                name: name.to_string(),
                valid: HypothesisTest::listing(),
            }),
        }
    }
}
