use std::error::Error;
use std::fmt;

/// Malformed or inconsistent input data (alignment, tree or taxa list).
pub struct DataError {
    pub message: String,
}

impl DataError {
    pub fn new(message: impl Into<String>) -> Self {
        DataError {
            message: message.into(),
        }
    }
}

impl fmt::Debug for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for DataError {}

/// Failures of a fitting session.
///
/// Marking failures abort the whole session, family-level failures only abort the
/// family they belong to and a failed fitter invocation is absorbed by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum FitError {
    /// A foreground taxon has no matching leaf in the tree.
    TaxonNotFound { taxon: String },
    /// The foreground taxa list is empty.
    EmptyForegroundSet,
    /// No starting condition of the family produced a usable fit.
    NoFitsProduced { family: String, attempted: usize },
    /// The external fitter failed for one starting condition.
    FitterInvocationFailed {
        family: String,
        condition: String,
        reason: String,
    },
    /// The parameter tables of a fit do not have the shape the family schema expects.
    SchemaMismatch { family: String, key: String },
    /// Requested hypothesis test is not known.
    UnknownTest { name: String, valid: Vec<String> },
}

impl fmt::Display for FitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaxonNotFound { taxon } => {
                write!(f, "Foreground taxon '{taxon}' not found among the tree leaves")
            }
            Self::EmptyForegroundSet => write!(f, "No foreground taxa given"),
            Self::NoFitsProduced { family, attempted } => write!(
                f,
                "No fits produced for model {family} ({attempted} starting condition(s) tried)"
            ),
            Self::FitterInvocationFailed {
                family,
                condition,
                reason,
            } => write!(
                f,
                "Fitter failed for model {family} with starting condition {condition}: {reason}"
            ),
            Self::SchemaMismatch { family, key } => write!(
                f,
                "Fit of model {family} is missing expected parameter '{key}'"
            ),
            Self::UnknownTest { name, valid } => write!(
                f,
                "Unknown test '{name}', valid tests are: {}",
                valid.join(", ")
            ),
        }
    }
}

impl Error for FitError {}
