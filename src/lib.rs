use anyhow::Error;

pub mod alignment;
pub mod driver;
pub mod errors;
pub mod extract;
pub mod fitter;
pub mod io;
pub mod macros;
pub mod marking;
pub mod models;
pub mod session;
pub mod tree;

#[cfg(test)]
mod test_helpers;

pub type Result<T> = std::result::Result<T, Error>;
