//! Error types for the reverse inference pipeline.

use thiserror::Error;

/// Everything that can stop an analysis run.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid command line arguments
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Volume rank other than 3 or 4
    #[error("The nifti file must contain 3 or 4 dimensions, got {0}")]
    InputShape(usize),

    /// Values that cannot be interpreted (probabilities, corpus rows)
    #[error("Invalid input: {0}")]
    InputValue(String),

    /// Malformed or unsupported NIfTI content
    #[error("NIfTI error in {path}: {message}")]
    Nifti { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A region failed while being analysed; aborts the whole run
    #[error("Query for region {region} failed: {source}")]
    Query {
        region: i64,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    pub fn input(message: impl Into<String>) -> Self {
        Error::InputValue(message.into())
    }

    pub fn nifti(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Nifti {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn query(region: i64, source: Error) -> Self {
        Error::Query {
            region,
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
