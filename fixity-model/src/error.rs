use std::fmt::{self, Display};

/// Errors produced by model constructors and validation routines.
#[derive(Debug)]
pub enum ModelError {
    InvalidTarget(String),
    UnknownAlgorithm(String),
    UnknownBackendKind(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidTarget(msg) => write!(f, "invalid target: {msg}"),
            ModelError::UnknownAlgorithm(name) => {
                write!(f, "unknown digest algorithm: {name}")
            }
            ModelError::UnknownBackendKind(name) => {
                write!(f, "unknown backend kind: {name}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
