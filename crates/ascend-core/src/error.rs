use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Bit list length mismatch: {left} bits vs {right} bits")]
    BitSetLengthMismatch { left: usize, right: usize },

    #[error("Bit position {pos} out of range for list of {len} bits")]
    OutOfRange { pos: usize, len: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Type '{0}' is already defined in the library")]
    DuplicateType(String),

    #[error("Type '{0}' not found in the library")]
    TypeNotFound(String),

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Library document error: {0}")]
    Document(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Document(err.to_string())
    }
}
