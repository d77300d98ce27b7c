use ascend_core::{CoreError, DiagnosticCode};
use thiserror::Error;

use crate::instance::InstanceId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Name conflict: '{name}' is already defined in '{owner}'")]
    NameConflict { name: String, owner: String },

    #[error("Type resolution failure: type '{0}' not found")]
    TypeResolutionFailure(String),

    #[error("Arity mismatch for '{type_name}': expected {expected} argument(s), found {found}")]
    ArityMismatch {
        type_name: String,
        expected: usize,
        found: usize,
    },

    #[error("Illegal context: {0}")]
    IllegalContext(String),

    #[error("Structural mismatch: {0}")]
    StructuralMismatch(String),

    #[error("Instance '{0}' is already complete")]
    AlreadyComplete(String),

    #[error("Undefined name: {0}")]
    UndefinedName(String),

    #[error("Invalid relation: {0}")]
    InvalidRelation(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Units error: {0}")]
    Units(String),

    #[error("External function error: {0}")]
    External(String),

    #[error("Stale instance handle {0}")]
    StaleHandle(InstanceId),

    #[error("Compiler is not initialized")]
    NotInitialized,

    #[error("Compiler is already initialized")]
    AlreadyInitialized,

    #[error("Simulation '{0}' already exists")]
    DuplicateSimulation(String),

    #[error("Simulation '{0}' not found")]
    SimulationNotFound(String),

    #[error("Instantiation of '{type_name}' failed with {count} error(s):\n{summary}")]
    Instantiation {
        type_name: String,
        count: usize,
        summary: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl CompileError {
    /// Diagnostic code used when this error is reported rather than returned.
    pub fn code(&self) -> DiagnosticCode {
        match self {
            CompileError::NameConflict { .. } => DiagnosticCode::NameConflict,
            CompileError::TypeResolutionFailure(_) => DiagnosticCode::TypeResolution,
            CompileError::ArityMismatch { .. } => DiagnosticCode::ArityMismatch,
            CompileError::IllegalContext(_) => DiagnosticCode::IllegalContext,
            CompileError::StructuralMismatch(_) => DiagnosticCode::StructuralMismatch,
            CompileError::AlreadyComplete(_) => DiagnosticCode::AlreadyComplete,
            CompileError::UndefinedName(_) => DiagnosticCode::UndefinedName,
            CompileError::InvalidRelation(_) => DiagnosticCode::InvalidRelation,
            CompileError::Evaluation(_) => DiagnosticCode::Evaluation,
            CompileError::Units(_) => DiagnosticCode::Units,
            CompileError::External(_) => DiagnosticCode::External,
            CompileError::Core(CoreError::TypeNotFound(_)) => DiagnosticCode::TypeResolution,
            CompileError::Core(_) => DiagnosticCode::Library,
            _ => DiagnosticCode::Other,
        }
    }
}

impl From<std::io::Error> for CompileError {
    fn from(err: std::io::Error) -> Self {
        CompileError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for CompileError {
    fn from(err: toml::de::Error) -> Self {
        CompileError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for CompileError {
    fn from(err: serde_yaml::Error) -> Self {
        CompileError::Core(CoreError::Document(err.to_string()))
    }
}
