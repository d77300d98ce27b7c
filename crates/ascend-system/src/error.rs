use ascend_compiler::{CompileError, InstanceId};
use ascend_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SystemError {
    #[error("Instance {0} is not a relation")]
    NotARelation(InstanceId),

    #[error("Instance {0} has no '{1}' part")]
    MissingPart(InstanceId, &'static str),

    #[error("Relation {0} is not part of this system")]
    UnknownRelation(InstanceId),

    #[error("Scan root {0} is not a model or simulation")]
    BadRoot(InstanceId),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Core(#[from] CoreError),
}
