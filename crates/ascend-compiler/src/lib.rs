//! Instantiation engine for the ASCEND modelling language: turns type
//! descriptions into instance trees, checks type legality, runs methods and
//! manages the compiler lifecycle.

pub mod config;
pub mod context;
pub mod error;
pub mod evaluate;
pub mod extfunc;
pub mod instance;
pub mod instantiate;
pub mod method;
pub mod relation;
pub mod simulation;
pub mod typelint;
pub mod units;
pub mod value;

pub use config::{CompilerConfig, InstantiationPolicy};
pub use context::{CompilerContext, CompilerState, InitStage, LibraryFormat, MethodReport};
pub use error::CompileError;
pub use evaluate::{EvalMode, Evaluator, Scope};
pub use extfunc::ExternalLibrary;
pub use instance::{
    ChildKey, Instance, InstanceArena, InstanceId, InstanceKind, InterfaceToken, RelationData,
    RelationForm, RelocationListener, Term,
};
pub use method::ProcStatus;
pub use simulation::Simulation;
pub use typelint::{LintCode, LintContext, Linter};
pub use units::{Dimensions, UnitsTable};
pub use value::{SetValue, Value};
