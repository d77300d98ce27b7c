//! Data model shared by the ASCEND compiler and solver layers: packed bit
//! lists, interned symbols, the statement/expression AST, type descriptions,
//! the type library and structured diagnostics.

pub mod bit;
pub mod builder;
pub mod diagnostic;
pub mod error;
pub mod expr;
pub mod library;
pub mod name;
pub mod notes;
pub mod statement;
pub mod symbol;
pub mod types;

pub use bit::BitList;
pub use builder::TypeBuilder;
pub use diagnostic::{
    Diagnostic, DiagnosticCode, DiagnosticLocation, DiagnosticSink, Reporter, Severity,
    WarningLevel,
};
pub use error::CoreError;
pub use expr::{BinOp, Expr, LogicalOp, MathFunc, RelOp, UnaryOp};
pub use library::{LibraryDocument, Section, TypeLibrary};
pub use name::{Name, NamePart, SetExpr, SetItem};
pub use statement::{Case, ExtMode, FlowKind, ForKind, SourceLoc, Statement, StatementKind};
pub use symbol::{Symbol, SymbolTable};
pub use types::{
    fundamental_types, AtomSpec, BaseKind, Literal, Method, Note, TypeDescription, ValueType,
};
