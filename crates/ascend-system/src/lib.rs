//! Solver-side view of an instantiated model: flat variable and relation
//! lists with flag words, filters and residual evaluation.

pub mod error;
pub mod flags;
pub mod rel;
pub mod system;
pub mod var;

pub use error::SystemError;
pub use flags::{Filter, RelFilter, RelFlags, VarFilter, VarFlags};
pub use rel::{comparator, RelKind, RelRelation};
pub use system::{IncidenceMatrix, SlvSystem, SystemStats};
pub use var::VarVariable;
