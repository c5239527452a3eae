//! Knowledge Graph
//!
//! A directed multigraph over typed edges, persisted in SQLite. Cyclic risk
//! lives only inside `OVERRIDES` and `SUPERSEDED_BY`, so cycle checks run
//! per-type at write time. Lifecycle governance, supersession and the
//! brick-unification migration all live on [`GraphStore`].

mod schema;
mod store;
pub mod validation;

pub use schema::{Edge, EdgeType, Intent, IntentType, Lifecycle, NodeKind, NodeRecord, ScopeNode};
pub use store::{GraphError, GraphStore};
