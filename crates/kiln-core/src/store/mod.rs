//! Relational Store
//!
//! SQLite persistence for topics, Source Runs and Bricks, plus the shared
//! migration module that also owns the graph and prompt tables. One database
//! file backs every store; each store holds its own connection.

pub mod migrations;
mod sync;

pub use sync::{
    Brick, BrickState, SourceAddress, SourceRunRecord, StoreError, SyncStore, Topic,
    TopicDefinition, configure_connection,
};

/// Store result type
pub type Result<T> = std::result::Result<T, StoreError>;
