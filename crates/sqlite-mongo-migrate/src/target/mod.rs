//! Document store implementations.
//!
//! - [`MongoStore`]: the production store, backed by the MongoDB driver
//! - [`MemoryStore`]: an in-process store with the same query semantics,
//!   used by tests
//!
//! Both implement [`DocumentStore`].

mod memory;
mod mongo;
pub mod query;

pub use crate::core::traits::{DocumentStore, QueryOptions, UpdateOutcome};
pub use memory::MemoryStore;
pub use mongo::MongoStore;
