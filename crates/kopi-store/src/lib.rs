//! Backends for the kopi assistant.
//!
//! Concrete implementations of the collaborator traits the tool adapters
//! consume: a SQLite outlet store and an in-memory lexical product index.
//! Both are read-only from the agent's perspective and safe to share across
//! concurrent sessions.

pub mod error;
pub mod outlets;
pub mod products;

pub use error::{StoreError, StoreResult};
pub use outlets::{Outlet, OutletStore};
pub use products::{Product, ProductIndex};
