//! Tool adapters for the kopi assistant.
//!
//! Each capability the agent can route a turn to lives here behind a uniform
//! contract: an adapter takes a validated argument and returns a
//! [`ToolOutcome`] — never a panic, never an uncontrolled error.  Adapters are
//! pure with respect to conversation state; they never see the session store.
//!
//! ## Modules
//!
//! - [`outcome`] -- The closed tool set ([`ToolKind`]) and result contract.
//! - [`backend`] -- Traits for the external collaborators the adapters
//!   delegate to (retrieval index, outlet database, reasoning service).
//! - [`calculator`] -- Arithmetic evaluation with a strict token allow-list.
//! - [`products`] -- Semantic product retrieval over a vector index.
//! - [`outlets`] -- Natural-language outlet lookup via guarded SQL.

pub mod backend;
pub mod calculator;
pub mod outcome;
pub mod outlets;
pub mod products;

pub use backend::{
    BackendError, OutletDatabase, ReasoningService, RetrievalBackend, Row, Snippet,
};
pub use calculator::{Calculator, CalculatorConfig};
pub use outcome::{ToolKind, ToolOutcome, ToolValue};
pub use outlets::{OutletQuery, OutletQueryConfig, SqlRejection};
pub use products::{ProductSearch, ProductSearchConfig};
