//! Folio SDK: portfolio CMS backend with swappable data backends.
//!
//! The client side is a backend-agnostic SDK (query builder, auth, storage)
//! over three interchangeable adapters; the server side is the self-hosted
//! REST backend those adapters can point at.

pub mod backend;
pub mod elements;
pub mod error;
pub mod migrate;
pub mod query;
pub mod server;

pub use backend::{connect, detect_backend, shared, Backend, BackendConfig, BackendKind};
pub use error::{AppError, BackendError};
pub use migrate::connect_pool;
pub use query::{QueryBuilder, QueryCommand, QueryResult};
pub use server::{router, AppState};
