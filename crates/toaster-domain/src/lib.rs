//! toaster-domain: what the pipeline stores and how it fails.
//!
//! Holds the error taxonomy, the runtime configuration, the row types of the
//! catalog, the [`Catalog`] contract with an in-memory implementation, the
//! parfile parser and the content store.

mod catalog;
mod catalog_memory;
mod config;
mod domain_stubs;
mod errors;
pub mod models;
pub mod parfile;
pub mod store;

pub use catalog::{sort_tim_toas, Catalog, Range, RelocateOp, ToaFilter};
pub use catalog_memory::InMemoryCatalog;
pub use config::{DebugFlags, ToasterConfig};
pub use domain_stubs::DomainStubs;
pub use errors::{ToasterError, ToasterWarning};
pub use models::*;
pub use store::{md5_file, move_file, ContentStore};
