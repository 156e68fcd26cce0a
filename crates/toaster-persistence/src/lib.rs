//! Diesel persistence for the TOA pipeline catalog.
//!
//! `schema` mirrors the embedded migrations; [`DieselCatalog`] implements
//! `toaster_domain::Catalog` on top of an r2d2 pool.

mod catalog_persistence;
mod rows;
pub mod schema;

#[cfg(not(feature = "mysql"))]
pub use catalog_persistence::new_sqlite_for_test;
pub use catalog_persistence::{new_from_env, DbConnection, DieselCatalog, MIGRATIONS};
