//! External collaborators of the saga coordinator.

pub mod catalog;

pub use catalog::{CatalogLookup, InMemoryCatalog};
