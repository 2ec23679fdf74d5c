//! Database module for Sentinel.
//!
//! Provides SQLite storage for samples, alerts and incidents.

mod models;
mod stats;
mod store;

pub use models::*;
pub use store::*;

#[cfg(test)]
pub(crate) fn temp_store() -> (tempfile::NamedTempFile, std::sync::Arc<Store>) {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let store = Store::new(tmp.path()).unwrap();
    (tmp, std::sync::Arc::new(store))
}
