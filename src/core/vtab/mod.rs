//! SQLite virtual table module
//!
//! Binds [`crate::table::ArchiveTable`] to SQLite through a raw
//! `sqlite3_module`.

#[allow(clippy::module_inception)]
mod vtab;

pub use vtab::{register_module, MODULE_NAME};

#[cfg(test)]
mod tests;
