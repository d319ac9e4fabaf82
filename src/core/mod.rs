//! Core implementation: origins, backing store, lazy cursor and write-back

pub mod args;
pub mod cursor;
pub mod format;
pub mod materializer;
pub mod options;
pub mod source;
pub mod store;
pub mod table;
pub mod transaction;
pub mod vtab;
pub mod writer;
