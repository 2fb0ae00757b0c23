//! Streaming access to the paper/repository links dump.
//!
//! The dump is a single JSON array that can run to several gigabytes, so it is
//! never loaded whole. [`JsonArrayReader`] pulls one element at a time off a
//! buffered reader, and [`DumpCursor`] layers the resume filter on top: keys
//! already in the ledger, keys seen earlier in the same pass and entries without
//! a key are counted and skipped.

pub mod array;
pub mod cursor;

pub use array::JsonArrayReader;
pub use cursor::{CursorStats, DumpCursor, count_pending, spawn_cursor};
