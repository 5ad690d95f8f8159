//! Purpose: Record-oriented adapters and dump helpers over the store.
//! Exports: Row iterators, the dump context, helper functions, and the error types.
//! Role: Stable surface used by the CLI and integration tests.
//! Invariants: Adapters reach the store only through `core`'s public calls.

pub mod context;
pub mod fastq_iter;
pub mod helper;
pub mod table_iter;

pub use crate::core::error::{Error, ErrorKind, to_exit_code};
pub use context::DumpContext;
pub use fastq_iter::{FastqIter, FastqRecord, Fetched};
pub use table_iter::{IterParams, TableIter};
