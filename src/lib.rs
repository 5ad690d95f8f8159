//! Purpose: Shared library crate used by the `vdbdump` CLI and tests.
//! Exports: `core` (store engine, resolver, errors) and `api` (row iterators, dump helpers).
//! Role: Adapters over the store plus the store itself; the CLI is a thin shell on top.
//! Invariants: `api` reaches the store only through `core`'s public calls.
//! Invariants: Library code reports failures as `Error` values and logs via `tracing`.
pub mod api;
pub mod core;
pub mod notice;
