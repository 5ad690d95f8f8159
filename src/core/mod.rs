// Core modules implementing the directory-backed store, resolution, and error modeling.
pub mod cache;
pub mod column;
pub mod cursor;
pub mod error;
pub mod manager;
pub mod paths;
pub mod resolver;
pub mod schema;
pub mod writer;
