//! Duplicate-image detection against a Flow similarity-search backend.
//!
//! `core` holds the scan machinery (executor, enumerator, graph, grouper),
//! `services` the backend client and the index/scan pipelines built on it.

pub mod config;
pub mod core;
pub mod services;

#[cfg(test)]
mod test_utilities;
