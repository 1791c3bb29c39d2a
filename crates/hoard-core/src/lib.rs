//! Core abstractions for Hoard: the persistent backend contract that the
//! encrypted storage layer writes into.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod backend;
