//! Small cross-cutting utilities shared by the gateway's core crates.

pub mod crypto;

pub use lg_types::errors;
