//! Testing utilities and mock implementations
//!
//! Lets the whole client run without a broker or a gateway.

pub mod mocks;

pub use mocks::*;
