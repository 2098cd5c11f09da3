//! Testing utilities and mock implementations
//!
//! Mock collaborators for exercising the publisher without a network link
//! or an MQTT broker.

pub mod mocks;

pub use mocks::*;
