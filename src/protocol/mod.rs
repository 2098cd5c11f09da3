//! Sensor descriptors, topic conventions and payload encoding
//!
//! Everything in this module is pure: no I/O, no shared state.

pub mod codec;
pub mod sensor;
pub mod topics;

pub use codec::{PayloadCodec, DEFAULT_PRECISION};
pub use sensor::SensorDescriptor;
pub use topics::*;
