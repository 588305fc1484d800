//! In-memory platform bridges
//!
//! Loopback implementations of every bridge trait, used by the test suites
//! and by the CLI simulator:
//!
//! - **air**: shared radio medium with simulated peripheral/central roles
//! - **backend**: matching service with sequential session ids
//! - **location**: scripted location provider
pub mod air;
pub mod backend;
pub mod location;

pub use air::{CentralCall, PeripheralCall, SimAir, SimCentral, SimDevice, SimPeripheral};
pub use backend::{BackendCall, SimBackend};
pub use location::{LocationRequest, SimLocationProvider};
