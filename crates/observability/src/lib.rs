//! Process-wide tracing setup shared by binaries and test harnesses.
//!
//! Every engine crate only emits through `tracing`; installing a subscriber
//! is left to the process, through one of the initializers below.

pub mod subscriber;

pub use subscriber::{LogFormat, init, init_for_tests, init_with};
