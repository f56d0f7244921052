//! Support code for the `evidx` binary.

pub mod logging;
