//! Logging setup shared by the service binary and the test suites.

pub mod tracing;
