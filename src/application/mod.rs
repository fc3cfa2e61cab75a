//! Application-level error reporting shared by the HTTP surfaces and the binary.

pub mod error;
