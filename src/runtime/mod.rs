//! Process passthrough
//!
//! Commands the tool does not model itself are handed to the runtime binary
//! by replacing the current process.

pub mod exec;

pub use exec::ProcessExecDriver;
