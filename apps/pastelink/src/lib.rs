pub mod app;
pub mod channel;
pub mod cli;
pub mod config;
pub mod console;
pub mod diagnostics;
pub mod probe;
pub mod session;
pub mod signaling;
pub mod telemetry;
