pub mod config;
pub mod provision;
pub mod telemetry;
pub mod terminal;
pub mod transport;
