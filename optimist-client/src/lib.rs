//! Optimist client library exports.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod telemetry;
