//! Library crate for spoofwatch: live capture, spoofed-source classification and reporting.
pub mod app;
pub mod capture;
pub mod classify;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod netdetect;
pub mod reporter;
pub mod server;
pub mod sinks;
pub mod store;
pub mod types;
