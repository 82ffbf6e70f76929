//! Library crate for nmap-relay-rs exposing reusable modules.
pub mod command;
pub mod config;
pub mod error;
pub mod flags;
pub mod history;
pub mod logging;
pub mod pipeline;
pub mod resiliency;
pub mod runner;
pub mod scripts;
pub mod server;
pub mod summary;
pub mod types;
