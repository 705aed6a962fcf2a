pub mod api;
pub mod bots;
pub mod config;
pub mod domain;
pub mod error;
pub mod instance_lock;
pub mod memory;
pub mod orchestrator;
pub mod platform;
pub mod scheduler;
pub mod update;
