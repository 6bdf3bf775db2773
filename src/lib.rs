// Library exports for the Corral service supervisor

pub mod alerts;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod discovery;
pub mod error;
pub mod health;
pub mod ipc;
pub mod logs;
pub mod metrics;
pub mod process;
pub mod state;
