// IPC module - Communication between client and daemon

pub mod client;
pub mod protocol;
pub mod server;

pub use client::IpcClient;
pub use protocol::{Command, Request, Response, ResponseData, SkippedService, DEFAULT_LOG_LINES};
pub use server::IpcServer;
