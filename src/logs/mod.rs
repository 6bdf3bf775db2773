// Logs module - per-service capture, rotation and retention

mod manager;
mod reader;
mod writer;

pub use manager::{LogFileInfo, LogFileKind, LogManager, SharedLog, SweepReport};
pub use reader::{read_last_lines, tail_service};
pub use writer::{active_path, rotated_path, RotatingLog, RotationPolicy, ARCHIVE_DIR};
