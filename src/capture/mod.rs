//! Captured exchange records and the append-only JSONL capture log

mod log;
mod record;

pub use log::{read_capture_log, CaptureLogWriter};
pub use record::CapturedExchange;
