//! Recording proxy: transparent forwarding with lossless body capture

mod proxy;
mod tee;

pub use proxy::{ExchangeObserver, Recorder};
pub use tee::{CaptureBuffer, TeeBody};

/// Graceful drain deadline when stopping the recorder
pub const DRAIN_TIMEOUT_MS: u64 = 5000;

/// Records queued between exchange tasks and the writer task
pub const WRITER_QUEUE_DEPTH: usize = 256;
