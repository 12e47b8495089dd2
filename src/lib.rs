//! Stress client for a message queue.
//!
//! Run as a sender, it publishes a uniquely numbered message every 30 seconds and logs
//! each broker acknowledgment to `./sender.log`. Run as a receiver, it consumes the queue
//! and logs each delivery to `./receiver.log`. Comparing the two logs afterwards shows
//! loss, duplication and latency.
//!
//! ```text
//! Message acknowledged: Id = 0; DateTime = 2024-03-01T10:00:00.123Z; Instant = 1709287200
//! ```

pub mod ack_log;
pub mod cli;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod proxy;
pub mod receiver;
pub mod record;
pub mod sender;
pub mod shutdown;
pub mod transport;

pub use ack_log::AckLog;
pub use cli::Mode;
pub use config::Config;
pub use error::{ConfigError, ProxyError, StressError, TransportError};
pub use proxy::{ProxyRouter, ProxyTarget, Route, RouteSelector, SystemSelector};
pub use record::{EventKind, LogRecord};
pub use shutdown::Shutdown;
