//! Error types for the stress client.
//!
//! Only [`StressError`] ever reaches `main`; everything per-message is logged and dropped
//! where it happens.

use std::io;
use std::num::ParseIntError;
use std::path::PathBuf;

use thiserror::Error;

/// Startup configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingConnectionString(&'static str),

    #[error("connection string is not a valid URI: {0}")]
    InvalidConnectionString(#[from] url::ParseError),

    #[error("connection string has no host")]
    MissingHost,

    #[error("unsupported connection scheme '{0}', expected amqp")]
    UnsupportedScheme(String),

    #[error("connection string field '{field}' is not valid UTF-8 after decoding")]
    InvalidEncoding { field: &'static str },

    #[error("proxy configuration is incomplete: {missing} is not set")]
    IncompleteProxy { missing: &'static str },

    #[error("proxy port '{value}' is not a valid port number")]
    MalformedProxyPort {
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("proxy port must not be 0")]
    ZeroProxyPort,
}

/// Misuse of the route selector contract.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("connect failure notification without {0}")]
    InvalidArgument(&'static str),
}

/// Failures while talking to the broker or a proxy.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not connect to {target}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("proxy {proxy} refused tunnel: {status}")]
    ProxyRejected { proxy: String, status: String },

    #[error("proxy {proxy} sent a malformed reply")]
    MalformedProxyReply { proxy: String },

    #[error("no usable route to {0}")]
    NoRoute(String),

    #[error("AMQP error: {0}")]
    Amqp(#[from] amiquip::Error),

    #[error("worker thread failed to start: {0}")]
    WorkerStart(String),

    #[error("consumer ended: {0}")]
    ConsumerEnded(String),
}

/// Top level error; anything of this type is fatal.
#[derive(Debug, Error)]
pub enum StressError {
    #[error("configuration error")]
    Config(#[from] ConfigError),

    #[error("transport error")]
    Transport(#[from] TransportError),

    #[error("could not open log file {}", path.display())]
    LogOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not install termination handler")]
    Signal(#[from] ctrlc::Error),
}
