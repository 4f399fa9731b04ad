//! Startup error types for the automation daemon.

use std::fmt;

/// Errors that prevent the daemon from starting.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration could not be loaded or parsed.
    Config {
        /// Error details.
        details: String,
    },
    /// The NATS connection could not be established.
    NatsConnection {
        /// The server URL that was tried.
        url: String,
        /// Error details.
        details: String,
    },
    /// The task event subscription could not be created.
    EventSubscription {
        /// Error details.
        details: String,
    },
    /// The shutdown signal handler could not be installed.
    SignalHandler {
        /// Error details.
        details: String,
    },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => {
                write!(f, "failed to load configuration: {details}")
            }
            Self::NatsConnection { url, details } => {
                write!(f, "failed to connect to NATS at '{url}': {details}")
            }
            Self::EventSubscription { details } => {
                write!(f, "failed to subscribe to task events: {details}")
            }
            Self::SignalHandler { details } => {
                write!(f, "failed to install the shutdown signal handler: {details}")
            }
        }
    }
}

impl std::error::Error for StartupError {}
