//! Defines the error type shared by every component of the queue
//! subsystem. Drivers and backends should map their own failures into
//! one of these variants rather than inventing a parallel hierarchy.

use std::fmt;

/// Enumerates the errors that can be reported by the queue subsystem.
/// Authors of new drivers or config backends should try to map their
/// errors into one of these values. If no current value is
/// appropriate, a new one could be added, but make sure it's generic
/// enough to be useful outside of a single driver.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Error {
    /// `setActiveBackend` was given a driver id the registry doesn't
    /// know about.
    UnknownDriver(String),

    /// The driver-specific configuration failed validation against
    /// the driver's schema.
    InvalidConfig(String),

    /// The probe queue created during a backend switch failed
    /// `test_connection()` or couldn't be stopped cleanly.
    ProbeFailed(String),

    /// `enqueue` was rejected because the queue is at capacity.
    QueueFull,

    /// A Proxy operation was attempted before a delegate was
    /// installed.
    NotInitialized,

    /// A Proxy or Queue operation was attempted after `stop()`.
    Stopped,

    /// `scheduleRecurring` was given neither, or both, of
    /// `intervalSeconds`/`cronPattern`, or an unparsable cron pattern.
    InvalidSchedule(String),

    /// A handler reported failure. Not normally surfaced to callers;
    /// tracked internally by the retry policy.
    HandlerError(String),

    /// A single recurring job failed to migrate during a backend
    /// switch. Collected into `SwitchResult::warnings`, never fails
    /// the switch itself.
    RecurringMigrationError(String),

    /// A resource could not be found (e.g. a named queue, a recurring
    /// job id).
    NotFound,

    /// Catch-all for backend/driver-internal failures that don't fit
    /// another variant.
    Internal(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::UnknownDriver(id) => write!(f, "unknown driver '{id}'"),
            Error::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Error::ProbeFailed(msg) => write!(f, "backend probe failed: {msg}"),
            Error::QueueFull => write!(f, "queue is full"),
            Error::NotInitialized => write!(f, "queue has no delegate installed"),
            Error::Stopped => write!(f, "queue has been stopped"),
            Error::InvalidSchedule(msg) => write!(f, "invalid schedule: {msg}"),
            Error::HandlerError(msg) => write!(f, "handler error: {msg}"),
            Error::RecurringMigrationError(msg) => {
                write!(f, "recurring job migration failed: {msg}")
            }
            Error::NotFound => write!(f, "not found"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

/// A `Result` type where the error value is a `queue_api::Error`.
pub type Result<T> = std::result::Result<T, Error>;
