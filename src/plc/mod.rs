//! PLC access for the laser scanner
//!
//! Layered the same way the acquisition thread consumes it:
//!
//! - [`PlcTransport`]: raw byte reads/writes against a data block. Real
//!   vendor stacks and the in-process [`SimulatedPlc`] implement this.
//! - [`PlcConnector`]: opens a transport for an endpoint string.
//! - [`PlcLink`]: typed block reads and control/threshold writes through a
//!   [`RegisterLayout`], with busy-retry.
//! - [`ConnectionPool`]: caches one link per endpoint for the acquisition
//!   context that owns it.
//!
//! All calls are blocking; they are only ever made from the acquisition thread.

mod link;
mod pool;
mod register;
mod simulated;

pub use link::PlcLink;
pub use pool::{ConnectionPool, LinkSettings};
pub use register::{ControlBits, RegisterBlock, RegisterLayout};
pub use simulated::{SimProfile, SimulatedConnector, SimulatedPlc};

use std::time::Duration;
use thiserror::Error;

/// PLC errors
#[derive(Debug, Error)]
pub enum PlcError {
    #[error("Connection to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },

    /// Request rejected because the PLC is busy; worth retrying
    #[error("PLC busy")]
    Busy,

    #[error("PLC I/O error: {0}")]
    Io(String),

    #[error("Not connected")]
    NotConnected,

    #[error("No PLC transport for endpoint '{0}'")]
    UnsupportedEndpoint(String),

    #[error("Invalid register layout:\n  - {}", .0.join("\n  - "))]
    Layout(Vec<String>),
}

impl PlcError {
    /// Errors after which the connection must be torn down.
    pub const fn is_connection_fatal(&self) -> bool {
        !matches!(self, Self::Busy)
    }
}

/// Raw byte access to PLC data blocks.
pub trait PlcTransport: Send {
    /// Read `len` bytes starting at `offset` of data block `db`.
    fn read_area(&mut self, db: u16, offset: usize, len: usize) -> Result<Vec<u8>, PlcError>;

    /// Write `data` starting at `offset` of data block `db`.
    fn write_area(&mut self, db: u16, offset: usize, data: &[u8]) -> Result<(), PlcError>;

    fn is_connected(&self) -> bool;
}

/// Opens transports for endpoint strings.
pub trait PlcConnector: Send {
    fn connect(&mut self, endpoint: &str) -> Result<Box<dyn PlcTransport>, PlcError>;
}

/// Run `op`, retrying up to `retries` times while the PLC answers busy.
///
/// Backoff grows linearly (`backoff`, `2 * backoff`, ...). Exhausting the
/// retries surfaces as [`PlcError::Io`] so callers treat it as a lost
/// connection.
pub fn with_busy_retry<T, F>(retries: u32, backoff: Duration, mut op: F) -> Result<T, PlcError>
where
    F: FnMut() -> Result<T, PlcError>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Err(PlcError::Busy) if attempt < retries => {
                attempt += 1;
                tracing::debug!(attempt, retries, "PLC busy, retrying");
                std::thread::sleep(backoff * attempt);
            }
            Err(PlcError::Busy) => {
                return Err(PlcError::Io(format!(
                    "PLC still busy after {retries} retries"
                )));
            }
            other => return other,
        }
    }
}
