//! Host-driver-facing half of the UART emulation: a fixed table of
//! emulated channels behind synchronized register read/write entry
//! points, plus one background worker per channel that stands in for
//! the missing physical interrupt line.

use std::fmt;
use std::sync::Arc;

mod bridge;
mod dispatch;

pub use bridge::{LineInfo, UartBridge, BAUD_BASE, MAX_LINES};
pub use ruart_core::flush::FlushReason;

/// Consumer of flushed transmit bytes. Invoked outside the channel
/// lock with the drained bytes and the trigger that caused the flush.
pub type TxCallback = Arc<dyn Fn(&[u8], FlushReason) + Send + Sync>;

/// The host driver's interrupt handler. Invoked from the channel's
/// dispatcher worker, outside the channel lock, with the current IIR
/// value.
pub type IrqCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Failures of the lifecycle operations. Register-level access never
/// returns these; per the 16550A contract it degrades to no-ops and
/// zero reads instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// Line index outside the fixed channel table
    InvalidLine(usize),
    /// `add_device` on a line that is already live
    AlreadyAdded(usize),
    /// Operation on a line that was never added, or already removed
    NotAdded(usize),
    /// `inject_rx` with more bytes than one FIFO can hold
    TooManyBytes(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidLine(line) => write!(f, "line {} is outside the channel table", line),
            Error::AlreadyAdded(line) => write!(f, "line {} was already added", line),
            Error::NotAdded(line) => write!(f, "line {} has not been added", line),
            Error::TooManyBytes(len) => {
                write!(f, "injection of {} bytes exceeds the FIFO capacity", len)
            }
        }
    }
}

impl std::error::Error for Error {}
