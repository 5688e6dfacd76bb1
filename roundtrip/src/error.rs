/*!
 * Error types
 * Every failure is fatal to the benchmark; the binary maps them to exit codes.
 */

use std::io;
use std::net::SocketAddrV4;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A POSIX shared memory call failed
    #[error("{op}({name}) failed: {source}")]
    Shm {
        op: &'static str,
        name: String,
        #[source]
        source: io::Error,
    },

    /// The existing shm object is smaller than the slot layout needs
    #[error("shared memory {name} is {actual} bytes, need {required}")]
    ShmTooSmall {
        name: String,
        actual: usize,
        required: usize,
    },

    #[error("bind/listen on {addr} failed: {source}")]
    Bind {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },

    #[error("accept() failed: {0}")]
    Accept(#[source] io::Error),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },

    #[error("setting {option} failed: {source}")]
    SocketOption {
        option: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("send() failed: {0}")]
    Send(#[source] io::Error),

    #[error("recv() failed: {0}")]
    Receive(#[source] io::Error),

    /// Peer closed the control connection
    #[error("control channel closed by peer")]
    ChannelClosed,

    #[error("slot index {0} out of range (0..=255)")]
    SlotOutOfRange(usize),

    /// Slot contents did not match the token that announced it
    #[error("integrity violation in slot {slot}: byte {offset} is {found:#04x}, expected {expected:#04x}")]
    IntegrityViolation {
        slot: usize,
        offset: usize,
        expected: u8,
        found: u8,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// True for the data-integrity category, as opposed to I/O or setup failures.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::IntegrityViolation { .. })
    }

    pub(crate) fn shm(op: &'static str, name: &str) -> Self {
        Error::Shm {
            op,
            name: name.to_string(),
            source: io::Error::last_os_error(),
        }
    }
}
