// roundtrip/src/lib.rs
// Shared-memory ping-pong: 256 slots in a POSIX shm object, a one-byte token
// over TCP hands each slot from server to client and back.

pub mod channel;
pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod rate;
pub mod shm;
pub mod token;
pub mod trace;

pub use channel::ControlChannel;
pub use clock::{Clock, MonotonicClock};
pub use config::Config;
pub use driver::{Driver, Role};
pub use error::{Error, Result};
pub use rate::{RateMeter, RateReport};
pub use shm::SharedBuffer;
pub use token::{slot_range, Token};

pub const CHUNK: usize = 4096;
pub const SLOT_COUNT: usize = 256;
pub const SHM_SIZE: usize = SLOT_COUNT * CHUNK;

pub const DEFAULT_SHM_NAME: &str = "/shm";
pub const DEFAULT_PORT: u16 = 5555;
pub const LISTEN_BACKLOG: i32 = 16;

pub const NANOS_PER_SEC: u64 = 1_000_000_000;
