/*!
 * Configuration
 * Fixed benchmark endpoints, overridable from the environment:
 *
 * - ROUNDTRIP_SHM_NAME: shared memory object name (default: /shm)
 * - ROUNDTRIP_PORT: loopback TCP port (default: 5555)
 * - ROUNDTRIP_THROTTLE_MS: client sleep after each round trip (default: none)
 */

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::{DEFAULT_PORT, DEFAULT_SHM_NAME, LISTEN_BACKLOG};

pub const ENV_SHM_NAME: &str = "ROUNDTRIP_SHM_NAME";
pub const ENV_PORT: &str = "ROUNDTRIP_PORT";
pub const ENV_THROTTLE_MS: &str = "ROUNDTRIP_THROTTLE_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub shm_name: String,
    pub addr: SocketAddrV4,
    pub backlog: i32,
    pub throttle: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shm_name: DEFAULT_SHM_NAME.to_string(),
            addr: SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_PORT),
            backlog: LISTEN_BACKLOG,
            throttle: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(name) = lookup(ENV_SHM_NAME) {
            config.shm_name = shm_name(&name)?;
        }

        if let Some(port) = lookup(ENV_PORT) {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{}={:?} is not a port number", ENV_PORT, port)))?;
            config.addr.set_port(port);
        }

        if let Some(ms) = lookup(ENV_THROTTLE_MS) {
            let ms: u64 = ms.trim().parse().map_err(|_| {
                Error::Config(format!("{}={:?} is not a millisecond count", ENV_THROTTLE_MS, ms))
            })?;
            config.throttle = (ms > 0).then(|| Duration::from_millis(ms));
        }

        Ok(config)
    }
}

// POSIX shm names are "/name" with no further slashes.
fn shm_name(raw: &str) -> Result<String> {
    let name = if raw.starts_with('/') {
        raw.to_string()
    } else {
        format!("/{}", raw)
    };
    if name.len() < 2 || name[1..].contains('/') || name.contains('\0') {
        return Err(Error::Config(format!("invalid shared memory name {:?}", raw)));
    }
    Ok(name)
}
