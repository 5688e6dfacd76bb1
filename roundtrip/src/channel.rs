/*!
 * Control Channel
 * One byte per message over a long-lived stream; the byte is the token.
 */

use std::io::{self, Read, Write};
use std::mem;
use std::net::{SocketAddrV4, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use tracing::info;

use crate::error::{Error, Result};
use crate::token::Token;

pub struct ControlChannel<S = TcpStream> {
    stream: S,
}

impl<S: Read + Write> ControlChannel<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Blocks until the transport has taken the byte.
    pub fn send_token(&mut self, token: Token) -> Result<()> {
        let buf = [token.0];
        loop {
            match self.stream.write(&buf) {
                Ok(0) => continue,
                Ok(_) => return Ok(()),
                Err(e) if is_transient(&e) => continue,
                Err(e) => return Err(Error::Send(e)),
            }
        }
    }

    /// Blocks until exactly one byte arrives.
    ///
    /// A zero-length read on a blocking stream is end-of-stream, so it ends
    /// the run instead of being retried forever.
    pub fn receive_token(&mut self) -> Result<Token> {
        let mut buf = [0u8; 1];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Err(Error::ChannelClosed),
                Ok(_) => return Ok(Token(buf[0])),
                Err(e) if is_transient(&e) => continue,
                Err(e) => return Err(Error::Receive(e)),
            }
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

/// socket + SO_REUSEADDR + bind + listen with an explicit backlog.
pub fn listen(addr: SocketAddrV4, backlog: i32) -> Result<TcpListener> {
    let bind_err = |source| Error::Bind { addr, source };

    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0);
        if fd < 0 {
            return Err(bind_err(io::Error::last_os_error()));
        }
        let fd = OwnedFd::from_raw_fd(fd);

        let on: libc::c_int = 1;
        if libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &on as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        ) != 0
        {
            return Err(Error::SocketOption {
                option: "SO_REUSEADDR",
                source: io::Error::last_os_error(),
            });
        }

        let sin = sockaddr_in(addr);
        if libc::bind(
            fd.as_raw_fd(),
            &sin as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ) != 0
        {
            return Err(bind_err(io::Error::last_os_error()));
        }

        if libc::listen(fd.as_raw_fd(), backlog) != 0 {
            return Err(bind_err(io::Error::last_os_error()));
        }

        let listener = TcpListener::from(fd);
        info!(addr = %addr, backlog, "listening");
        Ok(listener)
    }
}

fn sockaddr_in(addr: SocketAddrV4) -> libc::sockaddr_in {
    let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_port = addr.port().to_be();
    sin.sin_addr = libc::in_addr {
        s_addr: u32::from(*addr.ip()).to_be(),
    };
    sin
}

/// Take exactly one connection off `listener`.
pub fn accept(listener: &TcpListener) -> Result<ControlChannel> {
    let (stream, peer) = listener.accept().map_err(Error::Accept)?;
    set_nodelay(&stream)?;
    info!(peer = %peer, "control connection accepted");
    Ok(ControlChannel::new(stream))
}

pub fn connect(addr: SocketAddrV4) -> Result<ControlChannel> {
    let stream = TcpStream::connect(addr).map_err(|source| Error::Connect { addr, source })?;
    set_nodelay(&stream)?;
    info!(addr = %addr, "control connection established");
    Ok(ControlChannel::new(stream))
}

fn set_nodelay(stream: &TcpStream) -> Result<()> {
    stream.set_nodelay(true).map_err(|source| Error::SocketOption {
        option: "TCP_NODELAY",
        source,
    })
}
