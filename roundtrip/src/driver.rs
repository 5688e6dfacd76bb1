// Ping-pong loop for one side.
//
// Server: write slot b with b -> send b -> receive next b.
// Client: receive b -> check slot b is all b -> send b+1.
// Each side counts one round trip per step. The two processes strictly
// alternate because neither touches a slot until the token for it arrives.

use std::convert::Infallible;
use std::fmt;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::channel::{self, ControlChannel};
use crate::clock::{Clock, MonotonicClock};
use crate::config::Config;
use crate::error::Result;
use crate::rate::RateMeter;
use crate::shm::SharedBuffer;
use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => f.write_str("server"),
            Role::Client => f.write_str("client"),
        }
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "server" => Ok(Role::Server),
            "client" => Ok(Role::Client),
            _ => Err(()),
        }
    }
}

pub struct Driver<S: Read + Write = TcpStream, C: Clock = MonotonicClock> {
    role: Role,
    buffer: SharedBuffer,
    channel: ControlChannel<S>,
    meter: RateMeter<C>,
    // Server: token to publish next. Client: last token sent back.
    token: Token,
    throttle: Option<Duration>,
}

impl Driver {
    /// Create the buffer, then wait for the one client.
    pub fn server(config: &Config) -> Result<Self> {
        let buffer = SharedBuffer::create(&config.shm_name)?;
        let listener = channel::listen(config.addr, config.backlog)?;
        Self::serve(buffer, &listener)
    }

    /// Accept a single connection on an already bound listener.
    pub fn serve(buffer: SharedBuffer, listener: &TcpListener) -> Result<Self> {
        let channel = channel::accept(listener)?;
        println!("server accepted");
        Ok(Self::from_parts(Role::Server, buffer, channel, MonotonicClock))
    }

    /// Connect first, then open the buffer the server already created.
    pub fn client(config: &Config) -> Result<Self> {
        let channel = channel::connect(config.addr)?;
        println!("client connected");
        let buffer = SharedBuffer::open(&config.shm_name)?;
        Ok(Self::from_parts(Role::Client, buffer, channel, MonotonicClock).with_throttle(config.throttle))
    }
}

impl<S: Read + Write, C: Clock> Driver<S, C> {
    pub fn from_parts(role: Role, buffer: SharedBuffer, channel: ControlChannel<S>, clock: C) -> Self {
        Self {
            role,
            buffer,
            channel,
            meter: RateMeter::new(clock),
            token: Token::ZERO,
            throttle: None,
        }
    }

    /// Client only: sleep this long after every round trip.
    pub fn with_throttle(mut self, throttle: Option<Duration>) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn roundtrips(&self) -> u64 {
        self.meter.total()
    }

    pub fn channel(&self) -> &ControlChannel<S> {
        &self.channel
    }

    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    /// One full round trip for this role.
    pub fn step(&mut self) -> Result<Token> {
        match self.role {
            Role::Server => self.serve_once()?,
            Role::Client => self.consume_once()?,
        }

        if let Some(report) = self.meter.record_event() {
            println!("roundtrips per second={:.1}", report.roundtrips as f64);
            debug!(
                role = %self.role,
                roundtrips = report.roundtrips,
                elapsed_ns = report.elapsed_ns,
                per_second = report.per_second(),
                "rate window closed"
            );
        }

        if self.role == Role::Client {
            if let Some(pause) = self.throttle {
                thread::sleep(pause);
            }
        }

        Ok(self.token)
    }

    fn serve_once(&mut self) -> Result<()> {
        let b = self.token;
        self.buffer.write_slot(b.slot(), b.fill())?;
        self.buffer.publish();
        self.channel.send_token(b)?;
        self.token = self.channel.receive_token()?;
        trace!(sent = %b, received = %self.token, "server round trip");
        Ok(())
    }

    fn consume_once(&mut self) -> Result<()> {
        let b = self.channel.receive_token()?;
        self.buffer.acquire();
        self.buffer.verify_slot(b.slot(), b.fill())?;
        let next = b.next();
        self.channel.send_token(next)?;
        self.token = next;
        trace!(received = %b, sent = %next, "client round trip");
        Ok(())
    }

    pub fn run_cycles(&mut self, cycles: u64) -> Result<()> {
        for _ in 0..cycles {
            self.step()?;
        }
        info!(role = %self.role, cycles, token = %self.token, "bounded run complete");
        Ok(())
    }

    /// Loop until something fails; there is no other way out.
    pub fn run(&mut self) -> Result<Infallible> {
        info!(role = %self.role, shm = %self.buffer.name(), "entering round-trip loop");
        loop {
            self.step()?;
        }
    }
}
