// The process-wide reply fan-in (§5, §6.1: "one inbound 'pull' socket per
// process for replies"): every peer's `ResilientServer` reply pipeline
// pushes frames here directly, with no handshake, since the sender already
// proved its identity by handshaking as a client wherever it first learned
// this address. One of these per node process, shared by whichever drivers
// are waiting on an out-of-band reply (the anti-entropy coordinator, the
// handoff forwarder).

use base::Error;
use mio::net::TcpListener;
use mio::{Interest, Token};
use proto::Frame;
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::conn::Conn;
use crate::pollster::Pollster;

pub struct ReplyListener {
    listener: TcpListener,
    listener_token: Token,
    connections: HashMap<Token, Conn>,
}

impl ReplyListener {
    pub fn bind(addr: SocketAddr, pollster: &mut Pollster) -> Result<Self, Error> {
        let mut listener = TcpListener::bind(addr)?;
        let listener_token = pollster.alloc_token();
        pollster
            .registry()
            .register(&mut listener, listener_token, Interest::READABLE)?;
        Ok(Self {
            listener,
            listener_token,
            connections: HashMap::new(),
        })
    }

    pub fn listener_token(&self) -> Token {
        self.listener_token
    }

    pub fn owns(&self, token: Token) -> bool {
        token == self.listener_token || self.connections.contains_key(&token)
    }

    pub fn accept_all(&mut self, pollster: &mut Pollster) -> Result<(), Error> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, _peer)) => {
                    let token = pollster.alloc_token();
                    pollster.registry().register(&mut stream, token, Interest::READABLE)?;
                    self.connections.insert(token, Conn::new(stream));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Drain whatever complete frames a readable reply connection has
    /// accumulated. A closed connection just yields no more frames; the
    /// sender reopens it next time it has something to push.
    pub fn on_readable(&mut self, token: Token) -> Result<Vec<Frame>, Error> {
        let Some(conn) = self.connections.get_mut(&token) else {
            return Ok(Vec::new());
        };
        match conn.try_read_frames() {
            Ok(frames) => Ok(frames),
            Err(e) => {
                tracing::debug!("reply connection closed: {:?}", e);
                self.connections.remove(&token);
                Ok(Vec::new())
            }
        }
    }
}
