// Thin wrapper over mio's readiness poller (§4.1a, §5). One Pollster per
// process, shared by every ResilientClient and the ResilientServer; each
// registers its stream under a Token it hands out via `alloc_token`.

use base::Error;
use mio::{Events, Poll, Token};
use std::time::Duration;

pub struct Pollster {
    poll: Poll,
    events: Events,
    next_token: usize,
}

impl Pollster {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(1024),
            next_token: 0,
        })
    }

    pub fn registry(&self) -> &mio::Registry {
        self.poll.registry()
    }

    /// Hand out a fresh, never-reused-within-process Token for a new
    /// connection to register itself under.
    pub fn alloc_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Block up to `timeout` waiting for readiness, then invoke `visit` once
    /// per ready event. Mirrors the original's single pollster callback
    /// dispatch loop, minus the event-object plumbing mio doesn't need.
    pub fn poll<F: FnMut(Token, bool, bool)>(
        &mut self,
        timeout: Option<Duration>,
        mut visit: F,
    ) -> Result<(), Error> {
        self.poll.poll(&mut self.events, timeout)?;
        for event in self.events.iter() {
            visit(event.token(), event.is_readable(), event.is_writable());
        }
        Ok(())
    }
}
