// The resilient server side (§4.1, §4.1a): accepts many client connections,
// acks every request immediately on the connection it arrived on, then
// dispatches the request to a Handler and ships the real reply out through
// a reply pipeline keyed by the client's advertised reply address - mirroring
// the original's ROUTER-ack-then-PUSH-reply split without needing a second
// physical socket per client.

use base::Error;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};
use proto::{ClientTag, Frame};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::conn::Conn;
use crate::pollster::Pollster;

/// Implemented by each of writer/reader/auditor/handoff to turn one decoded
/// request into a reply control dict plus body frames. `client_address` is
/// the requester's advertised reply-pipeline address, handed through so a
/// handler can remember where to push a reply it cannot produce inline
/// (§4.5's explicit anti-entropy audit request being the one verb that
/// needs this today).
pub trait Handler {
    fn handle(
        &mut self,
        client_tag: &ClientTag,
        client_address: &str,
        control: &Value,
        bodies: &[Vec<u8>],
    ) -> Result<(Value, Vec<Vec<u8>>), Error>;
}

struct ServerConn {
    conn: Conn,
    client_tag: Option<ClientTag>,
    client_address: Option<String>,
}

/// Outbound, one-way connections back to clients' reply-pipeline addresses,
/// opened lazily and reused (§4.1a "client pipeline address").
#[derive(Default)]
struct ReplyPipeline {
    connections: HashMap<String, Conn>,
}

impl ReplyPipeline {
    fn send(&mut self, address: &str, frame: &Frame) -> Result<(), Error> {
        if !self.connections.contains_key(address) {
            let addr: SocketAddr = address
                .parse()
                .map_err(|_| base::err("malformed client reply address"))?;
            let stream = TcpStream::connect(addr)?;
            self.connections.insert(address.to_string(), Conn::new(stream));
        }
        let conn = self.connections.get_mut(address).unwrap();
        conn.queue_frame(frame)?;
        conn.try_flush()
    }

    fn flush_all(&mut self) -> Result<(), Error> {
        for conn in self.connections.values_mut() {
            conn.try_flush()?;
        }
        Ok(())
    }
}

pub struct ResilientServer {
    listener: TcpListener,
    listener_token: Token,
    connections: HashMap<Token, ServerConn>,
    reply_pipeline: ReplyPipeline,
}

impl ResilientServer {
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
            reply_pipeline: ReplyPipeline::default(),
        })
    }

    pub fn listener_token(&self) -> Token {
        self.listener_token
    }

    pub fn owns(&self, token: Token) -> bool {
        token == self.listener_token || self.connections.contains_key(&token)
    }

    /// Accept every pending connection (call when the listener token is
    /// readable).
    pub fn accept_all(&mut self, pollster: &mut Pollster) -> Result<(), Error> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, _peer)) => {
                    let token = pollster.alloc_token();
                    pollster.registry().register(
                        &mut stream,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    )?;
                    self.connections.insert(
                        token,
                        ServerConn {
                            conn: Conn::new(stream),
                            client_tag: None,
                            client_address: None,
                        },
                    );
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn on_writable(&mut self, token: Token) -> Result<(), Error> {
        if let Some(sc) = self.connections.get_mut(&token) {
            sc.conn.try_flush()?;
        }
        Ok(())
    }

    /// Handle a readable connection: ack every request immediately, dispatch
    /// it to `handler`, and ship the reply out the reply pipeline.
    pub fn on_readable(&mut self, token: Token, handler: &mut dyn Handler) -> Result<(), Error> {
        let Some(sc) = self.connections.get_mut(&token) else {
            return Ok(());
        };
        let frames = match sc.conn.try_read_frames() {
            Ok(frames) => frames,
            Err(e) => {
                tracing::debug!("server connection closed: {:?}", e);
                self.connections.remove(&token);
                return Ok(());
            }
        };

        for frame in frames {
            self.dispatch_one(token, frame, handler)?;
        }
        Ok(())
    }

    fn dispatch_one(
        &mut self,
        token: Token,
        frame: Frame,
        handler: &mut dyn Handler,
    ) -> Result<(), Error> {
        let message_id = frame
            .control
            .get("message-id")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        let message_type = frame.control.get("message-type").and_then(|v| v.as_str());
        if message_type == Some("resilient-server-handshake") {
            let client_tag = frame
                .control
                .get("client-tag")
                .and_then(|v| v.as_str())
                .map(|s| ClientTag::new(s.to_string()));
            let client_address = frame
                .control
                .get("client-address")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            if let Some(sc) = self.connections.get_mut(&token) {
                sc.client_tag = client_tag;
                sc.client_address = client_address;
                sc.conn
                    .queue_frame(&Frame::new(json!({"message-type": "ack", "message-id": message_id})))?;
                sc.conn.try_flush()?;
            }
            return Ok(());
        }

        // Ack first, matching the original's immediate-ack-then-process split.
        let (client_tag, client_address) = {
            let sc = self.connections.get_mut(&token);
            let Some(sc) = sc else { return Ok(()) };
            sc.conn
                .queue_frame(&Frame::new(json!({"message-type": "ack", "message-id": message_id})))?;
            sc.conn.try_flush()?;
            (sc.client_tag.clone(), sc.client_address.clone())
        };

        let Some(client_tag) = client_tag else {
            tracing::error!("request from un-handshaken connection: {:?}", frame.control);
            return Ok(());
        };
        let Some(client_address) = client_address else {
            tracing::error!("handshake never recorded a reply address for {:?}", client_tag);
            return Ok(());
        };

        let (reply_control, reply_bodies) =
            match handler.handle(&client_tag, &client_address, &frame.control, &frame.bodies) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!("handler failed: {:?}", e);
                    (json!({"message-type": "error", "message-id": message_id, "result": "exception"}), Vec::new())
                }
            };
        let reply = Frame::with_bodies(reply_control, reply_bodies);
        self.reply_pipeline.send(&client_address, &reply)
    }

    pub fn flush_reply_pipeline(&mut self) -> Result<(), Error> {
        self.reply_pipeline.flush_all()
    }

    /// Push a reply to a previously-seen client address outside the normal
    /// request/reply turn (§4.5's deferred `anti-entropy-audit-reply`: the
    /// peer broadcast this reply depends on can take much longer than the
    /// original request's own dispatch).
    pub fn send_unsolicited(&mut self, client_address: &str, frame: &Frame) -> Result<(), Error> {
        self.reply_pipeline.send(client_address, frame)
    }
}
