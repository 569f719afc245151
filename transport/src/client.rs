// A client-side connection to exactly one resilient server (§4.1, §4.1a),
// reworked from tools/resilient_client.py's DEALER-socket state machine onto
// a real non-blocking TCP stream. Acks arrive on this same connection;
// actual replies arrive separately on the process's reply pipeline and are
// matched up by the caller via message-id.

use base::{err, Error};
use mio::net::TcpStream;
use mio::{Interest, Token};
use proto::{ClientTag, Frame, MessageId, NodeName};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::conn::Conn;
use crate::pollster::Pollster;

pub const ACK_TIMEOUT: Duration = Duration::from_secs(600);
pub const HANDSHAKE_RETRY_INTERVAL: Duration = Duration::from_secs(60);
pub const MAX_IDLE_TIME: Duration = Duration::from_secs(1800);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClientStatus {
    Disconnected,
    Handshaking,
    Connected,
}

struct Pending {
    frame: Frame,
    message_id: String,
    start_time: Instant,
}

/// One client's view of one server: reconnects itself, re-handshakes, and
/// enforces the single-request-in-flight rule (§4.1).
pub struct ResilientClient {
    server_node_name: NodeName,
    server_addr: SocketAddr,
    client_tag: ClientTag,
    client_address: String,
    token: Token,
    conn: Option<Conn>,
    send_queue: VecDeque<Frame>,
    pending: Option<Pending>,
    status: ClientStatus,
    status_time: Option<Instant>,
    last_successful_ack_time: Option<Instant>,
}

impl ResilientClient {
    pub fn new(
        server_node_name: NodeName,
        server_addr: SocketAddr,
        client_tag: ClientTag,
        client_address: String,
        token: Token,
    ) -> Self {
        Self {
            server_node_name,
            server_addr,
            client_tag,
            client_address,
            token,
            conn: None,
            send_queue: VecDeque::new(),
            pending: None,
            status: ClientStatus::Disconnected,
            status_time: None,
            last_successful_ack_time: None,
        }
    }

    pub fn server_node_name(&self) -> &NodeName {
        &self.server_node_name
    }

    pub fn connected(&self) -> bool {
        self.status == ClientStatus::Connected
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Queue a message for send (§4.1 single-in-flight-request rule): sends
    /// immediately if idle and connected, otherwise appends to the send
    /// queue for later.
    pub fn queue_message(
        &mut self,
        mut control: Value,
        bodies: Vec<Vec<u8>>,
    ) -> Result<(), Error> {
        if control.get("message-id").is_none() {
            control["message-id"] = json!(MessageId::generate().0);
        }
        control["client-tag"] = json!(self.client_tag.0);
        let frame = Frame::with_bodies(control, bodies);

        if self.status == ClientStatus::Connected && self.pending.is_none() {
            self.send_now(frame)?;
        } else {
            self.send_queue.push_back(frame);
        }
        Ok(())
    }

    /// Periodic tick (§5's scheduled-task loop): advances the connection
    /// state machine the way `ResilientClient.run` does in the original.
    pub fn tick(&mut self, pollster: &mut Pollster) -> Result<(), Error> {
        match self.status {
            ClientStatus::Disconnected => self.handle_disconnected(pollster)?,
            ClientStatus::Handshaking => self.handle_handshaking(),
            ClientStatus::Connected => self.handle_connected(),
        }
        if let Some(conn) = self.conn.as_mut() {
            conn.try_flush()?;
        }
        Ok(())
    }

    /// Called when the pollster reports this client's token as readable.
    pub fn on_readable(&mut self) -> Result<(), Error> {
        let frames = match self.conn.as_mut() {
            Some(conn) => conn.try_read_frames(),
            None => return Ok(()),
        };
        let frames = match frames {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!("resilient client read error, disconnecting: {:?}", e);
                self.disconnect();
                return Ok(());
            }
        };
        for frame in frames {
            self.handle_ack(frame);
        }
        Ok(())
    }

    pub fn on_writable(&mut self) -> Result<(), Error> {
        if let Some(conn) = self.conn.as_mut() {
            conn.try_flush()?;
        }
        Ok(())
    }

    fn handle_ack(&mut self, frame: Frame) {
        let Some(pending) = self.pending.as_ref() else {
            tracing::error!("unexpected message with no pending request: {:?}", frame.control);
            return;
        };
        let ack_id = frame.control.get("message-id").and_then(|v| v.as_str());
        if ack_id != Some(pending.message_id.as_str()) {
            tracing::error!(
                "unknown ack {:?}, expecting {}",
                frame.control,
                pending.message_id
            );
            return;
        }

        let was_handshake = pending
            .frame
            .control
            .get("message-type")
            .and_then(|v| v.as_str())
            == Some("resilient-server-handshake");
        self.last_successful_ack_time = Some(Instant::now());
        if was_handshake {
            self.status = ClientStatus::Connected;
            self.status_time = Some(Instant::now());
        }
        self.pending = None;

        if let Some(next) = self.send_queue.pop_front() {
            let _ = self.send_now(next);
        }
    }

    fn handle_disconnected(&mut self, pollster: &mut Pollster) -> Result<(), Error> {
        if let Some(t) = self.status_time {
            if t.elapsed() < HANDSHAKE_RETRY_INTERVAL {
                return Ok(());
            }
        }

        let mut stream = TcpStream::connect(self.server_addr)?;
        pollster
            .registry()
            .register(&mut stream, self.token, Interest::READABLE | Interest::WRITABLE)?;
        self.conn = Some(Conn::new(stream));

        let handshake = Frame::new(json!({
            "message-type": "resilient-server-handshake",
            "message-id": MessageId::generate().0,
            "client-tag": self.client_tag.0,
            "client-address": self.client_address,
        }));
        self.status = ClientStatus::Handshaking;
        self.status_time = Some(Instant::now());
        self.send_now(handshake)
    }

    fn handle_handshaking(&mut self) {
        let Some(pending) = self.pending.as_ref() else {
            return;
        };
        if pending.start_time.elapsed() < ACK_TIMEOUT {
            return;
        }
        tracing::warn!("timeout waiting for handshake ack");
        self.disconnect();
        self.pending = None;
    }

    fn handle_connected(&mut self) {
        let Some(pending) = self.pending.as_ref() else {
            if let Some(last_ack) = self.last_successful_ack_time {
                if last_ack.elapsed() >= MAX_IDLE_TIME {
                    tracing::debug!("idle for {:?}, disconnecting", last_ack.elapsed());
                    self.disconnect();
                }
            }
            return;
        };
        if pending.start_time.elapsed() < ACK_TIMEOUT {
            return;
        }
        tracing::error!("timeout waiting ack: treating as disconnect");
        let requeued = self.pending.take().map(|p| p.frame);
        self.disconnect();
        if let Some(frame) = requeued {
            self.send_queue.push_front(frame);
        }
    }

    fn send_now(&mut self, frame: Frame) -> Result<(), Error> {
        let message_id = frame
            .control
            .get("message-id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| err("outgoing frame missing message-id"))?
            .to_string();
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| err("send_now called with no connection"))?;
        conn.queue_frame(&frame)?;
        conn.try_flush()?;
        self.pending = Some(Pending {
            frame,
            message_id,
            start_time: Instant::now(),
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        self.conn = None;
        self.status = ClientStatus::Disconnected;
        self.status_time = Some(Instant::now());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::TcpListener as StdTcpListener;
    use std::time::Duration;
    use test_log::test;

    #[test]
    fn first_tick_connects_and_sends_a_handshake() {
        let mut pollster = Pollster::new().unwrap();
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let server_addr = listener.local_addr().unwrap();

        let token = pollster.alloc_token();
        let mut client = ResilientClient::new(
            NodeName::new("node01"),
            server_addr,
            ClientTag::new("client01"),
            "127.0.0.1:9".to_string(),
            token,
        );

        client
            .queue_message(json!({"message-type": "archive-key-final"}), vec![b"body".to_vec()])
            .unwrap();
        assert_eq!(client.status, ClientStatus::Disconnected);

        client.tick(&mut pollster).unwrap();
        assert_eq!(client.status, ClientStatus::Handshaking);
        assert!(client.pending.is_some());

        let (server_std, _) = listener.accept().unwrap();
        server_std.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut decoder = proto::FrameDecoder::new();
        let mut buf = [0u8; 4096];
        let mut frames = Vec::new();
        while frames.is_empty() {
            let n = std::io::Read::read(&mut &server_std, &mut buf).unwrap();
            decoder.push(&buf[..n]);
            frames = decoder.drain_complete().unwrap();
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].control.get("message-type").and_then(|v| v.as_str()),
            Some("resilient-server-handshake")
        );
        assert_eq!(
            frames[0].control.get("client-tag").and_then(|v| v.as_str()),
            Some("client01")
        );

        // The archive-key-final request stayed queued behind the handshake.
        assert_eq!(client.send_queue.len(), 1);
    }
}
