//! Drives the handoff sweep (§4.4) at the event-loop level: periodically
//! asks every peer what it holds on this node's behalf, pulls each segment
//! back through a `Forwarder`, re-archives it via this node's own local
//! writer, and purges the peer's copy once done. `forwarder_coroutine.py`
//! never drives more than one segment at a time per sweep; this keeps that
//! same one-at-a-time simplification so a forwarder's reply can be matched
//! back to its conversation without per-message-id bookkeeping of its own.

use base::{Error, TracingEventSink};
use handoff::{hinted_handoff_request, purge_handoff_request, segment_from_wire, Forwarder, ForwarderStep};
use mio::Token;
use proto::{ClientTag, NodeName};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use storage::SegmentRow;
use transport::{Pollster, ResilientClient};
use writer::WriterService;

/// How often a home node re-checks its peers for segments held on its
/// behalf (no named constant survives in the retrieved source for this
/// interval; chosen generous relative to `auditor::retry_time()` since a
/// missed sweep just waits for the next one rather than failing anything).
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

const HANDOFF_TAG_PREFIX: &str = "handoff-sweep-";
const RETRIEVE_TAG_PREFIX: &str = "handoff-retrieve-";

pub struct HandoffDriver {
    local_node_name: NodeName,
    handoff_clients: HashMap<NodeName, ResilientClient>,
    reader_clients: HashMap<NodeName, ResilientClient>,
    pending_segments: VecDeque<(SegmentRow, NodeName)>,
    active: Option<(Forwarder, NodeName)>,
    purge_batches: HashMap<NodeName, Vec<i64>>,
    last_sweep: Option<Instant>,
}

impl HandoffDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_node_name: NodeName,
        peer_names: &[String],
        handoff_peer_addresses: &[SocketAddr],
        reader_peer_addresses: &[SocketAddr],
        client_pipeline_address: String,
        pollster: &mut Pollster,
    ) -> Result<Self, Error> {
        let mut handoff_clients = HashMap::new();
        let mut reader_clients = HashMap::new();

        for (i, name) in peer_names.iter().enumerate() {
            let peer = NodeName::new(name.clone());
            if peer == local_node_name {
                continue;
            }
            let handoff_addr = *handoff_peer_addresses
                .get(i)
                .ok_or_else(|| base::err("handoff peer address list shorter than NODE_NAME_SEQ"))?;
            let handoff_token = pollster.alloc_token();
            handoff_clients.insert(
                peer.clone(),
                ResilientClient::new(
                    peer.clone(),
                    handoff_addr,
                    ClientTag::new(format!("{HANDOFF_TAG_PREFIX}{name}")),
                    client_pipeline_address.clone(),
                    handoff_token,
                ),
            );

            if let Some(&reader_addr) = reader_peer_addresses.get(i) {
                let reader_token = pollster.alloc_token();
                reader_clients.insert(
                    peer.clone(),
                    ResilientClient::new(
                        peer.clone(),
                        reader_addr,
                        ClientTag::new(format!("{RETRIEVE_TAG_PREFIX}{name}")),
                        client_pipeline_address.clone(),
                        reader_token,
                    ),
                );
            }
        }

        Ok(Self {
            local_node_name,
            handoff_clients,
            reader_clients,
            pending_segments: VecDeque::new(),
            active: None,
            purge_batches: HashMap::new(),
            last_sweep: None,
        })
    }

    pub fn owns(&self, token: Token) -> bool {
        self.handoff_clients.values().any(|c| c.token() == token)
            || self.reader_clients.values().any(|c| c.token() == token)
    }

    pub fn tick(&mut self, pollster: &mut Pollster) -> Result<(), Error> {
        for client in self.handoff_clients.values_mut() {
            client.tick(pollster)?;
        }
        for client in self.reader_clients.values_mut() {
            client.tick(pollster)?;
        }
        Ok(())
    }

    pub fn on_readable(&mut self, token: Token) -> Result<(), Error> {
        if let Some(client) = self.handoff_clients.values_mut().find(|c| c.token() == token) {
            return client.on_readable();
        }
        if let Some(client) = self.reader_clients.values_mut().find(|c| c.token() == token) {
            return client.on_readable();
        }
        Ok(())
    }

    pub fn on_writable(&mut self, token: Token) -> Result<(), Error> {
        if let Some(client) = self.handoff_clients.values_mut().find(|c| c.token() == token) {
            return client.on_writable();
        }
        if let Some(client) = self.reader_clients.values_mut().find(|c| c.token() == token) {
            return client.on_writable();
        }
        Ok(())
    }

    /// Broadcast `hinted-handoff` to every peer if the interval has elapsed
    /// and nothing from a previous sweep is still being worked through.
    pub fn maybe_start_sweep(&mut self) -> Result<(), Error> {
        let due = self.last_sweep.map_or(true, |t| t.elapsed() >= SWEEP_INTERVAL);
        if !due || !self.pending_segments.is_empty() || self.active.is_some() {
            return Ok(());
        }
        self.last_sweep = Some(Instant::now());
        let request = hinted_handoff_request(&self.local_node_name);
        for client in self.handoff_clients.values_mut() {
            client.queue_message(request.clone(), Vec::new())?;
        }
        Ok(())
    }

    fn peer_for_tag(control: &Value) -> Option<NodeName> {
        let tag = control.get("client-tag").and_then(|v| v.as_str())?;
        tag.strip_prefix(HANDOFF_TAG_PREFIX)
            .or_else(|| tag.strip_prefix(RETRIEVE_TAG_PREFIX))
            .map(|name| NodeName::new(name.to_string()))
    }

    /// A peer's `hinted-handoff-reply` arrived on the reply listener: queue
    /// its segments for forwarding and kick off the next one if idle.
    pub fn on_hinted_handoff_reply(&mut self, control: &Value) -> Result<(), Error> {
        let Some(peer) = Self::peer_for_tag(control) else {
            return Ok(());
        };
        let segments = control.get("segments").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        for value in segments {
            let row = segment_from_wire(&value)?;
            self.pending_segments.push_back((row, peer.clone()));
        }
        self.drive_next()
    }

    fn drive_next(&mut self) -> Result<(), Error> {
        if self.active.is_some() {
            return Ok(());
        }
        let Some((segment, peer)) = self.pending_segments.pop_front() else {
            return Ok(());
        };
        let forwarder = Forwarder::new(segment, vec![peer.clone()]);
        let start = forwarder.start();
        match self.reader_clients.get_mut(&peer) {
            Some(reader) => reader.queue_message(start, Vec::new())?,
            None => {
                tracing::warn!("no reader peer address configured for {:?}; dropping handoff segment", peer);
                return self.drive_next();
            }
        }
        self.active = Some((forwarder, peer));
        Ok(())
    }

    /// A `retrieve-key-start-reply`/`retrieve-key-next-reply` arrived for
    /// the forwarder currently in flight: re-archive the body through this
    /// node's own writer in-process (no network hop needed, same process),
    /// then either ask for the next chunk or, once done, queue the purge.
    pub fn on_retrieve_reply(
        &mut self,
        control: &Value,
        body: Vec<u8>,
        writer: &mut WriterService<TracingEventSink>,
    ) -> Result<(), Error> {
        let Some((forwarder, peer)) = self.active.as_mut() else {
            return Ok(());
        };
        let peer = peer.clone();
        let (archive_message, archive_body) = forwarder.on_retrieve_reply(control, body)?;
        let (archive_reply, _) =
            writer.handle(&ClientTag::new("handoff"), "handoff-local", &archive_message, &[archive_body])?;

        let forwarder = &mut self.active.as_mut().unwrap().0;
        let step = forwarder.on_archive_reply(&archive_reply)?;
        match step {
            ForwarderStep::SendRetrieveNext(next) => {
                if let Some(reader) = self.reader_clients.get_mut(&peer) {
                    reader.queue_message(next, Vec::new())?;
                }
            }
            ForwarderStep::Done => {
                let (forwarder, peer) = self.active.take().unwrap();
                let (segment, _source_names) = forwarder.into_result()?;
                self.purge_batches.entry(peer).or_default().push(segment.id);
                self.drive_next()?;
            }
        }
        Ok(())
    }

    /// Send every accumulated purge batch and clear it, regardless of
    /// whether a segment handed off from that peer is still in flight
    /// elsewhere (purges are keyed by already-reconciled segment id, not by
    /// the forwarder that produced them).
    pub fn flush_purges(&mut self) -> Result<(), Error> {
        for (peer, ids) in self.purge_batches.drain() {
            if let Some(client) = self.handoff_clients.get_mut(&peer) {
                client.queue_message(purge_handoff_request(&ids), Vec::new())?;
            }
        }
        Ok(())
    }
}
