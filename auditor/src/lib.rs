// Anti-entropy auditor (§4.5), reworked from anti_entropy_server_main.py:
// one side answers `consistency-check` with a per-collection digest over its
// own segment index, the other side (the node designated to drive a given
// collection's check) collects replies from all N nodes, decides whether
// they agree, and records the outcome via the audit_result bookkeeping
// already in LocalIndex.

use base::{err, EventSink, Md5Digest, RollingMd5, Timestamp};
use proto::{ClientTag, CollectionId, NodeName};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use storage::{LocalIndex, SegmentRow};
use transport::Handler;

/// "Missed 3 consistency checks in a row" per the module's own description
/// of when item-level repair should kick in.
pub const MAX_RETRY_COUNT: u32 = 3;

/// "schedule collection for recheck in an hour".
pub fn retry_time() -> Duration {
    Duration::from_secs(60 * 60)
}

/// How long a driven check waits for every node to reply before its state
/// is reaped (`_request_timeout` in the source).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Per-row contribution to a collection's consistency digest: `key`,
/// `timestamp.to_repr()`, and the row's `file_hash` as raw bytes, or the
/// literal ASCII text `"None"` when there isn't one (the source hashes
/// `str(file_hash)` over a value that is a Python `bytes` object or `None`;
/// this commits to that exact byte sequence, §9 open question).
pub fn compute_collection_digest(rows: &[SegmentRow]) -> (u64, Md5Digest) {
    let mut rolling = RollingMd5::new();
    for row in rows {
        rolling.update(row.key.as_bytes());
        rolling.update(row.timestamp.to_repr().as_bytes());
        match row.file_hash {
            Some(hash) => rolling.update(hash.as_bytes()),
            None => rolling.update(b"None"),
        }
    }
    (rows.len() as u64, rolling.digest())
}

/// The escalation the source sketches but never implements ("TODO: need to
/// do something here"). Left a no-op per the resolved open question; a
/// future item-level repair pass hangs off this seam.
pub fn escalate_to_item_repair(_collection_id: CollectionId) {}

pub struct AuditorService<S: EventSink> {
    local_node_name: NodeName,
    index: LocalIndex,
    sink: S,
    node_count: usize,
    coordinator: AuditCoordinator,
    /// `consistency-check` requests waiting to be broadcast to every peer
    /// (§2: "auditor on the designated node issues `consistency-check` to
    /// all nodes"). The driver in `node` owns the actual peer clients; this
    /// crate only knows what to say, not how to reach anyone.
    outbox: Vec<Value>,
    /// Deferred `anti-entropy-audit-reply` frames waiting to go out a
    /// client's reply pipeline once every peer's `consistency-check-reply`
    /// is in (§4.5).
    pending_client_replies: Vec<(String, Value)>,
}

impl<S: EventSink> AuditorService<S> {
    pub fn new(local_node_name: NodeName, index: LocalIndex, sink: S, node_count: usize) -> Self {
        Self {
            local_node_name,
            index,
            sink,
            node_count,
            coordinator: AuditCoordinator::new(),
            outbox: Vec::new(),
            pending_client_replies: Vec::new(),
        }
    }

    /// Requests to broadcast to every peer, draining the queue.
    pub fn drain_outbox(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.outbox)
    }

    /// `(client_address, anti-entropy-audit-reply)` pairs ready to push via
    /// `ResilientServer::send_unsolicited`, draining the queue.
    pub fn drain_client_replies(&mut self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.pending_client_replies)
    }

    /// Run the coordinator's periodic housekeeping: reap checks no peer
    /// answered in time, and hand back whichever retries are due so the
    /// caller can resubmit them via `handle_anti_entropy_audit_request`'s
    /// sibling path (restarting with `existing_row_id`).
    pub fn coordinator_mut(&mut self) -> &mut AuditCoordinator {
        &mut self.coordinator
    }

    fn handle_anti_entropy_audit_request(
        &mut self,
        client_address: &str,
        control: &Value,
    ) -> Result<Value, base::Error> {
        let collection_id = CollectionId(
            control
                .get("collection-id")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| err("missing collection-id"))?,
        );
        let client_tag = control
            .get("client-tag")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let timestamp = Timestamp::now();

        let broadcast = self.coordinator.begin(
            &self.index,
            collection_id,
            timestamp,
            None,
            client_tag.clone(),
            MAX_RETRY_COUNT,
            self.node_count,
            Some(client_address.to_string()),
        )?;
        self.outbox.push(broadcast.clone());

        // This node is one of the expected_nodes too; answer for itself
        // straight away rather than round-tripping a request to its own
        // resilient server.
        let own_reply = self.handle_consistency_check(&broadcast)?;
        self.ingest_consistency_check_reply(&own_reply)?;

        Ok(json!({
            "message-type": "anti-entropy-audit-request-ack",
            "client-tag": client_tag,
            "collection-id": collection_id.0,
            "result": "accepted",
        }))
    }

    /// Ingest one peer's `consistency-check-reply`, arriving out-of-band on
    /// the node's `ReplyListener` (this node sent the request as a client;
    /// `ResilientClient` itself only ever sees the ack). Once every expected
    /// node has reported, applies the resulting `AuditDecision` and queues
    /// any deferred client reply.
    pub fn ingest_consistency_check_reply(&mut self, control: &Value) -> Result<(), base::Error> {
        let collection_id = CollectionId(
            control
                .get("collection-id")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| err("missing collection-id"))?,
        );
        let timestamp_repr = control
            .get("timestamp-repr")
            .and_then(|v| v.as_str())
            .ok_or_else(|| err("missing timestamp-repr"))?;
        let timestamp = Timestamp::parse_repr(timestamp_repr)?;
        let node_name = NodeName::new(
            control
                .get("node-name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| err("missing node-name"))?
                .to_string(),
        );
        let result = control.get("result").and_then(|v| v.as_str()).unwrap_or("error");
        let reply = if result == "success" {
            NodeReply::Success {
                count: control.get("count").and_then(|v| v.as_u64()).unwrap_or(0),
                digest: control
                    .get("encoded-md5-digest")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
            }
        } else {
            NodeReply::Error
        };

        if let Some(decision) = self.coordinator.record_reply(collection_id, timestamp, node_name, reply) {
            decision.apply(&self.index, &self.sink, Timestamp::now())?;
            if let (Some(client_reply), Some(address)) = (decision.client_reply, decision.client_address) {
                self.pending_client_replies.push((address, client_reply));
            }
        }
        Ok(())
    }

    fn handle_consistency_check(&mut self, control: &Value) -> Result<Value, base::Error> {
        let collection_id = CollectionId(
            control
                .get("collection-id")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| err("missing collection-id"))?,
        );
        let stream = self.index.segments_for_audit(collection_id)?;
        let (count, digest) = compute_collection_digest(&stream.rows);
        tracing::info!("found {} rows for collection {}", count, collection_id.0);

        Ok(json!({
            "message-type": "consistency-check-reply",
            "client-tag": control.get("client-tag").cloned().unwrap_or(Value::Null),
            "node-name": self.local_node_name.0,
            "collection-id": collection_id.0,
            "timestamp-repr": control.get("timestamp-repr").cloned().unwrap_or(Value::Null),
            "result": "success",
            "count": count,
            "encoded-md5-digest": digest.to_base64(),
            "error-message": Value::Null,
        }))
    }
}

impl<S: EventSink> Handler for AuditorService<S> {
    fn handle(
        &mut self,
        _client_tag: &ClientTag,
        client_address: &str,
        control: &Value,
        _bodies: &[Vec<u8>],
    ) -> Result<(Value, Vec<Vec<u8>>), base::Error> {
        let verb = control.get("message-type").and_then(|v| v.as_str()).unwrap_or("");
        let reply = match verb {
            "consistency-check" => self.handle_consistency_check(control)?,
            "anti-entropy-audit-request" => self.handle_anti_entropy_audit_request(client_address, control)?,
            other => json!({
                "message-type": "error",
                "result": "unknown-request",
                "error-message": format!("unrecognized message-type: {:?}", other),
            }),
        };
        Ok((reply, Vec::new()))
    }
}

#[derive(Clone, Debug)]
pub enum NodeReply {
    Success { count: u64, digest: String },
    Error,
}

struct ActiveCheck {
    collection_id: CollectionId,
    row_id: i64,
    client_tag: Option<String>,
    client_address: Option<String>,
    retry_count: u32,
    expected_nodes: usize,
    replies: HashMap<NodeName, NodeReply>,
    expires_at: Instant,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
struct CheckKey {
    collection_id: CollectionId,
    timestamp: Timestamp,
}

pub struct RetryEntry {
    pub collection_id: CollectionId,
    pub row_id: i64,
    pub retry_count: u32,
    pub retry_at: Instant,
}

pub enum IndexAction {
    Successful,
    WaitForRetry,
    Error,
}

pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// What the caller must do once every node's reply for a check is in:
/// update the audit_result row, emit an event, optionally schedule a
/// retry, and optionally send a synchronous client reply.
pub struct AuditDecision {
    pub row_id: i64,
    pub collection_id: CollectionId,
    pub index_action: IndexAction,
    pub retry: Option<RetryEntry>,
    pub event_level: EventLevel,
    pub event_tag: &'static str,
    pub event_description: String,
    pub client_reply: Option<Value>,
    pub client_address: Option<String>,
}

impl AuditDecision {
    /// Apply `index_action` to `index` and emit the event via `sink`. Does
    /// not send `client_reply` — that is the caller's resilient-server
    /// handle, not something this crate owns.
    pub fn apply<S: EventSink>(&self, index: &LocalIndex, sink: &S, now: Timestamp) -> Result<(), base::Error> {
        match self.index_action {
            IndexAction::Successful => index.successful_audit(self.row_id, now)?,
            IndexAction::WaitForRetry => index.wait_for_retry(self.row_id)?,
            IndexAction::Error => index.audit_error(self.row_id, now)?,
        }
        match self.event_level {
            EventLevel::Info => sink.info(self.event_tag, &self.event_description),
            EventLevel::Warn => sink.warn(self.event_tag, &self.event_description),
            EventLevel::Error => sink.error(self.event_tag, &self.event_description),
        }
        Ok(())
    }
}

/// Tracks in-flight consistency checks and the retry list, the live
/// counterpart of the source's `state["active-requests"]` /
/// `state["retry-list"]`.
pub struct AuditCoordinator {
    active: HashMap<CheckKey, ActiveCheck>,
}

impl Default for AuditCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditCoordinator {
    pub fn new() -> Self {
        Self {
            active: HashMap::new(),
        }
    }

    /// Start (or restart, via `existing_row_id`) an audit and return the
    /// `consistency-check` request body to broadcast to every node.
    #[allow(clippy::too_many_arguments)]
    pub fn begin(
        &mut self,
        index: &LocalIndex,
        collection_id: CollectionId,
        timestamp: Timestamp,
        existing_row_id: Option<i64>,
        client_tag: Option<String>,
        retry_count: u32,
        expected_nodes: usize,
        client_address: Option<String>,
    ) -> Result<Value, base::Error> {
        let row_id = match existing_row_id {
            Some(row_id) => {
                index.restart_audit(row_id, timestamp)?;
                row_id
            }
            None => index.start_audit(collection_id, timestamp)?,
        };

        self.active.insert(
            CheckKey {
                collection_id,
                timestamp,
            },
            ActiveCheck {
                collection_id,
                row_id,
                client_tag,
                client_address,
                retry_count,
                expected_nodes,
                replies: HashMap::new(),
                expires_at: Instant::now() + REQUEST_TIMEOUT,
            },
        );

        Ok(json!({
            "message-type": "consistency-check",
            "collection-id": collection_id.0,
            "timestamp-repr": timestamp.to_repr(),
        }))
    }

    /// Record one node's `consistency-check-reply`. Returns the decision
    /// once every expected node has replied, otherwise `None`.
    pub fn record_reply(
        &mut self,
        collection_id: CollectionId,
        timestamp: Timestamp,
        node_name: NodeName,
        reply: NodeReply,
    ) -> Option<AuditDecision> {
        let key = CheckKey {
            collection_id,
            timestamp,
        };
        let check = self.active.get_mut(&key)?;
        if check.replies.contains_key(&node_name) {
            tracing::error!("duplicate reply from {:?} for {:?}", node_name, key);
            return None;
        }
        check.replies.insert(node_name, reply);

        if check.replies.len() < check.expected_nodes {
            return None;
        }

        let check = self.active.remove(&key).unwrap();
        Some(aggregate_replies(check))
    }

    /// Drop any check still missing replies past its deadline (a node that
    /// never answers should not wedge this collection's audit forever).
    pub fn reap_stale_checks(&mut self) {
        let now = Instant::now();
        self.active.retain(|key, check| {
            let alive = check.expires_at > now;
            if !alive {
                tracing::warn!("reaping stale consistency-check state for {:?}", key);
            }
            alive
        });
    }

    /// Split `retry_list` into (due, still-waiting), for the caller to
    /// resubmit the due half via `begin` and keep the rest.
    pub fn drain_due_retries(retry_list: Vec<RetryEntry>) -> (Vec<RetryEntry>, Vec<RetryEntry>) {
        let now = Instant::now();
        retry_list.into_iter().partition(|entry| entry.retry_at <= now)
    }
}

fn aggregate_replies(check: ActiveCheck) -> AuditDecision {
    let explicit = check.client_tag.is_some();
    let client_address = check.client_address.clone();
    let mut digest_groups: HashMap<String, Vec<NodeName>> = HashMap::new();
    let mut error_nodes: Vec<NodeName> = Vec::new();
    for (node, reply) in &check.replies {
        match reply {
            NodeReply::Success { digest, .. } => {
                digest_groups.entry(digest.clone()).or_default().push(node.clone());
            }
            NodeReply::Error => error_nodes.push(node.clone()),
        }
    }
    error_nodes.sort();
    let mut groups: Vec<Vec<NodeName>> = digest_groups.into_values().collect();
    groups.iter_mut().for_each(|g| g.sort());
    groups.sort_by(|a, b| a.first().cmp(&b.first()));

    let client_reply_base = |result: &str| -> Value {
        json!({
            "message-type": "anti-entropy-audit-reply",
            "client-tag": check.client_tag.clone().unwrap_or_default(),
            "collection-id": check.collection_id.0,
            "result": result,
            "error-message": Value::Null,
            "error-reply-nodes": error_nodes.iter().map(|n| n.0.clone()).collect::<Vec<_>>(),
        })
    };

    // Case 1: every reply succeeded and they all agree.
    if error_nodes.is_empty() && groups.len() == 1 {
        let description = format!("collection {} compares ok", check.collection_id.0);
        let client_reply = check.client_tag.as_ref().map(|_| client_reply_base("success"));
        return AuditDecision {
            row_id: check.row_id,
            collection_id: check.collection_id,
            index_action: IndexAction::Successful,
            retry: None,
            event_level: EventLevel::Info,
            event_tag: "audit-ok",
            event_description: description,
            client_reply,
            client_address: client_address.clone(),
        };
    }

    // Case 3: two or more distinct digests among the successful replies,
    // possibly mixed with errors.
    if groups.len() >= 2 {
        let description = format!(
            "{} error replies from {} nodes; hash mismatch(es) across {} groups",
            check.collection_id.0,
            error_nodes.len(),
            groups.len()
        );
        if explicit {
            let mut reply = client_reply_base("audit-error");
            reply["error-message"] = json!(description.clone());
            for (i, group) in groups.iter().enumerate() {
                reply[format!("mismatch-nodes-{}", i + 1)] =
                    json!(group.iter().map(|n| n.0.clone()).collect::<Vec<_>>());
            }
            escalate_to_item_repair(check.collection_id);
            return AuditDecision {
                row_id: check.row_id,
                collection_id: check.collection_id,
                index_action: IndexAction::Error,
                retry: None,
                event_level: EventLevel::Warn,
                event_tag: "audit-retry",
                event_description: description,
                client_reply: Some(reply),
                client_address: client_address.clone(),
            };
        }
        if check.retry_count >= MAX_RETRY_COUNT {
            escalate_to_item_repair(check.collection_id);
            return AuditDecision {
                row_id: check.row_id,
                collection_id: check.collection_id,
                index_action: IndexAction::Error,
                retry: None,
                event_level: EventLevel::Warn,
                event_tag: "audit-retry",
                event_description: description,
                client_reply: None,
                client_address: client_address.clone(),
            };
        }
        return AuditDecision {
            row_id: check.row_id,
            collection_id: check.collection_id,
            index_action: IndexAction::WaitForRetry,
            retry: Some(RetryEntry {
                collection_id: check.collection_id,
                row_id: check.row_id,
                retry_count: check.retry_count + 1,
                retry_at: Instant::now() + retry_time(),
            }),
            event_level: EventLevel::Warn,
            event_tag: "audit-retry",
            event_description: description,
            client_reply: None,
            client_address: client_address.clone(),
        };
    }

    // Case 2: some errors, but the rest (if any) agree with each other.
    let description = format!(
        "collection {} had error replies from {} nodes",
        check.collection_id.0,
        error_nodes.len()
    );
    if explicit {
        let mut reply = client_reply_base("error");
        reply["error-message"] = json!(description.clone());
        return AuditDecision {
            row_id: check.row_id,
            collection_id: check.collection_id,
            index_action: IndexAction::Error,
            retry: None,
            event_level: EventLevel::Error,
            event_tag: "consistency-check-errors-replies",
            event_description: description,
            client_reply: Some(reply),
            client_address: client_address.clone(),
        };
    }
    if check.retry_count >= MAX_RETRY_COUNT {
        return AuditDecision {
            row_id: check.row_id,
            collection_id: check.collection_id,
            index_action: IndexAction::Error,
            retry: None,
            event_level: EventLevel::Error,
            event_tag: "audit-errors",
            event_description: description,
            client_reply: None,
            client_address: client_address.clone(),
        };
    }
    AuditDecision {
        row_id: check.row_id,
        collection_id: check.collection_id,
        index_action: IndexAction::WaitForRetry,
        retry: Some(RetryEntry {
            collection_id: check.collection_id,
            row_id: check.row_id,
            retry_count: check.retry_count + 1,
            retry_at: Instant::now() + retry_time(),
        }),
        event_level: EventLevel::Warn,
        event_tag: "audit-retry",
        event_description: description,
        client_reply: None,
        client_address,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use base::RecordingEventSink;
    use proto::{ConjoinedPart, SegmentNum, UnifiedId};
    use storage::{NewSegment, SegmentStatus};
    use test_log::test;

    fn seg(key: &str, ts: i64, hash: Option<Md5Digest>) -> SegmentRow {
        SegmentRow {
            id: 0,
            collection_id: CollectionId(1),
            key: key.to_string(),
            unified_id: UnifiedId::generate(),
            conjoined_part: ConjoinedPart::NONE,
            segment_num: SegmentNum(1),
            timestamp: Timestamp::from_micros(ts),
            file_size: None,
            file_adler32: None,
            file_hash: hash,
            status: SegmentStatus::Final,
            handoff_node_id: None,
            file_tombstone_unified_id: None,
            source_node_id: NodeName::new("node01"),
        }
    }

    #[test]
    fn identical_rows_produce_identical_digests() {
        let hash = Md5Digest::of(b"payload");
        let rows_a = vec![seg("a", 1, Some(hash)), seg("b", 2, Some(hash))];
        let rows_b = rows_a.clone();
        assert_eq!(compute_collection_digest(&rows_a), compute_collection_digest(&rows_b));
    }

    #[test]
    fn differing_hash_changes_digest() {
        let rows_a = vec![seg("a", 1, Some(Md5Digest::of(b"one")))];
        let rows_b = vec![seg("a", 1, Some(Md5Digest::of(b"two")))];
        assert_ne!(compute_collection_digest(&rows_a).1, compute_collection_digest(&rows_b).1);
    }

    #[test]
    fn tombstone_hashes_as_none_marker() {
        let rows = vec![seg("a", 1, None)];
        let (count, digest) = compute_collection_digest(&rows);
        assert_eq!(count, 1);
        let mut rolling = RollingMd5::new();
        rolling.update(b"a");
        rolling.update(Timestamp::from_micros(1).to_repr().as_bytes());
        rolling.update(b"None");
        assert_eq!(digest, rolling.digest());
    }

    #[test]
    fn consistency_check_handler_reports_count_and_digest() {
        let index = LocalIndex::open_in_memory().unwrap();
        let segment = NewSegment {
            collection_id: CollectionId(1),
            key: "k".to_string(),
            unified_id: UnifiedId::generate(),
            conjoined_part: ConjoinedPart::NONE,
            segment_num: SegmentNum(1),
            timestamp: Timestamp::from_micros(1),
            status: SegmentStatus::Final,
            handoff_node_id: None,
            file_tombstone_unified_id: None,
            source_node_id: NodeName::new("node01"),
        };
        index.insert_segment(&segment).unwrap();

        let mut service = AuditorService::new(NodeName::new("node01"), index, RecordingEventSink::default(), 1);
        let control = json!({
            "message-type": "consistency-check",
            "collection-id": 1,
            "timestamp-repr": "1700000000.000000",
        });
        let (reply, _) = service
            .handle(&ClientTag::new("auditor"), "127.0.0.1:1", &control, &[])
            .unwrap();
        assert_eq!(reply["result"], json!("success"));
        assert_eq!(reply["count"], json!(1));
        assert!(reply["encoded-md5-digest"].is_string());
    }

    #[test]
    fn coordinator_reports_success_when_all_digests_agree() {
        let index = LocalIndex::open_in_memory().unwrap();
        let mut coordinator = AuditCoordinator::new();
        let ts = Timestamp::from_micros(1);
        coordinator
            .begin(&index, CollectionId(1), ts, None, None, 0, 2, None)
            .unwrap();

        let reply1 = coordinator.record_reply(
            CollectionId(1),
            ts,
            NodeName::new("node01"),
            NodeReply::Success {
                count: 3,
                digest: "abc".to_string(),
            },
        );
        assert!(reply1.is_none());

        let decision = coordinator
            .record_reply(
                CollectionId(1),
                ts,
                NodeName::new("node02"),
                NodeReply::Success {
                    count: 3,
                    digest: "abc".to_string(),
                },
            )
            .unwrap();
        assert!(matches!(decision.index_action, IndexAction::Successful));
        assert!(decision.client_reply.is_none());
    }

    #[test]
    fn coordinator_schedules_retry_on_mismatch() {
        let index = LocalIndex::open_in_memory().unwrap();
        let mut coordinator = AuditCoordinator::new();
        let ts = Timestamp::from_micros(2);
        coordinator
            .begin(&index, CollectionId(1), ts, None, None, 0, 2, None)
            .unwrap();

        coordinator.record_reply(
            CollectionId(1),
            ts,
            NodeName::new("node01"),
            NodeReply::Success {
                count: 3,
                digest: "abc".to_string(),
            },
        );
        let decision = coordinator
            .record_reply(
                CollectionId(1),
                ts,
                NodeName::new("node02"),
                NodeReply::Success {
                    count: 2,
                    digest: "xyz".to_string(),
                },
            )
            .unwrap();
        assert!(matches!(decision.index_action, IndexAction::WaitForRetry));
        assert!(decision.retry.is_some());
    }

    #[test]
    fn drain_due_retries_splits_on_deadline() {
        let now = Instant::now();
        let retry_list = vec![
            RetryEntry {
                collection_id: CollectionId(1),
                row_id: 1,
                retry_count: 1,
                retry_at: now - Duration::from_secs(1),
            },
            RetryEntry {
                collection_id: CollectionId(2),
                row_id: 2,
                retry_count: 1,
                retry_at: now + Duration::from_secs(3600),
            },
        ];
        let (due, waiting) = AuditCoordinator::drain_due_retries(retry_list);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].collection_id, CollectionId(1));
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].collection_id, CollectionId(2));
    }

    #[test]
    fn coordinator_replies_synchronously_for_explicit_request() {
        let index = LocalIndex::open_in_memory().unwrap();
        let mut coordinator = AuditCoordinator::new();
        let ts = Timestamp::from_micros(3);
        coordinator
            .begin(
                &index,
                CollectionId(1),
                ts,
                None,
                Some("client01".to_string()),
                MAX_RETRY_COUNT,
                1,
                Some("127.0.0.1:1".to_string()),
            )
            .unwrap();

        let decision = coordinator
            .record_reply(CollectionId(1), ts, NodeName::new("node01"), NodeReply::Error)
            .unwrap();
        assert!(matches!(decision.index_action, IndexAction::Error));
        assert!(decision.client_reply.is_some());
        assert_eq!(decision.client_reply.unwrap()["result"], json!("error"));
    }
}
