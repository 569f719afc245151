// The handoff subsystem (§4.4, §4.4a), reworked from
// forwarder_coroutine.py: a home node A asks every peer "what have you
// stored on my behalf", drives a `Forwarder` per returned segment to pull
// it back from the peer's reader and re-archive it through A's own writer,
// then purges the peer's copy. The coroutine's yield points become an
// explicit `{start, await_retrieve, await_archive, done}` state machine
// (§9's language-neutral reshape) fed by reply callbacks instead of
// suspended generator frames.

use base::{err, EventSink, Timestamp};
use proto::{ClientTag, CollectionId, ConjoinedPart, MessageId, NodeName, SegmentNum, UnifiedId};
use serde_json::{json, Value};
use storage::{LocalIndex, SegmentRow, SegmentStatus};
use transport::Handler;

enum ForwarderState {
    AwaitRetrieve,
    AwaitArchive { completed: bool },
    Done,
}

/// One instance per handed-off segment, driven by whatever owns the
/// reader/writer resilient clients (§9: this crate models only the state
/// machine, not the socket plumbing).
pub struct Forwarder {
    segment: SegmentRow,
    source_node_names: Vec<NodeName>,
    sequence: i32,
    state: ForwarderState,
}

pub enum ForwarderStep {
    SendRetrieveNext(Value),
    Done,
}

impl Forwarder {
    pub fn new(segment: SegmentRow, source_node_names: Vec<NodeName>) -> Self {
        Self {
            segment,
            source_node_names,
            sequence: 0,
            state: ForwarderState::AwaitRetrieve,
        }
    }

    /// The opening message: `retrieve-key-start` against the holding
    /// node's reader.
    pub fn start(&self) -> Value {
        json!({
            "message-type": "retrieve-key-start",
            "message-id": MessageId::generate().0,
            "segment-unified-id": self.segment.unified_id.0,
            "segment-conjoined-part": self.segment.conjoined_part.0,
            "segment-num": self.segment.segment_num.0,
        })
    }

    /// Consume a successful `retrieve-key-reply` and its body, producing
    /// the `archive-key-*` message (and body) to send to the home node's
    /// own writer.
    pub fn on_retrieve_reply(&mut self, reply: &Value, body: Vec<u8>) -> Result<(Value, Vec<u8>), base::Error> {
        if !matches!(self.state, ForwarderState::AwaitRetrieve) {
            return Err(err("forwarder received a retrieve reply while not awaiting one"));
        }
        if reply.get("result").and_then(|v| v.as_str()) != Some("success") {
            return Err(err("retrieve-key reply was not success; aborting forwarder"));
        }
        let completed = reply.get("completed").and_then(|v| v.as_bool()).unwrap_or(false);
        self.sequence += 1;

        let verb = match (completed, self.sequence) {
            (true, 1) => "archive-key-entire",
            (true, _) => "archive-key-final",
            (false, 1) => "archive-key-start",
            (false, _) => "archive-key-next",
        };

        let mut message = json!({
            "message-type": verb,
            "message-id": MessageId::generate().0,
            "collection-id": self.segment.collection_id.0,
            "key": self.segment.key,
            "unified-id": self.segment.unified_id.0,
            "conjoined-part": self.segment.conjoined_part.0,
            "timestamp-repr": self.segment.timestamp.to_repr(),
            "segment-num": self.segment.segment_num.0,
            "sequence-num": self.sequence,
            "segment-size": reply.get("segment-size").cloned().unwrap_or(Value::Null),
            "zfec-padding-size": reply.get("zfec-padding-size").cloned().unwrap_or(Value::Null),
            "segment-adler32": reply.get("segment-adler32").cloned().unwrap_or(Value::Null),
            "segment-md5-digest": reply.get("segment-md5-digest").cloned().unwrap_or(Value::Null),
            "source-node-name": self.segment.source_node_id.0,
            "handoff-node-name": Value::Null,
        });

        if completed {
            let file_size = self.segment.file_size.ok_or_else(|| err("completed segment missing file_size"))?;
            let file_adler32 = self
                .segment
                .file_adler32
                .ok_or_else(|| err("completed segment missing file_adler32"))?;
            let file_hash = self.segment.file_hash.ok_or_else(|| err("completed segment missing file_hash"))?;
            message["file-size"] = json!(file_size);
            message["file-adler32"] = json!(file_adler32);
            message["file-hash"] = json!(file_hash.to_base64());
        }

        self.state = ForwarderState::AwaitArchive { completed };
        Ok((message, body))
    }

    /// Consume a successful `archive-key-*-reply`. Either the conversation
    /// continues with another `retrieve-key-next`, or the segment is fully
    /// re-archived and the forwarder is done.
    pub fn on_archive_reply(&mut self, reply: &Value) -> Result<ForwarderStep, base::Error> {
        let ForwarderState::AwaitArchive { completed } = self.state else {
            return Err(err("forwarder received an archive reply while not awaiting one"));
        };
        if reply.get("result").and_then(|v| v.as_str()) != Some("success") {
            return Err(err("archive-key reply was not success; aborting forwarder"));
        }
        if completed {
            self.state = ForwarderState::Done;
            return Ok(ForwarderStep::Done);
        }
        self.state = ForwarderState::AwaitRetrieve;
        Ok(ForwarderStep::SendRetrieveNext(json!({
            "message-type": "retrieve-key-next",
            "message-id": MessageId::generate().0,
            "segment-unified-id": self.segment.unified_id.0,
            "segment-conjoined-part": self.segment.conjoined_part.0,
            "segment-num": self.segment.segment_num.0,
        })))
    }

    /// Unwrap the forwarder once it reaches `Done`: what the driver needs
    /// to issue the `purge-handoff` back to the holding node.
    pub fn into_result(self) -> Result<(SegmentRow, Vec<NodeName>), base::Error> {
        match self.state {
            ForwarderState::Done => Ok((self.segment, self.source_node_names)),
            _ => Err(err("forwarder has not completed")),
        }
    }
}

fn segment_to_wire(row: &SegmentRow) -> Value {
    json!({
        "segment-id": row.id,
        "collection-id": row.collection_id.0,
        "key": row.key,
        "unified-id": row.unified_id.0,
        "conjoined-part": row.conjoined_part.0,
        "segment-num": row.segment_num.0,
        "timestamp-repr": row.timestamp.to_repr(),
        "file-size": row.file_size,
        "file-adler32": row.file_adler32,
        "file-hash": row.file_hash.map(|h| h.to_base64()),
        "source-node-name": row.source_node_id.0,
    })
}

/// Reconstruct the minimal `SegmentRow` a `Forwarder` needs from one entry
/// of a `hinted-handoff-reply`'s `segments` array. The fields a forwarder
/// never reads (`status`, `handoff_node_id`, `file_tombstone_unified_id`)
/// are filled with placeholders.
pub fn segment_from_wire(value: &Value) -> Result<SegmentRow, base::Error> {
    let get_str = |key: &str| -> Result<&str, base::Error> {
        value.get(key).and_then(|v| v.as_str()).ok_or_else(|| err(format!("missing field {:?}", key)))
    };
    let get_i64 = |key: &str| -> Result<i64, base::Error> {
        value.get(key).and_then(|v| v.as_i64()).ok_or_else(|| err(format!("missing field {:?}", key)))
    };

    let file_hash = value
        .get("file-hash")
        .and_then(|v| v.as_str())
        .and_then(base::Md5Digest::from_base64);

    Ok(SegmentRow {
        id: get_i64("segment-id")?,
        collection_id: CollectionId(get_i64("collection-id")?),
        key: get_str("key")?.to_string(),
        unified_id: UnifiedId(get_str("unified-id")?.to_string()),
        conjoined_part: ConjoinedPart(get_i64("conjoined-part")? as i32),
        segment_num: SegmentNum(get_i64("segment-num")? as i32),
        timestamp: Timestamp::parse_repr(get_str("timestamp-repr")?)?,
        file_size: value.get("file-size").and_then(|v| v.as_i64()),
        file_adler32: value.get("file-adler32").and_then(|v| v.as_i64()).map(|v| v as u32),
        file_hash,
        status: SegmentStatus::Final,
        handoff_node_id: None,
        file_tombstone_unified_id: None,
        source_node_id: NodeName::new(get_str("source-node-name")?),
    })
}

/// The responder side that a peer runs to answer `hinted-handoff` /
/// `purge-handoff` from whichever node is currently sweeping for its own
/// held-elsewhere segments.
pub struct HandoffServer<S: EventSink> {
    index: LocalIndex,
    sink: S,
}

impl<S: EventSink> HandoffServer<S> {
    pub fn new(index: LocalIndex, sink: S) -> Self {
        Self { index, sink }
    }

    fn handle_hinted_handoff(&mut self, control: &Value) -> Result<Value, base::Error> {
        let requesting_node = control
            .get("requesting-node-name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| err("missing requesting-node-name"))?;
        let rows = self.index.segments_held_for(&NodeName::new(requesting_node))?;
        tracing::info!("{} segments held for {}", rows.len(), requesting_node);
        let segments: Vec<Value> = rows.iter().map(segment_to_wire).collect();
        Ok(json!({
            "message-type": "hinted-handoff-reply",
            "client-tag": control.get("client-tag").cloned().unwrap_or(Value::Null),
            "message-id": control.get("message-id").cloned().unwrap_or(Value::Null),
            "result": "success",
            "segments": segments,
        }))
    }

    fn handle_purge_handoff(&mut self, control: &Value) -> Result<Value, base::Error> {
        let ids = control
            .get("segment-ids")
            .and_then(|v| v.as_array())
            .ok_or_else(|| err("missing segment-ids"))?;
        let mut purged = 0u64;
        for id in ids {
            let id = id.as_i64().ok_or_else(|| err("malformed segment-id"))?;
            self.index.purge_segment(id)?;
            purged += 1;
        }
        self.sink.info("handoff-purge", &format!("purged {} segments", purged));
        Ok(json!({
            "message-type": "purge-handoff-reply",
            "client-tag": control.get("client-tag").cloned().unwrap_or(Value::Null),
            "message-id": control.get("message-id").cloned().unwrap_or(Value::Null),
            "result": "success",
            "purged": purged,
        }))
    }
}

impl<S: EventSink> Handler for HandoffServer<S> {
    fn handle(
        &mut self,
        _client_tag: &ClientTag,
        _client_address: &str,
        control: &Value,
        _bodies: &[Vec<u8>],
    ) -> Result<(Value, Vec<Vec<u8>>), base::Error> {
        let verb = control.get("message-type").and_then(|v| v.as_str()).unwrap_or("");
        let reply = match verb {
            "hinted-handoff" => self.handle_hinted_handoff(control)?,
            "purge-handoff" => self.handle_purge_handoff(control)?,
            other => json!({
                "message-type": "error",
                "result": "unknown-request",
                "error-message": format!("unrecognized message-type: {:?}", other),
            }),
        };
        Ok((reply, Vec::new()))
    }
}

/// The request a home node broadcasts to every peer on its periodic
/// handoff sweep.
pub fn hinted_handoff_request(local_node_name: &NodeName) -> Value {
    json!({
        "message-type": "hinted-handoff",
        "message-id": MessageId::generate().0,
        "requesting-node-name": local_node_name.0,
    })
}

/// The request issued back to the holding node once a forwarder's
/// segments have all been re-archived locally.
pub fn purge_handoff_request(segment_ids: &[i64]) -> Value {
    json!({
        "message-type": "purge-handoff",
        "message-id": MessageId::generate().0,
        "segment-ids": segment_ids,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use base::{adler32, Md5Digest, RecordingEventSink};
    use proto::SequenceNum;
    use storage::{NewSegment, SequenceRow};
    use test_log::test;

    fn final_segment(handoff_node_id: Option<NodeName>) -> SegmentRow {
        let body = b"hello world";
        SegmentRow {
            id: 0,
            collection_id: CollectionId(1),
            key: "k".to_string(),
            unified_id: UnifiedId::generate(),
            conjoined_part: ConjoinedPart::NONE,
            segment_num: SegmentNum(1),
            timestamp: Timestamp::from_micros(1),
            file_size: Some(body.len() as i64),
            file_adler32: Some(adler32(body)),
            file_hash: Some(Md5Digest::of(body)),
            status: SegmentStatus::Final,
            handoff_node_id,
            file_tombstone_unified_id: None,
            source_node_id: NodeName::new("node01"),
        }
    }

    #[test]
    fn forwarder_single_sequence_round_trip() {
        let segment = final_segment(Some(NodeName::new("node02")));
        let source_names = vec![NodeName::new("node01")];
        let mut forwarder = Forwarder::new(segment, source_names.clone());

        let start = forwarder.start();
        assert_eq!(start["message-type"], json!("retrieve-key-start"));

        let retrieve_reply = json!({
            "result": "success",
            "completed": true,
            "segment-size": 11,
            "zfec-padding-size": 0,
            "segment-adler32": 12345,
            "segment-md5-digest": "deadbeef",
        });
        let (archive_message, body) = forwarder
            .on_retrieve_reply(&retrieve_reply, b"hello world".to_vec())
            .unwrap();
        assert_eq!(archive_message["message-type"], json!("archive-key-entire"));
        assert!(archive_message.get("file-hash").is_some());
        assert_eq!(body, b"hello world".to_vec());

        let archive_reply = json!({"result": "success"});
        let step = forwarder.on_archive_reply(&archive_reply).unwrap();
        assert!(matches!(step, ForwarderStep::Done));

        let (segment, names) = forwarder.into_result().unwrap();
        assert_eq!(names, source_names);
        assert_eq!(segment.key, "k");
    }

    #[test]
    fn forwarder_multi_sequence_round_trip() {
        let segment = final_segment(Some(NodeName::new("node02")));
        let mut forwarder = Forwarder::new(segment, vec![NodeName::new("node01")]);
        let _ = forwarder.start();

        let first_reply = json!({
            "result": "success", "completed": false,
            "segment-size": 6, "zfec-padding-size": 0,
            "segment-adler32": 1, "segment-md5-digest": "aaaa",
        });
        let (message, _) = forwarder.on_retrieve_reply(&first_reply, b"hello ".to_vec()).unwrap();
        assert_eq!(message["message-type"], json!("archive-key-start"));

        let step = forwarder.on_archive_reply(&json!({"result": "success"})).unwrap();
        let ForwarderStep::SendRetrieveNext(next) = step else {
            panic!("expected another retrieve-key-next");
        };
        assert_eq!(next["message-type"], json!("retrieve-key-next"));

        let second_reply = json!({
            "result": "success", "completed": true,
            "segment-size": 5, "zfec-padding-size": 0,
            "segment-adler32": 2, "segment-md5-digest": "bbbb",
        });
        let (message, _) = forwarder.on_retrieve_reply(&second_reply, b"world".to_vec()).unwrap();
        assert_eq!(message["message-type"], json!("archive-key-final"));
        assert_eq!(message["sequence-num"], json!(2));

        let step = forwarder.on_archive_reply(&json!({"result": "success"})).unwrap();
        assert!(matches!(step, ForwarderStep::Done));
    }

    #[test]
    fn forwarder_aborts_on_failed_retrieve() {
        let segment = final_segment(None);
        let mut forwarder = Forwarder::new(segment, Vec::new());
        let _ = forwarder.start();
        let failure = json!({"result": "error"});
        assert!(forwarder.on_retrieve_reply(&failure, Vec::new()).is_err());
    }

    #[test]
    fn handoff_server_lists_then_purges_held_segments() {
        let index = LocalIndex::open_in_memory().unwrap();
        let home = NodeName::new("node-home");
        let segment = NewSegment {
            collection_id: CollectionId(1),
            key: "k".to_string(),
            unified_id: UnifiedId::generate(),
            conjoined_part: ConjoinedPart::NONE,
            segment_num: SegmentNum(1),
            timestamp: Timestamp::from_micros(1),
            status: SegmentStatus::Active,
            handoff_node_id: Some(home.clone()),
            file_tombstone_unified_id: None,
            source_node_id: NodeName::new("node01"),
        };
        let segment_id = index.insert_segment(&segment).unwrap();
        index
            .insert_sequence(&SequenceRow {
                segment_id,
                sequence_num: SequenceNum(1),
                value_file_id: 1,
                offset: 0,
                size: 11,
                hash: Md5Digest::of(b"hello world"),
                adler32: adler32(b"hello world"),
                zfec_padding_size: 0,
            })
            .unwrap();
        index
            .finalize_segment(segment_id, 11, adler32(b"hello world"), Md5Digest::of(b"hello world"))
            .unwrap();

        let mut server = HandoffServer::new(index, RecordingEventSink::default());
        let request = hinted_handoff_request(&home);
        let (reply, _) = server.handle(&ClientTag::new("home"), "127.0.0.1:1", &request, &[]).unwrap();
        let segments = reply["segments"].as_array().unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0]["segment-id"], json!(segment_id));

        let reconstructed = segment_from_wire(&segments[0]).unwrap();
        assert_eq!(reconstructed.key, "k");

        let purge = purge_handoff_request(&[segment_id]);
        let (reply, _) = server.handle(&ClientTag::new("home"), "127.0.0.1:1", &purge, &[]).unwrap();
        assert_eq!(reply["result"], json!("success"));

        let request = hinted_handoff_request(&home);
        let (reply, _) = server.handle(&ClientTag::new("home"), "127.0.0.1:1", &request, &[]).unwrap();
        assert_eq!(reply["segments"].as_array().unwrap().len(), 0);
    }
}
