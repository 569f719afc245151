// The read-side service (§4.3), reworked from data_reader_main.py: looks up
// a finalized segment's sequence rows and streams them back one at a time,
// re-verifying each piece's md5 before replying and reaping state left
// behind by a client that never called retrieve-key-next again.

use base::{EventSink, Md5Digest};
use proto::{ClientTag, ConjoinedPart, MessageId, SegmentNum, UnifiedId};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use storage::{LocalIndex, Repository, SequenceRow};
use transport::Handler;

/// How long an in-progress retrieve-key-start/next sequence may sit idle
/// before it's reaped (§4.3, mirrors the original's StateCleaner).
pub const RETRIEVE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

type StateKey = (ClientTag, UnifiedId, SegmentNum);

struct ActiveRetrieve {
    rows: Vec<SequenceRow>,
    row_count: usize,
    read_count: usize,
    deadline: Instant,
}

pub struct ReaderService<S: EventSink> {
    index: LocalIndex,
    repo: Repository,
    active: HashMap<StateKey, ActiveRetrieve>,
    sink: S,
}

impl<S: EventSink> ReaderService<S> {
    pub fn new(index: LocalIndex, repo: Repository, sink: S) -> Self {
        Self {
            index,
            repo,
            active: HashMap::new(),
            sink,
        }
    }

    /// Drop any in-progress retrieve whose deadline has passed, the
    /// equivalent of the original's periodic StateCleaner sweep.
    pub fn reap_stale_requests(&mut self) {
        let now = Instant::now();
        self.active.retain(|key, entry| {
            let alive = entry.deadline > now;
            if !alive {
                tracing::warn!("reaping stale retrieve state for {:?}", key);
            }
            alive
        });
    }

    fn reply_skeleton(control: &Value) -> Value {
        json!({
            "message-type": "retrieve-key-reply",
            "client-tag": control.get("client-tag").cloned().unwrap_or(Value::Null),
            "message-id": control.get("message-id").cloned().unwrap_or(Value::Null),
            "segment-unified-id": control.get("segment-unified-id").cloned().unwrap_or(Value::Null),
            "segment-conjoined-part": control.get("segment-conjoined-part").cloned().unwrap_or(Value::Null),
            "segment-num": control.get("segment-num").cloned().unwrap_or(Value::Null),
            "segment-size": Value::Null,
            "zfec-padding-size": Value::Null,
            "segment-adler32": Value::Null,
            "segment-md5-digest": Value::Null,
            "sequence-num": Value::Null,
            "completed": Value::Null,
            "result": Value::Null,
            "error-message": Value::Null,
        })
    }

    fn state_key(control: &Value) -> Option<StateKey> {
        let client_tag = ClientTag::new(control.get("client-tag")?.as_str()?.to_string());
        let unified_id = UnifiedId(control.get("segment-unified-id")?.as_str()?.to_string());
        let segment_num = SegmentNum(control.get("segment-num")?.as_i64()? as i32);
        Some((client_tag, unified_id, segment_num))
    }

    fn handle_start(&mut self, control: &Value) -> Result<(Value, Vec<Vec<u8>>), base::Error> {
        let mut reply = Self::reply_skeleton(control);
        let Some(state_key) = Self::state_key(control) else {
            reply["result"] = json!("exception");
            reply["error-message"] = json!("malformed retrieve-key-start message");
            return Ok((reply, Vec::new()));
        };

        if self.active.contains_key(&state_key) {
            let msg = "invalid duplicate request in retrieve-key-start";
            tracing::error!("{}", msg);
            reply["result"] = json!("invalid-duplicate");
            reply["error-message"] = json!(msg);
            return Ok((reply, Vec::new()));
        }

        let conjoined_part = ConjoinedPart(
            control
                .get("segment-conjoined-part")
                .and_then(|v| v.as_i64())
                .unwrap_or(0) as i32,
        );
        let segment = self
            .index
            .find_final_segment(&state_key.1, conjoined_part, state_key.2)?;
        let Some(segment) = segment else {
            let msg = "no sequence rows found";
            tracing::error!("{}", msg);
            reply["result"] = json!("no-sequence-rows");
            reply["error-message"] = json!(msg);
            return Ok((reply, Vec::new()));
        };

        let stream = self.index.sequences_for_segment(segment.id)?;
        if stream.count == 0 {
            let msg = "no sequence rows found";
            tracing::error!("{}", msg);
            reply["result"] = json!("no-sequence-rows");
            reply["error-message"] = json!(msg);
            return Ok((reply, Vec::new()));
        }

        let mut entry = ActiveRetrieve {
            row_count: stream.rows.len(),
            rows: stream.rows,
            read_count: 0,
            deadline: Instant::now() + RETRIEVE_TIMEOUT,
        };
        self.read_next(&mut entry, state_key, reply)
    }

    fn handle_next(&mut self, control: &Value) -> Result<(Value, Vec<Vec<u8>>), base::Error> {
        let mut reply = Self::reply_skeleton(control);
        let Some(state_key) = Self::state_key(control) else {
            reply["result"] = json!("exception");
            reply["error-message"] = json!("malformed retrieve-key-next message");
            return Ok((reply, Vec::new()));
        };

        let Some(mut entry) = self.active.remove(&state_key) else {
            let msg = format!("unknown request {:?}", state_key.1);
            tracing::error!("{}", msg);
            reply["result"] = json!("unknown-request");
            reply["error-message"] = json!(msg);
            return Ok((reply, Vec::new()));
        };
        self.read_next(&mut entry, state_key, reply)
    }

    fn read_next(
        &mut self,
        entry: &mut ActiveRetrieve,
        state_key: StateKey,
        mut reply: Value,
    ) -> Result<(Value, Vec<Vec<u8>>), base::Error> {
        let Some(row) = entry.rows.get(entry.read_count).cloned() else {
            reply["result"] = json!("exception");
            reply["error-message"] = json!("sequence generator exhausted");
            return Ok((reply, Vec::new()));
        };

        let data = self
            .repo
            .open_reader(row.value_file_id)?
            .read_at(row.offset, row.size)?;

        if Md5Digest::of(&data) != row.hash {
            let msg = format!("md5 mismatch {:?}", state_key.1);
            self.sink.error("md5-mismatch", &msg);
            reply["result"] = json!("md5-mismatch");
            reply["error-message"] = json!("segment md5 does not match expected value");
            return Ok((reply, Vec::new()));
        }

        entry.read_count += 1;
        let completed = entry.read_count == entry.row_count;
        reply["completed"] = json!(completed);
        if !completed {
            entry.deadline = Instant::now() + RETRIEVE_TIMEOUT;
            self.active.insert(
                state_key,
                ActiveRetrieve {
                    rows: std::mem::take(&mut entry.rows),
                    row_count: entry.row_count,
                    read_count: entry.read_count,
                    deadline: entry.deadline,
                },
            );
        }

        reply["sequence-num"] = json!(entry.read_count);
        reply["segment-size"] = json!(row.size);
        reply["zfec-padding-size"] = json!(row.zfec_padding_size);
        reply["segment-adler32"] = json!(row.adler32);
        reply["segment-md5-digest"] = json!(row.hash.to_base64());
        reply["result"] = json!("success");
        Ok((reply, vec![data]))
    }
}

impl<S: EventSink> Handler for ReaderService<S> {
    fn handle(
        &mut self,
        _client_tag: &ClientTag,
        _client_address: &str,
        control: &Value,
        _bodies: &[Vec<u8>],
    ) -> Result<(Value, Vec<Vec<u8>>), base::Error> {
        match control.get("message-type").and_then(|v| v.as_str()) {
            Some("retrieve-key-start") => self.handle_start(control),
            Some("retrieve-key-next") => self.handle_next(control),
            other => {
                let message_id = control
                    .get("message-id")
                    .cloned()
                    .unwrap_or_else(|| json!(MessageId::generate().0));
                Ok((
                    json!({
                        "message-type": "error",
                        "message-id": message_id,
                        "result": "unknown-request",
                        "error-message": format!("unrecognized message-type: {:?}", other),
                    }),
                    Vec::new(),
                ))
            }
        }
    }
}
