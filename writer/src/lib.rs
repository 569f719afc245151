// The write side (§4.2), modeled on the same immediate-ack/dispatch shape as
// the reader but with no original data_writer_main.py in the retrieved
// source to lean on directly - so this follows the verb table in spec.md
// and the segment/value-file invariants in §3/§4.2a, in the reader's idiom.
//
// Whole-object `file-size`/`file-adler32`/`file-hash` are independently
// recomputed here by reading every sequence back out of the value files
// rather than trusted from the client, so a mismatched claim is caught the
// same way a mismatched per-chunk claim is.

use base::{adler32, err, EventSink, Md5Digest, Timestamp};
use proto::{ClientTag, CollectionId, ConjoinedPart, NodeName, SegmentNum, SequenceNum, UnifiedId};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use storage::{LocalIndex, NewSegment, Repository, SegmentStatus, SequenceRow};
use transport::Handler;

/// A value file is sealed once the next write would push it past this size
/// (§4.2, §4.6a).
pub const VALUE_FILE_SIZE_CAP: i64 = 1 << 30;

struct OpenValueFile {
    id: i64,
    writer: storage::ValueFileWriter,
    sequence_count: i64,
    min_segment_id: Option<i64>,
    max_segment_id: Option<i64>,
    collection_ids: BTreeSet<i64>,
}

impl OpenValueFile {
    fn new(id: i64, writer: storage::ValueFileWriter) -> Self {
        Self {
            id,
            writer,
            sequence_count: 0,
            min_segment_id: None,
            max_segment_id: None,
            collection_ids: BTreeSet::new(),
        }
    }

    fn record_append(&mut self, segment_id: i64, collection_id: CollectionId) {
        self.sequence_count += 1;
        self.min_segment_id = Some(self.min_segment_id.map_or(segment_id, |m| m.min(segment_id)));
        self.max_segment_id = Some(self.max_segment_id.map_or(segment_id, |m| m.max(segment_id)));
        self.collection_ids.insert(collection_id.0);
    }
}

pub struct WriterService<S: EventSink> {
    index: LocalIndex,
    repo: Repository,
    current_value_file: Option<OpenValueFile>,
    sink: S,
}

impl<S: EventSink> WriterService<S> {
    pub fn new(index: LocalIndex, repo: Repository, sink: S) -> Self {
        Self {
            index,
            repo,
            current_value_file: None,
            sink,
        }
    }

    fn ensure_value_file(&mut self) -> Result<(), base::Error> {
        if self.current_value_file.is_none() {
            let id = self.index.create_value_file()?;
            let writer = self.repo.create_writer(id)?;
            self.current_value_file = Some(OpenValueFile::new(id, writer));
        }
        Ok(())
    }

    fn seal_current_value_file(&mut self) -> Result<(), base::Error> {
        if let Some(open) = self.current_value_file.take() {
            let (size, hash) = open.writer.seal()?;
            let collection_ids: Vec<i64> = open.collection_ids.into_iter().collect();
            self.index.update_value_file(
                open.id,
                size,
                hash,
                open.sequence_count,
                open.min_segment_id.unwrap_or(0),
                open.max_segment_id.unwrap_or(0),
                &collection_ids,
            )?;
            self.index.seal_value_file(open.id)?;
        }
        Ok(())
    }

    /// Append one chunk, sealing and rotating the current value file first
    /// if this write would exceed the size cap. Tracks the owning
    /// segment/collection so the value file's `(min/max segment id,
    /// distinct collection set)` attributes (§3, §4.2a) are real at seal
    /// time rather than left at their just-created zero defaults.
    fn append_chunk(
        &mut self,
        bytes: &[u8],
        segment_id: i64,
        collection_id: CollectionId,
    ) -> Result<(i64, storage::AppendResult), base::Error> {
        self.ensure_value_file()?;
        let would_exceed = self
            .current_value_file
            .as_ref()
            .map(|o| o.writer.current_size() + bytes.len() as i64 > VALUE_FILE_SIZE_CAP)
            .unwrap_or(false);
        if would_exceed {
            self.seal_current_value_file()?;
            self.ensure_value_file()?;
        }
        let open = self.current_value_file.as_mut().unwrap();
        let result = open.writer.append(bytes)?;
        open.record_append(segment_id, collection_id);
        Ok((open.id, result))
    }

    /// Flush and seal whatever value file is currently open, for clean
    /// shutdown (§5 teardown).
    pub fn close(&mut self) -> Result<(), base::Error> {
        self.seal_current_value_file()
    }

    /// Re-read every sequence of a segment from its value file(s) and
    /// recompute the whole-object size/adler32/md5 independently of
    /// whatever the client asserts.
    fn recompute_whole_object(&mut self, segment_id: i64) -> Result<(i64, u32, Md5Digest), base::Error> {
        let stream = self.index.sequences_for_segment(segment_id)?;
        let mut buf = Vec::new();
        for row in &stream.rows {
            let bytes = self.repo.open_reader(row.value_file_id)?.read_at(row.offset, row.size)?;
            buf.extend_from_slice(&bytes);
        }
        Ok((buf.len() as i64, adler32(&buf), Md5Digest::of(&buf)))
    }

    fn handle_archive_start(&mut self, id: ArchiveId, chunk: Chunk, bodies: &[Vec<u8>]) -> Result<Value, base::Error> {
        let mut reply = id.reply_skeleton("archive-key-start-reply");
        if chunk.sequence_num.0 != 1 {
            return Ok(reply_error(reply, "error", "archive-key-start must be sequence 1"));
        }
        if self
            .index
            .find_active_segment(&id.unified_id, id.conjoined_part, id.segment_num)?
            .is_some()
        {
            return Ok(reply_error(reply, "invalid-duplicate", "segment already started"));
        }
        let body = bodies.first().cloned().unwrap_or_default();
        if let ChunkVerify::Mismatch = chunk.verify(&body) {
            return Ok(reply_error(reply, "md5-mismatch", "chunk does not match asserted checksum"));
        }

        let segment = NewSegment {
            collection_id: id.collection_id,
            key: id.key.clone(),
            unified_id: id.unified_id.clone(),
            conjoined_part: id.conjoined_part,
            segment_num: id.segment_num,
            timestamp: id.timestamp,
            status: SegmentStatus::Active,
            handoff_node_id: id.handoff_node_name.clone().map(NodeName),
            file_tombstone_unified_id: None,
            source_node_id: id.source_node_name.clone(),
        };
        let segment_id = self.index.insert_segment(&segment)?;
        let (value_file_id, appended) = self.append_chunk(&body, segment_id, id.collection_id)?;
        self.index.insert_sequence(&SequenceRow {
            segment_id,
            sequence_num: chunk.sequence_num,
            value_file_id,
            offset: appended.offset,
            size: appended.size,
            hash: appended.hash,
            adler32: appended.adler32,
            zfec_padding_size: chunk.zfec_padding_size,
        })?;

        reply["result"] = json!("success");
        Ok(reply)
    }

    fn handle_archive_next(&mut self, id: ArchiveId, chunk: Chunk, bodies: &[Vec<u8>]) -> Result<Value, base::Error> {
        let reply = id.reply_skeleton("archive-key-next-reply");
        self.append_and_check(reply, id, chunk, bodies)
    }

    fn handle_archive_final(
        &mut self,
        id: ArchiveId,
        chunk: Chunk,
        whole: WholeObject,
        bodies: &[Vec<u8>],
    ) -> Result<Value, base::Error> {
        let reply = id.reply_skeleton("archive-key-final-reply");
        let mut reply = self.append_and_check(reply, id.clone(), chunk, bodies)?;
        if reply["result"] != json!("success") {
            return Ok(reply);
        }
        self.finalize(&id, whole, reply.as_object_mut().unwrap())?;
        Ok(reply)
    }

    fn handle_archive_entire(
        &mut self,
        id: ArchiveId,
        chunk: Chunk,
        whole: WholeObject,
        bodies: &[Vec<u8>],
    ) -> Result<Value, base::Error> {
        let mut reply = id.reply_skeleton("archive-key-entire-reply");
        if chunk.sequence_num.0 != 1 {
            return Ok(reply_error(reply, "error", "archive-key-entire must be sequence 1"));
        }
        if self
            .index
            .find_active_segment(&id.unified_id, id.conjoined_part, id.segment_num)?
            .is_some()
        {
            return Ok(reply_error(reply, "invalid-duplicate", "segment already started"));
        }
        let body = bodies.first().cloned().unwrap_or_default();
        if let ChunkVerify::Mismatch = chunk.verify(&body) {
            return Ok(reply_error(reply, "md5-mismatch", "chunk does not match asserted checksum"));
        }

        let segment = NewSegment {
            collection_id: id.collection_id,
            key: id.key.clone(),
            unified_id: id.unified_id.clone(),
            conjoined_part: id.conjoined_part,
            segment_num: id.segment_num,
            timestamp: id.timestamp,
            status: SegmentStatus::Active,
            handoff_node_id: id.handoff_node_name.clone().map(NodeName),
            file_tombstone_unified_id: None,
            source_node_id: id.source_node_name.clone(),
        };
        let segment_id = self.index.insert_segment(&segment)?;
        let (value_file_id, appended) = self.append_chunk(&body, segment_id, id.collection_id)?;
        self.index.insert_sequence(&SequenceRow {
            segment_id,
            sequence_num: chunk.sequence_num,
            value_file_id,
            offset: appended.offset,
            size: appended.size,
            hash: appended.hash,
            adler32: appended.adler32,
            zfec_padding_size: chunk.zfec_padding_size,
        })?;

        reply["result"] = json!("success");
        self.finalize(&id, whole, reply.as_object_mut().unwrap())?;
        Ok(reply)
    }

    fn append_and_check(
        &mut self,
        mut reply: Value,
        id: ArchiveId,
        chunk: Chunk,
        bodies: &[Vec<u8>],
    ) -> Result<Value, base::Error> {
        let Some(segment) = self
            .index
            .find_active_segment(&id.unified_id, id.conjoined_part, id.segment_num)?
        else {
            return Ok(reply_error(reply, "error", "no active segment for this request"));
        };

        let max_seq = self.index.max_sequence_num(segment.id)?;
        if chunk.sequence_num.0 != max_seq + 1 {
            return Ok(reply_error(reply, "error", "sequence numbers skipped"));
        }

        let body = bodies.first().cloned().unwrap_or_default();
        if let ChunkVerify::Mismatch = chunk.verify(&body) {
            self.index.mark_segment_cancelled(segment.id)?;
            let msg = format!("chunk checksum mismatch on segment {}", segment.id);
            self.sink.error("md5-mismatch", &msg);
            return Ok(reply_error(reply, "md5-mismatch", "chunk does not match asserted checksum"));
        }

        let (value_file_id, appended) = self.append_chunk(&body, segment.id, segment.collection_id)?;
        self.index.insert_sequence(&SequenceRow {
            segment_id: segment.id,
            sequence_num: chunk.sequence_num,
            value_file_id,
            offset: appended.offset,
            size: appended.size,
            hash: appended.hash,
            adler32: appended.adler32,
            zfec_padding_size: chunk.zfec_padding_size,
        })?;

        reply["result"] = json!("success");
        Ok(reply)
    }

    fn finalize(
        &mut self,
        id: &ArchiveId,
        whole: WholeObject,
        reply: &mut serde_json::Map<String, Value>,
    ) -> Result<(), base::Error> {
        let segment = self
            .index
            .find_active_segment(&id.unified_id, id.conjoined_part, id.segment_num)?
            .ok_or_else(|| err("segment vanished before finalize"))?;

        let (size, adler, hash) = self.recompute_whole_object(segment.id)?;
        if size != whole.file_size || adler != whole.file_adler32 || hash != whole.file_hash {
            self.index.mark_segment_cancelled(segment.id)?;
            let msg = format!("whole-object checksum mismatch on segment {}", segment.id);
            self.sink.error("md5-mismatch", &msg);
            reply.insert("result".into(), json!("md5-mismatch"));
            reply.insert(
                "error-message".into(),
                json!("whole-object size/adler32/hash does not match asserted value"),
            );
            return Ok(());
        }

        self.index.finalize_segment(segment.id, size, adler, hash)?;
        reply.insert("file-size".into(), json!(size));
        reply.insert("file-adler32".into(), json!(adler));
        reply.insert("file-hash".into(), json!(hash.to_base64()));
        Ok(())
    }

    fn handle_destroy_key(&mut self, control: &Value) -> Result<Value, base::Error> {
        let collection_id = CollectionId(field_i64(control, "collection-id")?);
        let key = field_str(control, "key")?.to_string();
        let source_node_name = NodeName::new(field_str(control, "source-node-name")?.to_string());
        let unified_id_to_delete = field_opt_str(control, "unified-id-to-delete").map(|s| UnifiedId(s.to_string()));
        let timestamp = Timestamp::parse_repr(field_str(control, "timestamp-repr")?)?;

        self.index
            .insert_tombstone(collection_id, &key, unified_id_to_delete, source_node_name, timestamp)?;

        Ok(json!({
            "message-type": "destroy-key-reply",
            "client-tag": control.get("client-tag").cloned().unwrap_or(Value::Null),
            "message-id": control.get("message-id").cloned().unwrap_or(Value::Null),
            "result": "success",
            "error-message": Value::Null,
        }))
    }

    fn handle_conjoined(&mut self, verb: &str, control: &Value) -> Result<Value, base::Error> {
        let collection_id = CollectionId(field_i64(control, "collection-id")?);
        let key = field_str(control, "key")?.to_string();
        let unified_id = UnifiedId(field_str(control, "unified-id")?.to_string());
        let timestamp = Timestamp::parse_repr(field_str(control, "timestamp-repr")?)?;

        let outcome = match verb {
            "start-conjoined-archive" => self.index.start_conjoined(collection_id, &key, &unified_id, timestamp),
            "abort-conjoined-archive" => self.index.abort_conjoined(collection_id, &key, &unified_id),
            "finish-conjoined-archive" => self.index.finish_conjoined(collection_id, &key, &unified_id, timestamp),
            _ => unreachable!(),
        };

        let mut reply = json!({
            "message-type": format!("{}-reply", verb),
            "client-tag": control.get("client-tag").cloned().unwrap_or(Value::Null),
            "message-id": control.get("message-id").cloned().unwrap_or(Value::Null),
            "result": "success",
            "error-message": Value::Null,
        });
        if let Err(e) = outcome {
            reply["result"] = json!("error");
            reply["error-message"] = json!(format!("{:?}", e));
        }
        Ok(reply)
    }
}

impl<S: EventSink> Handler for WriterService<S> {
    fn handle(
        &mut self,
        _client_tag: &ClientTag,
        _client_address: &str,
        control: &Value,
        bodies: &[Vec<u8>],
    ) -> Result<(Value, Vec<Vec<u8>>), base::Error> {
        let verb = control.get("message-type").and_then(|v| v.as_str()).unwrap_or("");
        let reply = match verb {
            "archive-key-start" => {
                let id = ArchiveId::parse(control)?;
                let chunk = Chunk::parse(control)?;
                self.handle_archive_start(id, chunk, bodies)?
            }
            "archive-key-next" => {
                let id = ArchiveId::parse(control)?;
                let chunk = Chunk::parse(control)?;
                self.handle_archive_next(id, chunk, bodies)?
            }
            "archive-key-final" => {
                let id = ArchiveId::parse(control)?;
                let chunk = Chunk::parse(control)?;
                let whole = WholeObject::parse(control)?;
                self.handle_archive_final(id, chunk, whole, bodies)?
            }
            "archive-key-entire" => {
                let id = ArchiveId::parse(control)?;
                let chunk = Chunk::parse(control)?;
                let whole = WholeObject::parse(control)?;
                self.handle_archive_entire(id, chunk, whole, bodies)?
            }
            "destroy-key" => self.handle_destroy_key(control)?,
            "start-conjoined-archive" | "abort-conjoined-archive" | "finish-conjoined-archive" => {
                self.handle_conjoined(verb, control)?
            }
            other => json!({
                "message-type": "error",
                "message-id": control.get("message-id").cloned().unwrap_or(Value::Null),
                "result": "unknown-request",
                "error-message": format!("unrecognized message-type: {:?}", other),
            }),
        };
        Ok((reply, Vec::new()))
    }
}

#[derive(Clone)]
struct ArchiveId {
    collection_id: CollectionId,
    key: String,
    unified_id: UnifiedId,
    conjoined_part: ConjoinedPart,
    segment_num: SegmentNum,
    timestamp: Timestamp,
    source_node_name: NodeName,
    handoff_node_name: Option<String>,
}

impl ArchiveId {
    fn parse(control: &Value) -> Result<Self, base::Error> {
        Ok(Self {
            collection_id: CollectionId(field_i64(control, "collection-id")?),
            key: field_str(control, "key")?.to_string(),
            unified_id: UnifiedId(field_str(control, "unified-id")?.to_string()),
            conjoined_part: ConjoinedPart(field_opt_i64(control, "conjoined-part").unwrap_or(0) as i32),
            segment_num: SegmentNum(field_i64(control, "segment-num")? as i32),
            timestamp: Timestamp::parse_repr(field_str(control, "timestamp-repr")?)?,
            source_node_name: NodeName::new(field_str(control, "source-node-name")?.to_string()),
            handoff_node_name: field_opt_str(control, "handoff-node-name").map(str::to_string),
        })
    }

    fn reply_skeleton(&self, message_type: &str) -> Value {
        json!({
            "message-type": message_type,
            "collection-id": self.collection_id.0,
            "key": self.key,
            "unified-id": self.unified_id.0,
            "conjoined-part": self.conjoined_part.0,
            "segment-num": self.segment_num.0,
            "result": Value::Null,
            "error-message": Value::Null,
        })
    }
}

struct Chunk {
    sequence_num: SequenceNum,
    zfec_padding_size: i64,
    segment_adler32: u32,
    segment_md5_digest: String,
}

enum ChunkVerify {
    Ok,
    Mismatch,
}

impl Chunk {
    fn parse(control: &Value) -> Result<Self, base::Error> {
        Ok(Self {
            sequence_num: SequenceNum(field_i64(control, "sequence-num")? as i32),
            zfec_padding_size: field_opt_i64(control, "zfec-padding-size").unwrap_or(0),
            segment_adler32: field_i64(control, "segment-adler32")? as u32,
            segment_md5_digest: field_str(control, "segment-md5-digest")?.to_string(),
        })
    }

    fn verify(&self, body: &[u8]) -> ChunkVerify {
        let actual_hash = Md5Digest::of(body);
        let actual_adler = adler32(body);
        let asserted_hash = Md5Digest::from_base64(&self.segment_md5_digest);
        if asserted_hash != Some(actual_hash) || actual_adler != self.segment_adler32 {
            ChunkVerify::Mismatch
        } else {
            ChunkVerify::Ok
        }
    }
}

struct WholeObject {
    file_size: i64,
    file_adler32: u32,
    file_hash: Md5Digest,
}

impl WholeObject {
    fn parse(control: &Value) -> Result<Self, base::Error> {
        let file_hash = Md5Digest::from_base64(field_str(control, "file-hash")?)
            .ok_or_else(|| err("malformed file-hash"))?;
        Ok(Self {
            file_size: field_i64(control, "file-size")?,
            file_adler32: field_i64(control, "file-adler32")? as u32,
            file_hash,
        })
    }
}

fn reply_error(mut reply: Value, result: &str, message: &str) -> Value {
    reply["result"] = json!(result);
    reply["error-message"] = json!(message);
    reply
}

fn field_str<'a>(control: &'a Value, name: &str) -> Result<&'a str, base::Error> {
    control
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| err(format!("missing or malformed field {:?}", name)))
}

fn field_opt_str<'a>(control: &'a Value, name: &str) -> Option<&'a str> {
    control.get(name).and_then(|v| v.as_str())
}

fn field_i64(control: &Value, name: &str) -> Result<i64, base::Error> {
    control
        .get(name)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(format!("missing or malformed field {:?}", name)))
}

fn field_opt_i64(control: &Value, name: &str) -> Option<i64> {
    control.get(name).and_then(|v| v.as_i64())
}

#[cfg(test)]
mod test {
    use super::*;
    use base::RecordingEventSink;
    use test_log::test;

    fn setup() -> (WriterService<RecordingEventSink>, tempfile::TempDir) {
        let index = LocalIndex::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(dir.path().to_path_buf());
        (WriterService::new(index, repo, RecordingEventSink::default()), dir)
    }

    fn chunk_control(body: &[u8], verb: &str, sequence_num: i32, unified_id: &str) -> Value {
        let hash = Md5Digest::of(body);
        json!({
            "message-type": verb,
            "message-id": "m1",
            "client-tag": "client01",
            "collection-id": 1,
            "key": "some/key",
            "unified-id": unified_id,
            "conjoined-part": 0,
            "segment-num": 1,
            "timestamp-repr": "1700000000.000000",
            "source-node-name": "node01",
            "sequence-num": sequence_num,
            "zfec-padding-size": 0,
            "segment-adler32": adler32(body),
            "segment-md5-digest": hash.to_base64(),
        })
    }

    #[test]
    fn archive_entire_round_trips() {
        let (mut service, _dir) = setup();
        let body = b"hello world".to_vec();
        let mut control = chunk_control(&body, "archive-key-entire", 1, "u1");
        control["file-size"] = json!(body.len() as i64);
        control["file-adler32"] = json!(adler32(&body));
        control["file-hash"] = json!(Md5Digest::of(&body).to_base64());

        let (reply, _) = service
            .handle(&ClientTag::new("client01"), "127.0.0.1:1", &control, &[body])
            .unwrap();
        assert_eq!(reply["result"], json!("success"));
        assert_eq!(reply["file-size"], json!(11));
    }

    #[test]
    fn archive_start_rejects_mismatched_checksum() {
        let (mut service, _dir) = setup();
        let body = b"hello world".to_vec();
        let mut control = chunk_control(&body, "archive-key-start", 1, "u2");
        control["segment-adler32"] = json!(1u32);

        let (reply, _) = service
            .handle(&ClientTag::new("client01"), "127.0.0.1:1", &control, &[body])
            .unwrap();
        assert_eq!(reply["result"], json!("md5-mismatch"));
    }

    #[test]
    fn archive_start_then_next_then_final_round_trips() {
        let (mut service, _dir) = setup();
        let chunk1 = b"hello ".to_vec();
        let chunk2 = b"world".to_vec();
        let whole = [chunk1.clone(), chunk2.clone()].concat();

        let control1 = chunk_control(&chunk1, "archive-key-start", 1, "u3");
        let (reply1, _) = service
            .handle(&ClientTag::new("client01"), "127.0.0.1:1", &control1, &[chunk1])
            .unwrap();
        assert_eq!(reply1["result"], json!("success"));

        let mut control2 = chunk_control(&chunk2, "archive-key-final", 2, "u3");
        control2["file-size"] = json!(whole.len() as i64);
        control2["file-adler32"] = json!(adler32(&whole));
        control2["file-hash"] = json!(Md5Digest::of(&whole).to_base64());
        let (reply2, _) = service
            .handle(&ClientTag::new("client01"), "127.0.0.1:1", &control2, &[chunk2])
            .unwrap();
        assert_eq!(reply2["result"], json!("success"));
    }

    #[test]
    fn archive_next_rejects_skipped_sequence() {
        let (mut service, _dir) = setup();
        let chunk1 = b"hello ".to_vec();
        let control1 = chunk_control(&chunk1, "archive-key-start", 1, "u4");
        service
            .handle(&ClientTag::new("client01"), "127.0.0.1:1", &control1, &[chunk1])
            .unwrap();

        let chunk3 = b"!!!".to_vec();
        let control3 = chunk_control(&chunk3, "archive-key-next", 3, "u4");
        let (reply, _) = service
            .handle(&ClientTag::new("client01"), "127.0.0.1:1", &control3, &[chunk3])
            .unwrap();
        assert_eq!(reply["result"], json!("error"));
    }

    #[test]
    fn destroy_key_then_conjoined_roundtrip() {
        let (mut service, _dir) = setup();
        let destroy = json!({
            "message-type": "destroy-key",
            "message-id": "d1",
            "client-tag": "client01",
            "collection-id": 1,
            "key": "some/key",
            "source-node-name": "node01",
            "timestamp-repr": "1700000001.000000",
        });
        let (reply, _) = service.handle(&ClientTag::new("client01"), "127.0.0.1:1", &destroy, &[]).unwrap();
        assert_eq!(reply["result"], json!("success"));

        let start = json!({
            "message-type": "start-conjoined-archive",
            "message-id": "c1",
            "client-tag": "client01",
            "collection-id": 1,
            "key": "big",
            "unified-id": "u5",
            "timestamp-repr": "1700000002.000000",
        });
        let (reply, _) = service.handle(&ClientTag::new("client01"), "127.0.0.1:1", &start, &[]).unwrap();
        assert_eq!(reply["result"], json!("success"));

        let finish = json!({
            "message-type": "finish-conjoined-archive",
            "message-id": "c2",
            "client-tag": "client01",
            "collection-id": 1,
            "key": "big",
            "unified-id": "u5",
            "timestamp-repr": "1700000003.000000",
        });
        let (reply, _) = service.handle(&ClientTag::new("client01"), "127.0.0.1:1", &finish, &[]).unwrap();
        assert_eq!(reply["result"], json!("success"));
    }
}
