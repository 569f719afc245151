use base::{err, Error, Md5Digest, Timestamp};
use proto::{CollectionId, ConjoinedPart, NodeName, SegmentNum, SequenceNum, UnifiedId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::schema::ensure_schema;
use crate::types::{
    AuditRecord, AuditState, ConjoinedRow, NewSegment, RowStream, SegmentRow, SegmentStatus,
    SequenceRow, ValueFileInfo,
};

/// The per-node relational metadata index (§4.6, §4.6a): one SQLite
/// connection owned exclusively by the service that opened it.
pub struct LocalIndex {
    conn: Connection,
}

impl LocalIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = Connection::open(path)?;
        ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()?;
        ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    // ---- segment ----------------------------------------------------

    pub fn insert_segment(&self, seg: &NewSegment) -> Result<i64, Error> {
        self.conn.execute(
            "INSERT INTO segment (collection_id, key, unified_id, conjoined_part, segment_num,
                timestamp_micros, file_size, file_adler32, file_hash, status,
                handoff_node_id, file_tombstone_unified_id, source_node_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL, NULL, ?7, ?8, ?9, ?10)",
            params![
                seg.collection_id.0,
                seg.key,
                seg.unified_id.0,
                seg.conjoined_part.0,
                seg.segment_num.0,
                seg.timestamp.micros(),
                seg.status.as_db_str(),
                seg.handoff_node_id.as_ref().map(|n| n.0.clone()),
                seg.file_tombstone_unified_id.as_ref().map(|u| u.0.clone()),
                seg.source_node_id.0,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_segment(&self, segment_id: i64) -> Result<Option<SegmentRow>, Error> {
        self.conn
            .query_row(
                "SELECT * FROM segment WHERE id = ?1",
                params![segment_id],
                row_to_segment,
            )
            .optional()
            .map_err(Error::from)
    }

    /// Find the (unique, per §3 invariants) active segment for a given
    /// (unified_id, conjoined_part, segment_num) family, used by
    /// archive-key-next/final to locate the row started by archive-key-start.
    pub fn find_active_segment(
        &self,
        unified_id: &UnifiedId,
        conjoined_part: ConjoinedPart,
        segment_num: SegmentNum,
    ) -> Result<Option<SegmentRow>, Error> {
        self.conn
            .query_row(
                "SELECT * FROM segment
                 WHERE unified_id = ?1 AND conjoined_part = ?2 AND segment_num = ?3
                   AND status = 'active'
                 ORDER BY id DESC LIMIT 1",
                params![unified_id.0, conjoined_part.0, segment_num.0],
                row_to_segment,
            )
            .optional()
            .map_err(Error::from)
    }

    /// Find the finalized segment for a (unified_id, conjoined_part,
    /// segment_num) family, the lookup retrieve-key-start uses to locate
    /// what to read back (§4.3).
    pub fn find_final_segment(
        &self,
        unified_id: &UnifiedId,
        conjoined_part: ConjoinedPart,
        segment_num: SegmentNum,
    ) -> Result<Option<SegmentRow>, Error> {
        self.conn
            .query_row(
                "SELECT * FROM segment
                 WHERE unified_id = ?1 AND conjoined_part = ?2 AND segment_num = ?3
                   AND status = 'final'
                 ORDER BY id DESC LIMIT 1",
                params![unified_id.0, conjoined_part.0, segment_num.0],
                row_to_segment,
            )
            .optional()
            .map_err(Error::from)
    }

    pub fn mark_segment_cancelled(&self, segment_id: i64) -> Result<(), Error> {
        self.conn.execute(
            "UPDATE segment SET status = 'cancelled' WHERE id = ?1",
            params![segment_id],
        )?;
        Ok(())
    }

    pub fn finalize_segment(
        &self,
        segment_id: i64,
        file_size: i64,
        file_adler32: u32,
        file_hash: Md5Digest,
    ) -> Result<(), Error> {
        let updated = self.conn.execute(
            "UPDATE segment SET status = 'final', file_size = ?2, file_adler32 = ?3, file_hash = ?4
             WHERE id = ?1 AND status = 'active'",
            params![
                segment_id,
                file_size,
                file_adler32,
                file_hash.as_bytes().to_vec()
            ],
        )?;
        if updated == 0 {
            return Err(err("finalize_segment: no active segment with that id"));
        }
        Ok(())
    }

    /// Insert a tombstone row (§4.2a): a fresh segment row at `timestamp`
    /// marking `key` (or one specific version) as deleted.
    pub fn insert_tombstone(
        &self,
        collection_id: CollectionId,
        key: &str,
        unified_id_to_delete: Option<UnifiedId>,
        source_node_id: NodeName,
        timestamp: Timestamp,
    ) -> Result<i64, Error> {
        let seg = NewSegment {
            collection_id,
            key: key.to_string(),
            unified_id: UnifiedId::generate(),
            conjoined_part: ConjoinedPart::NONE,
            segment_num: SegmentNum(0),
            timestamp,
            status: SegmentStatus::Tombstone,
            handoff_node_id: None,
            file_tombstone_unified_id: unified_id_to_delete,
            source_node_id,
        };
        self.insert_segment(&seg)
    }

    /// All rows (any status) for a key, newest first — the destroy path's
    /// view of "what exists right now".
    pub fn current_status_of_key(
        &self,
        collection_id: CollectionId,
        key: &str,
    ) -> Result<Vec<SegmentRow>, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM segment WHERE collection_id = ?1 AND key = ?2
             ORDER BY timestamp_micros DESC",
        )?;
        let rows = stmt
            .query_map(params![collection_id.0, key], row_to_segment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn current_status_of_version(
        &self,
        collection_id: CollectionId,
        key: &str,
        unified_id: &UnifiedId,
    ) -> Result<Vec<SegmentRow>, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM segment WHERE collection_id = ?1 AND key = ?2 AND unified_id = ?3
             ORDER BY segment_num ASC",
        )?;
        let rows = stmt
            .query_map(params![collection_id.0, key, unified_id.0], row_to_segment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Highest-timestamp finalized, non-shadowed segment for `key`, the
    /// entry point the gateway uses to begin a read (§4.6).
    pub fn most_recent_timestamp_for_key(
        &self,
        collection_id: CollectionId,
        key: &str,
    ) -> Result<Option<SegmentRow>, Error> {
        let rows = self.current_status_of_key(collection_id, key)?;
        Ok(most_recent_live_version(&rows))
    }

    /// Bounded, prefix-and-delimiter-aware key listing (§6.3).
    pub fn list_keys(
        &self,
        collection_id: CollectionId,
        prefix: &str,
        delimiter: &str,
        marker: Option<&str>,
        max_keys: usize,
    ) -> Result<(Vec<String>, bool), Error> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT key FROM segment
             WHERE collection_id = ?1 AND key LIKE ?2 ESCAPE '\\' AND key > ?3
             ORDER BY key ASC",
        )?;
        let like_pattern = format!("{}%", escape_like(prefix));
        let marker = marker.unwrap_or("");
        let candidate_keys: Vec<String> = stmt
            .query_map(params![collection_id.0, like_pattern, marker], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut live_keys = Vec::new();
        for key in candidate_keys {
            if !key.starts_with(prefix) {
                continue;
            }
            let rows = self.current_status_of_key(collection_id, &key)?;
            if most_recent_live_version(&rows).is_some() {
                live_keys.push(key);
            }
        }

        let results = if delimiter.is_empty() {
            live_keys
        } else {
            collapse_common_prefixes(&live_keys, prefix, delimiter)
        };

        let truncated = results.len() > max_keys;
        let mut results = results;
        results.truncate(max_keys);
        Ok((results, truncated))
    }

    /// Analogous to list_keys but enumerates every live version of every
    /// matching key, respecting file_tombstone_unified_id shadowing (§6.3).
    pub fn list_versions(
        &self,
        collection_id: CollectionId,
        prefix: &str,
        marker: Option<&str>,
        max_keys: usize,
    ) -> Result<(Vec<SegmentRow>, bool), Error> {
        let like_pattern = format!("{}%", escape_like(prefix));
        let marker = marker.unwrap_or("");
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT key FROM segment
             WHERE collection_id = ?1 AND key LIKE ?2 ESCAPE '\\' AND key > ?3
             ORDER BY key ASC",
        )?;
        let keys: Vec<String> = stmt
            .query_map(params![collection_id.0, like_pattern, marker], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut versions = Vec::new();
        for key in keys {
            if !key.starts_with(prefix) {
                continue;
            }
            let rows = self.current_status_of_key(collection_id, &key)?;
            versions.extend(live_versions(&rows));
        }
        versions.sort_by(|a, b| (&a.key, a.timestamp).cmp(&(&b.key, b.timestamp)));

        let truncated = versions.len() > max_keys;
        versions.truncate(max_keys);
        Ok((versions, truncated))
    }

    // ---- sequence -----------------------------------------------------

    pub fn max_sequence_num(&self, segment_id: i64) -> Result<i32, Error> {
        let max: Option<i32> = self.conn.query_row(
            "SELECT MAX(sequence_num) FROM sequence WHERE segment_id = ?1",
            params![segment_id],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0))
    }

    pub fn insert_sequence(&self, seq: &SequenceRow) -> Result<(), Error> {
        self.conn.execute(
            "INSERT INTO sequence (segment_id, sequence_num, value_file_id, offset, size,
                hash, adler32, zfec_padding_size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                seq.segment_id,
                seq.sequence_num.0,
                seq.value_file_id,
                seq.offset,
                seq.size,
                seq.hash.as_bytes().to_vec(),
                seq.adler32,
                seq.zfec_padding_size,
            ],
        )?;
        Ok(())
    }

    /// All sequence rows for a segment, ordered by sequence_num, count-first
    /// (§4.6 "generate_all_rows", §9 "row-count-first generator").
    pub fn sequences_for_segment(&self, segment_id: i64) -> Result<RowStream<SequenceRow>, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT segment_id, sequence_num, value_file_id, offset, size, hash, adler32,
                zfec_padding_size
             FROM sequence WHERE segment_id = ?1 ORDER BY sequence_num ASC",
        )?;
        let rows = stmt
            .query_map(params![segment_id], row_to_sequence)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RowStream {
            count: rows.len() as u64,
            rows,
        })
    }

    // ---- value_file -----------------------------------------------------

    pub fn create_value_file(&self) -> Result<i64, Error> {
        self.conn.execute(
            "INSERT INTO value_file (size, hash, sequence_count, min_segment_id, max_segment_id,
                distinct_collection_count, collection_ids, sealed)
             VALUES (0, NULL, 0, NULL, NULL, 0, '', 0)",
            [],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_value_file(
        &self,
        id: i64,
        size: i64,
        hash: Md5Digest,
        sequence_count: i64,
        min_segment_id: i64,
        max_segment_id: i64,
        collection_ids: &[i64],
    ) -> Result<(), Error> {
        let joined = collection_ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.conn.execute(
            "UPDATE value_file SET size = ?2, hash = ?3, sequence_count = ?4,
                min_segment_id = ?5, max_segment_id = ?6, distinct_collection_count = ?7,
                collection_ids = ?8
             WHERE id = ?1",
            params![
                id,
                size,
                hash.as_bytes().to_vec(),
                sequence_count,
                min_segment_id,
                max_segment_id,
                collection_ids.len() as i64,
                joined,
            ],
        )?;
        Ok(())
    }

    pub fn seal_value_file(&self, id: i64) -> Result<(), Error> {
        self.conn
            .execute("UPDATE value_file SET sealed = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn get_value_file(&self, id: i64) -> Result<Option<ValueFileInfo>, Error> {
        self.conn
            .query_row(
                "SELECT * FROM value_file WHERE id = ?1",
                params![id],
                row_to_value_file,
            )
            .optional()
            .map_err(Error::from)
    }

    // ---- conjoined -----------------------------------------------------

    pub fn start_conjoined(
        &self,
        collection_id: CollectionId,
        key: &str,
        unified_id: &UnifiedId,
        timestamp: Timestamp,
    ) -> Result<(), Error> {
        self.conn.execute(
            "INSERT INTO conjoined (collection_id, key, unified_id, create_timestamp, complete_timestamp)
             VALUES (?1, ?2, ?3, ?4, NULL)",
            params![collection_id.0, key, unified_id.0, timestamp.micros()],
        )?;
        Ok(())
    }

    pub fn abort_conjoined(
        &self,
        collection_id: CollectionId,
        key: &str,
        unified_id: &UnifiedId,
    ) -> Result<(), Error> {
        self.conn.execute(
            "DELETE FROM conjoined WHERE collection_id = ?1 AND key = ?2 AND unified_id = ?3",
            params![collection_id.0, key, unified_id.0],
        )?;
        Ok(())
    }

    pub fn finish_conjoined(
        &self,
        collection_id: CollectionId,
        key: &str,
        unified_id: &UnifiedId,
        timestamp: Timestamp,
    ) -> Result<(), Error> {
        let updated = self.conn.execute(
            "UPDATE conjoined SET complete_timestamp = ?4
             WHERE collection_id = ?1 AND key = ?2 AND unified_id = ?3 AND complete_timestamp IS NULL",
            params![collection_id.0, key, unified_id.0, timestamp.micros()],
        )?;
        if updated == 0 {
            return Err(err("finish_conjoined: no open conjoined upload with that id"));
        }
        Ok(())
    }

    pub fn get_conjoined(
        &self,
        collection_id: CollectionId,
        key: &str,
        unified_id: &UnifiedId,
    ) -> Result<Option<ConjoinedRow>, Error> {
        self.conn
            .query_row(
                "SELECT * FROM conjoined WHERE collection_id = ?1 AND key = ?2 AND unified_id = ?3",
                params![collection_id.0, key, unified_id.0],
                row_to_conjoined,
            )
            .optional()
            .map_err(Error::from)
    }

    // ---- audit -----------------------------------------------------

    pub fn start_audit(
        &self,
        collection_id: CollectionId,
        start_timestamp: Timestamp,
    ) -> Result<i64, Error> {
        self.conn.execute(
            "INSERT INTO audit_result (collection_id, start_timestamp, retry_count, state, end_timestamp)
             VALUES (?1, ?2, 0, 'in-progress', NULL)",
            params![collection_id.0, start_timestamp.micros()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn restart_audit(&self, row_id: i64, start_timestamp: Timestamp) -> Result<(), Error> {
        self.conn.execute(
            "UPDATE audit_result SET start_timestamp = ?2, retry_count = retry_count + 1,
                state = 'in-progress', end_timestamp = NULL
             WHERE row_id = ?1",
            params![row_id, start_timestamp.micros()],
        )?;
        Ok(())
    }

    pub fn successful_audit(&self, row_id: i64, end_timestamp: Timestamp) -> Result<(), Error> {
        self.set_audit_state(row_id, AuditState::Successful, Some(end_timestamp))
    }

    pub fn audit_error(&self, row_id: i64, end_timestamp: Timestamp) -> Result<(), Error> {
        self.set_audit_state(row_id, AuditState::Error, Some(end_timestamp))
    }

    pub fn wait_for_retry(&self, row_id: i64) -> Result<(), Error> {
        self.set_audit_state(row_id, AuditState::WaitForRetry, None)
    }

    fn set_audit_state(
        &self,
        row_id: i64,
        state: AuditState,
        end_timestamp: Option<Timestamp>,
    ) -> Result<(), Error> {
        self.conn.execute(
            "UPDATE audit_result SET state = ?2, end_timestamp = ?3 WHERE row_id = ?1",
            params![row_id, state.as_db_str(), end_timestamp.map(|t| t.micros())],
        )?;
        Ok(())
    }

    pub fn get_audit_record(&self, row_id: i64) -> Result<Option<AuditRecord>, Error> {
        self.conn
            .query_row(
                "SELECT * FROM audit_result WHERE row_id = ?1",
                params![row_id],
                row_to_audit_record,
            )
            .optional()
            .map_err(Error::from)
    }

    // ---- anti-entropy scan -----------------------------------------------------

    /// All rows eligible for the consistency-check digest (§4.5): active or
    /// final segments plus tombstones, excluding handoff-held segments,
    /// sorted by (key, timestamp).
    pub fn segments_for_audit(
        &self,
        collection_id: CollectionId,
    ) -> Result<RowStream<SegmentRow>, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM segment
             WHERE collection_id = ?1
               AND status IN ('active', 'final', 'tombstone')
               AND handoff_node_id IS NULL
             ORDER BY key ASC, timestamp_micros ASC",
        )?;
        let rows = stmt
            .query_map(params![collection_id.0], row_to_segment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RowStream {
            count: rows.len() as u64,
            rows,
        })
    }

    // ---- handoff -----------------------------------------------------

    /// Segments held on behalf of `home_node`, the reply body for
    /// `hinted-handoff` (§4.4a).
    pub fn segments_held_for(&self, home_node: &NodeName) -> Result<Vec<SegmentRow>, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM segment WHERE handoff_node_id = ?1 AND status = 'final'
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![home_node.0], row_to_segment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete a segment and its sequence rows (purge-handoff, §4.4a). The
    /// value file bytes are left in place per §4.2's unreferenced-tail
    /// tolerance.
    pub fn purge_segment(&self, segment_id: i64) -> Result<(), Error> {
        self.conn
            .execute("DELETE FROM sequence WHERE segment_id = ?1", params![segment_id])?;
        self.conn
            .execute("DELETE FROM segment WHERE id = ?1", params![segment_id])?;
        Ok(())
    }
}

/// Most recent non-shadowed live (final) version among a key's rows,
/// applying tombstone dominance (§4.2a, testable property 3): a tombstone
/// shadows every version at-or-before its own timestamp unless it names a
/// specific `file_tombstone_unified_id`, in which case it shadows only that
/// version.
fn most_recent_live_version(rows: &[SegmentRow]) -> Option<SegmentRow> {
    live_versions(rows).into_iter().next()
}

/// All live (non-shadowed, final) versions, newest first.
fn live_versions(rows: &[SegmentRow]) -> Vec<SegmentRow> {
    let blanket_tombstone_after = rows
        .iter()
        .filter(|r| r.status == SegmentStatus::Tombstone && r.file_tombstone_unified_id.is_none())
        .map(|r| r.timestamp)
        .max();

    let versioned_tombstones: Vec<&UnifiedId> = rows
        .iter()
        .filter(|r| r.status == SegmentStatus::Tombstone)
        .filter_map(|r| r.file_tombstone_unified_id.as_ref())
        .collect();

    let mut live: Vec<SegmentRow> = rows
        .iter()
        .filter(|r| r.status == SegmentStatus::Final)
        .filter(|r| !matches!(blanket_tombstone_after, Some(t) if t >= r.timestamp))
        .filter(|r| !versioned_tombstones.contains(&&r.unified_id))
        .cloned()
        .collect();

    live.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    live
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Group keys sharing a prefix up to the next delimiter occurrence into a
/// single synthetic "common prefix" entry (§6.3).
fn collapse_common_prefixes(keys: &[String], prefix: &str, delimiter: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen_prefixes = std::collections::BTreeSet::new();
    for key in keys {
        let rest = &key[prefix.len()..];
        if let Some(idx) = rest.find(delimiter) {
            let common = format!("{}{}{}", prefix, &rest[..idx], delimiter);
            if seen_prefixes.insert(common.clone()) {
                out.push(common);
            }
        } else {
            out.push(key.clone());
        }
    }
    out
}

fn row_to_segment(row: &Row) -> rusqlite::Result<SegmentRow> {
    let status_str: String = row.get("status")?;
    let status = SegmentStatus::from_db_str(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            "bad segment status".into(),
        )
    })?;
    let file_hash: Option<Vec<u8>> = row.get("file_hash")?;
    let handoff_node_id: Option<String> = row.get("handoff_node_id")?;
    let file_tombstone_unified_id: Option<String> = row.get("file_tombstone_unified_id")?;
    Ok(SegmentRow {
        id: row.get("id")?,
        collection_id: CollectionId(row.get("collection_id")?),
        key: row.get("key")?,
        unified_id: UnifiedId(row.get("unified_id")?),
        conjoined_part: ConjoinedPart(row.get("conjoined_part")?),
        segment_num: SegmentNum(row.get("segment_num")?),
        timestamp: Timestamp::from_micros(row.get("timestamp_micros")?),
        file_size: row.get("file_size")?,
        file_adler32: row.get::<_, Option<i64>>("file_adler32")?.map(|v| v as u32),
        file_hash: file_hash.map(|bytes| Md5Digest(bytes.try_into().unwrap_or([0u8; 16]))),
        status,
        handoff_node_id: handoff_node_id.map(NodeName),
        file_tombstone_unified_id: file_tombstone_unified_id.map(UnifiedId),
        source_node_id: NodeName(row.get("source_node_id")?),
    })
}

fn row_to_sequence(row: &Row) -> rusqlite::Result<SequenceRow> {
    let hash: Vec<u8> = row.get("hash")?;
    Ok(SequenceRow {
        segment_id: row.get("segment_id")?,
        sequence_num: SequenceNum(row.get("sequence_num")?),
        value_file_id: row.get("value_file_id")?,
        offset: row.get("offset")?,
        size: row.get("size")?,
        hash: Md5Digest(hash.try_into().unwrap_or([0u8; 16])),
        adler32: row.get::<_, i64>("adler32")? as u32,
        zfec_padding_size: row.get("zfec_padding_size")?,
    })
}

fn row_to_value_file(row: &Row) -> rusqlite::Result<ValueFileInfo> {
    let hash: Option<Vec<u8>> = row.get("hash")?;
    let collection_ids: String = row.get("collection_ids")?;
    Ok(ValueFileInfo {
        id: row.get("id")?,
        size: row.get("size")?,
        hash: hash.map(|bytes| Md5Digest(bytes.try_into().unwrap_or([0u8; 16]))),
        sequence_count: row.get("sequence_count")?,
        min_segment_id: row.get("min_segment_id")?,
        max_segment_id: row.get("max_segment_id")?,
        distinct_collection_count: row.get("distinct_collection_count")?,
        collection_ids: if collection_ids.is_empty() {
            Vec::new()
        } else {
            collection_ids.split(',').filter_map(|s| s.parse().ok()).collect()
        },
        sealed: row.get::<_, i64>("sealed")? != 0,
    })
}

fn row_to_conjoined(row: &Row) -> rusqlite::Result<ConjoinedRow> {
    Ok(ConjoinedRow {
        collection_id: CollectionId(row.get("collection_id")?),
        key: row.get("key")?,
        unified_id: UnifiedId(row.get("unified_id")?),
        create_timestamp: Timestamp::from_micros(row.get("create_timestamp")?),
        complete_timestamp: row
            .get::<_, Option<i64>>("complete_timestamp")?
            .map(Timestamp::from_micros),
    })
}

fn row_to_audit_record(row: &Row) -> rusqlite::Result<AuditRecord> {
    let state_str: String = row.get("state")?;
    let state = AuditState::from_db_str(&state_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            "bad audit state".into(),
        )
    })?;
    Ok(AuditRecord {
        row_id: row.get("row_id")?,
        collection_id: CollectionId(row.get("collection_id")?),
        start_timestamp: Timestamp::from_micros(row.get("start_timestamp")?),
        retry_count: row.get("retry_count")?,
        state,
        end_timestamp: row
            .get::<_, Option<i64>>("end_timestamp")?
            .map(Timestamp::from_micros),
    })
}
