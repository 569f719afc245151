mod index;
mod schema;
mod types;
mod value_file;

pub use index::LocalIndex;
pub use types::{
    AuditRecord, AuditState, ConjoinedRow, NewSegment, RowStream, SegmentRow, SegmentStatus,
    SequenceRow, ValueFileInfo,
};
pub use value_file::{AppendResult, Repository, ValueFileReader, ValueFileWriter};

#[cfg(test)]
mod index_test {
    use super::*;
    use base::Timestamp;
    use proto::{CollectionId, ConjoinedPart, NodeName, SegmentNum, UnifiedId};
    use test_log::test;

    fn new_segment(collection_id: i64, key: &str, status: SegmentStatus, ts: i64) -> NewSegment {
        NewSegment {
            collection_id: CollectionId(collection_id),
            key: key.to_string(),
            unified_id: UnifiedId::generate(),
            conjoined_part: ConjoinedPart::NONE,
            segment_num: SegmentNum(1),
            timestamp: Timestamp::from_micros(ts),
            status,
            handoff_node_id: None,
            file_tombstone_unified_id: None,
            source_node_id: NodeName::new("node01"),
        }
    }

    #[test]
    fn insert_and_finalize_segment_round_trips() {
        let idx = LocalIndex::open_in_memory().unwrap();
        let seg = new_segment(1, "some-key", SegmentStatus::Active, 1_000_000);
        let id = idx.insert_segment(&seg).unwrap();

        let row = idx.get_segment(id).unwrap().unwrap();
        assert_eq!(row.status, SegmentStatus::Active);
        assert!(row.file_hash.is_none());

        idx.finalize_segment(id, 11, 12345, base::Md5Digest::of(b"hello world"))
            .unwrap();
        let row = idx.get_segment(id).unwrap().unwrap();
        assert_eq!(row.status, SegmentStatus::Final);
        assert_eq!(row.file_size, Some(11));
    }

    #[test]
    fn finalize_twice_fails() {
        let idx = LocalIndex::open_in_memory().unwrap();
        let seg = new_segment(1, "some-key", SegmentStatus::Active, 1_000_000);
        let id = idx.insert_segment(&seg).unwrap();
        idx.finalize_segment(id, 1, 1, base::Md5Digest::of(b"x")).unwrap();
        assert!(idx.finalize_segment(id, 1, 1, base::Md5Digest::of(b"x")).is_err());
    }

    #[test]
    fn tombstone_shadows_earlier_version() {
        let idx = LocalIndex::open_in_memory().unwrap();
        let collection = CollectionId(1);

        let seg = new_segment(1, "k", SegmentStatus::Active, 1_000_000);
        let id = idx.insert_segment(&seg).unwrap();
        idx.finalize_segment(id, 1, 1, base::Md5Digest::of(b"x")).unwrap();

        assert!(idx
            .most_recent_timestamp_for_key(collection, "k")
            .unwrap()
            .is_some());

        idx.insert_tombstone(
            collection,
            "k",
            None,
            NodeName::new("node01"),
            Timestamp::from_micros(2_000_000),
        )
        .unwrap();

        assert!(idx
            .most_recent_timestamp_for_key(collection, "k")
            .unwrap()
            .is_none());
    }

    #[test]
    fn versioned_tombstone_only_shadows_named_version() {
        let idx = LocalIndex::open_in_memory().unwrap();
        let collection = CollectionId(1);

        let seg1 = new_segment(1, "k", SegmentStatus::Active, 1_000_000);
        let unified1 = seg1.unified_id.clone();
        let id1 = idx.insert_segment(&seg1).unwrap();
        idx.finalize_segment(id1, 1, 1, base::Md5Digest::of(b"v1")).unwrap();

        let seg2 = new_segment(1, "k", SegmentStatus::Active, 2_000_000);
        let id2 = idx.insert_segment(&seg2).unwrap();
        idx.finalize_segment(id2, 1, 1, base::Md5Digest::of(b"v2")).unwrap();

        idx.insert_tombstone(
            collection,
            "k",
            Some(unified1),
            NodeName::new("node01"),
            Timestamp::from_micros(3_000_000),
        )
        .unwrap();

        let live = idx.most_recent_timestamp_for_key(collection, "k").unwrap().unwrap();
        assert_eq!(live.unified_id, seg2.unified_id);
    }

    #[test]
    fn list_keys_respects_prefix_and_marker() {
        let idx = LocalIndex::open_in_memory().unwrap();
        let collection = CollectionId(1);
        for (key, ts) in [("a/1", 1), ("a/2", 2), ("b/1", 3)] {
            let seg = new_segment(1, key, SegmentStatus::Active, ts);
            let id = idx.insert_segment(&seg).unwrap();
            idx.finalize_segment(id, 1, 1, base::Md5Digest::of(key.as_bytes()))
                .unwrap();
        }

        let (keys, truncated) = idx.list_keys(collection, "a/", "", None, 10).unwrap();
        assert_eq!(keys, vec!["a/1", "a/2"]);
        assert!(!truncated);

        let (keys, _) = idx.list_keys(collection, "a/", "", Some("a/1"), 10).unwrap();
        assert_eq!(keys, vec!["a/2"]);
    }

    #[test]
    fn list_keys_collapses_common_prefixes_at_delimiter() {
        let idx = LocalIndex::open_in_memory().unwrap();
        let collection = CollectionId(1);
        for (key, ts) in [("photos/2024/a.jpg", 1), ("photos/2024/b.jpg", 2), ("photos/readme", 3)] {
            let seg = new_segment(1, key, SegmentStatus::Active, ts);
            let id = idx.insert_segment(&seg).unwrap();
            idx.finalize_segment(id, 1, 1, base::Md5Digest::of(key.as_bytes()))
                .unwrap();
        }

        let (keys, _) = idx.list_keys(collection, "photos/", "/", None, 10).unwrap();
        assert_eq!(keys, vec!["photos/2024/", "photos/readme"]);
    }

    #[test]
    fn conjoined_lifecycle() {
        let idx = LocalIndex::open_in_memory().unwrap();
        let collection = CollectionId(1);
        let unified_id = UnifiedId::generate();
        idx.start_conjoined(collection, "big", &unified_id, Timestamp::from_micros(1))
            .unwrap();
        assert!(idx.get_conjoined(collection, "big", &unified_id).unwrap().is_some());

        idx.finish_conjoined(collection, "big", &unified_id, Timestamp::from_micros(2))
            .unwrap();
        let row = idx.get_conjoined(collection, "big", &unified_id).unwrap().unwrap();
        assert!(row.complete_timestamp.is_some());

        assert!(idx
            .finish_conjoined(collection, "big", &unified_id, Timestamp::from_micros(3))
            .is_err());
    }

    #[test]
    fn abort_conjoined_removes_row() {
        let idx = LocalIndex::open_in_memory().unwrap();
        let collection = CollectionId(1);
        let unified_id = UnifiedId::generate();
        idx.start_conjoined(collection, "big", &unified_id, Timestamp::from_micros(1))
            .unwrap();
        idx.abort_conjoined(collection, "big", &unified_id).unwrap();
        assert!(idx.get_conjoined(collection, "big", &unified_id).unwrap().is_none());
    }

    #[test]
    fn audit_state_transitions() {
        let idx = LocalIndex::open_in_memory().unwrap();
        let collection = CollectionId(1);
        let row_id = idx.start_audit(collection, Timestamp::from_micros(1)).unwrap();
        let rec = idx.get_audit_record(row_id).unwrap().unwrap();
        assert_eq!(rec.state, AuditState::InProgress);

        idx.successful_audit(row_id, Timestamp::from_micros(2)).unwrap();
        let rec = idx.get_audit_record(row_id).unwrap().unwrap();
        assert_eq!(rec.state, AuditState::Successful);
        assert!(rec.end_timestamp.is_some());
    }

    #[test]
    fn sequences_for_segment_are_count_first_and_ordered() {
        let idx = LocalIndex::open_in_memory().unwrap();
        let seg = new_segment(1, "k", SegmentStatus::Active, 1);
        let segment_id = idx.insert_segment(&seg).unwrap();
        let value_file_id = idx.create_value_file().unwrap();

        for n in [2, 0, 1] {
            idx.insert_sequence(&SequenceRow {
                segment_id,
                sequence_num: proto::SequenceNum(n),
                value_file_id,
                offset: (n * 10) as i64,
                size: 10,
                hash: base::Md5Digest::of(&[n as u8]),
                adler32: 0,
                zfec_padding_size: 0,
            })
            .unwrap();
        }

        let stream = idx.sequences_for_segment(segment_id).unwrap();
        assert_eq!(stream.count, 3);
        let nums: Vec<i32> = stream.rows.iter().map(|r| r.sequence_num.0).collect();
        assert_eq!(nums, vec![0, 1, 2]);
    }

    #[test]
    fn handoff_segments_are_purgeable() {
        let idx = LocalIndex::open_in_memory().unwrap();
        let home = NodeName::new("node01");
        let mut seg = new_segment(1, "k", SegmentStatus::Active, 1);
        seg.handoff_node_id = Some(home.clone());
        let id = idx.insert_segment(&seg).unwrap();
        idx.finalize_segment(id, 1, 1, base::Md5Digest::of(b"x")).unwrap();

        let held = idx.segments_held_for(&home).unwrap();
        assert_eq!(held.len(), 1);

        idx.purge_segment(id).unwrap();
        assert!(idx.get_segment(id).unwrap().is_none());
        assert!(idx.segments_held_for(&home).unwrap().is_empty());
    }
}
