use base::{Md5Digest, Timestamp};
use proto::{CollectionId, ConjoinedPart, NodeName, SegmentNum, SequenceNum, UnifiedId};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SegmentStatus {
    Active,
    Cancelled,
    Final,
    Tombstone,
}

impl SegmentStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SegmentStatus::Active => "active",
            SegmentStatus::Cancelled => "cancelled",
            SegmentStatus::Final => "final",
            SegmentStatus::Tombstone => "tombstone",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SegmentStatus::Active),
            "cancelled" => Some(SegmentStatus::Cancelled),
            "final" => Some(SegmentStatus::Final),
            "tombstone" => Some(SegmentStatus::Tombstone),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SegmentRow {
    pub id: i64,
    pub collection_id: CollectionId,
    pub key: String,
    pub unified_id: UnifiedId,
    pub conjoined_part: ConjoinedPart,
    pub segment_num: SegmentNum,
    pub timestamp: Timestamp,
    pub file_size: Option<i64>,
    pub file_adler32: Option<u32>,
    pub file_hash: Option<Md5Digest>,
    pub status: SegmentStatus,
    pub handoff_node_id: Option<NodeName>,
    pub file_tombstone_unified_id: Option<UnifiedId>,
    pub source_node_id: NodeName,
}

#[derive(Clone, Debug)]
pub struct NewSegment {
    pub collection_id: CollectionId,
    pub key: String,
    pub unified_id: UnifiedId,
    pub conjoined_part: ConjoinedPart,
    pub segment_num: SegmentNum,
    pub timestamp: Timestamp,
    pub status: SegmentStatus,
    pub handoff_node_id: Option<NodeName>,
    pub file_tombstone_unified_id: Option<UnifiedId>,
    pub source_node_id: NodeName,
}

#[derive(Clone, Debug)]
pub struct SequenceRow {
    pub segment_id: i64,
    pub sequence_num: SequenceNum,
    pub value_file_id: i64,
    pub offset: i64,
    pub size: i64,
    pub hash: Md5Digest,
    pub adler32: u32,
    pub zfec_padding_size: i64,
}

#[derive(Clone, Debug)]
pub struct ValueFileInfo {
    pub id: i64,
    pub size: i64,
    pub hash: Option<Md5Digest>,
    pub sequence_count: i64,
    pub min_segment_id: Option<i64>,
    pub max_segment_id: Option<i64>,
    pub distinct_collection_count: i64,
    pub collection_ids: Vec<i64>,
    pub sealed: bool,
}

#[derive(Clone, Debug)]
pub struct ConjoinedRow {
    pub collection_id: CollectionId,
    pub key: String,
    pub unified_id: UnifiedId,
    pub create_timestamp: Timestamp,
    pub complete_timestamp: Option<Timestamp>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuditState {
    InProgress,
    Successful,
    WaitForRetry,
    Error,
}

impl AuditState {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AuditState::InProgress => "in-progress",
            AuditState::Successful => "successful",
            AuditState::WaitForRetry => "wait-for-retry",
            AuditState::Error => "error",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "in-progress" => Some(AuditState::InProgress),
            "successful" => Some(AuditState::Successful),
            "wait-for-retry" => Some(AuditState::WaitForRetry),
            "error" => Some(AuditState::Error),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditRecord {
    pub row_id: i64,
    pub collection_id: CollectionId,
    pub start_timestamp: Timestamp,
    pub retry_count: i32,
    pub state: AuditState,
    pub end_timestamp: Option<Timestamp>,
}

/// Row-count-first result of a bounded scan (§4.6, §9 "row-count-first
/// generator"): `count` is always populated before `rows` is consumed.
#[derive(Clone, Debug)]
pub struct RowStream<T> {
    pub count: u64,
    pub rows: Vec<T>,
}
