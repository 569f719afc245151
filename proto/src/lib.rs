mod frame;
mod ids;
mod topology;

pub use frame::{Frame, FrameDecoder};
pub use ids::{
    ClientTag, CollectionId, ConjoinedPart, MessageId, NodeName, ResultCode, SegmentNum,
    SequenceNum, UnifiedId,
};
pub use topology::Topology;

/// Peek at a decoded control frame's "message-type" field without committing
/// to a specific verb's struct shape. Used by dispatch tables to route a
/// frame to the right typed handler.
pub fn message_type(control: &serde_json::Value) -> Option<&str> {
    control.get("message-type").and_then(|v| v.as_str())
}
