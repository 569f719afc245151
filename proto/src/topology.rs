// The fixed node-name sequence for a cluster process lifetime (§6.2):
// NODE_NAME_SEQ is a space-separated ordered list of node names, and a
// segment's segment_num is 1 + that node's index in the sequence.

use crate::NodeName;
use base::{err, Error};

#[derive(Clone, Debug)]
pub struct Topology {
    local: NodeName,
    nodes: Vec<NodeName>,
}

impl Topology {
    pub fn new(local: NodeName, nodes: Vec<NodeName>) -> Result<Self, Error> {
        if !nodes.contains(&local) {
            return Err(err("local node name not present in node name sequence"));
        }
        Ok(Self { local, nodes })
    }

    pub fn parse(local: &str, node_name_seq: &str) -> Result<Self, Error> {
        let nodes: Vec<NodeName> = node_name_seq
            .split_whitespace()
            .map(NodeName::new)
            .collect();
        if nodes.is_empty() {
            return Err(err("NODE_NAME_SEQ is empty"));
        }
        Self::new(NodeName::new(local), nodes)
    }

    pub fn local_node_name(&self) -> &NodeName {
        &self.local
    }

    pub fn node_names(&self) -> &[NodeName] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// 1-based segment number for `node`, or None if it's not in the cluster.
    pub fn segment_num_for(&self, node: &NodeName) -> Option<i32> {
        self.nodes
            .iter()
            .position(|n| n == node)
            .map(|index| (index + 1) as i32)
    }

    pub fn local_segment_num(&self) -> i32 {
        self.segment_num_for(&self.local)
            .expect("local node name is always present")
    }

    pub fn node_for_segment_num(&self, segment_num: i32) -> Option<&NodeName> {
        if segment_num < 1 {
            return None;
        }
        self.nodes.get((segment_num - 1) as usize)
    }
}
