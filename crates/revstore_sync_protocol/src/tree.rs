//! Revision tree transfer.

use crate::fields::{decode_map, int, uint, Fields};
use revstore_codec::{to_cbor, CodecError, CodecResult, Decode, Encode, Value};
use revstore_core::{BatchId, CoreResult, Revision, RevisionTree, TreeHeader, TreeNode};

/// Asks for the revision tree of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeRequest {
    /// Snapshot to build the tree from.
    pub batch_id: BatchId,
}

impl Encode for TreeRequest {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(&Value::object([("batch_id", int(self.batch_id.as_u64()))]))
    }
}

impl Decode for TreeRequest {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_map(bytes, |f| {
            Ok(Self {
                batch_id: BatchId::new(f.u64("batch_id")?),
            })
        })
    }
}

/// A revision tree on the wire.
///
/// Leaves are sent as `[count, hash]` pairs in leaf order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeMessage {
    /// Tree header.
    pub header: TreeHeader,
    /// Leaf level.
    pub nodes: Vec<TreeNode>,
}

impl TreeMessage {
    /// Converts back into a tree, validating the parts.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if header and leaves disagree.
    pub fn into_tree(self) -> CoreResult<RevisionTree> {
        RevisionTree::from_parts(self.header, self.nodes)
    }
}

impl From<&RevisionTree> for TreeMessage {
    fn from(tree: &RevisionTree) -> Self {
        Self {
            header: *tree.header(),
            nodes: tree.nodes().to_vec(),
        }
    }
}

fn u32_field(fields: &Fields<'_>, name: &str) -> CodecResult<u32> {
    u32::try_from(fields.u64(name)?)
        .map_err(|_| CodecError::invalid_structure(format!("{name} out of range")))
}

impl Encode for TreeMessage {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        let h = &self.header;
        let nodes = self
            .nodes
            .iter()
            .map(|n| Value::Array(vec![int(n.count), int(n.hash)]))
            .collect();
        to_cbor(&Value::object([
            ("version", Value::from(h.version)),
            ("branch_factor", Value::from(h.branch_factor)),
            ("max_depth", Value::from(h.max_depth)),
            ("range_min", int(h.range_min.as_u64())),
            ("range_max", int(h.range_max.as_u64())),
            ("initial_range_min", int(h.initial_range_min.as_u64())),
            ("origin", int(h.origin.as_u64())),
            ("width_exponent", Value::from(h.width_exponent)),
            ("count", int(h.count)),
            ("nodes", Value::Array(nodes)),
        ]))
    }
}

impl Decode for TreeMessage {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_map(bytes, |f| {
            let header = TreeHeader {
                version: u32_field(f, "version")?,
                branch_factor: u32_field(f, "branch_factor")?,
                max_depth: u32_field(f, "max_depth")?,
                range_min: Revision::new(f.u64("range_min")?),
                range_max: Revision::new(f.u64("range_max")?),
                initial_range_min: Revision::new(f.u64("initial_range_min")?),
                origin: Revision::new(f.u64("origin")?),
                width_exponent: u32_field(f, "width_exponent")?,
                count: f.u64("count")?,
            };
            let nodes = f
                .array("nodes")?
                .iter()
                .map(|node| match node.as_array() {
                    Some([count, hash]) => match (uint(count), uint(hash)) {
                        (Some(count), Some(hash)) => Ok(TreeNode { count, hash }),
                        _ => Err(CodecError::invalid_structure("tree node fields must be integers")),
                    },
                    _ => Err(CodecError::invalid_structure("tree node must be a [count, hash] pair")),
                })
                .collect::<CodecResult<Vec<_>>>()?;
            Ok(Self { header, nodes })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tree() -> RevisionTree {
        let revisions: Vec<Revision> = (1..=40u64).map(|r| Revision::new(r * 7 + 1_000)).collect();
        RevisionTree::build(&revisions, 4, 2).unwrap()
    }

    #[test]
    fn tree_survives_the_wire() {
        let tree = tree();
        let bytes = TreeMessage::from(&tree).encode().unwrap();
        let decoded = TreeMessage::decode(&bytes).unwrap().into_tree().unwrap();
        assert_eq!(decoded, tree);
        assert_eq!(decoded.root_hash(), tree.root_hash());
    }

    #[test]
    fn hashes_above_i64_max_survive() {
        let mut message = TreeMessage::from(&tree());
        message.nodes[0].hash = u64::MAX;
        let decoded = TreeMessage::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded.nodes[0].hash, u64::MAX);
    }

    #[test]
    fn inconsistent_trees_fail_validation() {
        let mut message = TreeMessage::from(&tree());
        message.nodes.pop();
        let decoded = TreeMessage::decode(&message.encode().unwrap()).unwrap();
        assert!(decoded.into_tree().is_err());
    }

    #[test]
    fn overflowing_leaf_counts_fail_validation() {
        let bytes = to_cbor(&Value::object([
            ("version", Value::from(1)),
            ("branch_factor", Value::from(2)),
            ("max_depth", Value::from(1)),
            ("range_min", Value::from(0)),
            ("range_max", Value::from(0)),
            ("initial_range_min", Value::from(0)),
            ("origin", Value::from(0)),
            ("width_exponent", Value::from(0)),
            ("count", Value::from(5)),
            (
                "nodes",
                Value::Array(vec![
                    Value::Array(vec![int(u64::MAX), int(0)]),
                    Value::Array(vec![int(5), int(0)]),
                ]),
            ),
        ]))
        .unwrap();
        let decoded = TreeMessage::decode(&bytes).unwrap();
        assert!(decoded.into_tree().is_err());
    }

    #[test]
    fn malformed_nodes_are_rejected() {
        let bytes = to_cbor(&Value::object([
            ("version", Value::from(1)),
            ("branch_factor", Value::from(8)),
            ("max_depth", Value::from(0)),
            ("range_min", Value::from(0)),
            ("range_max", Value::from(0)),
            ("initial_range_min", Value::from(0)),
            ("origin", Value::from(0)),
            ("width_exponent", Value::from(0)),
            ("count", Value::from(0)),
            ("nodes", Value::Array(vec![Value::from(3)])),
        ]))
        .unwrap();
        assert!(matches!(
            TreeMessage::decode(&bytes),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    fn node() -> impl Strategy<Value = TreeNode> {
        (any::<u64>(), any::<u64>()).prop_map(|(count, hash)| TreeNode { count, hash })
    }

    proptest! {
        #[test]
        fn any_tree_message_survives_the_wire(
            numbers in prop::array::uniform4(any::<u32>()),
            revisions in prop::array::uniform4(any::<u64>()),
            count in any::<u64>(),
            nodes in prop::collection::vec(node(), 0..32),
        ) {
            let message = TreeMessage {
                header: TreeHeader {
                    version: numbers[0],
                    branch_factor: numbers[1],
                    max_depth: numbers[2],
                    range_min: Revision::new(revisions[0]),
                    range_max: Revision::new(revisions[1]),
                    initial_range_min: Revision::new(revisions[2]),
                    origin: Revision::new(revisions[3]),
                    width_exponent: numbers[3],
                    count,
                },
                nodes,
            };
            let decoded = TreeMessage::decode(&message.encode().unwrap()).unwrap();
            prop_assert_eq!(&decoded, &message);
            // Never panics, whatever arrived.
            let _ = decoded.into_tree();
        }
    }
}
