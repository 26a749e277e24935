//! Node builders and deterministic payloads.

use bytes::Bytes;
use cask_core::{DictNode, FileNode, Node, NodeKey};

/// Deterministic payload derived from a seed.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    let mut state = seed;
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
    data
}

/// A node ready to upload: its key and wire bytes.
#[derive(Clone, Debug)]
pub struct Encoded {
    pub node: Node,
    pub key: NodeKey,
    pub bytes: Bytes,
}

impl Encoded {
    pub fn new(node: Node) -> Self {
        let bytes = Bytes::from(node.encode());
        Self {
            key: node.key(),
            node,
            bytes,
        }
    }

    /// Size a parent declares for this child.
    #[allow(dead_code)]
    pub fn size(&self) -> u64 {
        self.node.declared_size()
    }
}

#[allow(dead_code)]
pub fn file(content_type: &str, data: &[u8]) -> Encoded {
    Encoded::new(Node::File(
        FileNode::new(content_type, data.to_vec()).expect("valid file node"),
    ))
}

#[allow(dead_code)]
pub fn text(data: &str) -> Encoded {
    file("text/plain", data.as_bytes())
}

/// A directory over already-encoded children.
#[allow(dead_code)]
pub fn dict(entries: &[(&str, &Encoded)]) -> Encoded {
    let mut dict = DictNode::new();
    for (name, child) in entries {
        dict.add(*name, child.key, child.size())
            .expect("valid dict entry");
    }
    Encoded::new(Node::Dict(dict))
}

#[allow(dead_code)]
pub fn empty_dict() -> Encoded {
    Encoded::new(Node::empty_dict())
}
