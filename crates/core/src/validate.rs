//! Upload-time validation of encoded nodes.

use crate::error::{Error, Result};
use crate::key::NodeKey;
use crate::node::{Node, NodeKind, check_structure};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tracing::instrument;

/// Answers questions about already-stored children while validating a parent.
#[async_trait]
pub trait ChildLookup: Send + Sync {
    /// Whether the child is available to the uploader.
    async fn exists(&self, key: &NodeKey) -> Result<bool>;

    /// The child's declared size, if known.
    async fn size(&self, key: &NodeKey) -> Result<Option<u64>>;
}

/// Known children and their declared sizes.
#[async_trait]
impl ChildLookup for HashMap<NodeKey, u64> {
    async fn exists(&self, key: &NodeKey) -> Result<bool> {
        Ok(self.contains_key(key))
    }

    async fn size(&self, key: &NodeKey) -> Result<Option<u64>> {
        Ok(self.get(key).copied())
    }
}

/// A node that passed validation, with everything the upload pipeline needs.
#[derive(Clone, Debug)]
pub struct ValidatedNode {
    pub key: NodeKey,
    pub node: Node,
    /// Size declared in the header.
    pub size: u64,
    /// Encoded length, as stored in the blob store.
    pub physical_size: u64,
    /// Inline content bytes (zero for directories).
    pub logical_size: u64,
    pub children: Vec<NodeKey>,
}

impl ValidatedNode {
    pub fn kind(&self) -> NodeKind {
        self.node.kind()
    }
}

/// Outcome of a validation that did not fail outright.
#[derive(Clone, Debug)]
pub enum Validation {
    Valid(ValidatedNode),
    /// Referenced children the uploader must store first.
    MissingChildren(Vec<NodeKey>),
}

/// Validate `bytes` against `claimed`.
///
/// Fails with `HashMismatch`, `CorruptNode` or `SizeMismatch`. Absent
/// children are reported as [`Validation::MissingChildren`], not as an error.
#[instrument(level = "trace", skip_all, fields(key = %claimed), err)]
pub async fn validate<L>(bytes: &[u8], claimed: &NodeKey, lookup: &L) -> Result<Validation>
where
    L: ChildLookup + ?Sized,
{
    check_structure(bytes)?;

    let actual = NodeKey::for_bytes(bytes);
    if actual != *claimed {
        return Err(Error::HashMismatch {
            expected: claimed.to_string(),
            actual: actual.to_string(),
        });
    }

    let node = Node::decode(bytes)?;
    node.check_local_sizes()?;

    let children = node.children();
    let mut missing = BTreeSet::new();
    for child in &children {
        if !lookup.exists(child).await? {
            missing.insert(*child);
        }
    }
    if !missing.is_empty() {
        return Ok(Validation::MissingChildren(missing.into_iter().collect()));
    }

    match &node {
        Node::Dict(dict) => {
            let mut total = Some(0u64);
            for entry in dict.entries() {
                total = match (total, lookup.size(&entry.key).await?) {
                    (Some(sum), Some(size)) => Some(sum.checked_add(size).ok_or_else(|| {
                        Error::CorruptNode("directory size overflows u64".to_string())
                    })?),
                    _ => None,
                };
            }
            if let Some(total) = total
                && total != dict.size()
            {
                return Err(Error::SizeMismatch {
                    declared: dict.size(),
                    computed: total,
                });
            }
        }
        Node::File(_) | Node::Successor(_) => {
            if let (Some(expected), Some(next)) =
                (node.expected_successor_size(), children.first())
                && let Some(actual) = lookup.size(next).await?
                && actual != expected
            {
                return Err(Error::SizeMismatch {
                    declared: node.declared_size(),
                    computed: node.logical_size() + actual,
                });
            }
        }
    }

    Ok(Validation::Valid(ValidatedNode {
        key: actual,
        size: node.declared_size(),
        physical_size: bytes.len() as u64,
        logical_size: node.logical_size(),
        children,
        node,
    }))
}
