//! Node model and canonical binary encoding.
//!
//! Every node encodes to a single canonical byte string; its [`NodeKey`] is the
//! SHA-256 of those bytes. Layout (little endian):
//!
//! ```text
//! 0..4    magic "CASN"
//! 4       kind (1 = file, 2 = dict, 3 = successor)
//! 5       flags (bit 0: successor pointer present; file and successor only)
//! 6..8    child count (dict only)
//! 8..16   declared logical size
//! 16..    child keys, 32 bytes each (dict), or one successor key (if flagged)
//! then    dict: per child, u16 name length + UTF-8 name (strictly ascending)
//!         file: u16 content-type length + ASCII content type, then inline data
//!         successor: inline data
//! ```

use crate::error::{Error, Result};
use crate::key::NodeKey;
use serde::{Deserialize, Serialize};
use std::fmt;

const MAGIC: &[u8; 4] = b"CASN";
const HEADER_LEN: usize = 16;
const KEY_LEN: usize = 32;
const FLAG_HAS_SUCCESSOR: u8 = 0b0000_0001;

/// Maximum length of a content type string.
pub const MAX_CONTENT_TYPE_LEN: usize = 255;

/// Maximum length of a directory entry name, in bytes.
pub const MAX_NAME_LEN: usize = 1024;

/// The closed set of node kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Dict,
    Successor,
}

impl NodeKind {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::File),
            2 => Some(Self::Dict),
            3 => Some(Self::Successor),
            _ => None,
        }
    }

    fn tag(self) -> u8 {
        match self {
            Self::File => 1,
            Self::Dict => 2,
            Self::Successor => 3,
        }
    }

    /// Parse from the stored string form.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(Self::File),
            "dict" => Ok(Self::Dict),
            "successor" => Ok(Self::Successor),
            _ => Err(Error::CorruptNode(format!("unknown node kind: {s}"))),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Dict => "dict",
            Self::Successor => "successor",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A leaf holding typed content, optionally continued by a successor chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileNode {
    content_type: String,
    size: u64,
    data: Vec<u8>,
    successor: Option<NodeKey>,
}

impl FileNode {
    /// A self-contained file whose size is its inline data length.
    pub fn new(content_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Result<Self> {
        let data = data.into();
        let content_type = content_type.into();
        validate_content_type(&content_type)?;
        Ok(Self {
            content_type,
            size: data.len() as u64,
            data,
            successor: None,
        })
    }

    /// A file whose content continues in `successor`; `total_size` covers the whole chain.
    pub fn with_successor(
        content_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
        successor: NodeKey,
        total_size: u64,
    ) -> Result<Self> {
        let data = data.into();
        let content_type = content_type.into();
        validate_content_type(&content_type)?;
        Ok(Self {
            content_type,
            size: total_size,
            data,
            successor: Some(successor),
        })
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn successor(&self) -> Option<&NodeKey> {
        self.successor.as_ref()
    }
}

/// A continuation segment of file content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuccessorNode {
    size: u64,
    data: Vec<u8>,
    next: Option<NodeKey>,
}

impl SuccessorNode {
    /// The final segment of a chain.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        Self {
            size: data.len() as u64,
            data,
            next: None,
        }
    }

    /// A segment followed by `next`; `remaining_size` covers this segment and everything after it.
    pub fn with_next(data: impl Into<Vec<u8>>, next: NodeKey, remaining_size: u64) -> Self {
        Self {
            size: remaining_size,
            data: data.into(),
            next: Some(next),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn next(&self) -> Option<&NodeKey> {
        self.next.as_ref()
    }
}

/// A named child of a [`DictNode`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DictEntry {
    pub name: String,
    pub key: NodeKey,
}

/// A directory: sorted, uniquely named references to child nodes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DictNode {
    entries: Vec<DictEntry>,
    size: u64,
}

impl DictNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a child, keeping entries sorted by name.
    ///
    /// `child_size` is the child's declared size and is folded into this
    /// directory's size.
    pub fn add(&mut self, name: impl Into<String>, key: NodeKey, child_size: u64) -> Result<()> {
        let name = name.into();
        validate_entry_name(&name)?;
        if self.entries.len() >= u16::MAX as usize {
            return Err(Error::CorruptNode("too many directory entries".to_string()));
        }
        let size = self
            .size
            .checked_add(child_size)
            .ok_or_else(|| Error::CorruptNode("directory size overflows u64".to_string()))?;

        let pos = match self
            .entries
            .binary_search_by(|e| e.name.as_str().cmp(name.as_str()))
        {
            Err(pos) => pos,
            Ok(_) => {
                return Err(Error::CorruptNode(format!(
                    "duplicate directory entry: {name}"
                )));
            }
        };
        self.entries.insert(pos, DictEntry { name, key });
        self.size = size;
        Ok(())
    }

    pub fn entries(&self) -> &[DictEntry] {
        &self.entries
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a child by name.
    pub fn get(&self, name: &str) -> Option<&NodeKey> {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.entries[i].key)
    }
}

/// An immutable, content-addressed node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    File(FileNode),
    Dict(DictNode),
    Successor(SuccessorNode),
}

impl Node {
    /// The empty directory, used as the initial root of every depot.
    pub fn empty_dict() -> Self {
        Self::Dict(DictNode::new())
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::File(_) => NodeKind::File,
            Self::Dict(_) => NodeKind::Dict,
            Self::Successor(_) => NodeKind::Successor,
        }
    }

    /// Size declared in the node header.
    pub fn declared_size(&self) -> u64 {
        match self {
            Self::File(f) => f.size,
            Self::Dict(d) => d.size,
            Self::Successor(s) => s.size,
        }
    }

    /// User-visible content bytes held by this node alone (zero for directories).
    pub fn logical_size(&self) -> u64 {
        match self {
            Self::File(f) => f.data.len() as u64,
            Self::Dict(_) => 0,
            Self::Successor(s) => s.data.len() as u64,
        }
    }

    /// Content type, for file nodes.
    pub fn content_type(&self) -> Option<&str> {
        match self {
            Self::File(f) => Some(&f.content_type),
            _ => None,
        }
    }

    /// Every node key this node structurally references.
    pub fn children(&self) -> Vec<NodeKey> {
        match self {
            Self::File(f) => f.successor.into_iter().collect(),
            Self::Dict(d) => d.entries.iter().map(|e| e.key).collect(),
            Self::Successor(s) => s.next.into_iter().collect(),
        }
    }

    /// Encode to canonical bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.logical_size() as usize + 64);
        out.extend_from_slice(MAGIC);
        out.push(self.kind().tag());

        match self {
            Self::File(f) => {
                write_header_tail(&mut out, f.successor.is_some(), 0, f.size);
                if let Some(next) = &f.successor {
                    out.extend_from_slice(next.as_bytes());
                }
                out.extend_from_slice(&(f.content_type.len() as u16).to_le_bytes());
                out.extend_from_slice(f.content_type.as_bytes());
                out.extend_from_slice(&f.data);
            }
            Self::Dict(d) => {
                write_header_tail(&mut out, false, d.entries.len() as u16, d.size);
                for entry in &d.entries {
                    out.extend_from_slice(entry.key.as_bytes());
                }
                for entry in &d.entries {
                    out.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
                    out.extend_from_slice(entry.name.as_bytes());
                }
            }
            Self::Successor(s) => {
                write_header_tail(&mut out, s.next.is_some(), 0, s.size);
                if let Some(next) = &s.next {
                    out.extend_from_slice(next.as_bytes());
                }
                out.extend_from_slice(&s.data);
            }
        }
        out
    }

    /// Key of the canonical encoding.
    pub fn key(&self) -> NodeKey {
        NodeKey::for_bytes(&self.encode())
    }

    /// Decode canonical bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = Header::parse(bytes)?;
        let mut cursor = Cursor::new(bytes, HEADER_LEN);

        match header.kind {
            NodeKind::Dict => {
                let mut keys = Vec::with_capacity(header.count as usize);
                for _ in 0..header.count {
                    keys.push(cursor.key()?);
                }
                let mut entries = Vec::with_capacity(keys.len());
                for key in keys {
                    let len = cursor.u16()? as usize;
                    let raw = cursor.take(len)?;
                    let name = std::str::from_utf8(raw)
                        .map_err(|_| Error::CorruptNode("entry name is not UTF-8".to_string()))?
                        .to_string();
                    validate_entry_name(&name)?;
                    if let Some(prev) = entries.last().map(|e: &DictEntry| e.name.as_str())
                        && prev >= name.as_str()
                    {
                        return Err(Error::CorruptNode(format!(
                            "entries not strictly ascending at {name:?}"
                        )));
                    }
                    entries.push(DictEntry { name, key });
                }
                if !cursor.is_empty() {
                    return Err(Error::CorruptNode(format!(
                        "{} trailing bytes after directory entries",
                        cursor.remaining()
                    )));
                }
                Ok(Self::Dict(DictNode {
                    entries,
                    size: header.size,
                }))
            }
            NodeKind::File => {
                let successor = if header.has_successor {
                    Some(cursor.key()?)
                } else {
                    None
                };
                let len = cursor.u16()? as usize;
                let raw = cursor.take(len)?;
                let content_type = std::str::from_utf8(raw)
                    .map_err(|_| Error::CorruptNode("content type is not UTF-8".to_string()))?
                    .to_string();
                validate_content_type(&content_type)?;
                Ok(Self::File(FileNode {
                    content_type,
                    size: header.size,
                    data: cursor.rest().to_vec(),
                    successor,
                }))
            }
            NodeKind::Successor => {
                let next = if header.has_successor {
                    Some(cursor.key()?)
                } else {
                    None
                };
                Ok(Self::Successor(SuccessorNode {
                    size: header.size,
                    data: cursor.rest().to_vec(),
                    next,
                }))
            }
        }
    }

    /// Size checks that need nothing beyond the node itself.
    ///
    /// Directory sizes depend on children and are checked by the validator.
    pub fn check_local_sizes(&self) -> Result<()> {
        let (size, data_len, chained) = match self {
            Self::File(f) => (f.size, f.data.len() as u64, f.successor.is_some()),
            Self::Successor(s) => (s.size, s.data.len() as u64, s.next.is_some()),
            Self::Dict(_) => return Ok(()),
        };
        let consistent = if chained {
            size > data_len
        } else {
            size == data_len
        };
        if consistent {
            Ok(())
        } else {
            Err(Error::SizeMismatch {
                declared: size,
                computed: data_len,
            })
        }
    }

    /// Size the successor must declare for this node's chain to add up.
    pub fn expected_successor_size(&self) -> Option<u64> {
        match self {
            Self::File(FileNode {
                size,
                data,
                successor: Some(_),
                ..
            })
            | Self::Successor(SuccessorNode {
                size,
                data,
                next: Some(_),
            }) => size.checked_sub(data.len() as u64),
            _ => None,
        }
    }
}

/// Cheap shape check over the fixed header, before any hashing or I/O.
pub fn check_structure(bytes: &[u8]) -> Result<NodeKind> {
    let header = Header::parse(bytes)?;
    let mut min_len = HEADER_LEN + header.count as usize * KEY_LEN;
    if header.has_successor {
        min_len += KEY_LEN;
    }
    if header.kind == NodeKind::File {
        min_len += 2;
    }
    if bytes.len() < min_len {
        return Err(Error::CorruptNode(format!(
            "truncated {} node: {} bytes, need at least {min_len}",
            header.kind,
            bytes.len()
        )));
    }
    Ok(header.kind)
}

struct Header {
    kind: NodeKind,
    has_successor: bool,
    count: u16,
    size: u64,
}

impl Header {
    fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::CorruptNode(format!(
                "too short for a node header: {} bytes",
                bytes.len()
            )));
        }
        if &bytes[..4] != MAGIC {
            return Err(Error::CorruptNode("bad magic".to_string()));
        }
        let kind = NodeKind::from_tag(bytes[4])
            .ok_or_else(|| Error::CorruptNode(format!("unknown node kind tag {}", bytes[4])))?;
        let flags = bytes[5];
        if flags & !FLAG_HAS_SUCCESSOR != 0 {
            return Err(Error::CorruptNode(format!("unknown flags {flags:#04x}")));
        }
        let has_successor = flags & FLAG_HAS_SUCCESSOR != 0;
        if kind == NodeKind::Dict && has_successor {
            return Err(Error::CorruptNode(
                "directory nodes cannot carry a successor".to_string(),
            ));
        }
        let count = u16::from_le_bytes([bytes[6], bytes[7]]);
        if kind != NodeKind::Dict && count != 0 {
            return Err(Error::CorruptNode(format!(
                "{kind} node declares {count} children"
            )));
        }
        let mut size = [0u8; 8];
        size.copy_from_slice(&bytes[8..16]);
        Ok(Self {
            kind,
            has_successor,
            count,
            size: u64::from_le_bytes(size),
        })
    }
}

fn write_header_tail(out: &mut Vec<u8>, has_successor: bool, count: u16, size: u64) {
    out.push(if has_successor { FLAG_HAS_SUCCESSOR } else { 0 });
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| Error::CorruptNode(format!("truncated at offset {}", self.pos)))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16> {
        let raw = self.take(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn key(&mut self) -> Result<NodeKey> {
        let raw = self.take(KEY_LEN)?;
        crate::hash::ContentHash::from_slice(raw).map(NodeKey::from_hash)
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        out
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

/// Directory entry names must be non-empty, not `.` or `..`, and free of `/` and NUL.
pub fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.len() > MAX_NAME_LEN
        || name.contains('/')
        || name.contains('\0')
    {
        return Err(Error::CorruptNode(format!(
            "invalid directory entry name: {name:?}"
        )));
    }
    Ok(())
}

fn validate_content_type(content_type: &str) -> Result<()> {
    if content_type.len() > MAX_CONTENT_TYPE_LEN
        || !content_type.bytes().all(|b| b.is_ascii_graphic() || b == b' ')
    {
        return Err(Error::CorruptNode(format!(
            "invalid content type: {content_type:?}"
        )));
    }
    Ok(())
}
