//! Journaled group tree: groups, datasets and attributes.
//!
//! Every mutation is appended as one record and the tree is rebuilt by
//! replaying them in file order:
//!
//! - `CreateGroup` and `SetAttributes` payloads are CBOR tree operations
//! - `CreateDataset` payloads are `| meta_len u32 | CBOR operation | words |`
//!
//! Dataset contents are not kept in memory; only their file offset is.
//! Children enumerate in creation order.

use super::attr::Attributes;
use super::{get_words, put_words, Record, RecordFile, RecordKind, RECORD_PAYLOAD_OFFSET};
use crate::error::{DatasetError, DatasetResult};
use crate::types::{RawWord, WORD_BYTES};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

const META_LEN_SIZE: usize = 4;

/// Handle to a group or dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// The root group.
    pub const ROOT: Self = Self(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Serialize, Deserialize)]
enum TreeOp {
    CreateGroup {
        id: u32,
        parent: u32,
        name: String,
    },
    SetAttributes {
        node: u32,
        attrs: Attributes,
    },
    CreateDataset {
        id: u32,
        parent: u32,
        name: String,
        attrs: Attributes,
        words: u64,
    },
}

impl TreeOp {
    fn encode(&self) -> DatasetResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|err| DatasetError::metadata(format!("tree op: {err}")))?;
        Ok(buf)
    }

    fn decode(bytes: &[u8]) -> DatasetResult<Self> {
        ciborium::from_reader(bytes)
            .map_err(|err| DatasetError::metadata(format!("tree op: {err}")))
    }
}

#[derive(Debug)]
enum NodeKind {
    Group { children: Vec<NodeId> },
    Dataset { offset: u64, words: usize },
}

#[derive(Debug)]
struct Node {
    name: String,
    attrs: Attributes,
    kind: NodeKind,
}

/// In-memory index of a file's group tree.
#[derive(Debug)]
pub struct GroupTree {
    nodes: Vec<Node>,
    by_name: HashMap<(NodeId, String), NodeId>,
}

impl Default for GroupTree {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupTree {
    /// Creates a tree holding only the root group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                name: String::new(),
                attrs: Attributes::new(),
                kind: NodeKind::Group {
                    children: Vec::new(),
                },
            }],
            by_name: HashMap::new(),
        }
    }

    /// Rebuilds the tree from the journal in `file`.
    ///
    /// # Errors
    ///
    /// Fails if a record does not verify or an operation is inconsistent
    /// with the tree built so far.
    pub fn load(file: &RecordFile) -> DatasetResult<Self> {
        let mut tree = Self::new();
        file.scan(|offset, record| tree.replay(offset, &record))?;
        trace!(nodes = tree.nodes.len(), "loaded group tree");
        Ok(tree)
    }

    fn replay(&mut self, offset: u64, record: &Record) -> DatasetResult<()> {
        match record.kind {
            RecordKind::CreateGroup | RecordKind::SetAttributes => {
                let op = TreeOp::decode(&record.payload)?;
                if matches!(op, TreeOp::CreateDataset { .. }) {
                    return Err(DatasetError::invalid_format(format!(
                        "dataset operation outside a dataset record at offset {offset}"
                    )));
                }
                self.apply(op, offset)
            }
            RecordKind::CreateDataset => {
                if record.payload.len() < META_LEN_SIZE {
                    return Err(DatasetError::invalid_format(format!(
                        "dataset record at offset {offset} is too short"
                    )));
                }
                let meta_len = (&record.payload[..META_LEN_SIZE]).get_u32_le() as usize;
                let meta_end = META_LEN_SIZE + meta_len;
                if meta_end > record.payload.len() {
                    return Err(DatasetError::invalid_format(format!(
                        "dataset metadata at offset {offset} overruns its record"
                    )));
                }
                let op = TreeOp::decode(&record.payload[META_LEN_SIZE..meta_end])?;
                let data_bytes = record.payload.len() - meta_end;
                let consistent = match &op {
                    TreeOp::CreateDataset { words, .. } => {
                        data_bytes % WORD_BYTES == 0 && *words == (data_bytes / WORD_BYTES) as u64
                    }
                    _ => false,
                };
                if !consistent {
                    return Err(DatasetError::invalid_format(format!(
                        "dataset record at offset {offset} does not match its metadata"
                    )));
                }
                self.apply(op, offset + RECORD_PAYLOAD_OFFSET + meta_end as u64)
            }
            RecordKind::TableSchema | RecordKind::TableChunk => Ok(()),
        }
    }

    fn apply(&mut self, op: TreeOp, data_offset: u64) -> DatasetResult<()> {
        match op {
            TreeOp::CreateGroup { id, parent, name } => {
                self.insert_node(
                    id,
                    NodeId(parent),
                    name,
                    Attributes::new(),
                    NodeKind::Group {
                        children: Vec::new(),
                    },
                )?;
            }
            TreeOp::SetAttributes { node, attrs } => {
                let target = self.nodes.get_mut(node as usize).ok_or_else(|| {
                    DatasetError::invalid_format(format!("attributes for unknown node {node}"))
                })?;
                target.attrs.extend(attrs);
            }
            TreeOp::CreateDataset {
                id,
                parent,
                name,
                attrs,
                words,
            } => {
                self.insert_node(
                    id,
                    NodeId(parent),
                    name,
                    attrs,
                    NodeKind::Dataset {
                        offset: data_offset,
                        words: words as usize,
                    },
                )?;
            }
        }
        Ok(())
    }

    fn check_new_child(&self, parent: NodeId, name: &str) -> DatasetResult<()> {
        if !self.is_group(parent) {
            return Err(DatasetError::invalid_format(format!(
                "parent {} of '{name}' is not a group",
                parent.0
            )));
        }
        if self.child(parent, name).is_some() {
            return Err(DatasetError::invalid_format(format!(
                "duplicate child '{name}' in node {}",
                parent.0
            )));
        }
        Ok(())
    }

    fn insert_node(
        &mut self,
        id: u32,
        parent: NodeId,
        name: String,
        attrs: Attributes,
        kind: NodeKind,
    ) -> DatasetResult<NodeId> {
        if id as usize != self.nodes.len() {
            return Err(DatasetError::invalid_format(format!(
                "node id {id} out of sequence, expected {}",
                self.nodes.len()
            )));
        }
        self.check_new_child(parent, &name)?;

        let node_id = NodeId(id);
        if let Some(Node {
            kind: NodeKind::Group { children },
            ..
        }) = self.nodes.get_mut(parent.index())
        {
            children.push(node_id);
        }
        self.by_name.insert((parent, name.clone()), node_id);
        self.nodes.push(Node { name, attrs, kind });
        Ok(node_id)
    }

    fn next_id(&self) -> DatasetResult<u32> {
        u32::try_from(self.nodes.len())
            .map_err(|_| DatasetError::invalid_format("group tree node limit reached"))
    }

    /// Creates a group.
    ///
    /// # Errors
    ///
    /// Fails if `parent` is not a group, the name is taken, or the record
    /// cannot be written.
    pub fn create_group(
        &mut self,
        file: &mut RecordFile,
        parent: NodeId,
        name: &str,
    ) -> DatasetResult<NodeId> {
        self.check_new_child(parent, name)?;
        let id = self.next_id()?;
        let op = TreeOp::CreateGroup {
            id,
            parent: parent.0,
            name: name.to_string(),
        };
        file.append(&Record::new(RecordKind::CreateGroup, op.encode()?))?;
        trace!(name, parent = parent.0, "created group");
        self.insert_node(
            id,
            parent,
            name.to_string(),
            Attributes::new(),
            NodeKind::Group {
                children: Vec::new(),
            },
        )
    }

    /// Returns the named child group of `parent`, creating it if absent.
    ///
    /// # Errors
    ///
    /// Fails if a dataset already has that name or the group cannot be
    /// created.
    pub fn ensure_group(
        &mut self,
        file: &mut RecordFile,
        parent: NodeId,
        name: &str,
    ) -> DatasetResult<NodeId> {
        match self.child(parent, name) {
            Some(existing) if self.is_group(existing) => Ok(existing),
            Some(_) => Err(DatasetError::invalid_format(format!(
                "'{name}' exists and is not a group"
            ))),
            None => self.create_group(file, parent, name),
        }
    }

    /// Sets attributes on a node; existing keys are overwritten.
    ///
    /// # Errors
    ///
    /// Fails if the node does not exist or the record cannot be written.
    pub fn set_attrs(
        &mut self,
        file: &mut RecordFile,
        node: NodeId,
        attrs: Attributes,
    ) -> DatasetResult<()> {
        let target = self
            .nodes
            .get_mut(node.index())
            .ok_or_else(|| DatasetError::invalid_format(format!("no node {}", node.0)))?;
        let op = TreeOp::SetAttributes {
            node: node.0,
            attrs: attrs.clone(),
        };
        file.append(&Record::new(RecordKind::SetAttributes, op.encode()?))?;
        target.attrs.extend(attrs);
        Ok(())
    }

    /// Creates a dataset holding `words`.
    ///
    /// # Errors
    ///
    /// Fails if `parent` is not a group, the name is taken, or the record
    /// cannot be written.
    pub fn create_dataset(
        &mut self,
        file: &mut RecordFile,
        parent: NodeId,
        name: &str,
        attrs: Attributes,
        words: &[RawWord],
    ) -> DatasetResult<NodeId> {
        self.check_new_child(parent, name)?;
        let id = self.next_id()?;
        let op = TreeOp::CreateDataset {
            id,
            parent: parent.0,
            name: name.to_string(),
            attrs: attrs.clone(),
            words: words.len() as u64,
        };
        let meta = op.encode()?;
        let meta_len = u32::try_from(meta.len())
            .map_err(|_| DatasetError::metadata("dataset metadata too large"))?;

        let mut payload =
            Vec::with_capacity(META_LEN_SIZE + meta.len() + words.len() * WORD_BYTES);
        payload.put_u32_le(meta_len);
        payload.extend_from_slice(&meta);
        put_words(&mut payload, words);

        let record_offset = file.append(&Record::new(RecordKind::CreateDataset, payload))?;
        trace!(name, parent = parent.0, words = words.len(), "created dataset");

        self.insert_node(
            id,
            parent,
            name.to_string(),
            attrs,
            NodeKind::Dataset {
                offset: record_offset + RECORD_PAYLOAD_OFFSET + (META_LEN_SIZE + meta.len()) as u64,
                words: words.len(),
            },
        )
    }

    /// Reads a dataset's words.
    ///
    /// # Errors
    ///
    /// Fails if `node` is not a dataset or its contents cannot be read.
    pub fn read_dataset(&self, file: &RecordFile, node: NodeId) -> DatasetResult<Vec<RawWord>> {
        match self.nodes.get(node.index()).map(|n| &n.kind) {
            Some(NodeKind::Dataset { offset, words }) => {
                let bytes = file.read_bytes(*offset, words * WORD_BYTES)?;
                get_words(&bytes)
            }
            _ => Err(DatasetError::invalid_format(format!(
                "node {} is not a dataset",
                node.0
            ))),
        }
    }

    /// The root group.
    #[must_use]
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Looks up a child by name.
    #[must_use]
    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.by_name.get(&(parent, name.to_string())).copied()
    }

    /// Children of a group in creation order; empty for datasets.
    #[must_use]
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        match self.nodes.get(node.index()).map(|n| &n.kind) {
            Some(NodeKind::Group { children }) => children,
            _ => &[],
        }
    }

    /// Whether `node` is a group.
    #[must_use]
    pub fn is_group(&self, node: NodeId) -> bool {
        matches!(
            self.nodes.get(node.index()).map(|n| &n.kind),
            Some(NodeKind::Group { .. })
        )
    }

    /// Node name; empty for the root.
    #[must_use]
    pub fn name(&self, node: NodeId) -> &str {
        self.nodes.get(node.index()).map_or("", |n| n.name.as_str())
    }

    /// Node attributes.
    #[must_use]
    pub fn attrs(&self, node: NodeId) -> Option<&Attributes> {
        self.nodes.get(node.index()).map(|n| &n.attrs)
    }

    /// Word count of a dataset.
    #[must_use]
    pub fn dataset_len(&self, node: NodeId) -> Option<usize> {
        match self.nodes.get(node.index()).map(|n| &n.kind) {
            Some(NodeKind::Dataset { words, .. }) => Some(*words),
            _ => None,
        }
    }

    /// Total number of nodes, root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
