//! Grouped layout: one group per event, one subgroup per type label.
//!
//! ```text
//! /<sequence id>                 event group, header attributes
//!     /<label>                   type group
//!         TimeSlice0             dataset: fragment body, header attributes
//!         /Container0            container group, container attributes
//!             TimeSlice0         nested fragment datasets
//!     TimeSlice0                 event-level fragment datasets
//! ```
//!
//! Multi-block containers are written as container groups. Single-block
//! containers are unwrapped into the type group, so they read back as
//! their nested fragment.

use super::naming::{next_container_name, next_dataset_name};
use super::{wrong_mode, EventFragments, FragmentDataset};
use crate::config::{DatasetConfig, DatasetMode, LayoutKind};
use crate::error::{DatasetError, DatasetResult};
use crate::event::RawEventHeader;
use crate::format::attr::{require_bool, require_narrow, require_u64};
use crate::format::tree::{GroupTree, NodeId};
use crate::format::{AttrValue, Attributes, RecordFile};
use crate::fragment::{
    ContainerFragment, ContainerFragmentLoader, ContainerMetadata, Fragment, FragmentHeader,
    CONTAINER_VERSION, HEADER_WORDS,
};
use crate::names::{make_resolver, TypeNameResolver};
use crate::types::{FragmentId, FragmentType, SequenceId};
use std::collections::BTreeSet;
use tracing::{debug, trace, warn};

fn put(attrs: &mut Attributes, key: &str, value: impl Into<AttrValue>) {
    attrs.insert(key.to_string(), value.into());
}

fn identity_attrs(fragment: &Fragment) -> Attributes {
    let mut attrs = Attributes::new();
    put(&mut attrs, "version", fragment.version());
    put(&mut attrs, "type", fragment.fragment_type().as_u8());
    put(&mut attrs, "sequence_id", fragment.sequence_id().as_u64());
    put(&mut attrs, "fragment_id", fragment.fragment_id().as_u16());
    put(&mut attrs, "timestamp", fragment.timestamp());
    put(&mut attrs, "valid", fragment.is_valid());
    put(&mut attrs, "complete", fragment.is_complete());
    attrs
}

fn fragment_attrs(fragment: &Fragment) -> Attributes {
    let mut attrs = identity_attrs(fragment);
    put(&mut attrs, "word_count", fragment.word_count() as u64);
    put(&mut attrs, "fragment_data_size", fragment.body().len() as u64);
    put(&mut attrs, "metadata_word_count", fragment.metadata().len() as u64);
    attrs
}

fn container_attrs(fragment: &Fragment, metadata: &ContainerMetadata) -> Attributes {
    let mut attrs = identity_attrs(fragment);
    put(&mut attrs, "container_block_count", metadata.block_count);
    put(&mut attrs, "container_fragment_type", metadata.nested_type.as_u8());
    put(&mut attrs, "container_version", metadata.version);
    put(&mut attrs, "container_missing_data", metadata.missing_data);
    attrs
}

fn identity_header(
    attrs: &Attributes,
    word_count: u32,
    metadata_word_count: u8,
) -> DatasetResult<FragmentHeader> {
    Ok(FragmentHeader {
        word_count,
        version: require_narrow(attrs, "version")?,
        fragment_type: FragmentType::new(require_narrow(attrs, "type")?),
        metadata_word_count,
        sequence_id: SequenceId::new(require_u64(attrs, "sequence_id")?),
        fragment_id: FragmentId::new(require_narrow(attrs, "fragment_id")?),
        timestamp: require_u64(attrs, "timestamp")?,
        valid: require_bool(attrs, "valid")?,
        complete: require_bool(attrs, "complete")?,
    })
}

/// Group-per-event dataset.
#[derive(Debug)]
pub struct GroupedDataset {
    file: RecordFile,
    tree: GroupTree,
    mode: DatasetMode,
    config: DatasetConfig,
    resolver: Box<dyn TypeNameResolver>,
    event_cursor: usize,
}

impl GroupedDataset {
    /// Starts writing into a freshly created file.
    #[must_use]
    pub fn create(file: RecordFile, config: &DatasetConfig) -> Self {
        Self::with_tree(file, GroupTree::new(), DatasetMode::Write, config)
    }

    /// Loads the group tree of an existing file.
    ///
    /// # Errors
    ///
    /// Fails if the tree journal does not replay.
    pub fn open(file: RecordFile, config: &DatasetConfig) -> DatasetResult<Self> {
        let tree = GroupTree::load(&file)?;
        debug!(
            events = tree.children(tree.root()).len(),
            nodes = tree.node_count(),
            "opened grouped dataset"
        );
        Ok(Self::with_tree(file, tree, DatasetMode::Read, config))
    }

    fn with_tree(
        file: RecordFile,
        tree: GroupTree,
        mode: DatasetMode,
        config: &DatasetConfig,
    ) -> Self {
        let resolver = make_resolver(
            config.name_resolver,
            &config.unidentified_instance_name,
            &config.fragment_type_map,
        );
        Self {
            file,
            tree,
            mode,
            config: config.clone(),
            resolver,
            event_cursor: 0,
        }
    }

    /// Every label a fragment can be routed to.
    #[must_use]
    pub fn labels(&self) -> BTreeSet<String> {
        self.resolver.all_labels()
    }

    /// Number of event groups in the file.
    #[must_use]
    pub fn event_group_count(&self) -> usize {
        self.tree.children(self.tree.root()).len()
    }

    fn require_mode(&self, operation: &'static str, mode: DatasetMode) -> DatasetResult<()> {
        if self.mode == mode {
            Ok(())
        } else {
            Err(wrong_mode(operation, self.mode))
        }
    }

    fn event_group(&mut self, sequence_id: SequenceId) -> DatasetResult<NodeId> {
        let root = self.tree.root();
        self.tree
            .ensure_group(&mut self.file, root, &sequence_id.to_string())
    }

    fn write_fragment(&mut self, parent: NodeId, fragment: &Fragment) -> DatasetResult<NodeId> {
        let tree = &self.tree;
        let name = next_dataset_name(self.config.base_name_for(fragment.fragment_type()), |n| {
            tree.child(parent, n).is_some()
        });
        let node = self.tree.create_dataset(
            &mut self.file,
            parent,
            &name,
            fragment_attrs(fragment),
            fragment.body(),
        )?;
        trace!(
            name = %name,
            sequence_id = fragment.sequence_id().as_u64(),
            fragment_id = fragment.fragment_id().as_u16(),
            "wrote fragment dataset"
        );
        Ok(node)
    }

    fn write_labelled(&mut self, event: NodeId, fragment: &Fragment) -> DatasetResult<()> {
        let label = self.resolver.resolve(fragment).label;
        let type_group = self.tree.ensure_group(&mut self.file, event, &label)?;
        self.write_fragment(type_group, fragment)?;
        Ok(())
    }

    fn write_container(&mut self, event: NodeId, fragment: &Fragment) -> DatasetResult<()> {
        let container = ContainerFragment::new(fragment)?;
        if container.block_count() == 0 {
            return self.write_labelled(event, fragment);
        }

        let nested = container.fragment_type();
        if let Some(types) = &self.config.fragment_types_of_interest {
            if !types.contains(&nested) {
                debug!(
                    sequence_id = fragment.sequence_id().as_u64(),
                    nested_type = nested.as_u8(),
                    "skipping container of uninteresting type"
                );
                return Ok(());
            }
        }

        let blocks = container.fragments()?;
        let label = self.resolver.resolve(&blocks[0]).label;
        let type_group = self.tree.ensure_group(&mut self.file, event, &label)?;

        let wrap = self.config.always_container_types.contains(&nested)
            || (!self.config.unwrap_container_types.contains(&nested) && blocks.len() > 1);
        let parent = if wrap {
            let tree = &self.tree;
            let name = next_container_name(|n| tree.child(type_group, n).is_some());
            let group = self.tree.create_group(&mut self.file, type_group, &name)?;
            self.tree.set_attrs(
                &mut self.file,
                group,
                container_attrs(fragment, &container.metadata()),
            )?;
            debug!(label = %label, name = %name, blocks = blocks.len(), "wrote container group");
            group
        } else {
            type_group
        };

        for block in &blocks {
            self.write_fragment(parent, block)?;
        }
        Ok(())
    }

    fn read_fragment(&self, node: NodeId) -> DatasetResult<Fragment> {
        let attrs = self.node_attrs(node)?;
        let body = self.tree.read_dataset(&self.file, node)?;
        let stored = require_u64(attrs, "fragment_data_size")?;
        if stored != body.len() as u64 {
            return Err(DatasetError::invalid_format(format!(
                "dataset '{}' holds {} words but records {stored}",
                self.tree.name(node),
                body.len()
            )));
        }
        let header = identity_header(
            attrs,
            require_narrow(attrs, "word_count")?,
            require_narrow(attrs, "metadata_word_count")?,
        )?;
        Fragment::from_parts(header, body)
    }

    fn read_container(&self, group: NodeId) -> DatasetResult<Fragment> {
        let attrs = self.node_attrs(group)?;
        let version: u8 = require_narrow(attrs, "container_version")?;
        if version != CONTAINER_VERSION {
            return Err(DatasetError::malformed_container(format!(
                "unsupported container version {version}"
            )));
        }

        let header = identity_header(attrs, HEADER_WORDS as u32, 0)?;
        let mut loader = ContainerFragmentLoader::from_header(&header);
        loader.set_fragment_type(FragmentType::new(require_narrow(
            attrs,
            "container_fragment_type",
        )?))?;
        loader.set_missing_data(require_bool(attrs, "container_missing_data")?);

        for &member in self.tree.children(group) {
            if self.tree.is_group(member) {
                return Err(DatasetError::malformed_container(format!(
                    "unexpected group '{}' inside container '{}'",
                    self.tree.name(member),
                    self.tree.name(group)
                )));
            }
            loader.add_fragment(&self.read_fragment(member)?)?;
        }

        let expected: u32 = require_narrow(attrs, "container_block_count")?;
        if loader.block_count() != expected {
            return Err(DatasetError::malformed_container(format!(
                "container '{}' declares {expected} blocks but holds {}",
                self.tree.name(group),
                loader.block_count()
            )));
        }
        loader.finish()
    }

    fn read_event_group(&self, event: NodeId) -> DatasetResult<EventFragments> {
        let mut fragments = EventFragments::new();
        for &child in self.tree.children(event) {
            if !self.tree.is_group(child) {
                let fragment = self.read_fragment(child)?;
                fragments.entry(fragment.fragment_type()).or_default().push(fragment);
                continue;
            }
            for &member in self.tree.children(child) {
                let fragment = if self.tree.is_group(member) {
                    self.read_container(member)?
                } else {
                    self.read_fragment(member)?
                };
                fragments.entry(fragment.fragment_type()).or_default().push(fragment);
            }
        }
        Ok(fragments)
    }

    fn node_attrs(&self, node: NodeId) -> DatasetResult<&Attributes> {
        self.tree.attrs(node).ok_or_else(|| {
            DatasetError::invalid_format(format!("no node '{}'", self.tree.name(node)))
        })
    }

    /// Header stored on an event group; groups without `run_id` have none.
    fn event_header(&self, event: NodeId) -> DatasetResult<Option<RawEventHeader>> {
        let attrs = self.node_attrs(event)?;
        if !attrs.contains_key("run_id") {
            return Ok(None);
        }

        Ok(Some(RawEventHeader {
            run_id: require_narrow(attrs, "run_id")?,
            subrun_id: require_narrow(attrs, "subrun_id")?,
            event_id: require_narrow(attrs, "event_id")?,
            sequence_id: SequenceId::new(require_u64(attrs, "sequence_id")?),
            timestamp: attrs
                .get("timestamp")
                .and_then(AttrValue::as_u64)
                .and_then(RawEventHeader::decode_timestamp),
            is_complete: require_bool(attrs, "is_complete")?,
        }))
    }

    #[cfg(test)]
    pub(crate) fn file(&self) -> &RecordFile {
        &self.file
    }
}

impl FragmentDataset for GroupedDataset {
    fn mode(&self) -> DatasetMode {
        self.mode
    }

    fn layout(&self) -> LayoutKind {
        LayoutKind::Grouped
    }

    fn insert_one(&mut self, fragment: &Fragment) -> DatasetResult<()> {
        self.require_mode("insert_one", DatasetMode::Write)?;
        let event = self.event_group(fragment.sequence_id())?;

        if self
            .config
            .event_level_types
            .contains(&fragment.fragment_type())
        {
            self.write_fragment(event, fragment)?;
            return Ok(());
        }
        if fragment.is_container() {
            return self.write_container(event, fragment);
        }
        self.write_labelled(event, fragment)
    }

    fn insert_header(&mut self, header: &RawEventHeader) -> DatasetResult<()> {
        self.require_mode("insert_header", DatasetMode::Write)?;
        let event = self.event_group(header.sequence_id)?;

        let mut attrs = Attributes::new();
        put(&mut attrs, "run_id", header.run_id);
        put(&mut attrs, "subrun_id", header.subrun_id);
        put(&mut attrs, "event_id", header.event_id);
        put(&mut attrs, "sequence_id", header.sequence_id.as_u64());
        put(&mut attrs, "timestamp", header.encoded_timestamp());
        put(&mut attrs, "is_complete", header.is_complete);
        self.tree.set_attrs(&mut self.file, event, attrs)?;
        trace!(sequence_id = header.sequence_id.as_u64(), "wrote event header");
        Ok(())
    }

    fn read_next_event(&mut self) -> DatasetResult<EventFragments> {
        self.require_mode("read_next_event", DatasetMode::Read)?;
        let root = self.tree.root();

        while let Some(&event) = self.tree.children(root).get(self.event_cursor) {
            let fragments = self.read_event_group(event)?;
            self.event_cursor += 1;
            if fragments.is_empty() {
                debug!(event = %self.tree.name(event), "skipping event group without fragments");
                continue;
            }
            debug!(event = %self.tree.name(event), types = fragments.len(), "read event");
            return Ok(fragments);
        }
        Ok(EventFragments::new())
    }

    fn get_event_header(
        &mut self,
        sequence_id: SequenceId,
    ) -> DatasetResult<Option<RawEventHeader>> {
        self.require_mode("get_event_header", DatasetMode::Read)?;
        match self.tree.child(self.tree.root(), &sequence_id.to_string()) {
            Some(event) => self.event_header(event),
            None => Ok(None),
        }
    }

    fn event_headers(&mut self) -> DatasetResult<Vec<RawEventHeader>> {
        self.require_mode("event_headers", DatasetMode::Read)?;
        let mut headers = Vec::new();
        for &event in self.tree.children(self.tree.root()) {
            headers.extend(self.event_header(event)?);
        }
        Ok(headers)
    }

    fn flush(&mut self) -> DatasetResult<()> {
        if self.mode == DatasetMode::Write {
            self.file.flush()?;
        }
        Ok(())
    }
}

impl Drop for GroupedDataset {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!(error = %err, "failed to flush grouped dataset on close");
        }
    }
}
