//! Container fragments: fragments whose payload is a run of nested fragments.

use super::{Fragment, FragmentHeader, HEADER_WORDS};
use crate::error::{DatasetError, DatasetResult};
use crate::types::{FragmentId, FragmentType, RawWord, SequenceId};
use std::ops::Range;

/// Current container metadata layout version.
pub const CONTAINER_VERSION: u8 = 1;

const MISSING_DATA_BIT: u64 = 1 << 40;

/// Container metadata, stored as the container's single metadata word.
///
/// ```text
/// block_count u32 | nested type u8 << 32 | missing_data bit 40 | version u8 << 48
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerMetadata {
    /// Number of nested fragments.
    pub block_count: u32,
    /// Type of every nested fragment; [`FragmentType::INVALID`] while empty.
    pub nested_type: FragmentType,
    /// Producer knows some nested fragments are absent.
    pub missing_data: bool,
    /// Metadata layout version.
    pub version: u8,
}

impl ContainerMetadata {
    /// Encodes the metadata word.
    #[must_use]
    pub fn encode(&self) -> RawWord {
        let mut word = u64::from(self.block_count)
            | u64::from(self.nested_type.as_u8()) << 32
            | u64::from(self.version) << 48;
        if self.missing_data {
            word |= MISSING_DATA_BIT;
        }
        word
    }

    /// Decodes a metadata word.
    #[must_use]
    pub fn decode(word: RawWord) -> Self {
        Self {
            block_count: (word & 0xFFFF_FFFF) as u32,
            nested_type: FragmentType::new((word >> 32) as u8),
            missing_data: word & MISSING_DATA_BIT != 0,
            version: (word >> 48) as u8,
        }
    }

    /// Reads the metadata of a container fragment without walking its
    /// payload.
    ///
    /// # Errors
    ///
    /// Fails if `fragment` is not a container or carries no metadata word.
    pub fn of(fragment: &Fragment) -> DatasetResult<Self> {
        if !fragment.is_container() {
            return Err(DatasetError::malformed_container(format!(
                "fragment of type {} is not a container",
                fragment.fragment_type()
            )));
        }
        fragment
            .metadata()
            .first()
            .map(|word| Self::decode(*word))
            .ok_or_else(|| DatasetError::malformed_container("container has no metadata word"))
    }
}

/// A validated view over a container fragment.
///
/// Construction walks the payload by each nested fragment's declared word
/// count and requires exactly `block_count` fragments with no words left.
#[derive(Debug, Clone)]
pub struct ContainerFragment<'a> {
    fragment: &'a Fragment,
    metadata: ContainerMetadata,
    blocks: Vec<Range<usize>>,
}

impl<'a> ContainerFragment<'a> {
    /// Validates `fragment` as a container.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::MalformedContainer`] if the metadata is
    /// missing or of an unknown version, a nested fragment overruns the
    /// payload or has a type other than the declared one, or words remain
    /// after the last declared block.
    pub fn new(fragment: &'a Fragment) -> DatasetResult<Self> {
        let metadata = ContainerMetadata::of(fragment)?;
        if metadata.version != CONTAINER_VERSION {
            return Err(DatasetError::malformed_container(format!(
                "unsupported container version {}",
                metadata.version
            )));
        }

        let payload = fragment.payload();
        let mut blocks = Vec::with_capacity((metadata.block_count as usize).min(payload.len()));
        let mut offset = 0;

        for index in 0..metadata.block_count {
            let remaining = payload.len() - offset;
            if remaining < HEADER_WORDS {
                return Err(DatasetError::malformed_container(format!(
                    "block {index} of {} starts with only {remaining} words left",
                    metadata.block_count
                )));
            }
            let header = FragmentHeader::decode(&payload[offset..]).map_err(|err| {
                DatasetError::malformed_container(format!("block {index}: {err}"))
            })?;
            let words = header.word_count as usize;
            if words > remaining {
                return Err(DatasetError::malformed_container(format!(
                    "block {index} declares {words} words but {remaining} remain"
                )));
            }
            if header.fragment_type != metadata.nested_type {
                return Err(DatasetError::malformed_container(format!(
                    "block {index} has type {} in a container of type {}",
                    header.fragment_type, metadata.nested_type
                )));
            }
            blocks.push(offset..offset + words);
            offset += words;
        }

        if offset != payload.len() {
            return Err(DatasetError::malformed_container(format!(
                "{} words left after {} blocks",
                payload.len() - offset,
                metadata.block_count
            )));
        }

        Ok(Self {
            fragment,
            metadata,
            blocks,
        })
    }

    /// Returns the underlying fragment.
    #[must_use]
    pub fn fragment(&self) -> &'a Fragment {
        self.fragment
    }

    /// Returns the container metadata.
    #[must_use]
    pub fn metadata(&self) -> ContainerMetadata {
        self.metadata
    }

    /// Number of nested fragments.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Type of the nested fragments.
    #[must_use]
    pub fn fragment_type(&self) -> FragmentType {
        self.metadata.nested_type
    }

    /// Missing-data flag.
    #[must_use]
    pub fn missing_data(&self) -> bool {
        self.metadata.missing_data
    }

    /// Word stream of nested fragment `index`.
    #[must_use]
    pub fn block(&self, index: usize) -> Option<&'a [RawWord]> {
        let payload = self.fragment.payload();
        self.blocks.get(index).map(|range| &payload[range.clone()])
    }

    /// Decodes nested fragment `index`.
    ///
    /// # Errors
    ///
    /// Fails if `index` is out of range or the block does not decode.
    pub fn at(&self, index: usize) -> DatasetResult<Fragment> {
        let words = self.block(index).ok_or_else(|| {
            DatasetError::malformed_container(format!(
                "block {index} requested from a container of {}",
                self.blocks.len()
            ))
        })?;
        Fragment::from_words(words)
    }

    /// Decodes every nested fragment in order.
    ///
    /// # Errors
    ///
    /// Fails if any block does not decode.
    pub fn fragments(&self) -> DatasetResult<Vec<Fragment>> {
        (0..self.blocks.len()).map(|index| self.at(index)).collect()
    }
}

/// Builds a container fragment by appending nested fragments.
#[derive(Debug, Clone)]
pub struct ContainerFragmentLoader {
    sequence_id: SequenceId,
    fragment_id: FragmentId,
    timestamp: u64,
    version: u16,
    valid: bool,
    complete: bool,
    nested_type: FragmentType,
    missing_data: bool,
    block_count: u32,
    payload: Vec<RawWord>,
}

impl ContainerFragmentLoader {
    /// Starts an empty container.
    #[must_use]
    pub fn new(sequence_id: SequenceId, fragment_id: FragmentId, timestamp: u64) -> Self {
        Self {
            sequence_id,
            fragment_id,
            timestamp,
            version: 0,
            valid: true,
            complete: true,
            nested_type: FragmentType::INVALID,
            missing_data: false,
            block_count: 0,
            payload: Vec::new(),
        }
    }

    /// Starts an empty container carrying the identity, version and flags
    /// of `header`.
    #[must_use]
    pub fn from_header(header: &FragmentHeader) -> Self {
        let mut loader = Self::new(header.sequence_id, header.fragment_id, header.timestamp);
        loader.version = header.version;
        loader.valid = header.valid;
        loader.complete = header.complete;
        loader
    }

    /// Declares the nested type.
    ///
    /// # Errors
    ///
    /// Fails if blocks of a different type were already added.
    pub fn set_fragment_type(&mut self, nested_type: FragmentType) -> DatasetResult<()> {
        if self.block_count > 0 && nested_type != self.nested_type {
            return Err(DatasetError::malformed_container(format!(
                "cannot change nested type from {} to {} after {} blocks",
                self.nested_type, nested_type, self.block_count
            )));
        }
        self.nested_type = nested_type;
        Ok(())
    }

    /// Sets the missing-data flag.
    pub fn set_missing_data(&mut self, missing_data: bool) {
        self.missing_data = missing_data;
    }

    /// Appends a nested fragment.
    ///
    /// The first block fixes the nested type if none was declared.
    ///
    /// # Errors
    ///
    /// Fails if the fragment's type differs from the nested type or the
    /// fragment cannot be encoded.
    pub fn add_fragment(&mut self, fragment: &Fragment) -> DatasetResult<()> {
        if self.nested_type == FragmentType::INVALID && self.block_count == 0 {
            self.nested_type = fragment.fragment_type();
        } else if fragment.fragment_type() != self.nested_type {
            return Err(DatasetError::malformed_container(format!(
                "block of type {} added to a container of type {}",
                fragment.fragment_type(),
                self.nested_type
            )));
        }

        let block_count = self
            .block_count
            .checked_add(1)
            .ok_or_else(|| DatasetError::malformed_container("block count overflow"))?;
        self.payload.extend(fragment.to_words()?);
        self.block_count = block_count;
        Ok(())
    }

    /// Number of blocks added so far.
    #[must_use]
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Nested type, [`FragmentType::INVALID`] if not yet known.
    #[must_use]
    pub fn fragment_type(&self) -> FragmentType {
        self.nested_type
    }

    /// Produces the container fragment.
    ///
    /// # Errors
    ///
    /// Fails if the metadata word cannot be attached.
    pub fn finish(self) -> DatasetResult<Fragment> {
        let metadata = ContainerMetadata {
            block_count: self.block_count,
            nested_type: self.nested_type,
            missing_data: self.missing_data,
            version: CONTAINER_VERSION,
        };
        Fragment::new(
            FragmentType::CONTAINER,
            self.sequence_id,
            self.fragment_id,
            self.payload,
        )
        .with_timestamp(self.timestamp)
        .with_version(self.version)
        .with_flags(self.valid, self.complete)
        .with_metadata(vec![metadata.encode()])
    }
}
