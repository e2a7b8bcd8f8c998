//! Fragment model.
//!
//! A [`Fragment`] is one typed, variable-length record from a data source:
//! a four-word [`FragmentHeader`], optional metadata words and payload words.
//! A container fragment (type [`FragmentType::CONTAINER`]) carries nested
//! fragments in its payload; see [`ContainerFragment`] and
//! [`ContainerFragmentLoader`].

mod container;
mod header;

pub use container::{
    ContainerFragment, ContainerFragmentLoader, ContainerMetadata, CONTAINER_VERSION,
};
pub use header::{FragmentHeader, HEADER_WORDS};

use crate::error::{DatasetError, DatasetResult};
use crate::types::{FragmentId, FragmentKind, FragmentType, RawWord, SequenceId, WORD_BYTES};
use bytes::{Buf, BufMut};

/// Largest body (metadata + payload) a header word count can describe.
const MAX_BODY_WORDS: usize = u32::MAX as usize - HEADER_WORDS;

/// One typed binary record.
///
/// The body holds the metadata words followed by the payload words. The
/// header's word count and metadata word count are derived from the body,
/// so a `Fragment` is always self-consistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    fragment_type: FragmentType,
    sequence_id: SequenceId,
    fragment_id: FragmentId,
    timestamp: u64,
    version: u16,
    valid: bool,
    complete: bool,
    metadata_words: u8,
    body: Vec<RawWord>,
}

impl Fragment {
    /// Creates a fragment without metadata.
    ///
    /// The timestamp and version start at 0 and the fragment is marked
    /// valid and complete.
    #[must_use]
    pub fn new(
        fragment_type: FragmentType,
        sequence_id: SequenceId,
        fragment_id: FragmentId,
        payload: Vec<RawWord>,
    ) -> Self {
        Self {
            fragment_type,
            sequence_id,
            fragment_id,
            timestamp: 0,
            version: 0,
            valid: true,
            complete: true,
            metadata_words: 0,
            body: payload,
        }
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the payload format version.
    #[must_use]
    pub fn with_version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    /// Sets the valid and complete flags.
    #[must_use]
    pub fn with_flags(mut self, valid: bool, complete: bool) -> Self {
        self.valid = valid;
        self.complete = complete;
        self
    }

    /// Replaces the metadata words, keeping the payload.
    ///
    /// # Errors
    ///
    /// Fails if more than 255 metadata words are given.
    pub fn with_metadata(mut self, metadata: Vec<RawWord>) -> DatasetResult<Self> {
        let count = u8::try_from(metadata.len()).map_err(|_| {
            DatasetError::malformed_fragment(format!(
                "{} metadata words exceed the limit of 255",
                metadata.len()
            ))
        })?;
        let payload = self.body.split_off(usize::from(self.metadata_words));
        self.body = metadata;
        self.body.extend(payload);
        self.metadata_words = count;
        Ok(self)
    }

    /// Builds a fragment from decoded header fields and a body.
    ///
    /// # Errors
    ///
    /// Fails if the header's word count disagrees with the body length or
    /// the metadata word count exceeds it.
    pub fn from_parts(header: FragmentHeader, body: Vec<RawWord>) -> DatasetResult<Self> {
        if header.body_words() != body.len() {
            return Err(DatasetError::malformed_fragment(format!(
                "header declares {} words but {} are present",
                header.word_count,
                HEADER_WORDS + body.len()
            )));
        }
        if usize::from(header.metadata_word_count) > body.len() {
            return Err(DatasetError::malformed_fragment(format!(
                "{} metadata words declared in a body of {}",
                header.metadata_word_count,
                body.len()
            )));
        }

        Ok(Self {
            fragment_type: header.fragment_type,
            sequence_id: header.sequence_id,
            fragment_id: header.fragment_id,
            timestamp: header.timestamp,
            version: header.version,
            valid: header.valid,
            complete: header.complete,
            metadata_words: header.metadata_word_count,
            body,
        })
    }

    /// Decodes a complete fragment word stream.
    ///
    /// # Errors
    ///
    /// Fails if the header is invalid or its word count does not match
    /// `words.len()`.
    pub fn from_words(words: &[RawWord]) -> DatasetResult<Self> {
        let header = FragmentHeader::decode(words)?;
        if header.word_count as usize != words.len() {
            return Err(DatasetError::malformed_fragment(format!(
                "header declares {} words but the buffer holds {}",
                header.word_count,
                words.len()
            )));
        }
        Self::from_parts(header, words[HEADER_WORDS..].to_vec())
    }

    /// Encodes the fragment as header words followed by the body.
    ///
    /// # Errors
    ///
    /// Fails if the header cannot be encoded.
    pub fn to_words(&self) -> DatasetResult<Vec<RawWord>> {
        let header = self.checked_header()?.encode()?;
        let mut words = Vec::with_capacity(HEADER_WORDS + self.body.len());
        words.extend_from_slice(&header);
        words.extend_from_slice(&self.body);
        Ok(words)
    }

    /// Encodes the fragment as little-endian bytes.
    ///
    /// # Errors
    ///
    /// Fails if the header cannot be encoded.
    pub fn to_bytes(&self) -> DatasetResult<Vec<u8>> {
        let words = self.to_words()?;
        let mut buf = Vec::with_capacity(words.len() * WORD_BYTES);
        for word in words {
            buf.put_u64_le(word);
        }
        Ok(buf)
    }

    /// Decodes a fragment from little-endian bytes.
    ///
    /// # Errors
    ///
    /// Fails if the length is not a whole number of words or the word
    /// stream is not a valid fragment.
    pub fn from_bytes(mut bytes: &[u8]) -> DatasetResult<Self> {
        if bytes.len() % WORD_BYTES != 0 {
            return Err(DatasetError::malformed_fragment(format!(
                "{} bytes is not a whole number of words",
                bytes.len()
            )));
        }
        let mut words = Vec::with_capacity(bytes.len() / WORD_BYTES);
        while bytes.has_remaining() {
            words.push(bytes.get_u64_le());
        }
        Self::from_words(&words)
    }

    /// Returns the header fields, with counts derived from the body.
    ///
    /// The word count saturates for bodies too large to encode; use
    /// [`Fragment::to_words`] to detect that case.
    #[must_use]
    pub fn header(&self) -> FragmentHeader {
        FragmentHeader {
            word_count: u32::try_from(self.word_count()).unwrap_or(u32::MAX),
            version: self.version,
            fragment_type: self.fragment_type,
            metadata_word_count: self.metadata_words,
            sequence_id: self.sequence_id,
            fragment_id: self.fragment_id,
            timestamp: self.timestamp,
            valid: self.valid,
            complete: self.complete,
        }
    }

    fn checked_header(&self) -> DatasetResult<FragmentHeader> {
        if self.body.len() > MAX_BODY_WORDS {
            return Err(DatasetError::malformed_fragment(format!(
                "body of {} words cannot be described by a 32-bit word count",
                self.body.len()
            )));
        }
        Ok(self.header())
    }

    /// Returns the type code.
    #[must_use]
    pub const fn fragment_type(&self) -> FragmentType {
        self.fragment_type
    }

    /// Classifies the type code.
    #[must_use]
    pub const fn kind(&self) -> FragmentKind {
        self.fragment_type.kind()
    }

    /// Returns `true` for container fragments.
    #[must_use]
    pub fn is_container(&self) -> bool {
        self.fragment_type == FragmentType::CONTAINER
    }

    /// Returns the event key.
    #[must_use]
    pub const fn sequence_id(&self) -> SequenceId {
        self.sequence_id
    }

    /// Returns the data source id.
    #[must_use]
    pub const fn fragment_id(&self) -> FragmentId {
        self.fragment_id
    }

    /// Returns the timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Returns the payload format version.
    #[must_use]
    pub const fn version(&self) -> u16 {
        self.version
    }

    /// Returns the valid flag.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    /// Returns the complete flag.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Returns the metadata words.
    #[must_use]
    pub fn metadata(&self) -> &[RawWord] {
        &self.body[..usize::from(self.metadata_words)]
    }

    /// Returns the payload words.
    #[must_use]
    pub fn payload(&self) -> &[RawWord] {
        &self.body[usize::from(self.metadata_words)..]
    }

    /// Returns metadata and payload words together.
    #[must_use]
    pub fn body(&self) -> &[RawWord] {
        &self.body
    }

    /// Total words including the header.
    #[must_use]
    pub fn word_count(&self) -> usize {
        HEADER_WORDS + self.body.len()
    }

    /// Total encoded size in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.word_count() * WORD_BYTES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment() -> Fragment {
        Fragment::new(
            FragmentType::new(3),
            SequenceId::new(9),
            FragmentId::new(4),
            vec![10, 20, 30],
        )
        .with_timestamp(555)
        .with_version(2)
    }

    #[test]
    fn header_counts_follow_body() {
        let frag = fragment().with_metadata(vec![7, 8]).unwrap();
        let header = frag.header();
        assert_eq!(header.word_count, 9);
        assert_eq!(header.metadata_word_count, 2);
        assert_eq!(frag.metadata(), &[7, 8]);
        assert_eq!(frag.payload(), &[10, 20, 30]);
        assert_eq!(frag.body(), &[7, 8, 10, 20, 30]);
        assert_eq!(frag.size_bytes(), 72);
    }

    #[test]
    fn replacing_metadata_keeps_payload() {
        let frag = fragment()
            .with_metadata(vec![1, 2, 3])
            .unwrap()
            .with_metadata(vec![4])
            .unwrap();
        assert_eq!(frag.metadata(), &[4]);
        assert_eq!(frag.payload(), &[10, 20, 30]);
    }

    #[test]
    fn too_much_metadata_is_rejected() {
        let result = fragment().with_metadata(vec![0; 256]);
        assert!(matches!(result, Err(DatasetError::MalformedFragment { .. })));
    }

    #[test]
    fn word_stream_roundtrip() {
        let frag = fragment().with_metadata(vec![99]).unwrap();
        let words = frag.to_words().unwrap();
        assert_eq!(words.len(), 8);
        assert_eq!(Fragment::from_words(&words).unwrap(), frag);
    }

    #[test]
    fn byte_stream_roundtrip() {
        let frag = fragment().with_flags(false, true);
        let bytes = frag.to_bytes().unwrap();
        assert_eq!(bytes.len(), frag.size_bytes());
        assert_eq!(Fragment::from_bytes(&bytes).unwrap(), frag);
        assert!(Fragment::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn word_count_must_match_buffer() {
        let mut words = fragment().to_words().unwrap();
        words.push(0);
        assert!(matches!(
            Fragment::from_words(&words),
            Err(DatasetError::MalformedFragment { .. })
        ));
    }

    #[test]
    fn from_parts_checks_metadata_count() {
        let mut header = fragment().header();
        header.metadata_word_count = 4;
        assert!(Fragment::from_parts(header, vec![10, 20, 30]).is_err());
    }

    #[test]
    fn empty_payload_is_legal() {
        let frag = Fragment::new(
            FragmentType::DATA,
            SequenceId::new(0),
            FragmentId::new(0),
            Vec::new(),
        );
        assert_eq!(frag.word_count(), HEADER_WORDS);
        assert!(frag.payload().is_empty());
        assert_eq!(frag.kind(), FragmentKind::Data);
        assert_eq!(Fragment::from_words(&frag.to_words().unwrap()).unwrap(), frag);
    }
}
