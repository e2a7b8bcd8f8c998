//! Fixed-layout fragment header codec.

use crate::error::{DatasetError, DatasetResult};
use crate::types::{FragmentId, FragmentType, RawWord, SequenceId};

/// Number of words in an encoded fragment header.
pub const HEADER_WORDS: usize = 4;

const SEQUENCE_MASK: u64 = (1 << 48) - 1;
const FLAG_VALID: u64 = 0x01;
const FLAG_COMPLETE: u64 = 0x02;

/// Header fields of a fragment.
///
/// Encoded as four words:
///
/// ```text
/// word0: word_count u32 | version u16 << 32 | type u8 << 48 | metadata_word_count u8 << 56
/// word1: sequence_id (48 bits) | fragment_id u16 << 48
/// word2: timestamp
/// word3: valid bit 0 | complete bit 1
/// ```
///
/// `word_count` counts the header, metadata and payload words together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    /// Total words including this header.
    pub word_count: u32,
    /// Producer-defined format version of the payload.
    pub version: u16,
    /// Type code.
    pub fragment_type: FragmentType,
    /// Number of metadata words preceding the payload.
    pub metadata_word_count: u8,
    /// Event key.
    pub sequence_id: SequenceId,
    /// Data source within the event.
    pub fragment_id: FragmentId,
    /// Producer clock value.
    pub timestamp: u64,
    /// Producer marked the data valid.
    pub valid: bool,
    /// Producer marked the data complete.
    pub complete: bool,
}

impl FragmentHeader {
    /// Encodes the header into its four words.
    ///
    /// # Errors
    ///
    /// Fails if the sequence id needs more than 48 bits.
    pub fn encode(&self) -> DatasetResult<[RawWord; HEADER_WORDS]> {
        if self.sequence_id.as_u64() > SEQUENCE_MASK {
            return Err(DatasetError::malformed_fragment(format!(
                "sequence id {} exceeds 48 bits",
                self.sequence_id
            )));
        }

        let word0 = u64::from(self.word_count)
            | u64::from(self.version) << 32
            | u64::from(self.fragment_type.as_u8()) << 48
            | u64::from(self.metadata_word_count) << 56;
        let word1 = self.sequence_id.as_u64() | u64::from(self.fragment_id.as_u16()) << 48;
        let mut word3 = 0;
        if self.valid {
            word3 |= FLAG_VALID;
        }
        if self.complete {
            word3 |= FLAG_COMPLETE;
        }

        Ok([word0, word1, self.timestamp, word3])
    }

    /// Decodes a header from the first words of `words`.
    ///
    /// Only the header itself is checked; whether `word_count` matches the
    /// surrounding buffer is the caller's concern.
    ///
    /// # Errors
    ///
    /// Fails if fewer than [`HEADER_WORDS`] words are given, if the declared
    /// word count is smaller than the header, or if undefined flag bits
    /// are set.
    pub fn decode(words: &[RawWord]) -> DatasetResult<Self> {
        if words.len() < HEADER_WORDS {
            return Err(DatasetError::malformed_fragment(format!(
                "buffer of {} words is shorter than a header",
                words.len()
            )));
        }

        let word0 = words[0];
        let word_count = (word0 & 0xFFFF_FFFF) as u32;
        if (word_count as usize) < HEADER_WORDS {
            return Err(DatasetError::malformed_fragment(format!(
                "declared word count {word_count} is smaller than the header"
            )));
        }
        if words[3] & !(FLAG_VALID | FLAG_COMPLETE) != 0 {
            return Err(DatasetError::malformed_fragment(format!(
                "undefined flag bits set: {:#x}",
                words[3]
            )));
        }

        Ok(Self {
            word_count,
            version: (word0 >> 32) as u16,
            fragment_type: FragmentType::new((word0 >> 48) as u8),
            metadata_word_count: (word0 >> 56) as u8,
            sequence_id: SequenceId::new(words[1] & SEQUENCE_MASK),
            fragment_id: FragmentId::new((words[1] >> 48) as u16),
            timestamp: words[2],
            valid: words[3] & FLAG_VALID != 0,
            complete: words[3] & FLAG_COMPLETE != 0,
        })
    }

    /// Number of body words (metadata and payload) the header declares.
    #[must_use]
    pub fn body_words(&self) -> usize {
        self.word_count as usize - HEADER_WORDS
    }
}
