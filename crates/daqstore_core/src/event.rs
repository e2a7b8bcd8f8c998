//! Per-event header metadata.

use crate::types::SequenceId;
use serde::Serialize;

/// Encoded form of an absent header timestamp.
pub const INVALID_TIMESTAMP: u64 = u64::MAX;

/// Run, subrun and event identifiers for one sequence id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RawEventHeader {
    /// Run number.
    pub run_id: u32,
    /// Subrun number.
    pub subrun_id: u32,
    /// Event number within the subrun.
    pub event_id: u32,
    /// Event key.
    pub sequence_id: SequenceId,
    /// Timestamp of the event, if the producer supplied one.
    pub timestamp: Option<u64>,
    /// Every expected fragment arrived.
    pub is_complete: bool,
}

impl RawEventHeader {
    /// Creates a complete header without a timestamp.
    #[must_use]
    pub const fn new(run_id: u32, subrun_id: u32, event_id: u32, sequence_id: SequenceId) -> Self {
        Self {
            run_id,
            subrun_id,
            event_id,
            sequence_id,
            timestamp: None,
            is_complete: true,
        }
    }

    /// Sets the timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the completeness flag.
    #[must_use]
    pub const fn with_complete(mut self, is_complete: bool) -> Self {
        self.is_complete = is_complete;
        self
    }

    /// Timestamp as stored on disk.
    #[must_use]
    pub fn encoded_timestamp(&self) -> u64 {
        self.timestamp.unwrap_or(INVALID_TIMESTAMP)
    }

    /// Inverse of [`RawEventHeader::encoded_timestamp`].
    #[must_use]
    pub fn decode_timestamp(raw: u64) -> Option<u64> {
        (raw != INVALID_TIMESTAMP).then_some(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_timestamp_encoding() {
        let header = RawEventHeader::new(1, 2, 3, SequenceId::new(4));
        assert!(header.is_complete);
        assert_eq!(header.encoded_timestamp(), INVALID_TIMESTAMP);
        assert_eq!(RawEventHeader::decode_timestamp(INVALID_TIMESTAMP), None);

        let header = header.with_timestamp(99).with_complete(false);
        assert_eq!(header.encoded_timestamp(), 99);
        assert_eq!(RawEventHeader::decode_timestamp(99), Some(99));
        assert!(!header.is_complete);
    }
}
