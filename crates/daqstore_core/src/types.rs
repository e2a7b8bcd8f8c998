//! Core type definitions: words, identifiers and fragment type codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One fixed-width data word. All fragment contents are counted in words.
pub type RawWord = u64;

/// Size of a [`RawWord`] in bytes.
pub const WORD_BYTES: usize = std::mem::size_of::<RawWord>();

/// Event key shared by every fragment of one event.
///
/// Sequence ids are non-decreasing across a producer stream. Only the low
/// 48 bits are representable in a fragment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceId(pub u64);

impl SequenceId {
    /// Largest sequence id a fragment header can carry.
    pub const MAX: Self = Self((1 << 48) - 1);

    /// Creates a new sequence id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence id.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the data source of a fragment within an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentId(pub u16);

impl FragmentId {
    /// Creates a new fragment id.
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fragment type code.
///
/// Codes `1..=224` belong to users; codes from 225 upwards are reserved
/// for system fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentType(pub u8);

impl FragmentType {
    /// Not a valid type; also the nested type of an empty container.
    pub const INVALID: Self = Self(0);
    /// First user type code.
    pub const FIRST_USER: Self = Self(1);
    /// Last user type code.
    pub const LAST_USER: Self = Self(224);
    /// Marks the end of the data stream.
    pub const END_OF_DATA: Self = Self(225);
    /// Generic data fragment.
    pub const DATA: Self = Self(226);
    /// Initialization fragment.
    pub const INIT: Self = Self(227);
    /// End-of-run sentinel.
    pub const END_OF_RUN: Self = Self(228);
    /// End-of-subrun sentinel.
    pub const END_OF_SUBRUN: Self = Self(229);
    /// Shutdown sentinel.
    pub const SHUTDOWN: Self = Self(230);
    /// Empty placeholder fragment.
    pub const EMPTY: Self = Self(231);
    /// Container of nested fragments.
    pub const CONTAINER: Self = Self(232);
    /// Error fragment.
    pub const ERROR: Self = Self(233);

    /// Creates a type code.
    #[must_use]
    pub const fn new(code: u8) -> Self {
        Self(code)
    }

    /// Returns the raw code.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Returns `true` for user type codes.
    #[must_use]
    pub const fn is_user(self) -> bool {
        self.0 >= Self::FIRST_USER.0 && self.0 <= Self::LAST_USER.0
    }

    /// Returns `true` for reserved system codes.
    #[must_use]
    pub const fn is_system(self) -> bool {
        self.0 > Self::LAST_USER.0
    }

    /// Classifies this code.
    #[must_use]
    pub const fn kind(self) -> FragmentKind {
        match self.0 {
            0 => FragmentKind::Invalid,
            1..=224 => FragmentKind::User(self),
            225 => FragmentKind::EndOfData,
            226 => FragmentKind::Data,
            227 => FragmentKind::Init,
            228 => FragmentKind::EndOfRun,
            229 => FragmentKind::EndOfSubrun,
            230 => FragmentKind::Shutdown,
            231 => FragmentKind::Empty,
            232 => FragmentKind::Container,
            233 => FragmentKind::Error,
            _ => FragmentKind::Reserved(self),
        }
    }
}

impl fmt::Display for FragmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed classification of fragment type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    /// Code 0.
    Invalid,
    /// A user-defined detector type.
    User(FragmentType),
    /// End of the data stream.
    EndOfData,
    /// Generic data.
    Data,
    /// Initialization.
    Init,
    /// End of run.
    EndOfRun,
    /// End of subrun.
    EndOfSubrun,
    /// Shutdown.
    Shutdown,
    /// Empty placeholder.
    Empty,
    /// Container of nested fragments.
    Container,
    /// Error report.
    Error,
    /// A system code with no assigned meaning.
    Reserved(FragmentType),
}

impl FragmentKind {
    /// Returns `true` for kinds that end a stream of events.
    #[must_use]
    pub const fn ends_stream(self) -> bool {
        matches!(self, Self::EndOfData | Self::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_id_ordering_and_display() {
        let a = SequenceId::new(7);
        assert!(a < a.next());
        assert_eq!(a.to_string(), "7");
        assert_eq!(SequenceId::MAX.as_u64(), 0xFFFF_FFFF_FFFF);
    }

    #[test]
    fn type_code_classification() {
        assert_eq!(FragmentType::new(0).kind(), FragmentKind::Invalid);
        assert_eq!(
            FragmentType::new(2).kind(),
            FragmentKind::User(FragmentType::new(2))
        );
        assert_eq!(FragmentType::CONTAINER.kind(), FragmentKind::Container);
        assert_eq!(FragmentType::END_OF_RUN.kind(), FragmentKind::EndOfRun);
        assert_eq!(
            FragmentType::new(250).kind(),
            FragmentKind::Reserved(FragmentType::new(250))
        );
        assert!(FragmentType::LAST_USER.is_user());
        assert!(FragmentType::END_OF_DATA.is_system());
        assert!(!FragmentType::INVALID.is_user());
    }

    #[test]
    fn stream_ending_kinds() {
        assert!(FragmentKind::EndOfData.ends_stream());
        assert!(FragmentKind::Shutdown.ends_stream());
        assert!(!FragmentKind::EndOfRun.ends_stream());
    }
}
