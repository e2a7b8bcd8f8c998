//! Event source: drives a read-mode dataset one event at a time.
//!
//! Each call to [`EventSource::next_event`] reads the next event, pairs it
//! with its header and classifies it by the sentinel fragments it carries.
//! Events without a header are skipped. An empty event or an end-of-data
//! marker ends the stream.

use crate::config::{DatasetConfig, DatasetMode};
use crate::dataset::{open_dataset, EventFragments, FragmentDataset};
use crate::error::{DatasetError, DatasetResult};
use crate::event::RawEventHeader;
use crate::fragment::Fragment;
use crate::names::TypeNameResolver;
use crate::types::FragmentType;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// How an event relates to run boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Ordinary data event.
    Data,
    /// Carries an end-of-run marker.
    EndOfRun,
    /// Carries an end-of-subrun marker.
    EndOfSubrun,
}

/// One reconstructed event.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// The event's header.
    pub header: RawEventHeader,
    /// Classification by sentinel fragments.
    pub kind: EventKind,
    /// Fragments keyed by type code.
    pub fragments: EventFragments,
}

impl RawEvent {
    /// Regroups the fragments under resolver labels.
    #[must_use]
    pub fn by_label(&self, resolver: &dyn TypeNameResolver) -> BTreeMap<String, Vec<&Fragment>> {
        let mut labelled: BTreeMap<String, Vec<&Fragment>> = BTreeMap::new();
        for fragment in self.fragments.values().flatten() {
            labelled
                .entry(resolver.resolve(fragment).label)
                .or_default()
                .push(fragment);
        }
        labelled
    }

    /// Total number of fragments.
    #[must_use]
    pub fn fragment_count(&self) -> usize {
        self.fragments.values().map(Vec::len).sum()
    }
}

/// Counters kept by an [`EventSource`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Events delivered.
    pub events: u64,
    /// Fragments in delivered events.
    pub fragments: u64,
    /// Encoded size of delivered fragments.
    pub bytes: u64,
    /// Events dropped for lack of a header.
    pub skipped_events: u64,
}

/// Reads events from a dataset until the data runs out.
pub struct EventSource {
    dataset: Box<dyn FragmentDataset>,
    stats: SourceStats,
    done: bool,
}

impl EventSource {
    /// Wraps an open dataset.
    ///
    /// # Errors
    ///
    /// Fails if the dataset was not opened for reading.
    pub fn new(dataset: Box<dyn FragmentDataset>) -> DatasetResult<Self> {
        if dataset.mode() != DatasetMode::Read {
            return Err(DatasetError::WrongMode {
                operation: "EventSource::new",
                mode: dataset.mode().as_str(),
            });
        }
        Ok(Self {
            dataset,
            stats: SourceStats::default(),
            done: false,
        })
    }

    /// Opens the dataset described by `config` and wraps it.
    ///
    /// # Errors
    ///
    /// Fails if the dataset cannot be opened or `config` is not in read
    /// mode.
    pub fn open(config: &DatasetConfig) -> DatasetResult<Self> {
        if config.mode != DatasetMode::Read {
            return Err(DatasetError::WrongMode {
                operation: "EventSource::open",
                mode: config.mode.as_str(),
            });
        }
        Self::new(open_dataset(config)?)
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> SourceStats {
        self.stats
    }

    /// The underlying dataset.
    pub fn dataset_mut(&mut self) -> &mut dyn FragmentDataset {
        self.dataset.as_mut()
    }

    /// Returns the next event, or `None` once the data is exhausted.
    ///
    /// # Errors
    ///
    /// Fails if the dataset cannot decode the next event or its header.
    pub fn next_event(&mut self) -> DatasetResult<Option<RawEvent>> {
        while !self.done {
            let fragments = self.dataset.read_next_event()?;
            if fragments.is_empty() {
                info!(events = self.stats.events, "no more events");
                self.done = true;
                break;
            }
            if fragments.keys().any(|code| code.kind().ends_stream()) {
                info!(events = self.stats.events, "end of data marker");
                self.done = true;
                break;
            }

            let Some(sequence_id) = fragments
                .values()
                .flatten()
                .next()
                .map(Fragment::sequence_id)
            else {
                continue;
            };
            let Some(header) = self.dataset.get_event_header(sequence_id)? else {
                debug!(%sequence_id, "no header for event, skipping");
                self.stats.skipped_events += 1;
                continue;
            };

            let kind = if fragments.contains_key(&FragmentType::END_OF_RUN) {
                EventKind::EndOfRun
            } else if fragments.contains_key(&FragmentType::END_OF_SUBRUN) {
                EventKind::EndOfSubrun
            } else {
                EventKind::Data
            };

            let event = RawEvent {
                header,
                kind,
                fragments,
            };
            self.stats.events += 1;
            self.stats.fragments += event.fragment_count() as u64;
            self.stats.bytes += event
                .fragments
                .values()
                .flatten()
                .map(|f| f.size_bytes() as u64)
                .sum::<u64>();
            debug!(%sequence_id, ?kind, fragments = event.fragment_count(), "delivered event");
            return Ok(Some(event));
        }
        Ok(None)
    }
}

impl std::fmt::Debug for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource")
            .field("layout", &self.dataset.layout())
            .field("stats", &self.stats)
            .field("done", &self.done)
            .finish()
    }
}

impl Iterator for EventSource {
    type Item = DatasetResult<RawEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_event() {
            Ok(event) => event.map(Ok),
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutKind;
    use crate::dataset::open_dataset_with_backend;
    use crate::names::TypeNameTable;
    use crate::types::{FragmentId, SequenceId};
    use daqstore_storage::FileBackend;
    use tempfile::tempdir;

    fn fragment(code: FragmentType, seq: u64) -> Fragment {
        Fragment::new(code, SequenceId::new(seq), FragmentId::new(0), vec![seq; 3])
    }

    fn write(path: &std::path::Path, layout: LayoutKind) {
        let config = DatasetConfig::new(path).layout(layout).words_per_row(2);
        let mut ds = open_dataset(&config).unwrap();
        for seq in 1..=4 {
            ds.insert_header(&RawEventHeader::new(1, 1, seq as u32, SequenceId::new(seq)))
                .unwrap();
        }
        ds.insert_one(&fragment(FragmentType::DATA, 1)).unwrap();
        ds.insert_one(&fragment(FragmentType::DATA, 2)).unwrap();
        ds.insert_one(&fragment(FragmentType::DATA, 3)).unwrap();
        ds.insert_one(&fragment(FragmentType::END_OF_SUBRUN, 3)).unwrap();
        ds.insert_one(&fragment(FragmentType::DATA, 5)).unwrap();
        ds.insert_one(&fragment(FragmentType::END_OF_DATA, 6)).unwrap();
        ds.insert_one(&fragment(FragmentType::DATA, 7)).unwrap();
        ds.flush().unwrap();
    }

    #[test]
    fn events_until_end_of_data() {
        let dir = tempdir().unwrap();
        for layout in [LayoutKind::Ntuple, LayoutKind::Grouped] {
            let path = dir.path().join(format!("source-{layout}.dqst"));
            write(&path, layout);

            let config = DatasetConfig::new(&path).mode(DatasetMode::Read);
            let mut source = EventSource::open(&config).unwrap();
            let events: Vec<RawEvent> = source.by_ref().map(Result::unwrap).collect();

            let ids: Vec<u32> = events.iter().map(|e| e.header.event_id).collect();
            assert_eq!(ids, vec![1, 2, 3]);
            assert_eq!(events[2].kind, EventKind::EndOfSubrun);
            assert_eq!(events[0].kind, EventKind::Data);
            assert_eq!(source.stats().events, 3);
            assert_eq!(source.stats().fragments, 4);
            assert_eq!(source.stats().bytes, 4 * 7 * 8);
            assert_eq!(source.stats().skipped_events, 1);
            assert!(source.next_event().unwrap().is_none());
        }
    }

    #[test]
    fn by_label_groups_fragments() {
        let event = RawEvent {
            header: RawEventHeader::new(1, 1, 1, SequenceId::new(1)),
            kind: EventKind::Data,
            fragments: [
                (FragmentType::DATA, vec![fragment(FragmentType::DATA, 1)]),
                (FragmentType::new(77), vec![fragment(FragmentType::new(77), 1)]),
            ]
            .into_iter()
            .collect(),
        };
        let labelled = event.by_label(&TypeNameTable::default());
        assert_eq!(labelled["Data"].len(), 1);
        assert_eq!(labelled["unidentified"].len(), 1);
        assert_eq!(event.fragment_count(), 2);
    }

    #[test]
    fn writers_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("w.dqst");
        let config = DatasetConfig::new(&path);
        let backend = Box::new(FileBackend::create(&path).unwrap());
        let ds = open_dataset_with_backend(&config, backend).unwrap();
        assert!(matches!(
            EventSource::new(ds),
            Err(DatasetError::WrongMode { .. })
        ));
        assert!(EventSource::open(&config).is_err());
    }
}
