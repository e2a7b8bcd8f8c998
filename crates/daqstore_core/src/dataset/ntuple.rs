//! Flat layout: fragments split across fixed-width table rows.
//!
//! ```text
//! Fragments:    sequenceID u64 | fragmentID u16 | timestamp u64 | type u8 |
//!               size u64 | index u64 | version u16 | metadata_word_count u8 |
//!               flags u8 | payload u64 * W
//! EventHeaders: run_id u32 | subrun_id u32 | event_id u32 | sequenceID u64 |
//!               timestamp u64 | is_complete u8
//! ```
//!
//! A fragment body of `size` words occupies `max(1, ceil(size / W))`
//! consecutive rows. Every row repeats `size`; `index` is the offset of the
//! row's slice within the body. The last slice is zero-padded.

use super::{wrong_mode, EventFragments, FragmentDataset};
use crate::config::{DatasetConfig, DatasetMode, LayoutKind};
use crate::error::{DatasetError, DatasetResult};
use crate::event::RawEventHeader;
use crate::format::table::{ColumnSpec, ColumnType, TableReader, TableSchema, TableWriter};
use crate::format::RecordFile;
use crate::fragment::{Fragment, FragmentHeader, HEADER_WORDS};
use crate::types::{FragmentId, FragmentType, SequenceId};
use tracing::{debug, trace, warn};

/// Name of the fragment rows table.
pub const FRAGMENTS_TABLE: &str = "Fragments";

/// Name of the event header table.
pub const HEADERS_TABLE: &str = "EventHeaders";

const FRAGMENTS_TABLE_ID: u8 = 0;
const HEADERS_TABLE_ID: u8 = 1;

const FLAG_VALID: u64 = 1;
const FLAG_COMPLETE: u64 = 1 << 1;

/// Rows a body of `len` words occupies at `words_per_row` words per row.
///
/// An empty body still takes one row.
#[must_use]
pub fn rows_for(len: usize, words_per_row: usize) -> usize {
    len.div_ceil(words_per_row.max(1)).max(1)
}

fn fragments_schema(words_per_row: usize, chunk_rows: usize) -> TableSchema {
    TableSchema {
        table_id: FRAGMENTS_TABLE_ID,
        name: FRAGMENTS_TABLE.to_string(),
        columns: vec![
            ColumnSpec::scalar("sequenceID", ColumnType::U64),
            ColumnSpec::scalar("fragmentID", ColumnType::U16),
            ColumnSpec::scalar("timestamp", ColumnType::U64),
            ColumnSpec::scalar("type", ColumnType::U8),
            ColumnSpec::scalar("size", ColumnType::U64),
            ColumnSpec::scalar("index", ColumnType::U64),
            ColumnSpec::scalar("version", ColumnType::U16),
            ColumnSpec::scalar("metadata_word_count", ColumnType::U8),
            ColumnSpec::scalar("flags", ColumnType::U8),
            ColumnSpec::array("payload", ColumnType::U64, words_per_row),
        ],
        chunk_rows,
    }
}

fn headers_schema(chunk_rows: usize) -> TableSchema {
    TableSchema {
        table_id: HEADERS_TABLE_ID,
        name: HEADERS_TABLE.to_string(),
        columns: vec![
            ColumnSpec::scalar("run_id", ColumnType::U32),
            ColumnSpec::scalar("subrun_id", ColumnType::U32),
            ColumnSpec::scalar("event_id", ColumnType::U32),
            ColumnSpec::scalar("sequenceID", ColumnType::U64),
            ColumnSpec::scalar("timestamp", ColumnType::U64),
            ColumnSpec::scalar("is_complete", ColumnType::U8),
        ],
        chunk_rows,
    }
}

/// Value positions of the fragment columns within a row.
#[derive(Debug, Clone, Copy)]
struct FragmentColumns {
    sequence_id: usize,
    fragment_id: usize,
    timestamp: usize,
    fragment_type: usize,
    size: usize,
    index: usize,
    version: usize,
    metadata_word_count: usize,
    flags: usize,
    payload: usize,
}

impl FragmentColumns {
    fn of(schema: &TableSchema) -> DatasetResult<Self> {
        Ok(Self {
            sequence_id: schema.require_column("sequenceID")?,
            fragment_id: schema.require_column("fragmentID")?,
            timestamp: schema.require_column("timestamp")?,
            fragment_type: schema.require_column("type")?,
            size: schema.require_column("size")?,
            index: schema.require_column("index")?,
            version: schema.require_column("version")?,
            metadata_word_count: schema.require_column("metadata_word_count")?,
            flags: schema.require_column("flags")?,
            payload: schema.require_column("payload")?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct HeaderColumns {
    run_id: usize,
    subrun_id: usize,
    event_id: usize,
    sequence_id: usize,
    timestamp: usize,
    is_complete: usize,
}

impl HeaderColumns {
    fn of(schema: &TableSchema) -> DatasetResult<Self> {
        Ok(Self {
            run_id: schema.require_column("run_id")?,
            subrun_id: schema.require_column("subrun_id")?,
            event_id: schema.require_column("event_id")?,
            sequence_id: schema.require_column("sequenceID")?,
            timestamp: schema.require_column("timestamp")?,
            is_complete: schema.require_column("is_complete")?,
        })
    }
}

/// Scalar fields of one fragment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RowFields {
    sequence_id: u64,
    fragment_id: u64,
    timestamp: u64,
    fragment_type: u64,
    size: u64,
    index: u64,
    version: u64,
    metadata_word_count: u64,
    flags: u64,
}

impl RowFields {
    fn read(row: &[u64], cols: &FragmentColumns) -> Self {
        Self {
            sequence_id: row[cols.sequence_id],
            fragment_id: row[cols.fragment_id],
            timestamp: row[cols.timestamp],
            fragment_type: row[cols.fragment_type],
            size: row[cols.size],
            index: row[cols.index],
            version: row[cols.version],
            metadata_word_count: row[cols.metadata_word_count],
            flags: row[cols.flags],
        }
    }

    /// Whether `next` can continue the fragment this row starts.
    fn continued_by(&self, next: &Self) -> bool {
        next.sequence_id == self.sequence_id
            && next.fragment_id == self.fragment_id
            && next.fragment_type == self.fragment_type
            && next.size == self.size
    }

    fn header(&self, row: u64) -> DatasetResult<FragmentHeader> {
        if self.flags & !(FLAG_VALID | FLAG_COMPLETE) != 0 {
            return Err(DatasetError::malformed_row(
                row,
                format!("undefined flag bits {:#x}", self.flags),
            ));
        }
        let word_count = self
            .size
            .checked_add(HEADER_WORDS as u64)
            .and_then(|words| u32::try_from(words).ok())
            .ok_or_else(|| {
                DatasetError::malformed_row(row, format!("size {} too large", self.size))
            })?;
        Ok(FragmentHeader {
            word_count,
            version: narrow(row, "version", self.version)?,
            fragment_type: FragmentType::new(narrow(row, "type", self.fragment_type)?),
            metadata_word_count: narrow(row, "metadata_word_count", self.metadata_word_count)?,
            sequence_id: SequenceId::new(self.sequence_id),
            fragment_id: FragmentId::new(narrow(row, "fragmentID", self.fragment_id)?),
            timestamp: self.timestamp,
            valid: self.flags & FLAG_VALID != 0,
            complete: self.flags & FLAG_COMPLETE != 0,
        })
    }
}

fn narrow<T: TryFrom<u64>>(row: u64, column: &str, value: u64) -> DatasetResult<T> {
    T::try_from(value).map_err(|_| {
        DatasetError::malformed_row(row, format!("{column} value {value} out of range"))
    })
}

fn header_from_row(
    row_idx: u64,
    row: &[u64],
    cols: &HeaderColumns,
) -> DatasetResult<RawEventHeader> {
    Ok(RawEventHeader {
        run_id: narrow(row_idx, "run_id", row[cols.run_id])?,
        subrun_id: narrow(row_idx, "subrun_id", row[cols.subrun_id])?,
        event_id: narrow(row_idx, "event_id", row[cols.event_id])?,
        sequence_id: SequenceId::new(row[cols.sequence_id]),
        timestamp: RawEventHeader::decode_timestamp(row[cols.timestamp]),
        is_complete: row[cols.is_complete] != 0,
    })
}

#[derive(Debug)]
struct ReadState {
    fragments: TableReader,
    headers: TableReader,
    fragment_cols: FragmentColumns,
    header_cols: HeaderColumns,
    row_idx: u64,
    header_idx: u64,
}

#[derive(Debug)]
enum State {
    Write {
        fragments: TableWriter,
        headers: TableWriter,
        fragment_cols: FragmentColumns,
        header_cols: HeaderColumns,
    },
    Read(Box<ReadState>),
}

/// Flat row-chunked dataset.
#[derive(Debug)]
pub struct NtupleDataset {
    file: RecordFile,
    words_per_row: usize,
    state: State,
}

impl NtupleDataset {
    /// Declares both tables in a freshly created file.
    ///
    /// # Errors
    ///
    /// Fails if the table declarations cannot be written.
    pub fn create(mut file: RecordFile, config: &DatasetConfig) -> DatasetResult<Self> {
        if config.words_per_row == 0 {
            return Err(DatasetError::invalid_config("words_per_row must be positive"));
        }
        let chunk_rows = config.chunk_rows();
        let fragments = TableWriter::create(
            &mut file,
            fragments_schema(config.words_per_row, chunk_rows),
        )?;
        let headers = TableWriter::create(&mut file, headers_schema(chunk_rows))?;
        let fragment_cols = FragmentColumns::of(fragments.schema())?;
        let header_cols = HeaderColumns::of(headers.schema())?;
        debug!(words_per_row = config.words_per_row, chunk_rows, "created flat dataset");

        Ok(Self {
            file,
            words_per_row: config.words_per_row,
            state: State::Write {
                fragments,
                headers,
                fragment_cols,
                header_cols,
            },
        })
    }

    /// Indexes both tables of an existing file. The row width is taken from
    /// the file.
    ///
    /// # Errors
    ///
    /// Fails if either table is missing or lacks a required column.
    pub fn open(file: RecordFile) -> DatasetResult<Self> {
        let mut tables = TableReader::load_all(&file)?;
        let fragments = tables.remove(FRAGMENTS_TABLE).ok_or_else(|| {
            DatasetError::invalid_format(format!("missing table {FRAGMENTS_TABLE}"))
        })?;
        let headers = tables.remove(HEADERS_TABLE).ok_or_else(|| {
            DatasetError::invalid_format(format!("missing table {HEADERS_TABLE}"))
        })?;

        let fragment_cols = FragmentColumns::of(fragments.schema())?;
        let header_cols = HeaderColumns::of(headers.schema())?;
        let words_per_row = fragments
            .schema()
            .columns
            .iter()
            .find(|column| column.name == "payload")
            .map_or(0, |column| column.width);
        if words_per_row == 0 {
            return Err(DatasetError::invalid_format("payload column has no width"));
        }

        debug!(
            words_per_row,
            fragment_rows = fragments.row_count(),
            header_rows = headers.row_count(),
            "opened flat dataset"
        );
        Ok(Self {
            file,
            words_per_row,
            state: State::Read(Box::new(ReadState {
                fragments,
                headers,
                fragment_cols,
                header_cols,
                row_idx: 0,
                header_idx: 0,
            })),
        })
    }

    /// Row width in words.
    #[must_use]
    pub fn words_per_row(&self) -> usize {
        self.words_per_row
    }

    /// Rows in the fragments and header tables.
    #[must_use]
    pub fn row_counts(&self) -> (u64, u64) {
        match &self.state {
            State::Write { fragments, headers, .. } => {
                (fragments.row_count(), headers.row_count())
            }
            State::Read(read) => (read.fragments.row_count(), read.headers.row_count()),
        }
    }

    fn current_mode(&self) -> DatasetMode {
        match self.state {
            State::Write { .. } => DatasetMode::Write,
            State::Read(_) => DatasetMode::Read,
        }
    }

    #[cfg(test)]
    pub(crate) fn file(&self) -> &RecordFile {
        &self.file
    }
}

impl FragmentDataset for NtupleDataset {
    fn mode(&self) -> DatasetMode {
        self.current_mode()
    }

    fn layout(&self) -> LayoutKind {
        LayoutKind::Ntuple
    }

    fn insert_one(&mut self, fragment: &Fragment) -> DatasetResult<()> {
        let words_per_row = self.words_per_row;
        let State::Write {
            fragments,
            fragment_cols: cols,
            ..
        } = &mut self.state
        else {
            return Err(wrong_mode("insert_one", DatasetMode::Read));
        };
        let cols = *cols;

        let body = fragment.body();
        let mut flags = 0;
        if fragment.is_valid() {
            flags |= FLAG_VALID;
        }
        if fragment.is_complete() {
            flags |= FLAG_COMPLETE;
        }

        let mut row = vec![0u64; fragments.schema().row_width()];
        row[cols.sequence_id] = fragment.sequence_id().as_u64();
        row[cols.fragment_id] = u64::from(fragment.fragment_id().as_u16());
        row[cols.timestamp] = fragment.timestamp();
        row[cols.fragment_type] = u64::from(fragment.fragment_type().as_u8());
        row[cols.size] = body.len() as u64;
        row[cols.version] = u64::from(fragment.version());
        row[cols.metadata_word_count] = fragment.metadata().len() as u64;
        row[cols.flags] = flags;
        let payload = cols.payload..cols.payload + words_per_row;

        let rows = rows_for(body.len(), words_per_row);
        for ii in 0..rows {
            let start = ii * words_per_row;
            let end = (start + words_per_row).min(body.len());
            let slice = &body[start.min(end)..end];
            row[cols.index] = start as u64;
            let words = &mut row[payload.clone()];
            words[..slice.len()].copy_from_slice(slice);
            words[slice.len()..].fill(0);
            fragments.push_row(&mut self.file, &row)?;
        }

        trace!(
            sequence_id = fragment.sequence_id().as_u64(),
            fragment_id = fragment.fragment_id().as_u16(),
            size = body.len(),
            rows,
            "wrote fragment rows"
        );
        Ok(())
    }

    fn insert_header(&mut self, header: &RawEventHeader) -> DatasetResult<()> {
        let State::Write {
            headers,
            header_cols: cols,
            ..
        } = &mut self.state
        else {
            return Err(wrong_mode("insert_header", DatasetMode::Read));
        };
        let mut row = vec![0u64; headers.schema().row_width()];
        row[cols.run_id] = u64::from(header.run_id);
        row[cols.subrun_id] = u64::from(header.subrun_id);
        row[cols.event_id] = u64::from(header.event_id);
        row[cols.sequence_id] = header.sequence_id.as_u64();
        row[cols.timestamp] = header.encoded_timestamp();
        row[cols.is_complete] = u64::from(header.is_complete);
        headers.push_row(&mut self.file, &row)?;
        trace!(sequence_id = header.sequence_id.as_u64(), "wrote header row");
        Ok(())
    }

    fn read_next_event(&mut self) -> DatasetResult<EventFragments> {
        let words_per_row = self.words_per_row as u64;
        let State::Read(read) = &mut self.state else {
            return Err(wrong_mode("read_next_event", DatasetMode::Write));
        };
        let file = &self.file;
        let cols = read.fragment_cols;
        let total = read.fragments.row_count();
        let mut event = EventFragments::new();

        let mut row_idx = read.row_idx;
        if row_idx >= total {
            return Ok(event);
        }
        let key = read.fragments.read_row(file, row_idx)?[cols.sequence_id];

        while row_idx < total {
            let row = read.fragments.read_row(file, row_idx)?;
            let first = RowFields::read(row, &cols);
            if first.sequence_id != key {
                break;
            }
            if first.index != 0 {
                return Err(DatasetError::malformed_row(
                    row_idx,
                    format!("fragment starts at index {}", first.index),
                ));
            }
            let header = first.header(row_idx)?;
            let size = header.body_words();

            let take = size.min(words_per_row as usize);
            let mut body = Vec::with_capacity(take);
            body.extend_from_slice(&row[cols.payload..cols.payload + take]);

            let mut index = 0u64;
            while index + words_per_row < first.size {
                row_idx += 1;
                if row_idx >= total {
                    return Err(DatasetError::malformed_row(
                        row_idx,
                        format!("fragment of {} words ends early", first.size),
                    ));
                }
                let row = read.fragments.read_row(file, row_idx)?;
                let next = RowFields::read(row, &cols);
                if !first.continued_by(&next) {
                    return Err(DatasetError::malformed_row(
                        row_idx,
                        "row does not continue the preceding fragment",
                    ));
                }
                if next.index != index + words_per_row {
                    return Err(DatasetError::malformed_row(
                        row_idx,
                        format!(
                            "expected index {}, found {}",
                            index + words_per_row,
                            next.index
                        ),
                    ));
                }
                index = next.index;
                let take = (first.size - index).min(words_per_row) as usize;
                body.extend_from_slice(&row[cols.payload..cols.payload + take]);
            }

            let fragment = Fragment::from_parts(header, body)?;
            event
                .entry(fragment.fragment_type())
                .or_default()
                .push(fragment);
            row_idx += 1;
        }

        debug!(
            sequence_id = key,
            types = event.len(),
            next_row = row_idx,
            "read event"
        );
        read.row_idx = row_idx;
        Ok(event)
    }

    fn get_event_header(
        &mut self,
        sequence_id: SequenceId,
    ) -> DatasetResult<Option<RawEventHeader>> {
        let State::Read(read) = &mut self.state else {
            return Err(wrong_mode("get_event_header", DatasetMode::Write));
        };
        let file = &self.file;
        let cols = read.header_cols;
        let total = read.headers.row_count();
        let target = sequence_id.as_u64();

        let mut idx = read.header_idx;
        let mut found = false;
        while idx < total {
            let stored = read.headers.read_row(file, idx)?[cols.sequence_id];
            if stored >= target {
                found = stored == target;
                break;
            }
            idx += 1;
        }
        read.header_idx = idx;
        if !found {
            trace!(sequence_id = target, "no header row");
            return Ok(None);
        }

        let mut last = idx;
        while last + 1 < total
            && read.headers.read_row(file, last + 1)?[cols.sequence_id] == target
        {
            last += 1;
        }
        if last != idx {
            debug!(
                sequence_id = target,
                rows = last - idx + 1,
                "duplicate header rows, using the last"
            );
        }

        let row = read.headers.read_row(file, last)?;
        header_from_row(last, row, &cols).map(Some)
    }

    fn event_headers(&mut self) -> DatasetResult<Vec<RawEventHeader>> {
        let State::Read(read) = &mut self.state else {
            return Err(wrong_mode("event_headers", DatasetMode::Write));
        };
        let file = &self.file;
        let cols = read.header_cols;
        (0..read.headers.row_count())
            .map(|idx| {
                let row = read.headers.read_row(file, idx)?;
                header_from_row(idx, row, &cols)
            })
            .collect()
    }

    fn flush(&mut self) -> DatasetResult<()> {
        if let State::Write { fragments, headers, .. } = &mut self.state {
            fragments.flush(&mut self.file)?;
            headers.flush(&mut self.file)?;
            self.file.flush()?;
        }
        Ok(())
    }
}

impl Drop for NtupleDataset {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!(error = %err, "failed to flush flat dataset on close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daqstore_storage::InMemoryBackend;
    use proptest::prelude::*;

    fn writer(words_per_row: usize) -> NtupleDataset {
        let file =
            RecordFile::create(Box::new(InMemoryBackend::new()), LayoutKind::Ntuple).unwrap();
        let config = DatasetConfig::new("memory")
            .words_per_row(words_per_row)
            .payload_chunk_size(3);
        NtupleDataset::create(file, &config).unwrap()
    }

    fn reader(mut writer: NtupleDataset) -> NtupleDataset {
        writer.flush().unwrap();
        let size = writer.file().size().unwrap() as usize;
        let bytes = writer.file().read_bytes(0, size).unwrap();
        NtupleDataset::open(RecordFile::open(Box::new(InMemoryBackend::with_data(bytes))).unwrap())
            .unwrap()
    }

    fn fragment(seq: u64, fid: u16, payload: Vec<u64>) -> Fragment {
        Fragment::new(FragmentType::new(3), SequenceId::new(seq), FragmentId::new(fid), payload)
    }

    fn raw_rows(ds: &mut NtupleDataset) -> Vec<Vec<u64>> {
        let State::Read(read) = &mut ds.state else {
            panic!("not a reader");
        };
        (0..read.fragments.row_count())
            .map(|i| read.fragments.read_row(&ds.file, i).unwrap().to_vec())
            .collect()
    }

    #[test]
    fn ten_words_in_rows_of_four() {
        let mut ds = writer(4);
        let original = fragment(1, 0, (1..=10).collect());
        ds.insert_one(&original).unwrap();

        let mut ds = reader(ds);
        let rows = raw_rows(&mut ds);
        assert_eq!(rows.len(), 3);
        let cols = FragmentColumns::of(&fragments_schema(4, 1)).unwrap();
        let indexes: Vec<u64> = rows.iter().map(|r| r[cols.index]).collect();
        assert_eq!(indexes, vec![0, 4, 8]);
        assert!(rows.iter().all(|r| r[cols.size] == 10));
        assert_eq!(&rows[2][cols.payload..], &[9, 10, 0, 0]);

        let event = ds.read_next_event().unwrap();
        assert_eq!(event[&FragmentType::new(3)], vec![original]);
        assert!(ds.read_next_event().unwrap().is_empty());
    }

    #[test]
    fn exact_multiple_uses_no_extra_row() {
        let mut ds = writer(4);
        ds.insert_one(&fragment(1, 0, (1..=8).collect())).unwrap();
        ds.insert_one(&fragment(2, 0, vec![5])).unwrap();
        assert_eq!(ds.row_counts().0, 3);

        let mut ds = reader(ds);
        assert_eq!(ds.read_next_event().unwrap()[&FragmentType::new(3)][0].payload().len(), 8);
        assert_eq!(ds.read_next_event().unwrap()[&FragmentType::new(3)][0].payload(), &[5]);
    }

    #[test]
    fn empty_body_takes_one_row() {
        let mut ds = writer(4);
        let empty = fragment(7, 2, Vec::new()).with_flags(false, true).with_version(9);
        ds.insert_one(&empty).unwrap();
        assert_eq!(ds.row_counts().0, 1);

        let mut ds = reader(ds);
        assert_eq!(ds.read_next_event().unwrap()[&FragmentType::new(3)], vec![empty]);
    }

    #[test]
    fn metadata_and_header_fields_survive() {
        let mut ds = writer(2);
        let original = fragment(4, 11, vec![1, 2, 3])
            .with_timestamp(123_456)
            .with_version(2)
            .with_metadata(vec![70, 71])
            .unwrap();
        ds.insert_one(&original).unwrap();

        let mut ds = reader(ds);
        let event = ds.read_next_event().unwrap();
        let back = &event[&FragmentType::new(3)][0];
        assert_eq!(back, &original);
        assert_eq!(back.metadata(), &[70, 71]);
        assert_eq!(back.to_words().unwrap(), original.to_words().unwrap());
    }

    #[test]
    fn events_come_back_in_order() {
        let mut ds = writer(3);
        ds.insert_one(&fragment(1, 0, vec![1; 7])).unwrap();
        ds.insert_one(&fragment(1, 1, vec![2; 2])).unwrap();
        ds.insert_one(&fragment(2, 0, vec![3; 3])).unwrap();
        ds.insert_one(&fragment(0, 0, vec![4])).unwrap();

        let mut ds = reader(ds);
        let first = ds.read_next_event().unwrap();
        let ids: Vec<u16> = first[&FragmentType::new(3)]
            .iter()
            .map(|f| f.fragment_id().as_u16())
            .collect();
        assert_eq!(ids, vec![0, 1]);
        for expected in [2, 0] {
            let event = ds.read_next_event().unwrap();
            assert_eq!(event[&FragmentType::new(3)][0].sequence_id(), SequenceId::new(expected));
        }
        assert!(ds.read_next_event().unwrap().is_empty());
    }

    #[test]
    fn header_lookup_is_forward_only() {
        let mut ds = writer(4);
        for seq in [1u64, 3, 5] {
            let header = RawEventHeader::new(10, 1, seq as u32, SequenceId::new(seq));
            ds.insert_header(&header).unwrap();
        }
        ds.insert_header(&RawEventHeader::new(10, 1, 99, SequenceId::new(5)).with_timestamp(8))
            .unwrap();

        let mut ds = reader(ds);
        assert_eq!(ds.get_event_header(SequenceId::new(2)).unwrap(), None);
        assert_eq!(ds.get_event_header(SequenceId::new(3)).unwrap().unwrap().event_id, 3);
        let five = ds.get_event_header(SequenceId::new(5)).unwrap().unwrap();
        assert_eq!(five.event_id, 99);
        assert_eq!(five.timestamp, Some(8));
        assert_eq!(ds.get_event_header(SequenceId::new(1)).unwrap(), None);
        assert_eq!(ds.get_event_header(SequenceId::new(6)).unwrap(), None);
    }

    #[test]
    fn broken_continuation_is_reported_without_advancing() {
        let mut file =
            RecordFile::create(Box::new(InMemoryBackend::new()), LayoutKind::Ntuple).unwrap();
        let mut rows = TableWriter::create(&mut file, fragments_schema(2, 8)).unwrap();
        let mut headers = TableWriter::create(&mut file, headers_schema(8)).unwrap();
        rows.push_row(&mut file, &[1, 0, 0, 3, 4, 0, 0, 0, 3, 1, 2]).unwrap();
        rows.push_row(&mut file, &[1, 0, 0, 3, 4, 4, 0, 0, 3, 3, 4]).unwrap();
        rows.flush(&mut file).unwrap();
        headers.flush(&mut file).unwrap();

        let mut ds = NtupleDataset::open(file).unwrap();
        assert!(matches!(
            ds.read_next_event(),
            Err(DatasetError::MalformedRow { row: 1, .. })
        ));
        let State::Read(read) = &ds.state else {
            panic!("not a reader");
        };
        assert_eq!(read.row_idx, 0);
    }

    #[test]
    fn rows_are_filled_by_column_name() {
        let mut file =
            RecordFile::create(Box::new(InMemoryBackend::new()), LayoutKind::Ntuple).unwrap();
        let mut fragment_schema = fragments_schema(2, 4);
        fragment_schema.columns.reverse();
        let mut header_schema = headers_schema(4);
        header_schema.columns.rotate_left(2);
        let fragments = TableWriter::create(&mut file, fragment_schema).unwrap();
        let headers = TableWriter::create(&mut file, header_schema).unwrap();
        let fragment_cols = FragmentColumns::of(fragments.schema()).unwrap();
        let header_cols = HeaderColumns::of(headers.schema()).unwrap();
        assert_eq!(fragment_cols.payload, 0);
        let mut ds = NtupleDataset {
            file,
            words_per_row: 2,
            state: State::Write {
                fragments,
                headers,
                fragment_cols,
                header_cols,
            },
        };

        let original = fragment(6, 21, vec![1, 2, 3])
            .with_timestamp(77)
            .with_version(4)
            .with_metadata(vec![9])
            .unwrap();
        let header = RawEventHeader::new(8, 2, 31, SequenceId::new(6)).with_timestamp(5);
        ds.insert_one(&original).unwrap();
        ds.insert_header(&header).unwrap();

        let mut ds = reader(ds);
        let rows = raw_rows(&mut ds);
        assert_eq!(rows[1][fragment_cols.index], 2);
        assert_eq!(&rows[1][..2], &[3, 0]);
        assert_eq!(ds.read_next_event().unwrap()[&FragmentType::new(3)], vec![original]);
        assert_eq!(ds.get_event_header(SequenceId::new(6)).unwrap(), Some(header));
    }

    #[test]
    fn all_header_rows_are_listed() {
        let mut ds = writer(4);
        ds.insert_one(&fragment(1, 0, vec![1])).unwrap();
        let headers: Vec<RawEventHeader> = [1u64, 2, 2, 9]
            .iter()
            .enumerate()
            .map(|(i, &seq)| RawEventHeader::new(3, 0, i as u32, SequenceId::new(seq)))
            .collect();
        for header in &headers {
            ds.insert_header(header).unwrap();
        }
        assert!(matches!(
            ds.event_headers(),
            Err(DatasetError::WrongMode { .. })
        ));

        let mut ds = reader(ds);
        assert_eq!(ds.get_event_header(SequenceId::new(2)).unwrap().unwrap().event_id, 2);
        assert_eq!(ds.event_headers().unwrap(), headers);
        assert_eq!(ds.get_event_header(SequenceId::new(9)).unwrap().unwrap().event_id, 3);
    }

    #[test]
    fn missing_tables_are_rejected() {
        let file =
            RecordFile::create(Box::new(InMemoryBackend::new()), LayoutKind::Ntuple).unwrap();
        assert!(matches!(
            NtupleDataset::open(file),
            Err(DatasetError::InvalidFormat { .. })
        ));
    }

    proptest! {
        #[test]
        fn row_count_matches_ceiling(len in 0usize..64, width in 1usize..9) {
            let mut ds = writer(width);
            let original = fragment(1, 0, (0..len as u64).collect());
            ds.insert_one(&original).unwrap();
            let expected = if len == 0 { 1 } else { len.div_ceil(width) };
            prop_assert_eq!(ds.row_counts().0, expected as u64);
            prop_assert_eq!(rows_for(len, width), expected);

            let mut ds = reader(ds);
            let event = ds.read_next_event().unwrap();
            prop_assert_eq!(&event[&FragmentType::new(3)][0], &original);
        }
    }
}
