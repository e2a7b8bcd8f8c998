//! Fixed-width columnar tables.
//!
//! A table is declared by a schema record and filled by chunk records of
//! up to `chunk_rows` rows each:
//!
//! ```text
//! schema := CBOR(TableSchema)
//! chunk  := | table_id u8 | row_count u32 | row * row_count |
//! row    := every column's values in declaration order, little-endian,
//!           each value as wide as its column type
//! ```
//!
//! In memory a row is a flat `&[u64]` of [`TableSchema::row_width`]
//! values. Readers index chunk records on load and keep one decoded chunk.

use super::{Record, RecordFile, RecordKind};
use crate::error::{DatasetError, DatasetResult};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace};

const CHUNK_HEADER_SIZE: usize = 5;

/// Element type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// 8-bit unsigned.
    U8,
    /// 16-bit unsigned.
    U16,
    /// 32-bit unsigned.
    U32,
    /// 64-bit unsigned.
    U64,
}

impl ColumnType {
    /// Encoded size of one value.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }

    /// Largest representable value.
    #[must_use]
    pub const fn max(self) -> u64 {
        match self {
            Self::U8 => u8::MAX as u64,
            Self::U16 => u16::MAX as u64,
            Self::U32 => u32::MAX as u64,
            Self::U64 => u64::MAX,
        }
    }

    fn put(self, buf: &mut Vec<u8>, value: u64) {
        match self {
            Self::U8 => buf.put_u8(value as u8),
            Self::U16 => buf.put_u16_le(value as u16),
            Self::U32 => buf.put_u32_le(value as u32),
            Self::U64 => buf.put_u64_le(value),
        }
    }

    fn get(self, buf: &mut &[u8]) -> u64 {
        match self {
            Self::U8 => u64::from(buf.get_u8()),
            Self::U16 => u64::from(buf.get_u16_le()),
            Self::U32 => u64::from(buf.get_u32_le()),
            Self::U64 => buf.get_u64_le(),
        }
    }
}

/// One named column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Element type.
    pub ty: ColumnType,
    /// Values per row (1 for scalars).
    pub width: usize,
}

impl ColumnSpec {
    /// A one-value column.
    #[must_use]
    pub fn scalar(name: &str, ty: ColumnType) -> Self {
        Self::array(name, ty, 1)
    }

    /// A fixed-width array column.
    #[must_use]
    pub fn array(name: &str, ty: ColumnType, width: usize) -> Self {
        Self {
            name: name.to_string(),
            ty,
            width,
        }
    }
}

/// Declaration of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Identifies the table's chunk records.
    pub table_id: u8,
    /// Table name.
    pub name: String,
    /// Columns in row order.
    pub columns: Vec<ColumnSpec>,
    /// Rows per full chunk.
    pub chunk_rows: usize,
}

impl TableSchema {
    /// Values per row.
    #[must_use]
    pub fn row_width(&self) -> usize {
        self.columns.iter().map(|c| c.width).sum()
    }

    /// Encoded bytes per row.
    #[must_use]
    pub fn row_bytes(&self) -> usize {
        self.columns.iter().map(|c| c.width * c.ty.size()).sum()
    }

    /// Position of a column's first value within a row.
    #[must_use]
    pub fn column_offset(&self, name: &str) -> Option<usize> {
        let mut offset = 0;
        for column in &self.columns {
            if column.name == name {
                return Some(offset);
            }
            offset += column.width;
        }
        None
    }

    /// Like [`TableSchema::column_offset`], failing for unknown columns.
    ///
    /// # Errors
    ///
    /// Fails if the table has no such column.
    pub fn require_column(&self, name: &str) -> DatasetResult<usize> {
        self.column_offset(name).ok_or_else(|| {
            DatasetError::invalid_format(format!("table {} has no column {name}", self.name))
        })
    }

    fn encode(&self) -> DatasetResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|err| DatasetError::metadata(format!("table schema: {err}")))?;
        Ok(buf)
    }

    fn decode(bytes: &[u8]) -> DatasetResult<Self> {
        ciborium::from_reader(bytes)
            .map_err(|err| DatasetError::metadata(format!("table schema: {err}")))
    }

    fn encode_row(&self, buf: &mut Vec<u8>, values: &[u64]) -> DatasetResult<()> {
        if values.len() != self.row_width() {
            return Err(DatasetError::invalid_format(format!(
                "row of {} values for table {} of width {}",
                values.len(),
                self.name,
                self.row_width()
            )));
        }
        let mut values = values.iter();
        for column in &self.columns {
            for value in values.by_ref().take(column.width) {
                if *value > column.ty.max() {
                    return Err(DatasetError::ValueOutOfRange {
                        column: column.name.clone(),
                        value: *value,
                    });
                }
                column.ty.put(buf, *value);
            }
        }
        Ok(())
    }

    fn decode_rows(&self, mut bytes: &[u8], rows: usize) -> DatasetResult<Vec<u64>> {
        if bytes.len() != rows * self.row_bytes() {
            return Err(DatasetError::invalid_format(format!(
                "chunk of {} bytes cannot hold {rows} rows of table {}",
                bytes.len(),
                self.name
            )));
        }
        let mut values = Vec::with_capacity(rows * self.row_width());
        for _ in 0..rows {
            for column in &self.columns {
                for _ in 0..column.width {
                    values.push(column.ty.get(&mut bytes));
                }
            }
        }
        Ok(values)
    }
}

/// Appends rows to a table, one chunk record per `chunk_rows` rows.
#[derive(Debug)]
pub struct TableWriter {
    schema: TableSchema,
    pending: Vec<u8>,
    pending_rows: usize,
    rows_written: u64,
}

impl TableWriter {
    /// Declares the table in `file`.
    ///
    /// # Errors
    ///
    /// Fails if the schema record cannot be written.
    pub fn create(file: &mut RecordFile, mut schema: TableSchema) -> DatasetResult<Self> {
        schema.chunk_rows = schema.chunk_rows.max(1);
        file.append(&Record::new(RecordKind::TableSchema, schema.encode()?))?;
        debug!(table = %schema.name, columns = schema.columns.len(), "declared table");
        Ok(Self {
            schema,
            pending: Vec::new(),
            pending_rows: 0,
            rows_written: 0,
        })
    }

    /// The table's schema.
    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Rows appended so far, buffered ones included.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.rows_written + self.pending_rows as u64
    }

    /// Appends one row and returns its index.
    ///
    /// # Errors
    ///
    /// Fails if the row has the wrong width, a value does not fit its
    /// column, or a full chunk cannot be written. A rejected row leaves the
    /// table unchanged.
    pub fn push_row(&mut self, file: &mut RecordFile, values: &[u64]) -> DatasetResult<u64> {
        let mut row = Vec::with_capacity(self.schema.row_bytes());
        self.schema.encode_row(&mut row, values)?;

        let index = self.row_count();
        self.pending.extend_from_slice(&row);
        self.pending_rows += 1;
        trace!(table = %self.schema.name, row = index, "buffered row");

        if self.pending_rows >= self.schema.chunk_rows {
            self.flush(file)?;
        }
        Ok(index)
    }

    /// Writes buffered rows as a (possibly short) chunk.
    ///
    /// # Errors
    ///
    /// Fails if the chunk record cannot be written.
    pub fn flush(&mut self, file: &mut RecordFile) -> DatasetResult<()> {
        if self.pending_rows == 0 {
            return Ok(());
        }

        let rows = u32::try_from(self.pending_rows)
            .map_err(|_| DatasetError::invalid_format("chunk row count exceeds 32 bits"))?;
        let mut payload = Vec::with_capacity(CHUNK_HEADER_SIZE + self.pending.len());
        payload.put_u8(self.schema.table_id);
        payload.put_u32_le(rows);
        payload.extend_from_slice(&self.pending);
        file.append(&Record::new(RecordKind::TableChunk, payload))?;

        debug!(table = %self.schema.name, rows, "wrote chunk");
        self.rows_written += u64::from(rows);
        self.pending.clear();
        self.pending_rows = 0;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct ChunkRef {
    offset: u64,
    first_row: u64,
    rows: u64,
}

/// Random-access reader over one table.
#[derive(Debug)]
pub struct TableReader {
    schema: TableSchema,
    chunks: Vec<ChunkRef>,
    rows: u64,
    cache: Option<(usize, Vec<u64>)>,
}

impl TableReader {
    fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            chunks: Vec::new(),
            rows: 0,
            cache: None,
        }
    }

    /// Indexes every table declared in `file`, keyed by table name.
    ///
    /// # Errors
    ///
    /// Fails if a record does not verify, a schema does not decode or a
    /// chunk refers to an undeclared table.
    pub fn load_all(file: &RecordFile) -> DatasetResult<BTreeMap<String, Self>> {
        let mut by_id: BTreeMap<u8, Self> = BTreeMap::new();

        file.scan(|offset, record| {
            match record.kind {
                RecordKind::TableSchema => {
                    let schema = TableSchema::decode(&record.payload)?;
                    by_id.insert(schema.table_id, Self::new(schema));
                }
                RecordKind::TableChunk => {
                    if record.payload.len() < CHUNK_HEADER_SIZE {
                        return Err(DatasetError::invalid_format(format!(
                            "chunk record at offset {offset} is too short"
                        )));
                    }
                    let mut header = &record.payload[..CHUNK_HEADER_SIZE];
                    let table_id = header.get_u8();
                    let rows = u64::from(header.get_u32_le());
                    let table = by_id.get_mut(&table_id).ok_or_else(|| {
                        DatasetError::invalid_format(format!(
                            "chunk at offset {offset} for undeclared table {table_id}"
                        ))
                    })?;
                    table.chunks.push(ChunkRef {
                        offset,
                        first_row: table.rows,
                        rows,
                    });
                    table.rows += rows;
                }
                _ => {}
            }
            Ok(())
        })?;

        Ok(by_id
            .into_values()
            .map(|table| (table.schema.name.clone(), table))
            .collect())
    }

    /// The table's schema.
    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Number of rows.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.rows
    }

    /// Returns the values of row `row`.
    ///
    /// # Errors
    ///
    /// Fails if `row` is out of range or its chunk does not decode.
    pub fn read_row(&mut self, file: &RecordFile, row: u64) -> DatasetResult<&[u64]> {
        let chunk_index = self
            .chunks
            .partition_point(|chunk| chunk.first_row + chunk.rows <= row);
        let chunk = *self.chunks.get(chunk_index).ok_or_else(|| {
            DatasetError::invalid_format(format!(
                "row {row} out of range for table {} of {} rows",
                self.schema.name, self.rows
            ))
        })?;

        if self.cache.as_ref().map(|(index, _)| *index) != Some(chunk_index) {
            let record = file.read_record(chunk.offset)?;
            let values = self
                .schema
                .decode_rows(&record.payload[CHUNK_HEADER_SIZE..], chunk.rows as usize)?;
            trace!(table = %self.schema.name, chunk = chunk_index, "loaded chunk");
            self.cache = Some((chunk_index, values));
        }

        let width = self.schema.row_width();
        let local = (row - chunk.first_row) as usize;
        match &self.cache {
            Some((_, values)) => Ok(&values[local * width..(local + 1) * width]),
            None => Err(DatasetError::invalid_format("chunk cache empty after load")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutKind;
    use daqstore_storage::InMemoryBackend;

    fn schema(chunk_rows: usize) -> TableSchema {
        TableSchema {
            table_id: 0,
            name: "Samples".to_string(),
            columns: vec![
                ColumnSpec::scalar("id", ColumnType::U64),
                ColumnSpec::scalar("channel", ColumnType::U8),
                ColumnSpec::array("adc", ColumnType::U16, 3),
            ],
            chunk_rows,
        }
    }

    fn new_file() -> RecordFile {
        RecordFile::create(Box::new(InMemoryBackend::new()), LayoutKind::Ntuple).unwrap()
    }

    fn reopen(file: &RecordFile) -> RecordFile {
        let bytes = file.read_bytes(0, file.size().unwrap() as usize).unwrap();
        RecordFile::open(Box::new(InMemoryBackend::with_data(bytes))).unwrap()
    }

    #[test]
    fn schema_geometry() {
        let schema = schema(4);
        assert_eq!(schema.row_width(), 5);
        assert_eq!(schema.row_bytes(), 8 + 1 + 6);
        assert_eq!(schema.column_offset("channel"), Some(1));
        assert_eq!(schema.column_offset("adc"), Some(2));
        assert_eq!(schema.column_offset("missing"), None);
        assert!(schema.require_column("missing").is_err());
    }

    #[test]
    fn rows_roundtrip_across_chunks() {
        let mut file = new_file();
        let mut writer = TableWriter::create(&mut file, schema(2)).unwrap();
        for i in 0..5u64 {
            let index = writer.push_row(&mut file, &[i, i % 3, i, i + 1, i + 2]).unwrap();
            assert_eq!(index, i);
        }
        writer.flush(&mut file).unwrap();

        let file = reopen(&file);
        let mut tables = TableReader::load_all(&file).unwrap();
        let table = tables.get_mut("Samples").unwrap();
        assert_eq!(table.row_count(), 5);
        assert_eq!(table.chunks.len(), 3);
        assert_eq!(table.read_row(&file, 4).unwrap(), &[4, 1, 4, 5, 6]);
        assert_eq!(table.read_row(&file, 0).unwrap(), &[0, 0, 0, 1, 2]);
        assert_eq!(table.read_row(&file, 3).unwrap(), &[3, 0, 3, 4, 5]);
        assert!(table.read_row(&file, 5).is_err());
    }

    #[test]
    fn unflushed_rows_are_not_visible() {
        let mut file = new_file();
        let mut writer = TableWriter::create(&mut file, schema(10)).unwrap();
        writer.push_row(&mut file, &[1, 1, 1, 1, 1]).unwrap();
        assert_eq!(writer.row_count(), 1);

        let tables = TableReader::load_all(&reopen(&file)).unwrap();
        assert_eq!(tables["Samples"].row_count(), 0);
    }

    #[test]
    fn out_of_range_value_is_rejected() {
        let mut file = new_file();
        let mut writer = TableWriter::create(&mut file, schema(2)).unwrap();
        let result = writer.push_row(&mut file, &[1, 256, 0, 0, 0]);
        assert!(matches!(
            result,
            Err(DatasetError::ValueOutOfRange { ref column, value: 256 }) if column == "channel"
        ));
        assert_eq!(writer.row_count(), 0);
    }

    #[test]
    fn wrong_row_width_is_rejected() {
        let mut file = new_file();
        let mut writer = TableWriter::create(&mut file, schema(2)).unwrap();
        assert!(writer.push_row(&mut file, &[1, 2]).is_err());
    }

    #[test]
    fn zero_chunk_rows_still_makes_progress() {
        let mut file = new_file();
        let mut writer = TableWriter::create(&mut file, schema(0)).unwrap();
        writer.push_row(&mut file, &[1, 1, 1, 1, 1]).unwrap();
        let tables = TableReader::load_all(&reopen(&file)).unwrap();
        assert_eq!(tables["Samples"].row_count(), 1);
    }

    #[test]
    fn two_tables_share_a_file() {
        let mut file = new_file();
        let mut a = TableWriter::create(&mut file, schema(1)).unwrap();
        let mut other = schema(1);
        other.table_id = 1;
        other.name = "Other".to_string();
        let mut b = TableWriter::create(&mut file, other).unwrap();

        a.push_row(&mut file, &[1, 0, 0, 0, 0]).unwrap();
        b.push_row(&mut file, &[2, 0, 0, 0, 0]).unwrap();
        a.push_row(&mut file, &[3, 0, 0, 0, 0]).unwrap();

        let file = reopen(&file);
        let mut tables = TableReader::load_all(&file).unwrap();
        assert_eq!(tables["Samples"].row_count(), 2);
        assert_eq!(tables["Other"].row_count(), 1);
        let samples = tables.get_mut("Samples").unwrap();
        assert_eq!(samples.read_row(&file, 1).unwrap()[0], 3);
    }
}
