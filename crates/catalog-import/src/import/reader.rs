//! Row sources
//!
//! A [`RowSource`] yields one [`RawRow`] at a time, so memory stays bounded by
//! the batch size rather than the file size. Read failures surface as
//! [`ImportError::StreamRead`] and end the run; malformed content does not.

use async_trait::async_trait;
use csv_async::{AsyncReader, AsyncReaderBuilder, ByteRecord};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use tokio::io::AsyncRead;

use crate::error::{ImportError, Result};
use crate::models::RawRow;

#[async_trait]
pub trait RowSource: Send {
    /// Next row, or `None` once the input is exhausted
    async fn next_row(&mut self) -> Result<Option<RawRow>>;

    /// Data rows handed out so far
    fn rows_read(&self) -> u64;
}

/// Delimited text with a header row.
///
/// Rows shorter than the header simply lack the trailing columns; bytes that
/// are not valid UTF-8 are replaced rather than rejected.
pub struct CsvRowSource<R> {
    label: String,
    reader: AsyncReader<R>,
    headers: Vec<String>,
    record: ByteRecord,
    rows_read: u64,
}

impl CsvRowSource<tokio::fs::File> {
    pub async fn open(path: &Path, delimiter: u8) -> Result<Self> {
        let label = path.display().to_string();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| ImportError::stream_read(&label, 0, e))?;
        Self::from_reader(label, file, delimiter).await
    }
}

impl<R> CsvRowSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Wrap any async byte stream; `label` names it in errors
    pub async fn from_reader(label: impl Into<String>, reader: R, delimiter: u8) -> Result<Self> {
        let label = label.into();
        let mut reader = AsyncReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(delimiter)
            .create_reader(reader);

        let headers = reader
            .byte_headers()
            .await
            .map_err(|e| ImportError::stream_read(&label, 0, e))?
            .iter()
            .map(|h| {
                String::from_utf8_lossy(h)
                    .trim_start_matches('\u{feff}')
                    .trim()
                    .to_string()
            })
            .collect();

        Ok(Self {
            label,
            reader,
            headers,
            record: ByteRecord::new(),
            rows_read: 0,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

#[async_trait]
impl<R> RowSource for CsvRowSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_row(&mut self) -> Result<Option<RawRow>> {
        let more = self
            .reader
            .read_byte_record(&mut self.record)
            .await
            .map_err(|e| ImportError::stream_read(&self.label, self.rows_read, e))?;

        if !more {
            return Ok(None);
        }

        self.rows_read += 1;
        let line = self
            .record
            .position()
            .map(|p| p.line())
            .unwrap_or(self.rows_read + 1);

        let fields: HashMap<String, String> = self
            .headers
            .iter()
            .zip(self.record.iter())
            .map(|(header, value)| (header.clone(), String::from_utf8_lossy(value).into_owned()))
            .collect();

        Ok(Some(RawRow::new(line, fields)))
    }

    fn rows_read(&self) -> u64 {
        self.rows_read
    }
}

/// Rows held in memory, optionally ending in a read failure
#[derive(Debug, Default)]
pub struct MemoryRowSource {
    rows: VecDeque<RawRow>,
    failure: Option<String>,
    rows_read: u64,
}

impl MemoryRowSource {
    pub fn new(rows: impl IntoIterator<Item = RawRow>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
            failure: None,
            rows_read: 0,
        }
    }

    /// Fail with `message` once the buffered rows run out
    pub fn failing_with(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }
}

#[async_trait]
impl RowSource for MemoryRowSource {
    async fn next_row(&mut self) -> Result<Option<RawRow>> {
        match self.rows.pop_front() {
            Some(row) => {
                self.rows_read += 1;
                Ok(Some(row))
            },
            None => match &self.failure {
                Some(message) => Err(ImportError::stream_read("memory", self.rows_read, message)),
                None => Ok(None),
            },
        }
    }

    fn rows_read(&self) -> u64 {
        self.rows_read
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn drain<S: RowSource>(source: &mut S) -> Vec<RawRow> {
        let mut rows = Vec::new();
        while let Some(row) = source.next_row().await.unwrap() {
            rows.push(row);
        }
        rows
    }

    #[tokio::test]
    async fn test_reads_rows_keyed_by_header() {
        let data = "sku,name,price\nA-1,Widget,9.99\nA-2,Gadget,1\n";
        let mut source = CsvRowSource::from_reader("inline", data.as_bytes(), b',')
            .await
            .unwrap();

        assert_eq!(source.headers(), &["sku", "name", "price"]);

        let rows = drain(&mut source).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("sku"), Some("A-1"));
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[1].get("price"), Some("1"));
        assert_eq!(rows[1].line, 3);
        assert_eq!(source.rows_read(), 2);
    }

    #[tokio::test]
    async fn test_short_rows_lack_trailing_columns() {
        let data = "sku,name,price\nA-1,Widget\n";
        let mut source = CsvRowSource::from_reader("inline", data.as_bytes(), b',')
            .await
            .unwrap();

        let rows = drain(&mut source).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("price"), None);
    }

    #[tokio::test]
    async fn test_header_only_input_yields_nothing() {
        let mut source = CsvRowSource::from_reader("inline", "sku,name,price\n".as_bytes(), b',')
            .await
            .unwrap();
        assert!(drain(&mut source).await.is_empty());
    }

    #[tokio::test]
    async fn test_custom_delimiter_and_bom() {
        let data = "\u{feff}sku;name;price\nA-1;Widget;2\n";
        let mut source = CsvRowSource::from_reader("inline", data.as_bytes(), b';')
            .await
            .unwrap();

        let rows = drain(&mut source).await;
        assert_eq!(rows[0].get("sku"), Some("A-1"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let data: &[u8] = b"sku,name,price\nA-1,Wid\xffget,2\n";
        let mut source = CsvRowSource::from_reader("inline", data, b',').await.unwrap();

        let rows = drain(&mut source).await;
        assert_eq!(rows[0].get("name"), Some("Wid\u{fffd}get"));
    }

    #[tokio::test]
    async fn test_missing_file_is_stream_error() {
        let result = CsvRowSource::open(Path::new("/nonexistent/products.csv"), b',').await;
        assert!(result.err().unwrap().is_stream_read());
    }

    #[tokio::test]
    async fn test_memory_source_failure() {
        let mut source =
            MemoryRowSource::new([RawRow::from_pairs(2, [("sku", "A")])]).failing_with("disk gone");

        assert!(source.next_row().await.unwrap().is_some());
        let err = source.next_row().await.unwrap_err();
        assert!(err.is_stream_read());
        assert!(err.to_string().contains("after 1 rows"));
    }
}
