use crate::error::{FusionError, Result};
use crate::frames::FrameRows;
use polars::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Destination for fused partitions. The fuser hands over one batch per
/// profile partition and never holds more than that in memory.
pub trait RowSink<R> {
    fn write_batch(&mut self, profile_id: &str, rows: Vec<R>) -> Result<()>;

    /// Flushes buffered output and returns the number of rows written.
    fn finish(&mut self) -> Result<u64>;
}

/// Collects everything in memory. Only suitable for small runs and tests.
#[derive(Debug)]
pub struct VecSink<R> {
    pub rows: Vec<R>,
}

impl<R> VecSink<R> {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<R> Default for VecSink<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> RowSink<R> for VecSink<R> {
    fn write_batch(&mut self, _profile_id: &str, rows: Vec<R>) -> Result<()> {
        self.rows.extend(rows);
        Ok(())
    }

    fn finish(&mut self) -> Result<u64> {
        Ok(self.rows.len() as u64)
    }
}

/// Discards rows, keeping only the count.
#[derive(Debug, Default)]
pub struct CountingSink {
    pub rows: u64,
    pub batches: usize,
}

impl<R> RowSink<R> for CountingSink {
    fn write_batch(&mut self, _profile_id: &str, rows: Vec<R>) -> Result<()> {
        self.rows += rows.len() as u64;
        self.batches += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<u64> {
        Ok(self.rows)
    }
}

/// Streams rows to CSV through serde, one record at a time.
pub struct CsvRowSink<W: Write> {
    writer: csv::Writer<W>,
    rows: u64,
}

impl CsvRowSink<File> {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> CsvRowSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(inner),
            rows: 0,
        }
    }
}

impl<R: Serialize, W: Write> RowSink<R> for CsvRowSink<W> {
    fn write_batch(&mut self, _profile_id: &str, rows: Vec<R>) -> Result<()> {
        for row in &rows {
            self.writer.serialize(row)?;
        }
        self.rows += rows.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<u64> {
        self.writer.flush()?;
        Ok(self.rows)
    }
}

/// Writes each partition as its own Parquet row group.
pub struct ParquetRowSink {
    writer: Option<polars::io::parquet::write::BatchedWriter<File>>,
    file: Option<File>,
    rows: u64,
}

impl ParquetRowSink {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            writer: None,
            file: Some(File::create(path)?),
            rows: 0,
        })
    }
}

impl<R: FrameRows> RowSink<R> for ParquetRowSink {
    fn write_batch(&mut self, _profile_id: &str, rows: Vec<R>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let df = R::to_frame(&rows)?;

        if self.writer.is_none() {
            let file = self.file.take().ok_or_else(|| FusionError::Sink {
                message: "parquet sink already finished".to_string(),
            })?;
            let writer = ParquetWriter::new(file)
                .with_compression(ParquetCompression::Snappy)
                .batched(&df.schema())?;
            self.writer = Some(writer);
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.write_batch(&df)?;
        }
        self.rows += rows.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<u64> {
        match self.writer.as_mut() {
            Some(writer) => {
                writer.finish()?;
            }
            None => {
                // Nothing was fused; still leave a valid, empty file behind
                if let Some(file) = self.file.take() {
                    let mut empty = R::to_frame(&[])?;
                    ParquetWriter::new(file).finish(&mut empty)?;
                }
            }
        }
        Ok(self.rows)
    }
}

/// Arrow IPC counterpart of [`ParquetRowSink`], one record batch per partition.
pub struct IpcRowSink {
    writer: Option<polars::io::ipc::BatchedWriter<File>>,
    file: Option<File>,
    rows: u64,
}

impl IpcRowSink {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            writer: None,
            file: Some(File::create(path)?),
            rows: 0,
        })
    }
}

impl<R: FrameRows> RowSink<R> for IpcRowSink {
    fn write_batch(&mut self, _profile_id: &str, rows: Vec<R>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let df = R::to_frame(&rows)?;

        if self.writer.is_none() {
            let file = self.file.take().ok_or_else(|| FusionError::Sink {
                message: "ipc sink already finished".to_string(),
            })?;
            self.writer = Some(IpcWriter::new(file).batched(&df.schema())?);
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.write_batch(&df)?;
        }
        self.rows += rows.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<u64> {
        match self.writer.as_mut() {
            Some(writer) => {
                writer.finish()?;
            }
            None => {
                if let Some(file) = self.file.take() {
                    let mut empty = R::to_frame(&[])?;
                    IpcWriter::new(file).finish(&mut empty)?;
                }
            }
        }
        Ok(self.rows)
    }
}

/// Fans every batch out to several sinks.
pub struct TeeSink<R> {
    sinks: Vec<Box<dyn RowSink<R>>>,
}

impl<R> TeeSink<R> {
    pub fn new(sinks: Vec<Box<dyn RowSink<R>>>) -> Self {
        Self { sinks }
    }
}

impl<R: Clone> RowSink<R> for TeeSink<R> {
    fn write_batch(&mut self, profile_id: &str, rows: Vec<R>) -> Result<()> {
        if let Some((last, rest)) = self.sinks.split_last_mut() {
            for sink in rest {
                sink.write_batch(profile_id, rows.clone())?;
            }
            last.write_batch(profile_id, rows)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<u64> {
        let mut written = 0;
        for sink in &mut self.sinks {
            written = sink.finish()?;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FusedRow;
    use chrono::NaiveDate;

    fn row(zip: &str, hour: u8) -> FusedRow {
        FusedRow {
            zip_code: zip.to_string(),
            profile_id: "1_1_NS_C".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            hour,
            kwh: 0.25,
        }
    }

    #[test]
    fn test_csv_sink_writes_header_once() {
        let mut sink = CsvRowSink::new(Vec::new());
        sink.write_batch("1_1_NS_C", vec![row("02108", 0)]).unwrap();
        sink.write_batch("1_1_NS_C", vec![row("90210", 1)]).unwrap();
        assert_eq!(RowSink::<FusedRow>::finish(&mut sink).unwrap(), 2);

        let bytes = sink.writer.into_inner().map_err(|e| e.to_string()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "zip_code,profile_id,date,hour,kwh");
        assert_eq!(lines[1], "02108,1_1_NS_C,2024-04-01,0,0.25");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_parquet_sink_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fused.parquet");

        let mut sink = ParquetRowSink::create(&path).unwrap();
        sink.write_batch("1_1_NS_C", vec![row("90210", 0), row("90210", 1)])
            .unwrap();
        sink.write_batch("1_1_NS_C", vec![row("90211", 0)]).unwrap();
        assert_eq!(RowSink::<FusedRow>::finish(&mut sink).unwrap(), 3);

        let df = ParquetReader::new(File::open(&path).unwrap()).finish().unwrap();
        assert_eq!(df.height(), 3);
        assert_eq!(df.column("zip_code").unwrap().str().unwrap().get(2), Some("90211"));
    }

    #[test]
    fn test_ipc_sink_without_batches_leaves_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fused.arrow");

        let mut sink = IpcRowSink::create(&path).unwrap();
        assert_eq!(RowSink::<FusedRow>::finish(&mut sink).unwrap(), 0);

        let df = IpcReader::new(File::open(&path).unwrap()).finish().unwrap();
        assert_eq!(df.height(), 0);
        assert_eq!(df.width(), 5);
    }

    #[test]
    fn test_tee_sink_feeds_every_sink() {
        let mut tee: TeeSink<FusedRow> = TeeSink::new(vec![
            Box::new(CountingSink::default()),
            Box::new(VecSink::new()),
        ]);
        tee.write_batch("1_1_NS_C", vec![row("90210", 0), row("90210", 1)])
            .unwrap();
        assert_eq!(tee.finish().unwrap(), 2);
    }
}
