//! Length-delimited record files
//!
//! Each record is `[len: u64 LE][crc: u32 LE][payload]` where the CRC
//! covers the payload bytes and payloads are MessagePack-encoded messages.
//! Readers refuse records whose CRC does not match, which is how a
//! checkpoint written without its `DONE` marker is caught even if a caller
//! bypasses the marker check.

use crate::{Error, Result};
use crc::{Crc, CRC_32_ISCSI};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Refuse records claiming to be larger than this; protects readers from
/// a corrupt length prefix allocating unbounded memory.
const MAX_RECORD_LEN: u64 = 1 << 32;

/// Writes framed records to one file
pub struct RecordWriter {
    path: PathBuf,
    file: BufWriter<File>,
    records: u64,
}

impl RecordWriter {
    /// Create (truncate) the record file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = BufWriter::new(File::create(&path)?);
        Ok(Self {
            path,
            file,
            records: 0,
        })
    }

    /// Append one message
    pub fn write<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let payload = rmp_serde::to_vec_named(message)?;
        let crc = CASTAGNOLI.checksum(&payload);
        self.file.write_all(&(payload.len() as u64).to_le_bytes())?;
        self.file.write_all(&crc.to_le_bytes())?;
        self.file.write_all(&payload)?;
        self.records += 1;
        Ok(())
    }

    /// Number of records written so far
    pub fn records_written(&self) -> u64 {
        self.records
    }

    /// Flush buffers and sync the file to disk
    pub fn finish(mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }

    /// Path this writer appends to
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads framed records from one file
pub struct RecordReader {
    path: PathBuf,
    file: BufReader<File>,
}

impl RecordReader {
    /// Open the record file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = BufReader::new(File::open(&path)?);
        Ok(Self { path, file })
    }

    fn corrupt(&self, message: impl Into<String>) -> Error {
        Error::CorruptRecord {
            path: self.path.display().to_string(),
            message: message.into(),
        }
    }

    /// Read the next message, or `None` at a clean end of file
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        let mut len_bytes = [0u8; 8];
        match self.file.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        let len = u64::from_le_bytes(len_bytes);
        if len > MAX_RECORD_LEN {
            return Err(self.corrupt(format!("record length {len} exceeds limit")));
        }

        let mut crc_bytes = [0u8; 4];
        self.file
            .read_exact(&mut crc_bytes)
            .map_err(|_| self.corrupt("truncated record header"))?;
        let expected_crc = u32::from_le_bytes(crc_bytes);

        let mut payload = vec![0u8; len as usize];
        self.file
            .read_exact(&mut payload)
            .map_err(|_| self.corrupt("truncated record payload"))?;

        let crc = CASTAGNOLI.checksum(&payload);
        if crc != expected_crc {
            return Err(self.corrupt(format!(
                "checksum mismatch: expected {expected_crc:#010x}, got {crc:#010x}"
            )));
        }

        Ok(Some(rmp_serde::from_slice(&payload)?))
    }

    /// Read every remaining message
    pub fn read_all<T: DeserializeOwned>(&mut self) -> Result<Vec<T>> {
        let mut messages = Vec::new();
        while let Some(message) = self.read()? {
            messages.push(message);
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Message {
        id: u64,
        name: String,
        values: Vec<f64>,
    }

    fn message(id: u64) -> Message {
        Message {
            id,
            name: format!("message-{id}"),
            values: vec![id as f64, 0.5],
        }
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records");

        let mut writer = RecordWriter::create(&path).unwrap();
        for id in 0..5 {
            writer.write(&message(id)).unwrap();
        }
        assert_eq!(writer.records_written(), 5);
        writer.finish().unwrap();

        let mut reader = RecordReader::open(&path).unwrap();
        let messages: Vec<Message> = reader.read_all().unwrap();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[3], message(3));
    }

    #[test]
    fn test_empty_file_reads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records");
        RecordWriter::create(&path).unwrap().finish().unwrap();

        let mut reader = RecordReader::open(&path).unwrap();
        assert!(reader.read::<Message>().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_payload_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records");

        let mut writer = RecordWriter::create(&path).unwrap();
        writer.write(&message(1)).unwrap();
        writer.finish().unwrap();

        // Flip one payload byte past the 12-byte header.
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let mut reader = RecordReader::open(&path).unwrap();
        let result = reader.read::<Message>();
        assert!(matches!(result, Err(Error::CorruptRecord { .. })));
    }

    #[test]
    fn test_truncated_file_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records");

        let mut writer = RecordWriter::create(&path).unwrap();
        writer.write(&message(1)).unwrap();
        writer.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let mut reader = RecordReader::open(&path).unwrap();
        assert!(reader.read::<Message>().is_err());
    }
}
