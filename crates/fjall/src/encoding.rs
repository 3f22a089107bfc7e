//! Binary layout of stored records and their keys
//!
//! Keys must sort lexicographically in numeric order, so signed positions and
//! indexes are encoded big-endian with the sign bit flipped. Partition-scoped
//! keys are length-prefixed to keep partitions from bleeding into each other
//! during range scans.

use chunklog_core::{Error, Result};

/// Longest accepted partition identifier, in bytes
pub const MAX_PARTITION_LEN: usize = 255;

/// Sortable key for a global position
pub fn position_key(position: i64) -> [u8; 8] {
    ((position as u64) ^ (1u64 << 63)).to_be_bytes()
}

pub fn position_from_key(key: &[u8]) -> Result<i64> {
    if key.len() != 8 {
        return Err(Error::Storage(format!(
            "expected 8-byte position key, got {}",
            key.len()
        )));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(key);
    Ok((u64::from_be_bytes(buf) ^ (1u64 << 63)) as i64)
}

fn partition_prefix(partition: &str) -> Result<Vec<u8>> {
    let bytes = partition.as_bytes();
    if bytes.len() > MAX_PARTITION_LEN {
        return Err(Error::InvalidOptions(format!(
            "partition id exceeds {MAX_PARTITION_LEN} bytes"
        )));
    }
    let mut key = Vec::with_capacity(1 + bytes.len());
    key.push(bytes.len() as u8);
    key.extend_from_slice(bytes);
    Ok(key)
}

/// Key of the `(partition, index)` uniqueness entry
pub fn index_key(partition: &str, index: i64) -> Result<Vec<u8>> {
    let mut key = partition_prefix(partition)?;
    key.extend_from_slice(&position_key(index));
    Ok(key)
}

/// Key of the `(partition, operation_id)` uniqueness entry
pub fn operation_key(partition: &str, operation_id: &str) -> Result<Vec<u8>> {
    let mut key = partition_prefix(partition)?;
    key.extend_from_slice(operation_id.as_bytes());
    Ok(key)
}

/// One stored record, payload still in its codec wire form
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub position: i64,
    pub partition_id: String,
    pub index: i64,
    pub operation_id: String,
    pub serializer: String,
    pub deleted: bool,
    pub payload: Vec<u8>,
}

pub fn encode_record(record: &Record) -> Result<Vec<u8>> {
    let partition = record.partition_id.as_bytes();
    if partition.len() > MAX_PARTITION_LEN {
        return Err(Error::InvalidOptions(format!(
            "partition id exceeds {MAX_PARTITION_LEN} bytes"
        )));
    }
    let operation = record.operation_id.as_bytes();
    if operation.len() > u16::MAX as usize {
        return Err(Error::Storage("operation id too long".to_string()));
    }
    let serializer = record.serializer.as_bytes();
    if serializer.len() > u8::MAX as usize {
        return Err(Error::Storage("serializer tag too long".to_string()));
    }

    let mut out = Vec::with_capacity(
        8 + 8 + 1 + 1 + partition.len() + 2 + operation.len() + 1 + serializer.len()
            + record.payload.len(),
    );
    out.extend_from_slice(&record.position.to_be_bytes());
    out.extend_from_slice(&record.index.to_be_bytes());
    out.push(record.deleted as u8);
    out.push(partition.len() as u8);
    out.extend_from_slice(partition);
    out.extend_from_slice(&(operation.len() as u16).to_be_bytes());
    out.extend_from_slice(operation);
    out.push(serializer.len() as u8);
    out.extend_from_slice(serializer);
    out.extend_from_slice(&record.payload);
    Ok(out)
}

pub fn decode_record(bytes: &[u8]) -> Result<Record> {
    let mut cursor = Cursor { bytes, at: 0 };

    let position = i64::from_be_bytes(cursor.array::<8>()?);
    let index = i64::from_be_bytes(cursor.array::<8>()?);
    let deleted = cursor.array::<1>()?[0] != 0;

    let partition_len = cursor.array::<1>()?[0] as usize;
    let partition_id = cursor.string(partition_len)?;
    let operation_len = u16::from_be_bytes(cursor.array::<2>()?) as usize;
    let operation_id = cursor.string(operation_len)?;
    let serializer_len = cursor.array::<1>()?[0] as usize;
    let serializer = cursor.string(serializer_len)?;
    let payload = cursor.rest().to_vec();

    Ok(Record {
        position,
        partition_id,
        index,
        operation_id,
        serializer,
        deleted,
        payload,
    })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.at + len > self.bytes.len() {
            return Err(Error::Storage("truncated record".to_string()));
        }
        let slice = &self.bytes[self.at..self.at + len];
        self.at += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn string(&mut self, len: usize) -> Result<String> {
        String::from_utf8(self.take(len)?.to_vec())
            .map_err(|e| Error::Storage(format!("invalid utf-8 in record: {e}")))
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.at..]
    }
}
