//! Blob type - the unit of on-disk storage

use serde::{Deserialize, Serialize};

/// Type tag for blobs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobType {
    Commit,
    Node,
    Edge,
}

impl BlobType {
    pub fn as_byte(&self) -> u8 {
        match self {
            BlobType::Commit => 0,
            BlobType::Node => 1,
            BlobType::Edge => 2,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(BlobType::Commit),
            1 => Some(BlobType::Node),
            2 => Some(BlobType::Edge),
            _ => None,
        }
    }
}

/// A typed chunk of bincode data, zstd-compressed on disk
#[derive(Clone, Debug)]
pub struct Blob {
    pub blob_type: BlobType,
    /// Raw data (uncompressed)
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(blob_type: BlobType, data: Vec<u8>) -> Self {
        Blob { blob_type, data }
    }

    /// Serialize a record into a blob
    pub fn encode<T: Serialize>(blob_type: BlobType, record: &T) -> crate::Result<Self> {
        Ok(Blob::new(blob_type, bincode::serialize(record)?))
    }

    /// Deserialize the record, checking the type tag first
    pub fn decode<T: serde::de::DeserializeOwned>(&self, expected: BlobType) -> crate::Result<T> {
        if self.blob_type != expected {
            return Err(crate::Error::Corruption(format!(
                "Expected {:?}, got {:?}",
                expected, self.blob_type
            )));
        }
        Ok(bincode::deserialize(&self.data)?)
    }

    /// Compress the blob for storage
    pub fn compress(&self) -> crate::Result<Vec<u8>> {
        let mut output = vec![self.blob_type.as_byte()];
        output.extend(zstd::encode_all(self.data.as_slice(), 3)?);
        Ok(output)
    }

    /// Decompress a blob read from storage
    pub fn decompress(data: &[u8]) -> crate::Result<Self> {
        let (&tag, body) = data
            .split_first()
            .ok_or_else(|| crate::Error::Corruption("Empty blob data".into()))?;

        let blob_type = BlobType::from_byte(tag)
            .ok_or_else(|| crate::Error::Corruption(format!("Invalid blob type: {}", tag)))?;

        Ok(Blob {
            blob_type,
            data: zstd::decode_all(body)?,
        })
    }
}
