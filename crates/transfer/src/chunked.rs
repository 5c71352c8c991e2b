use std::io::SeekFrom;
use std::sync::Arc;

use ingest_protocol::{Blob, BlobData};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// A contiguous byte range of a source.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Byte offset within the source.
    pub offset: u64,
    pub data: Vec<u8>,
}

enum Source {
    Memory(Arc<[u8]>),
    File(tokio::fs::File),
}

/// Reads a blob in fixed-size chunks, starting at any offset.
pub struct ChunkReader {
    source: Source,
    chunk_size: u64,
    offset: u64,
    size: u64,
}

impl ChunkReader {
    /// Opens `blob` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used. The blob's
    /// declared size is authoritative; a file that shrank since it was
    /// queued surfaces as an I/O error on read.
    pub async fn open(blob: &Blob, chunk_size: u64) -> Result<Self, TransferError> {
        let source = match &blob.data {
            BlobData::Memory(bytes) => Source::Memory(Arc::clone(bytes)),
            BlobData::File(path) => Source::File(tokio::fs::File::open(path).await?),
        };
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            source,
            chunk_size,
            offset: 0,
            size: blob.size,
        })
    }

    /// Seeks to the given byte offset (for resume).
    pub async fn seek_to(&mut self, offset: u64) -> Result<(), TransferError> {
        let offset = offset.min(self.size);
        if let Source::File(file) = &mut self.source {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        self.offset = offset;
        Ok(())
    }

    /// Reads the next chunk. Returns `None` at the end of the blob.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = remaining.min(self.chunk_size) as usize;
        let data = match &mut self.source {
            Source::Memory(bytes) => {
                let start = self.offset as usize;
                bytes
                    .get(start..start + read_size)
                    .ok_or_else(|| {
                        std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "blob is shorter than its declared size",
                        )
                    })?
                    .to_vec()
            }
            Source::File(file) => {
                let mut buf = vec![0u8; read_size];
                file.read_exact(&mut buf).await?;
                buf
            }
        };

        let chunk = Chunk {
            offset: self.offset,
            data,
        };
        self.offset += read_size as u64;
        Ok(Some(chunk))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.size - self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::{Path, PathBuf};

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[tokio::test]
    async fn reads_memory_blob_in_chunks() {
        let blob = Blob::from_bytes("m.bin", b"AABBCCDDEE".to_vec());
        let mut reader = ChunkReader::open(&blob, 4).await.unwrap();
        assert_eq!(reader.size(), 10);

        let c1 = reader.next_chunk().await.unwrap().unwrap();
        assert_eq!((c1.offset, c1.data.as_slice()), (0, &b"AABB"[..]));
        let c2 = reader.next_chunk().await.unwrap().unwrap();
        assert_eq!((c2.offset, c2.data.as_slice()), (4, &b"CCDD"[..]));
        let c3 = reader.next_chunk().await.unwrap().unwrap();
        assert_eq!((c3.offset, c3.data.as_slice()), (8, &b"EE"[..]));
        assert!(reader.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_blob_seek_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_test_file(dir.path(), "f.bin", b"0123456789");
        let blob = Blob::from_path(&path).unwrap();

        let mut reader = ChunkReader::open(&blob, 4).await.unwrap();
        reader.seek_to(6).await.unwrap();
        assert_eq!(reader.remaining(), 4);

        let c = reader.next_chunk().await.unwrap().unwrap();
        assert_eq!(c.offset, 6);
        assert_eq!(&c.data, b"6789");
        assert!(reader.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn seek_past_end_clamps() {
        let blob = Blob::from_bytes("m.bin", b"abc".to_vec());
        let mut reader = ChunkReader::open(&blob, 2).await.unwrap();
        reader.seek_to(99).await.unwrap();
        assert_eq!(reader.offset(), 3);
        assert!(reader.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_chunk_size_uses_default() {
        let blob = Blob::from_bytes("m.bin", vec![1u8; 100]);
        let mut reader = ChunkReader::open(&blob, 0).await.unwrap();
        let c = reader.next_chunk().await.unwrap().unwrap();
        assert_eq!(c.data.len(), 100);
    }

    #[tokio::test]
    async fn truncated_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_test_file(dir.path(), "f.bin", b"0123456789");
        let blob = Blob::from_path(&path).unwrap();
        std::fs::write(&path, b"01").unwrap();

        let mut reader = ChunkReader::open(&blob, 8).await.unwrap();
        let err = reader.next_chunk().await.unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
    }
}
