//! Fixed-size chunking of upload sources.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::io::ReaderStream;

use cloudstorage_common::{Error, Result};

use crate::blob::BlobSource;
use crate::checksum::ContentHasher;
use crate::driver::ByteStream;

const READ_BUFFER: usize = 64 * 1024;

/// Turn any source into a byte stream. Files are read incrementally.
pub(crate) async fn into_stream(source: BlobSource) -> Result<ByteStream> {
    match source {
        BlobSource::Bytes(bytes) => Ok(stream::once(async move { Ok(bytes) }).boxed()),
        BlobSource::Path(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| Error::cloud_with(format!("Failed to open {}", path.display()), e))?;
            Ok(ReaderStream::with_capacity(file, READ_BUFFER)
                .map_err(|e| Error::cloud_with("Failed to read upload source", e))
                .boxed())
        }
        BlobSource::Stream(stream) => Ok(stream),
    }
}

/// Re-slices a source into chunks of exactly `chunk_size` bytes (the last
/// one may be shorter) while hashing everything it hands out.
pub(crate) struct ChunkReader {
    stream: ByteStream,
    chunk_size: usize,
    buffer: BytesMut,
    hasher: ContentHasher,
    exhausted: bool,
}

impl ChunkReader {
    pub(crate) async fn open(source: BlobSource, chunk_size: usize) -> Result<Self> {
        Ok(Self {
            stream: into_stream(source).await?,
            chunk_size: chunk_size.max(1),
            buffer: BytesMut::new(),
            hasher: ContentHasher::new(),
            exhausted: false,
        })
    }

    /// Next chunk, or `None` once the source is drained.
    pub(crate) async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        while self.buffer.len() < self.chunk_size && !self.exhausted {
            match self.stream.next().await {
                Some(chunk) => self.buffer.extend_from_slice(&chunk?),
                None => self.exhausted = true,
            }
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let take = self.chunk_size.min(self.buffer.len());
        let chunk = self.buffer.split_to(take).freeze();
        self.hasher.update(&chunk);
        Ok(Some(chunk))
    }

    /// Bytes handed out so far.
    pub(crate) fn len(&self) -> u64 {
        self.hasher.len()
    }

    /// Hex MD5 of everything handed out so far.
    pub(crate) fn hex_digest(&self) -> String {
        self.hasher.hex_digest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::md5_hex;
    use tempfile::TempDir;

    async fn drain(mut reader: ChunkReader) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_rechunks_uneven_stream() {
        let parts = vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cdefg")),
            Ok(Bytes::from_static(b"h")),
            Ok(Bytes::from_static(b"ijk")),
        ];
        let reader = ChunkReader::open(BlobSource::stream(stream::iter(parts)), 4)
            .await
            .unwrap();
        let chunks = drain(reader).await;
        assert_eq!(chunks, vec![&b"abcd"[..], &b"efgh"[..], &b"ijk"[..]]);
    }

    #[tokio::test]
    async fn test_tracks_length_and_digest() {
        let mut reader = ChunkReader::open(BlobSource::from(b"a,b,c"), 2).await.unwrap();
        while reader.next_chunk().await.unwrap().is_some() {}
        assert_eq!(reader.len(), 5);
        assert_eq!(reader.hex_digest(), md5_hex(b"a,b,c"));
    }

    #[tokio::test]
    async fn test_empty_source_yields_nothing() {
        let reader = ChunkReader::open(BlobSource::from(Vec::<u8>::new()), 8).await.unwrap();
        assert!(drain(reader).await.is_empty());
    }

    #[tokio::test]
    async fn test_reads_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let data: Vec<u8> = (0..200u8).collect();
        tokio::fs::write(&path, &data).await.unwrap();

        let reader = ChunkReader::open(BlobSource::path(&path), 64).await.unwrap();
        let chunks = drain(reader).await;
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn test_missing_file_is_cloud_error() {
        let err = ChunkReader::open(BlobSource::path("/nonexistent/file"), 8)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("Failed to open"));
    }
}
