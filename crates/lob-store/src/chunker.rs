//! Streaming SHA-1 hasher coupled with a fixed-size chunk splitter.
//!
//! Bytes are read in [`BUF_SIZE`] units, fed through a running SHA-1 state,
//! and written to one temporary file per chunk. A rotation happens when the
//! running chunk reaches the configured chunk size. Temporary files clean
//! themselves up if ingest fails part-way.

use std::path::Path;

use lob_types::LobSha;
use sha1::{Digest, Sha1};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::StoreError;

/// Read buffer unit: 128 KiB.
pub const BUF_SIZE: usize = 131_072;

/// Result of streaming an input through the chunker.
///
/// The chunk files are still temporaries; dropping this value before they
/// are persisted removes them from disk.
pub struct ChunkedStream {
    /// SHA-1 over the complete payload, leader included.
    pub sha: LobSha,
    /// Total bytes ingested.
    pub total_size: u64,
    /// One temporary file per chunk, in index order. Empty input produces
    /// an empty list.
    pub chunks: Vec<NamedTempFile>,
}

/// Accumulates data into rotating temporary chunk files while hashing.
struct ChunkSpool<'a> {
    spool_dir: &'a Path,
    chunk_size: u64,
    hasher: Sha1,
    chunks: Vec<NamedTempFile>,
    current: Option<tokio::fs::File>,
    current_size: u64,
    total_size: u64,
}

impl<'a> ChunkSpool<'a> {
    fn new(spool_dir: &'a Path, chunk_size: u64) -> Self {
        Self {
            spool_dir,
            chunk_size,
            hasher: Sha1::new(),
            chunks: Vec::new(),
            current: None,
            current_size: 0,
            total_size: 0,
        }
    }

    /// Write a slice, rotating chunk files at the configured boundary.
    async fn write(&mut self, mut data: &[u8]) -> Result<(), StoreError> {
        while !data.is_empty() {
            if self.current.is_none() {
                let tmp = tempfile::Builder::new()
                    .prefix("tempchunk")
                    .tempfile_in(self.spool_dir)?;
                debug!(
                    index = self.chunks.len(),
                    path = %tmp.path().display(),
                    "creating temporary chunk file"
                );
                let file = tokio::fs::File::from_std(tmp.as_file().try_clone()?);
                self.chunks.push(tmp);
                self.current = Some(file);
                self.current_size = 0;
            }

            let room = (self.chunk_size - self.current_size) as usize;
            let take = room.min(data.len());
            let (head, rest) = data.split_at(take);

            self.hasher.update(head);
            let Some(file) = self.current.as_mut() else {
                return Err(StoreError::Io(std::io::Error::other(
                    "current chunk file vanished",
                )));
            };
            file.write_all(head).await?;
            self.current_size += take as u64;
            self.total_size += take as u64;
            data = rest;

            if self.current_size >= self.chunk_size {
                self.rotate().await?;
            }
        }
        Ok(())
    }

    /// Close the current chunk file; the next write opens a fresh one.
    async fn rotate(&mut self) -> Result<(), StoreError> {
        if let Some(mut file) = self.current.take() {
            file.flush().await?;
        }
        self.current_size = 0;
        Ok(())
    }

    async fn finish(mut self) -> Result<ChunkedStream, StoreError> {
        self.rotate().await?;
        let sha = LobSha::from(<[u8; 20]>::from(self.hasher.finalize()));
        Ok(ChunkedStream {
            sha,
            total_size: self.total_size,
            chunks: self.chunks,
        })
    }
}

/// Stream `reader` into temporary chunk files, hashing as it goes.
///
/// `leader` is a prefix the caller already consumed from the stream while
/// probing; it is hashed and written as the first bytes of the payload. The
/// temporary files are created inside `spool_dir` so that the later rename
/// into place stays on one filesystem.
///
/// Empty input (and empty leader) yields zero chunks and the SHA-1 of the
/// empty string. On any error all temporaries are removed before return.
pub async fn chunk_stream<R>(
    mut reader: R,
    leader: &[u8],
    chunk_size: u64,
    spool_dir: &Path,
) -> Result<ChunkedStream, StoreError>
where
    R: AsyncRead + Unpin,
{
    let mut spool = ChunkSpool::new(spool_dir, chunk_size);
    spool.write(leader).await?;

    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        spool.write(&buf[..n]).await?;
    }

    spool.finish().await
}
