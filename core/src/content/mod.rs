//! Dirty-content backends for a [FileInode](crate::file_inode::FileInode)
//! with local modifications not yet synced to the store.
//!
//! Two backends exist, mirroring the two ways a file acquires local
//! content:
//!
//! - [Backend::Streaming]: an append-only writer, used while a freshly
//!   created file is being written sequentially for the first time. Never
//!   buffers more than the kernel has handed us.
//! - [Backend::TempFile]: a random-access local copy, used once a caller
//!   seeks backward, truncates, or opens an existing file for read-modify
//!   write. Backed by [async_tempfile::TempFile], the same "spill to a
//!   real file on disk" pattern an upload pipe uses to stage content
//!   before handing it to the store client.
//!
//! A streaming writer silently promotes itself to a temp-file backend the
//! moment a write arrives out of order; from the caller's perspective
//! `DirtyContent` is a single random-access byte store throughout.
use std::io::SeekFrom;

use async_tempfile::TempFile;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::errors::Error;

enum Backend {
    /// `next_offset` is the length written so far; any write not exactly
    /// at `next_offset` forces a promotion to [Backend::TempFile].
    Streaming { file: TempFile, next_offset: u64 },
    TempFile(TempFile),
}

/// A file's local, not-yet-synced content.
pub struct DirtyContent {
    backend: Backend,
    size: u64,
}

impl DirtyContent {
    /// Starts a new, empty streaming writer. Used by `CreateChildFile` and
    /// `CreateLocalChildFileCore` for brand-new files.
    pub async fn new_streaming() -> Result<DirtyContent, Error> {
        let file = TempFile::new()
            .await
            .map_err(|e| Error::Invalid(format!("creating temp file: {e}")))?;
        Ok(DirtyContent {
            backend: Backend::Streaming {
                file,
                next_offset: 0,
            },
            size: 0,
        })
    }

    /// Starts a random-access temp-file copy preloaded with `initial`, used
    /// when an existing file is opened for writing (`CloneToChildFile`).
    pub async fn new_tempfile_with_contents(initial: &[u8]) -> Result<DirtyContent, Error> {
        let mut file = TempFile::new()
            .await
            .map_err(|e| Error::Invalid(format!("creating temp file: {e}")))?;
        file.write_all(initial)
            .await
            .map_err(|e| Error::Invalid(format!("priming temp file: {e}")))?;
        file.flush()
            .await
            .map_err(|e| Error::Invalid(format!("priming temp file: {e}")))?;
        Ok(DirtyContent {
            backend: Backend::TempFile(file),
            size: initial.len() as u64,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Promotes a streaming backend to a temp-file backend in place. A
    /// no-op if already a temp file.
    async fn promote(&mut self) -> Result<(), Error> {
        if let Backend::Streaming { file, .. } = &mut self.backend {
            file.seek(SeekFrom::Start(0))
                .await
                .map_err(|e| Error::Invalid(format!("promoting streaming writer: {e}")))?;
            self.backend = Backend::TempFile(std::mem::replace(
                file,
                // Placeholder; immediately overwritten below. TempFile has
                // no Default, so we swap through a fresh handle.
                TempFile::new()
                    .await
                    .map_err(|e| Error::Invalid(format!("promoting streaming writer: {e}")))?,
            ));
        }
        Ok(())
    }

    fn file_mut(&mut self) -> &mut TempFile {
        match &mut self.backend {
            Backend::Streaming { file, .. } => file,
            Backend::TempFile(file) => file,
        }
    }

    /// Writes `buf` at `offset`, extending the file if needed. Promotes a
    /// streaming backend if `offset` isn't exactly the next sequential
    /// byte.
    pub async fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), Error> {
        if let Backend::Streaming { next_offset, .. } = &self.backend {
            if offset != *next_offset {
                self.promote().await?;
            }
        }

        let file = self.file_mut();
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| Error::Invalid(format!("seeking dirty content: {e}")))?;
        file.write_all(buf)
            .await
            .map_err(|e| Error::Invalid(format!("writing dirty content: {e}")))?;
        file.flush()
            .await
            .map_err(|e| Error::Invalid(format!("writing dirty content: {e}")))?;

        if let Backend::Streaming { next_offset, .. } = &mut self.backend {
            *next_offset = offset + buf.len() as u64;
        }
        self.size = self.size.max(offset + buf.len() as u64);
        Ok(())
    }

    /// Reads up to `buf.len()` bytes starting at `offset`, returning the
    /// number of bytes actually read (short at EOF, like `pread`).
    pub async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, Error> {
        if offset >= self.size {
            return Ok(0);
        }
        let file = self.file_mut();
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| Error::Invalid(format!("seeking dirty content: {e}")))?;
        let want = buf.len().min((self.size - offset) as usize);
        let mut read = 0;
        while read < want {
            let n = file
                .read(&mut buf[read..want])
                .await
                .map_err(|e| Error::Invalid(format!("reading dirty content: {e}")))?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(read)
    }

    /// Truncates (or zero-extends) to `size`. A truncate that isn't a
    /// no-op growth at the current streaming tail forces a promotion, since
    /// it requires random access.
    pub async fn truncate(&mut self, size: u64) -> Result<(), Error> {
        let is_streaming_noop_growth =
            matches!(&self.backend, Backend::Streaming { next_offset, .. } if size >= *next_offset);
        if !is_streaming_noop_growth {
            self.promote().await?;
        }
        self.file_mut()
            .set_len(size)
            .await
            .map_err(|e| Error::Invalid(format!("truncating dirty content: {e}")))?;
        self.size = size;
        if let Backend::Streaming { next_offset, .. } = &mut self.backend {
            *next_offset = size;
        }
        Ok(())
    }

    /// Reads the whole file into memory for a sync to the store. Dirty
    /// content is expected to be small enough for a local cache file;
    /// large-upload strategy is left to the store binding.
    pub async fn read_all(&mut self) -> Result<Vec<u8>, Error> {
        let file = self.file_mut();
        file.seek(SeekFrom::Start(0))
            .await
            .map_err(|e| Error::Invalid(format!("reading dirty content: {e}")))?;
        let mut out = Vec::with_capacity(self.size as usize);
        file.read_to_end(&mut out)
            .await
            .map_err(|e| Error::Invalid(format!("reading dirty content: {e}")))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequential_writes_stay_streaming() {
        let mut dc = DirtyContent::new_streaming().await.unwrap();
        dc.write_at(0, b"hello").await.unwrap();
        dc.write_at(5, b" world").await.unwrap();
        assert!(matches!(dc.backend, Backend::Streaming { .. }));
        assert_eq!(dc.size(), 11);
        assert_eq!(dc.read_all().await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn out_of_order_write_promotes_to_tempfile() {
        let mut dc = DirtyContent::new_streaming().await.unwrap();
        dc.write_at(0, b"hello").await.unwrap();
        // Write before the tail: not sequential, forces promotion.
        dc.write_at(0, b"HELLO").await.unwrap();
        assert!(matches!(dc.backend, Backend::TempFile(_)));
        assert_eq!(dc.read_all().await.unwrap(), b"HELLO");
    }

    #[tokio::test]
    async fn truncate_to_grow_streaming_stays_streaming() {
        let mut dc = DirtyContent::new_streaming().await.unwrap();
        dc.write_at(0, b"hi").await.unwrap();
        dc.truncate(5).await.unwrap();
        assert!(matches!(dc.backend, Backend::Streaming { .. }));
        assert_eq!(dc.size(), 5);
    }

    #[tokio::test]
    async fn truncate_shrink_promotes_to_tempfile() {
        let mut dc = DirtyContent::new_streaming().await.unwrap();
        dc.write_at(0, b"hello world").await.unwrap();
        dc.truncate(5).await.unwrap();
        assert!(matches!(dc.backend, Backend::TempFile(_)));
        assert_eq!(dc.read_all().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn read_at_is_short_past_eof() {
        let mut dc = DirtyContent::new_streaming().await.unwrap();
        dc.write_at(0, b"hi").await.unwrap();
        let mut buf = [0u8; 10];
        let n = dc.read_at(0, &mut buf).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], b"hi");
    }

    #[tokio::test]
    async fn preloaded_tempfile_supports_random_access() {
        let mut dc = DirtyContent::new_tempfile_with_contents(b"hello world")
            .await
            .unwrap();
        dc.write_at(6, b"WORLD").await.unwrap();
        assert_eq!(dc.read_all().await.unwrap(), b"hello WORLD");
    }
}
