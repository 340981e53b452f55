//! [FileInode]: tracks one object's content lifecycle (§3 "FileInode source
//! state", §4.5).
//!
//! The dispatch layer is specified as taking each inode's mutex around
//! every call (§5); since that dispatch layer is out of scope here, we fold
//! its locking responsibility directly into each public method below via an
//! internal `tokio::sync::Mutex`, acquired for the duration of the call.
//! This is the natural Rust rendering of "holds a mutex that the caller
//! takes around every method" when there is no separate caller object to
//! hand a guard to.
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::attr::{self, Attributes};
use crate::content::DirtyContent;
use crate::errors::Error;
use crate::name::Name;
use crate::store::{Bucket, MinObject};

struct Inner {
    src: Option<MinObject>,
    content: Option<DirtyContent>,
    /// Set by `Write`/`Truncate`/`SetMtime` while content is dirty; overlaid
    /// onto `Attributes.mtime` ahead of `src`'s own mtime metadata.
    mtime_override: Option<DateTime<Utc>>,
    local: bool,
    unlinked: bool,
    destroyed: bool,
    lookup_count: u64,
}

pub struct FileInode {
    id: u64,
    name: Name,
    bucket: Arc<dyn Bucket>,
    static_attrs: Attributes,
    inner: Mutex<Inner>,
}

impl FileInode {
    /// Constructs a FileInode backed by an existing store object.
    pub fn new_from_object(
        id: u64,
        name: Name,
        bucket: Arc<dyn Bucket>,
        static_attrs: Attributes,
        src: MinObject,
    ) -> FileInode {
        assert!(name.is_file(), "FileInode name must be a file name");
        FileInode {
            id,
            name,
            bucket,
            static_attrs,
            inner: Mutex::new(Inner {
                src: Some(src),
                content: None,
                mtime_override: None,
                local: false,
                unlinked: false,
                destroyed: false,
                lookup_count: 0,
            }),
        }
    }

    /// Constructs a FileInode for a file created locally, not yet present
    /// in the store (`Core::local_file`, §4.4 `CreateLocalChildFileCore`).
    pub fn new_local(
        id: u64,
        name: Name,
        bucket: Arc<dyn Bucket>,
        static_attrs: Attributes,
    ) -> FileInode {
        assert!(name.is_file(), "FileInode name must be a file name");
        FileInode {
            id,
            name,
            bucket,
            static_attrs,
            inner: Mutex::new(Inner {
                src: None,
                content: None,
                mtime_override: None,
                local: true,
                unlinked: false,
                destroyed: false,
                lookup_count: 0,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub async fn increment_lookup_count(&self) {
        let mut inner = self.inner.lock().await;
        inner.lookup_count += 1;
    }

    /// Returns true if the count reached zero and the inode is now
    /// destroyable (the dispatch layer decides whether to actually call
    /// `destroy`).
    pub async fn decrement_lookup_count(&self, n: u64) -> bool {
        let mut inner = self.inner.lock().await;
        inner.lookup_count = inner.lookup_count.saturating_sub(n);
        inner.lookup_count == 0
    }

    pub async fn destroy(&self) {
        let mut inner = self.inner.lock().await;
        if inner.destroyed {
            return;
        }
        inner.destroyed = true;
        inner.content = None;
    }

    pub async fn is_unlinked(&self) -> bool {
        self.inner.lock().await.unlinked
    }

    pub async fn mark_unlinked(&self) {
        self.inner.lock().await.unlinked = true;
    }

    /// §4.6: equal generations but an increased remote size signal a
    /// remote append; any other generation change, or disappearance, is
    /// also a clobber.
    fn generation_clobbered(old: &MinObject, new: Option<&MinObject>) -> bool {
        match new {
            None => true,
            Some(new) => new.generation != old.generation || new.size > old.size,
        }
    }

    #[instrument(skip(self, inner), fields(file = %self.name), err)]
    async fn check_clobber(&self, inner: &Inner) -> Result<(), Error> {
        if let Some(src) = &inner.src {
            let latest = self.bucket.stat_object(self.name.key(), true).await?;
            if Self::generation_clobbered(src, latest.as_ref()) {
                warn!(file = %self.name, "remote object changed under a dirty writer");
                return Err(Error::Clobbered(format!(
                    "{} changed under a dirty writer",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Ensures `inner.content` is populated: materializes the source object
    /// into a random-access temp file copy, or starts a fresh streaming
    /// writer for a file with no source yet.
    async fn ensure_content(&self, inner: &mut Inner) -> Result<(), Error> {
        if inner.content.is_some() {
            return Ok(());
        }
        match &inner.src {
            Some(src) => {
                let mut reader = self
                    .bucket
                    .new_reader(self.name.key(), Some(src.generation))
                    .await?;
                let mut buf = Vec::with_capacity(src.size as usize);
                reader
                    .read_to_end(&mut buf)
                    .await
                    .map_err(|e| Error::internal_store("NewReader", e))?;
                inner.content = Some(DirtyContent::new_tempfile_with_contents(&buf).await?);
            }
            None => {
                inner.content = Some(DirtyContent::new_streaming().await?);
            }
        }
        Ok(())
    }

    /// §4.5.1: static attributes overlaid with `src`'s size/mtime, then
    /// dirty content's size/mtime if present, then (if `clobbered_check`)
    /// a fresh stat to detect a remote change.
    pub async fn attributes(&self, clobbered_check: bool) -> Result<Attributes, Error> {
        let mut inner = self.inner.lock().await;
        let mut attrs = self.static_attrs;

        if let Some(src) = &inner.src {
            attrs.size = src.size;
            let fallback = DateTime::from_timestamp(src.updated_unix, 0).unwrap_or_else(Utc::now);
            let mtime = attr::parse_mtime(&src.metadata, fallback);
            attrs.mtime_unix = mtime.timestamp();
            attrs.mtime_nsec = mtime.timestamp_subsec_nanos();
        }

        if let Some(content) = &inner.content {
            attrs.size = content.size();
        }
        if let Some(mtime) = inner.mtime_override {
            attrs.mtime_unix = mtime.timestamp();
            attrs.mtime_nsec = mtime.timestamp_subsec_nanos();
        }

        if clobbered_check {
            if let Some(src) = inner.src.clone() {
                let latest = self.bucket.stat_object(self.name.key(), true).await?;
                if Self::generation_clobbered(&src, latest.as_ref()) {
                    attrs.mark_unlinked();
                    if let Some(latest) = latest {
                        if latest.generation == src.generation && latest.size > src.size {
                            let fallback = DateTime::from_timestamp(latest.updated_unix, 0)
                                .unwrap_or_else(Utc::now);
                            let mtime = attr::parse_mtime(&latest.metadata, fallback);
                            attrs.size = latest.size;
                            attrs.mtime_unix = mtime.timestamp();
                            attrs.mtime_nsec = mtime.timestamp_subsec_nanos();
                            inner.src = Some(latest);
                        }
                    }
                }
            }
        }

        Ok(attrs)
    }

    /// §4.5.2.
    pub async fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize, Error> {
        let mut inner = self.inner.lock().await;
        self.ensure_content(&mut inner).await?;
        inner.content.as_mut().unwrap().read_at(offset, buf).await
    }

    /// §4.5.3: clobber-checked write, through the streaming-or-tempfile
    /// content backend (promotion is handled inside [DirtyContent]).
    #[instrument(skip(self, data), fields(file = %self.name, len = data.len(), offset), err)]
    pub async fn write(&self, data: &[u8], offset: u64) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        self.check_clobber(&inner).await?;
        self.ensure_content(&mut inner).await?;
        inner.content.as_mut().unwrap().write_at(offset, data).await?;
        inner.mtime_override = Some(Utc::now());
        Ok(())
    }

    /// §4.5.4.
    pub async fn truncate(&self, size: u64) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        self.check_clobber(&inner).await?;
        self.ensure_content(&mut inner).await?;
        inner.content.as_mut().unwrap().truncate(size).await?;
        inner.mtime_override = Some(Utc::now());
        Ok(())
    }

    /// §4.5.5: avoids a round trip when a dirty writer already exists;
    /// otherwise updates the object's mtime metadata in place, absorbing
    /// not-found/precondition failures as "already unlinked".
    pub async fn set_mtime(&self, t: DateTime<Utc>) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        if inner.content.is_some() {
            inner.mtime_override = Some(t);
            return Ok(());
        }
        let Some(src) = inner.src.clone() else {
            return Ok(());
        };
        let mut metadata = HashMap::new();
        metadata.insert(attr::MTIME_KEY.to_string(), attr::format_mtime(t));
        match self
            .bucket
            .update_object(self.name.key(), src.generation, metadata)
            .await
        {
            Ok(updated) => {
                inner.src = Some(updated);
                Ok(())
            }
            Err(Error::NotFound(_)) | Err(Error::Precondition(_)) => {
                inner.unlinked = true;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// §4.5.6: `Sync` and `Flush` share identical semantics at this layer
    /// (no separate "commit without closing" step exists once content is a
    /// plain byte buffer), so `flush` is a thin alias.
    #[instrument(skip(self), fields(file = %self.name), err)]
    pub async fn sync(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        if inner.content.is_none() {
            if inner.local && inner.src.is_none() {
                // A local file flushed before any Write still has to make
                // its first appearance in the store on this Flush/Sync.
                self.ensure_content(&mut inner).await?;
            } else {
                return Ok(());
            }
        }
        self.check_clobber(&inner).await?;

        let bytes = inner.content.as_mut().unwrap().read_all().await?;
        let mut metadata = HashMap::new();
        if let Some(mtime) = inner.mtime_override {
            metadata.insert(attr::MTIME_KEY.to_string(), attr::format_mtime(mtime));
        }

        let result = if inner.local && inner.src.is_none() {
            self.bucket
                .create_object(self.name.key(), Bytes::from(bytes), metadata)
                .await
        } else {
            self.bucket
                .sync_object(self.name.key(), Bytes::from(bytes), metadata)
                .await
        };

        match result {
            Ok(obj) => {
                inner.src = Some(obj);
                inner.local = false;
                inner.content = None;
                inner.mtime_override = None;
                Ok(())
            }
            Err(Error::Precondition(_)) => {
                inner.unlinked = true;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn flush(&self) -> Result<(), Error> {
        self.sync().await
    }
}
