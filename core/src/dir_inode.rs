//! [DirInode]: child lookup, listing, and mutation of one directory.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::attr;
use crate::config::MountConfig;
use crate::core_descriptor::{Core, Type};
use crate::errors::Error;
use crate::name::{Name, CONFLICT_MARKER};
use crate::store::{Bucket, Generation, ListObjectsRequest};
use crate::type_cache::TypeCache;

/// One entry returned by [DirInode::read_entries]: the child's basename
/// (not the full key) paired with its descriptor.
#[derive(Debug)]
pub struct DirEntry {
    pub basename: String,
    pub core: Core,
}

struct Inner {
    last_listing: Option<Instant>,
    unlinked: bool,
    destroyed: bool,
    lookup_count: u64,
}

pub struct DirInode {
    id: u64,
    name: Name,
    bucket: Arc<dyn Bucket>,
    implicit_dirs: bool,
    enable_nonexistent_type_cache: bool,
    include_folders_as_prefixes: bool,
    is_hierarchical: bool,
    type_cache: TypeCache,
    inner: RwLock<Inner>,
}

impl DirInode {
    pub fn new(id: u64, name: Name, bucket: Arc<dyn Bucket>, config: &MountConfig) -> DirInode {
        assert!(name.is_dir(), "DirInode name must be a directory name");
        DirInode {
            id,
            name,
            is_hierarchical: bucket.is_hierarchical(),
            bucket,
            implicit_dirs: config.implicit_dirs,
            enable_nonexistent_type_cache: config.enable_nonexistent_type_cache,
            include_folders_as_prefixes: config.include_folders_as_prefixes,
            type_cache: TypeCache::new(config.type_cache_config()),
            inner: RwLock::new(Inner {
                last_listing: None,
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

    pub fn is_hierarchical(&self) -> bool {
        self.is_hierarchical
    }

    pub async fn increment_lookup_count(&self) {
        self.inner.write().await.lookup_count += 1;
    }

    pub async fn decrement_lookup_count(&self, n: u64) -> bool {
        let mut inner = self.inner.write().await;
        inner.lookup_count = inner.lookup_count.saturating_sub(n);
        inner.lookup_count == 0
    }

    pub async fn destroy(&self) {
        let mut inner = self.inner.write().await;
        inner.destroyed = true;
    }

    pub async fn is_unlinked(&self) -> bool {
        self.inner.read().await.unlinked
    }

    /// Called by the dispatch layer on a hierarchical bucket's child dir
    /// inode after the parent's [DirInode::delete_child_dir] succeeds
    /// Not called by this type on itself.
    pub async fn mark_unlinked(&self) {
        self.inner.write().await.unlinked = true;
    }

    fn cache_key_for(&self, rel: &str) -> Name {
        Name::from_parts(self.name.bucket(), format!("{}{}", self.name.key(), rel))
    }

    fn insert_cache_for_child(&self, rel: &str, kind: Type) {
        self.type_cache.insert(self.cache_key_for(rel), kind);
    }

    // ---- LookUpChild ----

    #[instrument(skip(self), fields(dir = %self.name), err)]
    pub async fn look_up_child(&self, rel: &str) -> Result<Option<Core>, Error> {
        if let Some(stripped) = rel.strip_suffix(CONFLICT_MARKER) {
            return self.look_up_conflict_file_arm(stripped).await;
        }
        self.lookup_plain(rel).await
    }

    async fn look_up_conflict_file_arm(&self, stripped: &str) -> Result<Option<Core>, Error> {
        let dir_exists = match self.lookup_plain(stripped).await? {
            Some(core) => matches!(core.kind(), Type::ExplicitDir | Type::ImplicitDir),
            None => false,
        };
        if !dir_exists {
            return Ok(None);
        }
        let file_name = Name::new_file(&self.name, stripped);
        match self.bucket.stat_object(file_name.key(), false).await {
            Ok(Some(obj)) => Ok(Some(Core::from_object(file_name, obj))),
            Ok(None) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn lookup_plain(&self, rel: &str) -> Result<Option<Core>, Error> {
        let cache_key = self.cache_key_for(rel);
        let file_name = Name::new_file(&self.name, rel);
        let dir_name = Name::new_dir(&self.name, rel);

        match self.type_cache.get(&cache_key) {
            Some(Type::ImplicitDir) => return Ok(Some(Core::implicit_dir(dir_name))),
            Some(Type::ExplicitDir) => return self.stat_explicit_dir(&dir_name, &cache_key).await,
            Some(Type::RegularFile) | Some(Type::Symlink) => {
                return self.stat_file(&file_name, &cache_key).await
            }
            Some(Type::Nonexistent) => return Ok(None),
            Some(Type::Unknown) | None => {}
        }

        // Unknown: fan out a file stat and a directory-candidate probe
        // concurrently, errgroup-style: await both, bail on the first error.
        let (file_res, dir_res) = tokio::join!(
            self.bucket.stat_object(file_name.key(), false),
            self.stat_dir_candidate(&dir_name)
        );

        let file_obj = match file_res {
            Ok(obj) => obj,
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        let dir_core = match dir_res {
            Ok(core) => core,
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        // Tie-break: directory wins.
        if let Some(dir_core) = dir_core {
            if file_obj.is_some() {
                debug!(rel, "file/dir name collision, directory wins");
            }
            self.type_cache.insert(cache_key, dir_core.kind());
            return Ok(Some(dir_core));
        }
        if let Some(obj) = file_obj {
            let core = Core::from_object(file_name, obj);
            self.type_cache.insert(cache_key, core.kind());
            return Ok(Some(core));
        }

        if self.enable_nonexistent_type_cache {
            self.type_cache.insert(cache_key, Type::Nonexistent);
        }
        Ok(None)
    }

    async fn stat_dir_candidate(&self, dir_name: &Name) -> Result<Option<Core>, Error> {
        if self.is_hierarchical {
            return match self.bucket.get_folder(dir_name.key()).await {
                Ok(Some(folder)) => Ok(Some(Core::from_folder(dir_name.clone(), folder))),
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            };
        }
        if self.implicit_dirs {
            let res = self
                .bucket
                .list_objects(ListObjectsRequest {
                    prefix: dir_name.key().to_string(),
                    delimiter: false,
                    include_trailing_delimiter: false,
                    include_folders_as_prefixes: false,
                    max_results: 1,
                    continuation_token: None,
                })
                .await?;
            if let Some(placeholder) = res.objects.iter().find(|o| o.name == dir_name.key()) {
                return Ok(Some(Core::from_object(dir_name.clone(), placeholder.clone())));
            }
            if res.objects.is_empty() {
                return Ok(None);
            }
            return Ok(Some(Core::implicit_dir(dir_name.clone())));
        }
        match self.bucket.stat_object(dir_name.key(), false).await {
            Ok(Some(obj)) => Ok(Some(Core::from_object(dir_name.clone(), obj))),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn stat_explicit_dir(&self, dir_name: &Name, cache_key: &Name) -> Result<Option<Core>, Error> {
        let result = if self.is_hierarchical {
            self.bucket
                .get_folder(dir_name.key())
                .await
                .map(|f| f.map(|folder| Core::from_folder(dir_name.clone(), folder)))
        } else {
            self.bucket
                .stat_object(dir_name.key(), false)
                .await
                .map(|o| o.map(|obj| Core::from_object(dir_name.clone(), obj)))
        };
        match result {
            Ok(Some(core)) => {
                self.type_cache.insert(cache_key.clone(), core.kind());
                Ok(Some(core))
            }
            Ok(None) => {
                self.type_cache.erase(cache_key);
                Ok(None)
            }
            Err(e) if e.is_not_found() => {
                self.type_cache.erase(cache_key);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn stat_file(&self, file_name: &Name, cache_key: &Name) -> Result<Option<Core>, Error> {
        match self.bucket.stat_object(file_name.key(), false).await {
            Ok(Some(obj)) => {
                let core = Core::from_object(file_name.clone(), obj);
                self.type_cache.insert(cache_key.clone(), core.kind());
                Ok(Some(core))
            }
            Ok(None) => {
                self.type_cache.erase(cache_key);
                Ok(None)
            }
            Err(e) if e.is_not_found() => {
                self.type_cache.erase(cache_key);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // ---- ReadEntries / ReadDescendants ----

    #[instrument(skip(self), fields(dir = %self.name), err)]
    pub async fn read_entries(
        &self,
        continuation_token: Option<String>,
    ) -> Result<(Vec<DirEntry>, Vec<String>, Option<String>), Error> {
        let res = self
            .bucket
            .list_objects(ListObjectsRequest {
                prefix: self.name.key().to_string(),
                delimiter: true,
                include_trailing_delimiter: true,
                include_folders_as_prefixes: self.is_hierarchical && self.include_folders_as_prefixes,
                max_results: 1000,
                continuation_token,
            })
            .await?;

        let mut entries = Vec::new();
        let mut unsupported = Vec::new();
        let mut seen_explicit_dirs = HashSet::new();

        for obj in res.objects {
            if obj.name == self.name.key() {
                continue;
            }
            let is_dir_obj = obj.name.ends_with('/') && !self.is_hierarchical;
            let name = Name::from_parts(self.name.bucket(), obj.name.clone());
            if !name.is_direct_child_of(&self.name) {
                continue;
            }
            let basename = name.basename_under(&self.name).to_string();
            if !Name::basename_is_supported(&basename) {
                debug!(basename, "unsupported path, dropping from listing");
                unsupported.push(basename);
                continue;
            }
            if is_dir_obj {
                seen_explicit_dirs.insert(basename.clone());
            }
            let core = Core::from_object(name, obj);
            self.insert_cache_for_child(&basename, core.kind());
            entries.push(DirEntry { basename, core });
        }

        for prefix in res.prefixes {
            let name = Name::from_parts(self.name.bucket(), prefix.clone());
            if !name.is_direct_child_of(&self.name) {
                continue;
            }
            let basename = name.basename_under(&self.name).to_string();
            if seen_explicit_dirs.contains(&basename) {
                continue;
            }
            if !self.is_hierarchical && !self.implicit_dirs {
                continue;
            }
            if !Name::basename_is_supported(&basename) {
                unsupported.push(basename);
                continue;
            }
            let dir_name = Name::new_dir(&self.name, &basename);
            let core = if self.is_hierarchical {
                match self.bucket.get_folder(&prefix).await? {
                    Some(folder) => Core::from_folder(dir_name, folder),
                    None => Core::implicit_dir(dir_name),
                }
            } else {
                Core::implicit_dir(dir_name)
            };
            self.insert_cache_for_child(&basename, core.kind());
            entries.push(DirEntry { basename, core });
        }

        self.inner.write().await.last_listing = Some(Instant::now());

        Ok((entries, unsupported, res.next_token))
    }

    pub async fn read_descendants(&self, limit: usize) -> Result<HashMap<Name, Core>, Error> {
        let res = self
            .bucket
            .list_objects(ListObjectsRequest {
                prefix: self.name.key().to_string(),
                delimiter: false,
                include_trailing_delimiter: false,
                include_folders_as_prefixes: false,
                max_results: limit + 1,
                continuation_token: None,
            })
            .await?;

        let mut out = HashMap::new();
        for obj in res.objects {
            if obj.name == self.name.key() {
                continue;
            }
            if out.len() >= limit {
                break;
            }
            let name = Name::new_descendant(&self.name, obj.name.clone());
            let core = Core::from_object(name.clone(), obj);
            out.insert(name, core);
        }
        Ok(out)
    }

    // ---- Create* ----

    #[instrument(skip(self), fields(dir = %self.name), err)]
    pub async fn create_child_file(&self, rel: &str, mtime: DateTime<Utc>) -> Result<Core, Error> {
        let name = Name::new_file(&self.name, rel);
        let mut metadata = HashMap::new();
        metadata.insert(attr::MTIME_KEY.to_string(), attr::format_mtime(mtime));
        let obj = self.bucket.create_object(name.key(), Bytes::new(), metadata).await?;
        let core = Core::from_object(name, obj);
        self.insert_cache_for_child(rel, core.kind());
        Ok(core)
    }

    pub async fn create_child_symlink(
        &self,
        rel: &str,
        target: &str,
        mtime: DateTime<Utc>,
    ) -> Result<Core, Error> {
        let name = Name::new_file(&self.name, rel);
        let mut metadata = HashMap::new();
        metadata.insert(attr::MTIME_KEY.to_string(), attr::format_mtime(mtime));
        metadata.insert(attr::SYMLINK_TARGET_KEY.to_string(), target.to_string());
        let obj = self.bucket.create_object(name.key(), Bytes::new(), metadata).await?;
        let core = Core::from_object(name, obj);
        self.insert_cache_for_child(rel, core.kind());
        Ok(core)
    }

    pub async fn create_child_dir(&self, rel: &str) -> Result<Core, Error> {
        let dir_name = Name::new_dir(&self.name, rel);
        let core = if self.is_hierarchical {
            let folder = self.bucket.create_folder(dir_name.key()).await?;
            Core::from_folder(dir_name, folder)
        } else {
            let obj = self
                .bucket
                .create_object(dir_name.key(), Bytes::new(), HashMap::new())
                .await?;
            Core::from_object(dir_name, obj)
        };
        self.insert_cache_for_child(rel, core.kind());
        Ok(core)
    }

    /// Purely local, no store I/O, no TypeCache observation - the name
    /// does not exist in the store yet, so caching a positive result here
    /// would contradict a concurrent lookup from another client.
    pub fn create_local_child_file_core(&self, rel: &str) -> Core {
        Core::local_file(Name::new_file(&self.name, rel))
    }

    pub async fn clone_to_child_file(
        &self,
        rel: &str,
        src_key: &str,
        src_generation: Generation,
    ) -> Result<Core, Error> {
        let dst_name = Name::new_file(&self.name, rel);
        let cache_key = self.cache_key_for(rel);
        self.type_cache.erase(&cache_key);
        let obj = self
            .bucket
            .copy_object(src_key, src_generation, dst_name.key())
            .await?;
        let core = Core::from_object(dst_name, obj);
        self.type_cache.insert(cache_key, core.kind());
        Ok(core)
    }

    // ---- Delete* ----

    #[instrument(skip(self), fields(dir = %self.name), err)]
    pub async fn delete_child_file(&self, rel: &str) -> Result<(), Error> {
        let name = Name::new_file(&self.name, rel);
        self.type_cache.erase(&self.cache_key_for(rel));
        match self.bucket.delete_object(name.key(), None).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Returns once the store side is deleted; the dispatch layer is
    /// responsible for calling [DirInode::mark_unlinked] on the child
    /// directory's own inode afterward.
    pub async fn delete_child_dir(&self, rel: &str) -> Result<(), Error> {
        let dir_name = Name::new_dir(&self.name, rel);
        self.type_cache.erase(&self.cache_key_for(rel));
        match self.bucket.delete_object(dir_name.key(), None).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        if self.is_hierarchical {
            match self.bucket.delete_folder(dir_name.key()).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Recursively removes every object and folder under each given
    /// prefix, deleting file objects and recursing into nested prefixes
    /// in parallel, then the prefix object itself. Idempotent:
    /// a second concurrent call only sees not-found errors, all absorbed.
    #[instrument(skip(self), fields(dir = %self.name), err)]
    pub async fn delete_objects(&self, object_names: &[String]) -> Result<(), Error> {
        futures::future::try_join_all(
            object_names.iter().cloned().map(|p| self.delete_subtree(p)),
        )
        .await?;
        Ok(())
    }

    fn delete_subtree(&self, prefix: String) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            let mut continuation = None;
            loop {
                let res = self
                    .bucket
                    .list_objects(ListObjectsRequest {
                        prefix: prefix.clone(),
                        delimiter: true,
                        include_trailing_delimiter: false,
                        include_folders_as_prefixes: false,
                        max_results: 1000,
                        continuation_token: continuation.clone(),
                    })
                    .await?;

                let mut tasks: Vec<BoxFuture<'_, Result<(), Error>>> = Vec::new();
                for obj in res.objects {
                    tasks.push(Box::pin(async move {
                        match self.bucket.delete_object(&obj.name, None).await {
                            Ok(()) => Ok(()),
                            Err(e) if e.is_not_found() => Ok(()),
                            Err(e) => Err(e),
                        }
                    }));
                }
                for p in res.prefixes {
                    tasks.push(self.delete_subtree(p));
                }
                futures::future::try_join_all(tasks).await?;

                continuation = res.next_token;
                if continuation.is_none() {
                    break;
                }
            }
            match self.bucket.delete_object(&prefix, None).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e),
            }
        })
    }

    // ---- Rename* ----

    pub async fn rename_file(
        &self,
        src_rel: &str,
        src_generation: Generation,
        dst_dir: &DirInode,
        dst_rel: &str,
    ) -> Result<Core, Error> {
        let src_name = Name::new_file(&self.name, src_rel);
        let dst_name = Name::new_file(&dst_dir.name, dst_rel);
        let obj = self
            .bucket
            .move_object(src_name.key(), src_generation, dst_name.key())
            .await?;
        self.type_cache.erase(&self.cache_key_for(src_rel));
        let core = Core::from_object(dst_name, obj);
        dst_dir.insert_cache_for_child(dst_rel, core.kind());
        Ok(core)
    }

    pub async fn rename_folder(
        &self,
        src_rel: &str,
        dst_dir: &DirInode,
        dst_rel: &str,
    ) -> Result<Core, Error> {
        let src_name = Name::new_dir(&self.name, src_rel);
        let dst_name = Name::new_dir(&dst_dir.name, dst_rel);
        let folder = self
            .bucket
            .rename_folder(src_name.key(), dst_name.key())
            .await?;
        self.type_cache.erase(&self.cache_key_for(src_rel));
        let core = Core::from_folder(dst_name, folder);
        dst_dir.insert_cache_for_child(dst_rel, core.kind());
        Ok(core)
    }

    // ---- Kernel list-cache invalidation ----

    pub async fn should_invalidate_kernel_list_cache(&self, ttl: Duration) -> bool {
        match self.inner.read().await.last_listing {
            None => true,
            Some(t) => t.elapsed() >= ttl,
        }
    }

    pub async fn invalidate_kernel_list_cache(&self) {
        self.inner.write().await.last_listing = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::InMemoryBucket;

    fn dir_inode(bucket: Arc<InMemoryBucket>, config: MountConfig) -> DirInode {
        DirInode::new(1, Name::new_root(""), bucket, &config)
    }

    #[tokio::test]
    async fn implicit_directory_detection_enabled() {
        let bucket = Arc::new(InMemoryBucket::new(false));
        bucket.seed("a/b/c", b"hi", HashMap::new());
        let dir = dir_inode(bucket, MountConfig::default());
        let core = dir.look_up_child("a").await.unwrap().unwrap();
        assert_eq!(core.kind(), Type::ImplicitDir);
    }

    #[tokio::test]
    async fn implicit_directory_detection_disabled() {
        let bucket = Arc::new(InMemoryBucket::new(false));
        bucket.seed("a/b/c", b"hi", HashMap::new());
        let mut config = MountConfig::default();
        config.implicit_dirs = false;
        let dir = dir_inode(bucket, config);
        let core = dir.look_up_child("a").await.unwrap();
        assert!(core.is_none());
    }

    #[tokio::test]
    async fn tie_break_prefers_directory() {
        let bucket = Arc::new(InMemoryBucket::new(false));
        bucket.seed("foo", b"file", HashMap::new());
        bucket.seed("foo/bar", b"x", HashMap::new());
        let dir = dir_inode(bucket, MountConfig::default());

        let dir_core = dir.look_up_child("foo").await.unwrap().unwrap();
        assert_eq!(dir_core.kind(), Type::ImplicitDir);

        let file_core = dir
            .look_up_child(&format!("foo{CONFLICT_MARKER}"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file_core.kind(), Type::RegularFile);
    }

    #[tokio::test]
    async fn read_entries_skips_implicit_dir_when_disabled() {
        let bucket = Arc::new(InMemoryBucket::new(false));
        bucket.seed("p/x", b"1", HashMap::new());
        bucket.seed("p/y/z", b"2", HashMap::new());
        let mut config = MountConfig::default();
        config.implicit_dirs = false;
        let dir = DirInode::new(1, Name::new_dir(&Name::new_root(""), "p"), bucket, &config);

        let (entries, _unsupported, _token) = dir.read_entries(None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].basename, "x");
    }

    #[tokio::test]
    async fn create_child_file_is_precondition_atomic() {
        let bucket = Arc::new(InMemoryBucket::new(false));
        let dir = dir_inode(bucket, MountConfig::default());
        let t = Utc::now();
        let (a, b) = tokio::join!(dir.create_child_file("x", t), dir.create_child_file("x", t));
        let results = [a, b];
        let ok_count = results.iter().filter(|r| r.is_ok()).count();
        let precondition_count = results
            .iter()
            .filter(|r| matches!(r, Err(Error::Precondition(_))))
            .count();
        assert_eq!(ok_count, 1);
        assert_eq!(precondition_count, 1);
    }

    #[tokio::test]
    async fn delete_objects_recursively_removes_subtree() {
        let bucket = Arc::new(InMemoryBucket::new(false));
        bucket.seed("p/a", b"1", HashMap::new());
        bucket.seed("p/b/c", b"2", HashMap::new());
        bucket.seed("p/b/", b"", HashMap::new());
        let dir = dir_inode(bucket.clone(), MountConfig::default());

        dir.delete_objects(&["p/".to_string()]).await.unwrap();
        assert!(bucket.stat_object("p/a", true).await.unwrap().is_none());
        assert!(bucket.stat_object("p/b/c", true).await.unwrap().is_none());
        assert!(bucket.stat_object("p/b/", true).await.unwrap().is_none());

        // Idempotent: second call just absorbs NotFound throughout.
        dir.delete_objects(&["p/".to_string()]).await.unwrap();
    }
}
