//! [BaseDirInode]: the degenerate directory inode representing the set of
//! mounted buckets in a multi-bucket mount.
//!
//! Unlike [DirInode](crate::dir_inode::DirInode), this type has no single
//! backing bucket: its children are the buckets themselves, resolved
//! on-demand through a [BucketManager]. Listing the base directory would
//! mean enumerating every bucket the mount has access to, which is too
//! expensive to support - `ReadEntries`/`ReadDescendants` always fail
//! here, matching the dispatch layer's expectation that the root of a
//! multi-bucket mount is navigated by name, not listed.
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::instrument;

use crate::core_descriptor::Core;
use crate::errors::Error;
use crate::name::Name;
use crate::store::BucketManager;

struct Inner {
    destroyed: bool,
    lookup_count: u64,
}

pub struct BaseDirInode {
    id: u64,
    manager: Arc<dyn BucketManager>,
    inner: RwLock<Inner>,
}

impl BaseDirInode {
    pub fn new(id: u64, manager: Arc<dyn BucketManager>) -> BaseDirInode {
        BaseDirInode {
            id,
            manager,
            inner: RwLock::new(Inner {
                destroyed: false,
                lookup_count: 0,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The base-of-buckets directory is itself the mount root: bucket
    /// empty, key empty.
    pub fn name(&self) -> Name {
        Name::new_root("")
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
        self.inner.write().await.destroyed = true;
    }

    /// Asks the [BucketManager] to open or reuse the bucket handle named
    /// `rel`, returning an `ImplicitDir`-typed [Core] rooted at that
    /// bucket on success: a bucket root exists as an ImplicitDir whenever
    /// the bucket name is non-empty. `NotFound` from the manager is a
    /// plain miss, not an error.
    #[instrument(skip(self), err)]
    pub async fn look_up_child(&self, rel: &str) -> Result<Option<Core>, Error> {
        match self.manager.open_bucket(rel).await {
            Ok(_bucket) => Ok(Some(Core::implicit_dir(Name::new_root(rel)))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn unsupported(op: &'static str) -> Error {
        Error::Unsupported(format!("{op}: not supported on the base-of-buckets directory"))
    }

    pub async fn read_entries(
        &self,
        _continuation_token: Option<String>,
    ) -> Result<(Vec<crate::dir_inode::DirEntry>, Vec<String>, Option<String>), Error> {
        Err(Self::unsupported("ReadEntries"))
    }

    pub async fn read_descendants(
        &self,
        _limit: usize,
    ) -> Result<std::collections::HashMap<Name, Core>, Error> {
        Err(Self::unsupported("ReadDescendants"))
    }

    pub async fn create_child_file(&self, _rel: &str) -> Result<Core, Error> {
        Err(Self::unsupported("CreateChildFile"))
    }

    pub async fn create_child_symlink(&self, _rel: &str, _target: &str) -> Result<Core, Error> {
        Err(Self::unsupported("CreateChildSymlink"))
    }

    pub async fn create_child_dir(&self, _rel: &str) -> Result<Core, Error> {
        Err(Self::unsupported("CreateChildDir"))
    }

    pub async fn delete_child_file(&self, _rel: &str) -> Result<(), Error> {
        Err(Self::unsupported("DeleteChildFile"))
    }

    pub async fn delete_child_dir(&self, _rel: &str) -> Result<(), Error> {
        Err(Self::unsupported("DeleteChildDir"))
    }

    pub async fn rename_file(&self, _src_rel: &str, _dst_rel: &str) -> Result<Core, Error> {
        Err(Self::unsupported("RenameFile"))
    }

    pub async fn rename_folder(&self, _src_rel: &str, _dst_rel: &str) -> Result<Core, Error> {
        Err(Self::unsupported("RenameFolder"))
    }
}
