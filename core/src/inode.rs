//! [Inode]: the discriminated union over the three inode kinds (plus the
//! degenerate base-of-buckets directory). Common operations (`id`, `name`,
//! lookup-count lifecycle) are a small shared capability; specialized
//! operations live on the variant.
//!
//! The dispatch layer holds a table of these keyed by the stable id
//! assigned at creation; this enum is how it gets at the shared
//! `id`/`name`/lookup-count capability without matching on the concrete
//! type at every call site. Specialized operations (listing, reads/writes,
//! ...) are reached by matching out the variant the dispatch layer already
//! knows it has, exactly as it knows which FUSE request variant it is
//! handling.
use std::sync::Arc;

use crate::base_dir_inode::BaseDirInode;
use crate::dir_inode::DirInode;
use crate::file_inode::FileInode;
use crate::name::Name;
use crate::symlink_inode::SymlinkInode;

#[derive(Clone)]
pub enum Inode {
    BaseDir(Arc<BaseDirInode>),
    Dir(Arc<DirInode>),
    File(Arc<FileInode>),
    Symlink(Arc<SymlinkInode>),
}

impl Inode {
    pub fn id(&self) -> u64 {
        match self {
            Inode::BaseDir(i) => i.id(),
            Inode::Dir(i) => i.id(),
            Inode::File(i) => i.id(),
            Inode::Symlink(i) => i.id(),
        }
    }

    pub fn name(&self) -> Name {
        match self {
            Inode::BaseDir(i) => i.name(),
            Inode::Dir(i) => i.name().clone(),
            Inode::File(i) => i.name().clone(),
            Inode::Symlink(i) => i.name().clone(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Inode::BaseDir(_) | Inode::Dir(_))
    }

    pub async fn increment_lookup_count(&self) {
        match self {
            Inode::BaseDir(i) => i.increment_lookup_count().await,
            Inode::Dir(i) => i.increment_lookup_count().await,
            Inode::File(i) => i.increment_lookup_count().await,
            Inode::Symlink(i) => i.increment_lookup_count().await,
        }
    }

    /// Returns true if the lookup count reached zero and the dispatch
    /// layer may now call the variant's own `destroy`.
    pub async fn decrement_lookup_count(&self, n: u64) -> bool {
        match self {
            Inode::BaseDir(i) => i.decrement_lookup_count(n).await,
            Inode::Dir(i) => i.decrement_lookup_count(n).await,
            Inode::File(i) => i.decrement_lookup_count(n).await,
            Inode::Symlink(i) => i.decrement_lookup_count(n).await,
        }
    }

    pub async fn destroy(&self) {
        match self {
            Inode::BaseDir(i) => i.destroy().await,
            Inode::Dir(i) => i.destroy().await,
            Inode::File(i) => i.destroy().await,
            Inode::Symlink(i) => i.destroy().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountConfig;
    use crate::fixtures::InMemoryBucket;

    #[tokio::test]
    async fn lookup_count_shared_capability_works_across_variants() {
        let bucket = Arc::new(InMemoryBucket::new(false));
        let dir = Inode::Dir(Arc::new(DirInode::new(
            1,
            Name::new_root(""),
            bucket,
            &MountConfig::default(),
        )));
        dir.increment_lookup_count().await;
        assert!(!dir.decrement_lookup_count(0).await);
        assert!(dir.decrement_lookup_count(1).await);
        assert!(dir.is_dir());
    }
}
