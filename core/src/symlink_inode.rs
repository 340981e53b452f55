//! [SymlinkInode]: the immutable inode kind for a `Type::Symlink` object -
//! a file carrying a `symlink-target` metadata key.
//!
//! A symlink is a file in the store's eyes - same name invariants, same
//! `symlink-target` metadata convention - but at the dispatch layer it is
//! a distinct inode kind: it never supports `Read`/`Write`/`Truncate`,
//! only `Readlink`. Modeling it as its own struct rather than a special
//! case of [FileInode](crate::file_inode::FileInode) keeps that
//! restriction structural (the type simply has no write methods) rather
//! than a runtime check, fitting the discriminated-union shape of
//! `Inode = BaseDir | Dir | File | Symlink`.
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::attr::{self, Attributes, SYMLINK_TARGET_KEY};
use crate::errors::Error;
use crate::name::Name;
use crate::store::MinObject;

struct Inner {
    src: MinObject,
    destroyed: bool,
    lookup_count: u64,
}

pub struct SymlinkInode {
    id: u64,
    name: Name,
    target: String,
    static_attrs: Attributes,
    inner: RwLock<Inner>,
}

impl SymlinkInode {
    /// Constructs a symlink inode from an object carrying the
    /// `symlink-target` metadata key. Fails with `Error::Invalid` if the
    /// key is absent - constructing one from a non-symlink object is a
    /// caller bug, not a runtime condition, but callers pass in an
    /// arbitrary `Core`'s `MinObject` so we surface it as a typed error
    /// rather than panicking on untrusted store content.
    pub fn new(id: u64, name: Name, static_attrs: Attributes, src: MinObject) -> Result<SymlinkInode, Error> {
        assert!(name.is_file(), "SymlinkInode name must be a file name");
        let target = src
            .metadata_get(SYMLINK_TARGET_KEY)
            .ok_or_else(|| Error::Invalid(format!("{name}: object has no symlink-target metadata")))?
            .to_string();
        Ok(SymlinkInode {
            id,
            name,
            target,
            static_attrs,
            inner: RwLock::new(Inner {
                src,
                destroyed: false,
                lookup_count: 0,
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn target(&self) -> &str {
        &self.target
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

    /// Static attributes with size/mtime overlaid from the source object,
    /// but with no dirty-content overlay: symlinks are created once and
    /// never written to again.
    pub async fn attributes(&self) -> Attributes {
        let inner = self.inner.read().await;
        let mut attrs = self.static_attrs;
        attrs.size = self.target.len() as u64;
        let fallback =
            DateTime::from_timestamp(inner.src.updated_unix, 0).unwrap_or_else(Utc::now);
        let mtime = attr::parse_mtime(&inner.src.metadata, fallback);
        attrs.mtime_unix = mtime.timestamp();
        attrs.mtime_nsec = mtime.timestamp_subsec_nanos();
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Generation;
    use std::collections::HashMap;

    fn symlink_object(target: &str) -> MinObject {
        let mut metadata = HashMap::new();
        metadata.insert(SYMLINK_TARGET_KEY.to_string(), target.to_string());
        MinObject {
            name: "link".to_string(),
            size: 0,
            generation: Generation::ZERO,
            updated_unix: 0,
            metadata,
        }
    }

    #[tokio::test]
    async fn target_and_size_reflect_metadata() {
        let root = Name::new_root("");
        let name = Name::new_file(&root, "link");
        let inode = SymlinkInode::new(1, name, Attributes::symlink(0, 0), symlink_object("/etc/passwd"))
            .unwrap();
        assert_eq!(inode.target(), "/etc/passwd");
        let attrs = inode.attributes().await;
        assert_eq!(attrs.size, "/etc/passwd".len() as u64);
    }

    #[tokio::test]
    async fn construction_fails_without_symlink_metadata() {
        let root = Name::new_root("");
        let name = Name::new_file(&root, "notalink");
        let obj = MinObject {
            name: "notalink".to_string(),
            size: 0,
            generation: Generation::ZERO,
            updated_unix: 0,
            metadata: HashMap::new(),
        };
        assert!(SymlinkInode::new(1, name, Attributes::symlink(0, 0), obj).is_err());
    }
}
