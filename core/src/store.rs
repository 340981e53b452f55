//! The object store contract consumed by the inode layer (§6).
//!
//! [Bucket] is a thin façade over a single bucket that the dispatch layer
//! has already opened. [ObjectStoreBucket] implements it against the
//! `object_store` crate, which already abstracts GCS/S3/Azure/local/memory
//! behind `dyn ObjectStore` and supports the conditional writes
//! (`PutMode::Create`, `PutMode::Update`) this layer relies on for
//! create-if-absent and clobber-aware updates.
//!
//! Generations are modeled as the `(e_tag, version)` pair `object_store`
//! already surfaces on [object_store::ObjectMeta] - this is how its own
//! GCS and S3 backends expose provider generation/metageneration numbers.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path as StorePath;
use object_store::{GetOptions, ObjectMeta, ObjectStore, PutMode, PutOptions, UpdateVersion};
use tokio::io::AsyncRead;
use tracing::instrument;

use crate::errors::{from_object_store, Error};

/// A generation is the pair `(object-generation, meta-generation)`.
/// Equality for clobber purposes is equality on both components; see
/// §4.6.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Generation {
    pub object: i64,
    pub meta: i64,
}

impl Generation {
    pub const ZERO: Generation = Generation { object: 0, meta: 0 };

    pub fn new(object: i64, meta: i64) -> Self {
        Generation { object, meta }
    }
}

/// Object metadata, as returned by a stat or list call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MinObject {
    pub name: String,
    pub size: u64,
    pub generation: Generation,
    /// Seconds since the epoch, as reported by the store (not adjusted for
    /// any `gcsfuse_mtime`-style metadata key; see `FileInode::attributes`
    /// for that overlay).
    pub updated_unix: i64,
    pub metadata: HashMap<String, String>,
}

impl MinObject {
    pub fn metadata_get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// A folder marker, only meaningful on hierarchical buckets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Folder {
    pub name: String,
    pub generation: Generation,
}

#[derive(Clone, Debug, Default)]
pub struct ListObjectsRequest {
    pub prefix: String,
    pub delimiter: bool,
    pub include_trailing_delimiter: bool,
    pub include_folders_as_prefixes: bool,
    /// Capped at 5000 by the store; callers may request fewer.
    pub max_results: usize,
    pub continuation_token: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ListedObjects {
    pub objects: Vec<MinObject>,
    /// Common prefixes ("collapsed runs") returned by a delimited listing.
    pub prefixes: Vec<String>,
    pub next_token: Option<String>,
}

/// The store contract consumed by DirInode/FileInode (§6). One [Bucket]
/// corresponds to one opened bucket handle; a multi-bucket mount holds one
/// per mounted bucket, keyed by bucket name in the dispatch layer.
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Whether this bucket supports hierarchical namespace folders
    /// (`GetFolder`/`CreateFolder`/`DeleteFolder`/`RenameFolder`). Flat
    /// buckets use placeholder objects instead.
    fn is_hierarchical(&self) -> bool {
        false
    }

    async fn stat_object(
        &self,
        key: &str,
        force_fetch_from_cache: bool,
    ) -> Result<Option<MinObject>, Error>;

    async fn list_objects(&self, req: ListObjectsRequest) -> Result<ListedObjects, Error>;

    /// Creates `key` with `contents`, failing with [Error::Precondition]
    /// if it already exists (generation precondition of zero).
    async fn create_object(
        &self,
        key: &str,
        contents: Bytes,
        metadata: HashMap<String, String>,
    ) -> Result<MinObject, Error>;

    async fn copy_object(
        &self,
        src_key: &str,
        src_generation: Generation,
        dst_key: &str,
    ) -> Result<MinObject, Error>;

    /// Updates `key`'s metadata, preconditioned on `generation`. Returns
    /// `NotFound` if the object has since been deleted, `Precondition` if
    /// the meta-generation has since advanced.
    async fn update_object(
        &self,
        key: &str,
        generation: Generation,
        metadata: HashMap<String, String>,
    ) -> Result<MinObject, Error>;

    /// Deletes `key`. A missing object is reported as `NotFound`, which
    /// callers (DirInode::delete_child_*) treat as an idempotent no-op.
    async fn delete_object(
        &self,
        key: &str,
        generation: Option<Generation>,
    ) -> Result<(), Error>;

    async fn move_object(
        &self,
        src_key: &str,
        src_generation: Generation,
        dst_key: &str,
    ) -> Result<MinObject, Error>;

    async fn get_folder(&self, _key: &str) -> Result<Option<Folder>, Error> {
        Err(Error::Unsupported("get_folder: bucket is not hierarchical".into()))
    }

    async fn create_folder(&self, _key: &str) -> Result<Folder, Error> {
        Err(Error::Unsupported(
            "create_folder: bucket is not hierarchical".into(),
        ))
    }

    async fn delete_folder(&self, _key: &str) -> Result<(), Error> {
        Err(Error::Unsupported(
            "delete_folder: bucket is not hierarchical".into(),
        ))
    }

    async fn rename_folder(&self, _src_key: &str, _dst_key: &str) -> Result<Folder, Error> {
        Err(Error::Unsupported(
            "rename_folder: bucket is not hierarchical".into(),
        ))
    }

    /// Opens a byte stream over `key` at the given (or latest) generation.
    async fn new_reader(
        &self,
        key: &str,
        generation: Option<Generation>,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, Error>;

    /// Uploads `content`, unconditionally overwriting whatever is at
    /// `key`. Used by FileInode::sync to commit dirty content; the caller
    /// has already re-stat'd the source to rule out a clobber.
    async fn sync_object(
        &self,
        key: &str,
        content: Bytes,
        metadata: HashMap<String, String>,
    ) -> Result<MinObject, Error>;
}

/// Opens or reuses a bucket handle by name, consulted by
/// [BaseDirInode](crate::base_dir_inode::BaseDirInode) when a multi-bucket
/// mount's root is traversed (§4.4, "BaseDirInode"). Implemented by the
/// out-of-scope dispatch layer, which owns bucket discovery/auth; this
/// crate only needs the narrow "give me a [Bucket] for this name" contract.
#[async_trait]
pub trait BucketManager: Send + Sync {
    /// Returns `Err(Error::NotFound(..))` if `name` does not name an
    /// accessible bucket.
    async fn open_bucket(&self, name: &str) -> Result<Arc<dyn Bucket>, Error>;
}

/// Implements [Bucket] against any backend supported by `object_store`.
pub struct ObjectStoreBucket {
    inner: Arc<dyn ObjectStore>,
    base_path: StorePath,
    hierarchical: bool,
}

impl ObjectStoreBucket {
    pub fn new(inner: Arc<dyn ObjectStore>, base_path: StorePath, hierarchical: bool) -> Self {
        ObjectStoreBucket {
            inner,
            base_path,
            hierarchical,
        }
    }

    fn full_path(&self, key: &str) -> StorePath {
        if key.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.parts().chain(StorePath::from(key).parts()).collect()
        }
    }

    fn min_object_from_meta(key: &str, meta: &ObjectMeta, metadata: HashMap<String, String>) -> MinObject {
        MinObject {
            name: key.to_string(),
            size: meta.size as u64,
            generation: generation_from_meta(meta),
            updated_unix: meta.last_modified.timestamp(),
            metadata,
        }
    }
}

/// Parses the `(e_tag, version)` pair `object_store` surfaces into our
/// `Generation`. Non-numeric tags (common on backends that use opaque
/// etags) fall back to generation 0 with the raw tag recorded nowhere -
/// those backends don't support our clobber-by-generation semantics and
/// callers should prefer a hierarchical or GCS-backed bucket.
fn generation_from_meta(meta: &ObjectMeta) -> Generation {
    let object = meta
        .e_tag
        .as_deref()
        .and_then(|t| t.trim_matches('"').parse::<i64>().ok())
        .unwrap_or(0);
    let metagen = meta
        .version
        .as_deref()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);
    Generation::new(object, metagen)
}

fn attributes_from_map(metadata: &HashMap<String, String>) -> object_store::Attributes {
    let mut attrs = object_store::Attributes::new();
    for (k, v) in metadata {
        attrs.insert(
            object_store::Attribute::Metadata(k.to_owned().into()),
            v.to_owned().into(),
        );
    }
    attrs
}

fn map_from_attributes(attrs: &object_store::Attributes) -> HashMap<String, String> {
    attrs
        .iter()
        .filter_map(|(k, v)| match k {
            object_store::Attribute::Metadata(key) => Some((key.to_string(), v.to_string())),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl Bucket for ObjectStoreBucket {
    fn is_hierarchical(&self) -> bool {
        self.hierarchical
    }

    #[instrument(skip(self), err)]
    async fn stat_object(
        &self,
        key: &str,
        _force_fetch_from_cache: bool,
    ) -> Result<Option<MinObject>, Error> {
        let path = self.full_path(key);
        match self
            .inner
            .get_opts(
                &path,
                GetOptions {
                    head: true,
                    ..Default::default()
                },
            )
            .await
        {
            Ok(res) => {
                let metadata = map_from_attributes(&res.attributes);
                Ok(Some(Self::min_object_from_meta(key, &res.meta, metadata)))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(from_object_store("StatObject", e)),
        }
    }

    #[instrument(skip(self), fields(prefix = %req.prefix, delimiter = req.delimiter), err)]
    async fn list_objects(&self, req: ListObjectsRequest) -> Result<ListedObjects, Error> {
        let prefix = self.full_path(&req.prefix);
        if !req.delimiter {
            // undelimited listing, used by ReadDescendants.
            let mut stream = self.inner.list(Some(&prefix));
            let mut objects = Vec::new();
            while let Some(meta) = futures::StreamExt::next(&mut stream).await {
                let meta = meta.map_err(|e| from_object_store("ListObjects", e))?;
                let key = strip_base(&self.base_path, &meta.location);
                objects.push(Self::min_object_from_meta(&key, &meta, HashMap::new()));
                if objects.len() >= req.max_results {
                    break;
                }
            }
            return Ok(ListedObjects {
                objects,
                prefixes: Vec::new(),
                next_token: None,
            });
        }

        let result = self
            .inner
            .list_with_delimiter(Some(&prefix))
            .await
            .map_err(|e| from_object_store("ListObjects", e))?;

        let objects = result
            .objects
            .iter()
            .map(|meta| {
                let key = strip_base(&self.base_path, &meta.location);
                Self::min_object_from_meta(&key, meta, HashMap::new())
            })
            .collect();
        let prefixes = result
            .common_prefixes
            .iter()
            .map(|p| strip_base(&self.base_path, p))
            .collect();

        Ok(ListedObjects {
            objects,
            prefixes,
            next_token: None,
        })
    }

    #[instrument(skip(self, contents, metadata), err)]
    async fn create_object(
        &self,
        key: &str,
        contents: Bytes,
        metadata: HashMap<String, String>,
    ) -> Result<MinObject, Error> {
        let path = self.full_path(key);
        let res = self
            .inner
            .put_opts(
                &path,
                contents.into(),
                PutOptions {
                    mode: PutMode::Create,
                    attributes: attributes_from_map(&metadata),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| from_object_store("CreateObject", e))?;

        Ok(MinObject {
            name: key.to_string(),
            size: 0,
            generation: Generation::new(
                res.e_tag
                    .as_deref()
                    .and_then(|t| t.trim_matches('"').parse().ok())
                    .unwrap_or(0),
                res.version
                    .as_deref()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
            ),
            updated_unix: 0,
            metadata,
        })
    }

    async fn copy_object(
        &self,
        src_key: &str,
        _src_generation: Generation,
        dst_key: &str,
    ) -> Result<MinObject, Error> {
        let src = self.full_path(src_key);
        let dst = self.full_path(dst_key);
        self.inner
            .copy(&src, &dst)
            .await
            .map_err(|e| from_object_store("CopyObject", e))?;
        self.stat_object(dst_key, true)
            .await?
            .ok_or_else(|| Error::NotFound(dst_key.to_string()))
    }

    async fn update_object(
        &self,
        key: &str,
        generation: Generation,
        metadata: HashMap<String, String>,
    ) -> Result<MinObject, Error> {
        let path = self.full_path(key);
        let existing = self.stat_object(key, true).await?;
        let Some(existing) = existing else {
            return Err(Error::NotFound(key.to_string()));
        };
        let mut contents = Vec::new();
        let mut reader = self
            .inner
            .get(&path)
            .await
            .map_err(|e| from_object_store("UpdateObject", e))?
            .into_stream();
        use futures::StreamExt;
        while let Some(chunk) = reader.next().await {
            contents.extend_from_slice(&chunk.map_err(|e| from_object_store("UpdateObject", e))?);
        }

        let mut merged = existing.metadata.clone();
        merged.extend(metadata);

        let res = self
            .inner
            .put_opts(
                &path,
                Bytes::from(contents).into(),
                PutOptions {
                    mode: PutMode::Update(UpdateVersion {
                        e_tag: Some(generation.object.to_string()),
                        version: Some(generation.meta.to_string()),
                    }),
                    attributes: attributes_from_map(&merged),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| from_object_store("UpdateObject", e))?;

        Ok(MinObject {
            name: key.to_string(),
            size: existing.size,
            generation: Generation::new(
                res.e_tag
                    .as_deref()
                    .and_then(|t| t.trim_matches('"').parse().ok())
                    .unwrap_or(generation.object),
                res.version
                    .as_deref()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(generation.meta + 1),
            ),
            updated_unix: existing.updated_unix,
            metadata: merged,
        })
    }

    #[instrument(skip(self), err)]
    async fn delete_object(&self, key: &str, _generation: Option<Generation>) -> Result<(), Error> {
        let path = self.full_path(key);
        match self.inner.delete(&path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Err(Error::NotFound(key.to_string())),
            Err(e) => Err(from_object_store("DeleteObject", e)),
        }
    }

    async fn move_object(
        &self,
        src_key: &str,
        _src_generation: Generation,
        dst_key: &str,
    ) -> Result<MinObject, Error> {
        let src = self.full_path(src_key);
        let dst = self.full_path(dst_key);
        self.inner
            .rename(&src, &dst)
            .await
            .map_err(|e| from_object_store("MoveObject", e))?;
        self.stat_object(dst_key, true)
            .await?
            .ok_or_else(|| Error::NotFound(dst_key.to_string()))
    }

    async fn new_reader(
        &self,
        key: &str,
        _generation: Option<Generation>,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, Error> {
        let path = self.full_path(key);
        let res = self
            .inner
            .get(&path)
            .await
            .map_err(|e| from_object_store("NewReader", e))?;
        let stream = res.into_stream();
        let reader = tokio_util::io::StreamReader::new(futures::StreamExt::map(stream, |r| {
            r.map_err(std::io::Error::other)
        }));
        Ok(Box::new(reader))
    }

    #[instrument(skip(self, content, metadata), err)]
    async fn sync_object(
        &self,
        key: &str,
        content: Bytes,
        metadata: HashMap<String, String>,
    ) -> Result<MinObject, Error> {
        let path = self.full_path(key);
        let res = self
            .inner
            .put_opts(
                &path,
                content.into(),
                PutOptions {
                    mode: PutMode::Overwrite,
                    attributes: attributes_from_map(&metadata),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| from_object_store("SyncObject", e))?;

        self.stat_object(key, true)
            .await?
            .map(|mut obj| {
                obj.generation = Generation::new(
                    res.e_tag
                        .as_deref()
                        .and_then(|t| t.trim_matches('"').parse().ok())
                        .unwrap_or(obj.generation.object),
                    res.version
                        .as_deref()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(obj.generation.meta),
                );
                obj
            })
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }
}

fn strip_base(base: &StorePath, full: &StorePath) -> String {
    let base_parts: Vec<_> = base.parts().collect();
    full.parts()
        .skip(base_parts.len())
        .map(|p| p.as_ref().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_parses_numeric_etag() {
        let meta = ObjectMeta {
            location: StorePath::from("a"),
            last_modified: chrono::Utc::now(),
            size: 0,
            e_tag: Some("\"7\"".into()),
            version: Some("3".into()),
        };
        let gen = generation_from_meta(&meta);
        assert_eq!(gen.object, 7);
        assert_eq!(gen.meta, 3);
    }

    #[test]
    fn generation_defaults_when_missing() {
        let meta = ObjectMeta {
            location: StorePath::from("a"),
            last_modified: chrono::Utc::now(),
            size: 0,
            e_tag: None,
            version: None,
        };
        let gen = generation_from_meta(&meta);
        assert_eq!(gen, Generation::ZERO);
    }
}
