//! An in-memory [Bucket] fixture for tests: an `Arc<RwLock<HashMap<...>>>`
//! rather than wrapping `object_store::memory::InMemory`. A hand-rolled
//! fixture gives the control the scenario tests need - forced clobbers,
//! hierarchical folder markers, and precise generation bookkeeping - that
//! the generic in-memory `object_store` backend doesn't expose.
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::pin::Pin;
use std::sync::RwLock;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};

use crate::errors::Error;
use crate::store::{Bucket, Folder, Generation, ListObjectsRequest, ListedObjects, MinObject};

struct State {
    objects: HashMap<String, MinObject>,
    contents: HashMap<String, Vec<u8>>,
    folders: HashMap<String, Folder>,
    next_generation: i64,
}

pub struct InMemoryBucket {
    hierarchical: bool,
    state: RwLock<State>,
}

impl InMemoryBucket {
    pub fn new(hierarchical: bool) -> InMemoryBucket {
        InMemoryBucket {
            hierarchical,
            state: RwLock::new(State {
                objects: HashMap::new(),
                contents: HashMap::new(),
                folders: HashMap::new(),
                next_generation: 1,
            }),
        }
    }

    /// Test helper: seed an object directly, bypassing generation
    /// preconditions.
    pub fn seed(&self, key: &str, contents: &[u8], metadata: HashMap<String, String>) -> MinObject {
        let mut state = self.state.write().unwrap();
        let generation = Generation::new(state.next_generation, 0);
        state.next_generation += 1;
        let object = MinObject {
            name: key.to_string(),
            size: contents.len() as u64,
            generation,
            updated_unix: 0,
            metadata,
        };
        state.contents.insert(key.to_string(), contents.to_vec());
        state.objects.insert(key.to_string(), object.clone());
        object
    }

    pub fn seed_folder(&self, key: &str) -> Folder {
        let mut state = self.state.write().unwrap();
        let generation = Generation::new(state.next_generation, 0);
        state.next_generation += 1;
        let folder = Folder {
            name: key.to_string(),
            generation,
        };
        state.folders.insert(key.to_string(), folder.clone());
        folder
    }
}

struct MemoryReader {
    data: Vec<u8>,
    pos: usize,
}

impl AsyncRead for MemoryReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let remaining = &this.data[this.pos..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl Bucket for InMemoryBucket {
    fn is_hierarchical(&self) -> bool {
        self.hierarchical
    }

    async fn stat_object(
        &self,
        key: &str,
        _force_fetch_from_cache: bool,
    ) -> Result<Option<MinObject>, Error> {
        Ok(self.state.read().unwrap().objects.get(key).cloned())
    }

    async fn list_objects(&self, req: ListObjectsRequest) -> Result<ListedObjects, Error> {
        let state = self.state.read().unwrap();

        if !req.delimiter {
            let mut objects: Vec<MinObject> = state
                .objects
                .values()
                .filter(|o| o.name.starts_with(&req.prefix))
                .cloned()
                .collect();
            objects.sort_by(|a, b| a.name.cmp(&b.name));
            if req.max_results > 0 {
                objects.truncate(req.max_results);
            }
            return Ok(ListedObjects {
                objects,
                prefixes: Vec::new(),
                next_token: None,
            });
        }

        let mut objects = Vec::new();
        let mut prefix_set = BTreeSet::new();

        for obj in state.objects.values() {
            let Some(rest) = obj.name.strip_prefix(&req.prefix) else {
                continue;
            };
            if rest.is_empty() {
                if req.include_trailing_delimiter {
                    objects.push(obj.clone());
                }
                continue;
            }
            match rest.find('/') {
                Some(idx) => {
                    prefix_set.insert(format!("{}{}/", req.prefix, &rest[..idx]));
                }
                None => objects.push(obj.clone()),
            }
        }

        if self.hierarchical && req.include_folders_as_prefixes {
            for folder in state.folders.keys() {
                let Some(rest) = folder.strip_prefix(&req.prefix) else {
                    continue;
                };
                if rest.is_empty() {
                    continue;
                }
                let seg = rest.trim_end_matches('/');
                if let Some(idx) = seg.find('/') {
                    prefix_set.insert(format!("{}{}/", req.prefix, &seg[..idx]));
                } else {
                    prefix_set.insert(format!("{}{}/", req.prefix, seg));
                }
            }
        }

        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ListedObjects {
            objects,
            prefixes: prefix_set.into_iter().collect(),
            next_token: None,
        })
    }

    async fn create_object(
        &self,
        key: &str,
        contents: Bytes,
        metadata: HashMap<String, String>,
    ) -> Result<MinObject, Error> {
        let mut state = self.state.write().unwrap();
        if state.objects.contains_key(key) {
            return Err(Error::Precondition(format!("{key} already exists")));
        }
        let generation = Generation::new(state.next_generation, 0);
        state.next_generation += 1;
        let object = MinObject {
            name: key.to_string(),
            size: contents.len() as u64,
            generation,
            updated_unix: 0,
            metadata,
        };
        state.contents.insert(key.to_string(), contents.to_vec());
        state.objects.insert(key.to_string(), object.clone());
        Ok(object)
    }

    async fn copy_object(
        &self,
        src_key: &str,
        src_generation: Generation,
        dst_key: &str,
    ) -> Result<MinObject, Error> {
        let mut state = self.state.write().unwrap();
        let Some(src) = state.objects.get(src_key).cloned() else {
            return Err(Error::NotFound(src_key.to_string()));
        };
        if src.generation != src_generation {
            return Err(Error::Precondition(format!(
                "{src_key} generation changed since stat"
            )));
        }
        let contents = state.contents.get(src_key).cloned().unwrap_or_default();
        let generation = Generation::new(state.next_generation, 0);
        state.next_generation += 1;
        let dst = MinObject {
            name: dst_key.to_string(),
            size: contents.len() as u64,
            generation,
            updated_unix: 0,
            metadata: src.metadata.clone(),
        };
        state.contents.insert(dst_key.to_string(), contents);
        state.objects.insert(dst_key.to_string(), dst.clone());
        Ok(dst)
    }

    async fn update_object(
        &self,
        key: &str,
        generation: Generation,
        metadata: HashMap<String, String>,
    ) -> Result<MinObject, Error> {
        let mut state = self.state.write().unwrap();
        let Some(existing) = state.objects.get(key).cloned() else {
            return Err(Error::NotFound(key.to_string()));
        };
        if existing.generation != generation {
            return Err(Error::Precondition(format!(
                "{key} meta-generation changed since stat"
            )));
        }
        let mut merged = existing.metadata.clone();
        merged.extend(metadata);
        let updated = MinObject {
            generation: Generation::new(existing.generation.object, existing.generation.meta + 1),
            metadata: merged,
            ..existing
        };
        state.objects.insert(key.to_string(), updated.clone());
        Ok(updated)
    }

    async fn delete_object(&self, key: &str, generation: Option<Generation>) -> Result<(), Error> {
        let mut state = self.state.write().unwrap();
        let Some(existing) = state.objects.get(key) else {
            return Err(Error::NotFound(key.to_string()));
        };
        if let Some(g) = generation {
            if existing.generation != g {
                return Err(Error::Precondition(format!("{key} generation mismatch")));
            }
        }
        state.objects.remove(key);
        state.contents.remove(key);
        Ok(())
    }

    async fn move_object(
        &self,
        src_key: &str,
        src_generation: Generation,
        dst_key: &str,
    ) -> Result<MinObject, Error> {
        let dst = self.copy_object(src_key, src_generation, dst_key).await?;
        self.delete_object(src_key, Some(src_generation)).await?;
        Ok(dst)
    }

    async fn get_folder(&self, key: &str) -> Result<Option<Folder>, Error> {
        if !self.hierarchical {
            return Err(Error::Unsupported("get_folder: bucket is not hierarchical".into()));
        }
        Ok(self.state.read().unwrap().folders.get(key).cloned())
    }

    async fn create_folder(&self, key: &str) -> Result<Folder, Error> {
        if !self.hierarchical {
            return Err(Error::Unsupported(
                "create_folder: bucket is not hierarchical".into(),
            ));
        }
        let mut state = self.state.write().unwrap();
        if state.folders.contains_key(key) {
            return Err(Error::Precondition(format!("{key} already exists")));
        }
        let generation = Generation::new(state.next_generation, 0);
        state.next_generation += 1;
        let folder = Folder {
            name: key.to_string(),
            generation,
        };
        state.folders.insert(key.to_string(), folder.clone());
        Ok(folder)
    }

    async fn delete_folder(&self, key: &str) -> Result<(), Error> {
        if !self.hierarchical {
            return Err(Error::Unsupported(
                "delete_folder: bucket is not hierarchical".into(),
            ));
        }
        let mut state = self.state.write().unwrap();
        if state.folders.remove(key).is_none() {
            return Err(Error::NotFound(key.to_string()));
        }
        Ok(())
    }

    async fn rename_folder(&self, src_key: &str, dst_key: &str) -> Result<Folder, Error> {
        if !self.hierarchical {
            return Err(Error::Unsupported(
                "rename_folder: bucket is not hierarchical".into(),
            ));
        }
        let mut state = self.state.write().unwrap();
        let Some(mut folder) = state.folders.remove(src_key) else {
            return Err(Error::NotFound(src_key.to_string()));
        };
        folder.name = dst_key.to_string();
        state.folders.insert(dst_key.to_string(), folder.clone());
        Ok(folder)
    }

    async fn new_reader(
        &self,
        key: &str,
        generation: Option<Generation>,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, Error> {
        let state = self.state.read().unwrap();
        let Some(object) = state.objects.get(key) else {
            return Err(Error::NotFound(key.to_string()));
        };
        if let Some(g) = generation {
            if object.generation != g {
                return Err(Error::Precondition(format!("{key} generation changed")));
            }
        }
        let data = state.contents.get(key).cloned().unwrap_or_default();
        Ok(Box::new(MemoryReader { data, pos: 0 }))
    }

    async fn sync_object(
        &self,
        key: &str,
        content: Bytes,
        metadata: HashMap<String, String>,
    ) -> Result<MinObject, Error> {
        let mut state = self.state.write().unwrap();
        let generation = Generation::new(state.next_generation, 0);
        state.next_generation += 1;
        let object = MinObject {
            name: key.to_string(),
            size: content.len() as u64,
            generation,
            updated_unix: 0,
            metadata,
        };
        state.contents.insert(key.to_string(), content.to_vec());
        state.objects.insert(key.to_string(), object.clone());
        Ok(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_object_fails_if_present() {
        let bucket = InMemoryBucket::new(false);
        bucket
            .create_object("a", Bytes::from_static(b"1"), HashMap::new())
            .await
            .unwrap();
        let result = bucket
            .create_object("a", Bytes::from_static(b"2"), HashMap::new())
            .await;
        assert!(matches!(result, Err(Error::Precondition(_))));
    }

    #[tokio::test]
    async fn delimited_listing_collapses_prefixes() {
        let bucket = InMemoryBucket::new(false);
        bucket
            .create_object("a/b/c", Bytes::from_static(b"x"), HashMap::new())
            .await
            .unwrap();
        bucket
            .create_object("a/d", Bytes::from_static(b"y"), HashMap::new())
            .await
            .unwrap();
        let res = bucket
            .list_objects(ListObjectsRequest {
                prefix: "a/".to_string(),
                delimiter: true,
                include_trailing_delimiter: false,
                include_folders_as_prefixes: false,
                max_results: 1000,
                continuation_token: None,
            })
            .await
            .unwrap();
        assert_eq!(res.objects.len(), 1);
        assert_eq!(res.objects[0].name, "a/d");
        assert_eq!(res.prefixes, vec!["a/b/".to_string()]);
    }

    #[tokio::test]
    async fn move_object_copies_then_deletes_source() {
        let bucket = InMemoryBucket::new(false);
        let src = bucket
            .create_object("a", Bytes::from_static(b"1"), HashMap::new())
            .await
            .unwrap();
        bucket.move_object("a", src.generation, "b").await.unwrap();
        assert!(bucket.stat_object("a", true).await.unwrap().is_none());
        assert!(bucket.stat_object("b", true).await.unwrap().is_some());
    }
}
