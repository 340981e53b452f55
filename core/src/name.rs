//! Names: the bidirectional mapping between a filesystem-visible path and
//! the object store's flat key space.
//!
//! A [Name] is an immutable value usable as a map key (see [TypeCache] and
//! the dispatch layer's own inode tables). It carries a `bucket` (empty for
//! a single-bucket mount) and a `key` (the object name within that
//! bucket). Directory names have an empty key (the bucket root) or a key
//! ending in `/`; file names have a non-empty key that does not end in
//! `/`.

/// The single-byte conflict marker appended to a filesystem-visible name
/// to disambiguate the file arm of a file/directory name collision. Never
/// legal in a store key, so the suffix is unambiguous.
pub const CONFLICT_MARKER: char = '\u{000A}';

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    bucket: String,
    key: String,
}

impl Name {
    /// Constructs the root name of a bucket (empty key).
    pub fn new_root(bucket: impl Into<String>) -> Name {
        Name {
            bucket: bucket.into(),
            key: String::new(),
        }
    }

    /// Constructs a directory name for `rel` under `parent`.
    ///
    /// # Panics
    /// Panics if `parent` is a file name, or if `rel` is empty.
    pub fn new_dir(parent: &Name, rel: &str) -> Name {
        assert!(
            parent.is_dir(),
            "new_dir: parent {parent:?} is not a directory"
        );
        assert!(!rel.is_empty(), "new_dir: rel must not be empty");

        let mut key = String::with_capacity(parent.key.len() + rel.len() + 1);
        key.push_str(&parent.key);
        key.push_str(rel);
        if !key.ends_with('/') {
            key.push('/');
        }

        Name {
            bucket: parent.bucket.clone(),
            key,
        }
    }

    /// Constructs a file name for `rel` under `parent`.
    ///
    /// # Panics
    /// Panics if `parent` is a file name, `rel` is empty, or `rel` ends in
    /// `/` (which would make it a directory name).
    pub fn new_file(parent: &Name, rel: &str) -> Name {
        assert!(
            parent.is_dir(),
            "new_file: parent {parent:?} is not a directory"
        );
        assert!(!rel.is_empty(), "new_file: rel must not be empty");
        assert!(
            !rel.ends_with('/'),
            "new_file: rel {rel:?} must not end in '/'"
        );

        let mut key = String::with_capacity(parent.key.len() + rel.len());
        key.push_str(&parent.key);
        key.push_str(rel);

        Name {
            bucket: parent.bucket.clone(),
            key,
        }
    }

    /// Constructs a [Name] for a descendant reached by a flattened,
    /// undelimited listing (`ReadDescendants`): `descendant_key` is the
    /// full object key, not just a direct-child basename.
    pub fn new_descendant(ancestor: &Name, descendant_key: impl Into<String>) -> Name {
        Name {
            bucket: ancestor.bucket.clone(),
            key: descendant_key.into(),
        }
    }

    /// Builds a Name directly from its components. Used by the store
    /// binding and TypeCache, which already deal in raw keys.
    pub fn from_parts(bucket: impl Into<String>, key: impl Into<String>) -> Name {
        Name {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_bucket_root(&self) -> bool {
        self.key.is_empty()
    }

    pub fn is_dir(&self) -> bool {
        self.key.is_empty() || self.key.ends_with('/')
    }

    pub fn is_file(&self) -> bool {
        !self.is_dir()
    }

    /// True if `self` is a direct child of `parent`: same bucket, `key`
    /// has `parent.key` as a prefix, and the remainder (after stripping
    /// one optional trailing `/`) contains no further `/`.
    pub fn is_direct_child_of(&self, parent: &Name) -> bool {
        if self.bucket != parent.bucket {
            return false;
        }
        let Some(rest) = self.key.strip_prefix(&parent.key) else {
            return false;
        };
        if rest.is_empty() {
            return false;
        }
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        !rest.contains('/')
    }

    /// The basename: `key` with the parent's key prefix and any trailing
    /// `/` removed. Panics if `self` is not a direct child of `parent`.
    pub fn basename_under(&self, parent: &Name) -> &str {
        assert!(
            self.is_direct_child_of(parent),
            "{self:?} is not a direct child of {parent:?}"
        );
        let rest = &self.key[parent.key.len()..];
        rest.strip_suffix('/').unwrap_or(rest)
    }

    /// What the kernel sees: `key` when `bucket` is empty (single-bucket
    /// mount), else `bucket + "/" + key`.
    pub fn local_name(&self) -> String {
        if self.bucket.is_empty() {
            self.key.clone()
        } else if self.key.is_empty() {
            self.bucket.clone()
        } else {
            format!("{}/{}", self.bucket, self.key)
        }
    }

    /// The object key, as stored.
    pub fn object_name(&self) -> &str {
        &self.key
    }

    /// Returns a copy of this name with the conflict marker (a trailing
    /// U+000A) stripped, along with whether one was present.
    pub fn strip_conflict_marker(&self) -> (Name, bool) {
        match self.key.strip_suffix(CONFLICT_MARKER) {
            Some(stripped) => (
                Name {
                    bucket: self.bucket.clone(),
                    key: stripped.to_string(),
                },
                true,
            ),
            None => (self.clone(), false),
        }
    }

    /// A name is unrepresentable to the kernel if it contains bytes the
    /// dispatch layer's DirEntry wire format can't carry (newline, carriage
    /// return). Checked against the basename only; slashes are structural
    /// and excluded by construction.
    pub fn basename_is_supported(basename: &str) -> bool {
        !basename.bytes().any(|b| b == b'\n' || b == b'\r')
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.local_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_dir_and_bucket_root() {
        let root = Name::new_root("mybucket");
        assert!(root.is_dir());
        assert!(root.is_bucket_root());
        assert!(!root.is_file());
    }

    #[test]
    fn dir_xor_file() {
        let root = Name::new_root("");
        let dir = Name::new_dir(&root, "a");
        let file = Name::new_file(&root, "b");
        assert!(dir.is_dir() ^ dir.is_file() == false || dir.is_dir());
        assert!(dir.is_dir() && !dir.is_file());
        assert!(file.is_file() && !file.is_dir());
    }

    #[test]
    fn new_dir_appends_trailing_slash() {
        let root = Name::new_root("");
        let dir = Name::new_dir(&root, "a");
        assert_eq!(dir.key(), "a/");
        let nested = Name::new_dir(&dir, "b/");
        assert_eq!(nested.key(), "a/b/");
    }

    #[test]
    #[should_panic]
    fn new_dir_panics_on_file_parent() {
        let root = Name::new_root("");
        let file = Name::new_file(&root, "a");
        Name::new_dir(&file, "b");
    }

    #[test]
    #[should_panic]
    fn new_file_panics_on_empty_rel() {
        let root = Name::new_root("");
        Name::new_file(&root, "");
    }

    #[test]
    fn local_name_single_bucket() {
        let root = Name::new_root("");
        let file = Name::new_file(&root, "a/b.txt");
        assert_eq!(file.local_name(), "a/b.txt");
        assert_eq!(file.object_name(), "a/b.txt");
    }

    #[test]
    fn local_name_multi_bucket() {
        let root = Name::new_root("mybucket");
        let file = Name::new_file(&root, "a.txt");
        assert_eq!(file.local_name(), "mybucket/a.txt");
    }

    #[test]
    fn is_direct_child_of() {
        let root = Name::new_root("");
        let dir_a = Name::new_dir(&root, "a");
        let file_ab = Name::new_file(&dir_a, "b");
        let file_abc = Name::new_file(&dir_a, "b/c");

        assert!(dir_a.is_direct_child_of(&root));
        assert!(file_ab.is_direct_child_of(&dir_a));
        assert!(!file_abc.is_direct_child_of(&dir_a));
        assert!(!file_ab.is_direct_child_of(&root));
    }

    #[test]
    fn is_direct_child_of_different_bucket() {
        let root1 = Name::new_root("b1");
        let root2 = Name::new_root("b2");
        let dir = Name::new_dir(&root2, "a");
        assert!(!dir.is_direct_child_of(&root1));
    }

    #[test]
    fn basename_under() {
        let root = Name::new_root("");
        let dir_a = Name::new_dir(&root, "a");
        let file_ab = Name::new_file(&dir_a, "b");
        assert_eq!(file_ab.basename_under(&dir_a), "b");
        assert_eq!(dir_a.basename_under(&root), "a");
    }

    #[test]
    fn map_keying_equality() {
        let root = Name::new_root("x");
        let n1 = Name::new_file(&root, "a");
        let n2 = Name::new_file(&root, "a");
        assert_eq!(n1, n2);

        let mut map = std::collections::HashMap::new();
        map.insert(n1, 42);
        assert_eq!(map.get(&n2), Some(&42));
    }

    #[test]
    fn conflict_marker_roundtrip() {
        let root = Name::new_root("");
        let file = Name::new_file(&root, "foo\u{000A}");
        let (stripped, had_marker) = file.strip_conflict_marker();
        assert!(had_marker);
        assert_eq!(stripped.key(), "foo");

        let plain = Name::new_file(&root, "foo");
        let (stripped2, had_marker2) = plain.strip_conflict_marker();
        assert!(!had_marker2);
        assert_eq!(stripped2, plain);
    }

    #[test]
    fn unsupported_basename() {
        assert!(!Name::basename_is_supported("foo\nbar"));
        assert!(!Name::basename_is_supported("foo\rbar"));
        assert!(Name::basename_is_supported("foo bar"));
    }
}
