//! The [Core] descriptor: a transient value produced by a lookup/list, and
//! consumed by the dispatch layer to construct or refresh an inode.
use crate::name::Name;
use crate::store::{Folder, MinObject};

/// The classification of a [Core], derived from its fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Type {
    /// No descriptor at all - the absence of a lookup result.
    Unknown,
    /// A negative TypeCache entry.
    Nonexistent,
    /// A directory witnessed by a placeholder object or folder marker.
    ExplicitDir,
    /// A directory inferred purely from a descendant's existence.
    ImplicitDir,
    /// A file carrying the `symlink-target` metadata key.
    Symlink,
    /// Any other file.
    RegularFile,
}

/// A transient descriptor produced by a lookup or list operation.
///
/// `Core` does not itself hold a lock or participate in the inode
/// lifecycle; it is the value the dispatch layer uses to construct a new
/// inode or refresh an existing one's source state.
#[derive(Clone, Debug)]
pub struct Core {
    name: Name,
    object: Option<MinObject>,
    folder: Option<Folder>,
    local: bool,
}

impl Core {
    /// A descriptor for a name that does not exist (a negative lookup
    /// result, or the seed for `Type::Unknown` when no descriptor was
    /// produced at all - see [Core::absent]).
    pub fn nonexistent(name: Name) -> Core {
        Core {
            name,
            object: None,
            folder: None,
            local: false,
        }
    }

    /// A descriptor for a regular file or symlink, backed by a store
    /// object.
    pub fn from_object(name: Name, object: MinObject) -> Core {
        debug_assert!(
            object.name == name.key(),
            "MinObject.name must agree with Name.key"
        );
        Core {
            name,
            object: Some(object),
            folder: None,
            local: false,
        }
    }

    /// A descriptor for an explicit directory on a hierarchical bucket,
    /// backed by a folder marker rather than a placeholder object.
    pub fn from_folder(name: Name, folder: Folder) -> Core {
        Core {
            name,
            object: None,
            folder: Some(folder),
            local: false,
        }
    }

    /// A descriptor for an implicit directory: no placeholder object, no
    /// folder marker, synthesized purely because a descendant exists.
    pub fn implicit_dir(name: Name) -> Core {
        Core {
            name,
            object: None,
            folder: None,
            local: false,
        }
    }

    /// A descriptor for a file created locally that has never existed in
    /// the store.
    pub fn local_file(name: Name) -> Core {
        Core {
            name,
            object: None,
            folder: None,
            local: true,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn object(&self) -> Option<&MinObject> {
        self.object.as_ref()
    }

    pub fn folder(&self) -> Option<&Folder> {
        self.folder.as_ref()
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    /// `Exists() = (descriptor is non-nil)`. Every [Core] we hand out
    /// already "exists" in the sense the dispatch layer cares about
    /// (backed by an object, a folder, a descendant, or local state); this
    /// distinguishes a `Core` from the absence of one (`Option<Core>` in
    /// `LookUpChild`'s return type is the real `Unknown`/absent case).
    pub fn exists(&self) -> bool {
        true
    }

    /// Computes this descriptor's [Type].
    pub fn kind(&self) -> Type {
        if self.name.is_dir() {
            if self.folder.is_some() || self.object.is_some() {
                Type::ExplicitDir
            } else {
                Type::ImplicitDir
            }
        } else if let Some(obj) = &self.object {
            if obj.metadata_get(crate::attr::SYMLINK_TARGET_KEY).is_some() {
                Type::Symlink
            } else {
                Type::RegularFile
            }
        } else if self.local {
            Type::RegularFile
        } else {
            // A file Core with neither an object nor `local` set violates
            // the sanity invariant; callers should not construct one, but
            // report it as RegularFile rather than panic in a getter.
            Type::RegularFile
        }
    }

    /// Fails when (a) `MinObject` is present but its name disagrees with
    /// `Name.key`, or (b) `MinObject` is absent, the file is not local,
    /// and `Name` is a file (a file inode must be either synced or
    /// explicitly local).
    pub fn sanity_check(&self) -> Result<(), String> {
        if let Some(obj) = &self.object {
            if obj.name != self.name.key() {
                return Err(format!(
                    "MinObject.name {:?} disagrees with Name.key {:?}",
                    obj.name,
                    self.name.key()
                ));
            }
        }
        if self.object.is_none() && !self.local && self.name.is_file() {
            return Err(format!(
                "file Core for {:?} has neither MinObject nor Local=true",
                self.name
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Generation;
    use std::collections::HashMap;

    fn object(key: &str) -> MinObject {
        MinObject {
            name: key.to_string(),
            size: 0,
            generation: Generation::ZERO,
            updated_unix: 0,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn explicit_dir_with_placeholder() {
        let root = Name::new_root("");
        let dir = Name::new_dir(&root, "a");
        let core = Core::from_object(dir.clone(), object(dir.key()));
        assert_eq!(core.kind(), Type::ExplicitDir);
        assert!(core.sanity_check().is_ok());
    }

    #[test]
    fn implicit_dir_has_no_backing_object() {
        let root = Name::new_root("");
        let dir = Name::new_dir(&root, "a");
        let core = Core::implicit_dir(dir);
        assert_eq!(core.kind(), Type::ImplicitDir);
        assert!(core.object().is_none());
    }

    #[test]
    fn regular_file_without_symlink_metadata() {
        let root = Name::new_root("");
        let file = Name::new_file(&root, "a");
        let core = Core::from_object(file.clone(), object(file.key()));
        assert_eq!(core.kind(), Type::RegularFile);
    }

    #[test]
    fn symlink_detected_by_metadata_key() {
        let root = Name::new_root("");
        let file = Name::new_file(&root, "a");
        let mut obj = object(file.key());
        obj.metadata
            .insert(crate::attr::SYMLINK_TARGET_KEY.to_string(), "/dst".to_string());
        let core = Core::from_object(file, obj);
        assert_eq!(core.kind(), Type::Symlink);
    }

    #[test]
    fn sanity_check_fails_on_name_mismatch() {
        let root = Name::new_root("");
        let file = Name::new_file(&root, "a");
        let core = Core::from_object(file, object("b"));
        assert!(core.sanity_check().is_err());
    }

    #[test]
    fn sanity_check_passes_for_local_file() {
        let root = Name::new_root("");
        let file = Name::new_file(&root, "a");
        let core = Core::local_file(file);
        assert!(core.sanity_check().is_ok());
        assert!(core.is_local());
    }
}
