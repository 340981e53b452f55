//! The inode layer: translates a flat object-store namespace into a
//! POSIX-shaped directory tree.
//!
//! This crate implements only the core: name/key mapping, the type cache,
//! and the three inode kinds' state machines. It has no knowledge of the
//! kernel-interface dispatch layer, the transport-level store client's
//! retry/auth policy, or mount-time configuration loading - those are
//! out-of-scope collaborators that consume this crate's public surface.
mod attr;
mod base_dir_inode;
mod config;
mod content;
mod core_descriptor;
mod dir_inode;
mod errors;
mod file_inode;
pub mod fixtures;
mod inode;
mod name;
mod store;
mod symlink_inode;
mod type_cache;

#[cfg(test)]
mod scenario_tests;

pub use attr::Attributes;
pub use base_dir_inode::BaseDirInode;
pub use config::MountConfig;
pub use core_descriptor::{Core, Type};
pub use dir_inode::{DirEntry, DirInode};
pub use errors::Error;
pub use file_inode::FileInode;
pub use inode::Inode;
pub use name::{Name, CONFLICT_MARKER};
pub use store::{
    Bucket, BucketManager, Folder, Generation, ListObjectsRequest, ListedObjects, MinObject,
    ObjectStoreBucket,
};
pub use symlink_inode::SymlinkInode;
pub use type_cache::{TypeCache, TypeCacheConfig};
