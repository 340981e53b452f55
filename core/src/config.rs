//! Mount-time configuration for the inode layer.
//!
//! A plain `serde` struct with `deny_unknown_fields`, no dynamic
//! composition registry. This layer has exactly one config consumer (the
//! dispatch layer, which constructs the root `BaseDirInode` at mount
//! time), so a service-registry for wiring together an arbitrary graph
//! of interchangeable services from a config file has no place here.
use std::time::Duration;

use serde::Deserialize;

use crate::type_cache::TypeCacheConfig;

fn default_type_cache_ttl_secs() -> u64 {
    60
}

fn default_type_cache_max_size_bytes() -> usize {
    4 << 20
}

fn default_kernel_list_cache_ttl_secs() -> u64 {
    0
}

/// Mount-wide configuration, deserializable from the dispatch layer's
/// config file (or built programmatically in tests via `Default`).
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MountConfig {
    /// Whether to synthesize `Type::ImplicitDir` entries for prefixes that
    /// have no placeholder object, purely from descendant existence.
    pub implicit_dirs: bool,

    /// Whether `TypeCache` may hold `Type::Nonexistent` entries.
    pub enable_nonexistent_type_cache: bool,

    /// On a hierarchical bucket, whether `ReadEntries` should report
    /// common-prefix folders that have no explicit folder marker as
    /// directory entries.
    pub include_folders_as_prefixes: bool,

    #[serde(rename = "type_cache_ttl_secs", default = "default_type_cache_ttl_secs")]
    type_cache_ttl_secs: u64,

    #[serde(default = "default_type_cache_max_size_bytes")]
    pub type_cache_max_size_bytes: usize,

    /// How long the kernel is told it may cache a directory's entry list
    /// before revalidating. Zero disables kernel-side list caching
    /// entirely.
    #[serde(
        rename = "kernel_list_cache_ttl_secs",
        default = "default_kernel_list_cache_ttl_secs"
    )]
    kernel_list_cache_ttl_secs: u64,
}

impl MountConfig {
    pub fn type_cache_config(&self) -> TypeCacheConfig {
        TypeCacheConfig {
            ttl: Duration::from_secs(self.type_cache_ttl_secs),
            max_size_bytes: self.type_cache_max_size_bytes,
            enable_nonexistent_type_cache: self.enable_nonexistent_type_cache,
        }
    }

    pub fn kernel_list_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.kernel_list_cache_ttl_secs)
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            implicit_dirs: true,
            enable_nonexistent_type_cache: false,
            include_folders_as_prefixes: false,
            type_cache_ttl_secs: default_type_cache_ttl_secs(),
            type_cache_max_size_bytes: default_type_cache_max_size_bytes(),
            kernel_list_cache_ttl_secs: default_kernel_list_cache_ttl_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_defaults() {
        let cfg = MountConfig::default();
        assert!(cfg.implicit_dirs);
        assert!(!cfg.enable_nonexistent_type_cache);
        assert_eq!(cfg.type_cache_config().ttl, Duration::from_secs(60));
    }

    #[test]
    fn deserializes_from_json_with_partial_overrides() {
        let cfg: MountConfig = serde_json::from_str(
            r#"{"implicit_dirs": false, "enable_nonexistent_type_cache": true, "include_folders_as_prefixes": false}"#,
        )
        .unwrap();
        assert!(!cfg.implicit_dirs);
        assert!(cfg.enable_nonexistent_type_cache);
        assert_eq!(cfg.type_cache_max_size_bytes, default_type_cache_max_size_bytes());
    }

    #[test]
    fn rejects_unknown_fields() {
        let result: Result<MountConfig, _> = serde_json::from_str(r#"{"bogus_field": true}"#);
        assert!(result.is_err());
    }
}
