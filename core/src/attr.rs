//! Reserved metadata keys and the static attribute set every inode
//! carries.
use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};

/// Primary mtime metadata key: RFC3339Nano, UTC.
pub const MTIME_KEY: &str = "gcsfuse_mtime";
/// Legacy mtime key written by `gsutil`: Unix seconds, decimal.
pub const MTIME_KEY_GSUTIL: &str = "goog-reserved-file-mtime";
/// Marks a file object as a symlink; value is the link target.
pub const SYMLINK_TARGET_KEY: &str = "symlink-target";

/// Formats `t` as the value stored under [MTIME_KEY].
pub fn format_mtime(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parses an mtime out of an object's metadata map, preferring
/// [MTIME_KEY] over the `gsutil`-style [MTIME_KEY_GSUTIL], falling back to
/// `fallback` (usually the object's `updated` timestamp) if neither key is
/// present or parses.
pub fn parse_mtime(metadata: &HashMap<String, String>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    if let Some(v) = metadata.get(MTIME_KEY) {
        if let Ok(t) = DateTime::parse_from_rfc3339(v) {
            return t.with_timezone(&Utc);
        }
    }
    if let Some(v) = metadata.get(MTIME_KEY_GSUTIL) {
        if let Ok(secs) = v.parse::<i64>() {
            if let Some(t) = DateTime::from_timestamp(secs, 0) {
                return t;
            }
        }
    }
    fallback
}

/// Static POSIX attributes carried by every inode. `size`/`mtime` are
/// filled in per-call by `FileInode::attributes`/`DirInode` callers; the
/// rest is fixed at mount time (the dispatch layer owns uid/gid/mode
/// policy, this is just the shape the inode layer fills in).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attributes {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
    pub mtime_unix: i64,
    pub mtime_nsec: u32,
}

impl Attributes {
    pub fn dir(uid: u32, gid: u32, mode_bits: u32) -> Attributes {
        Attributes {
            uid,
            gid,
            mode: libc::S_IFDIR as u32 | mode_bits,
            nlink: 1,
            size: 0,
            mtime_unix: 0,
            mtime_nsec: 0,
        }
    }

    pub fn file(uid: u32, gid: u32, mode_bits: u32) -> Attributes {
        Attributes {
            uid,
            gid,
            mode: libc::S_IFREG as u32 | mode_bits,
            nlink: 1,
            size: 0,
            mtime_unix: 0,
            mtime_nsec: 0,
        }
    }

    pub fn symlink(uid: u32, gid: u32) -> Attributes {
        Attributes {
            uid,
            gid,
            mode: libc::S_IFLNK as u32 | 0o777,
            nlink: 1,
            size: 0,
            mtime_unix: 0,
            mtime_nsec: 0,
        }
    }

    /// Marks this attribute set as appearing unlinked to the kernel
    /// (nlink=0), used by `FileInode::attributes` when a clobber is
    /// detected under a `clobbered_check`.
    pub fn mark_unlinked(&mut self) {
        self.nlink = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtime_roundtrip() {
        let t = Utc::now();
        let formatted = format_mtime(t);
        let mut meta = HashMap::new();
        meta.insert(MTIME_KEY.to_string(), formatted);
        let parsed = parse_mtime(&meta, Utc::UNIX_EPOCH);
        // RFC3339Nano formatting is lossy past nanosecond precision only,
        // which chrono's Utc::now() already respects.
        assert_eq!(parsed.timestamp_nanos_opt(), t.timestamp_nanos_opt());
    }

    #[test]
    fn mtime_prefers_primary_key_over_gsutil() {
        let mut meta = HashMap::new();
        meta.insert(MTIME_KEY.to_string(), format_mtime(Utc::UNIX_EPOCH + chrono::Duration::seconds(100)));
        meta.insert(MTIME_KEY_GSUTIL.to_string(), "5".to_string());
        let parsed = parse_mtime(&meta, Utc::UNIX_EPOCH);
        assert_eq!(parsed.timestamp(), 100);
    }

    #[test]
    fn mtime_falls_back_to_gsutil_key() {
        let mut meta = HashMap::new();
        meta.insert(MTIME_KEY_GSUTIL.to_string(), "42".to_string());
        let parsed = parse_mtime(&meta, Utc::UNIX_EPOCH);
        assert_eq!(parsed.timestamp(), 42);
    }

    #[test]
    fn mtime_falls_back_to_fallback_when_absent() {
        let meta = HashMap::new();
        let fallback = Utc::UNIX_EPOCH + chrono::Duration::seconds(7);
        let parsed = parse_mtime(&meta, fallback);
        assert_eq!(parsed, fallback);
    }
}
