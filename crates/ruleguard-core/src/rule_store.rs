//! Durable rule storage
//!
//! TigerStyle: Write-to-temp, verify, rename. Never publish a torn record.
//!
//! The committed record lives at `<dir>/rules.json`:
//!
//! ```text
//! ruleguard-rules v1 len=<body bytes> crc32=<8 hex digits>\n
//! <JSON array of rules>
//! ```
//!
//! Loads verify both the length and the checksum, so a truncated or
//! bit-flipped record is reported as `Error::CorruptRecord` rather than being
//! parsed into rules that were never written.

use crate::constants::{
    RULES_FILE_NAME, RULES_FILE_SIZE_BYTES_MAX, RULES_TMP_FILE_NAME, RULE_STORE_RULES_COUNT_MAX,
    STORAGE_DIR_MODE_DEFAULT,
};
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::rule::Rule;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

const RECORD_MAGIC: &str = "ruleguard-rules";
const RECORD_VERSION: &str = "v1";

/// Rule storage operations
pub trait RuleStore {
    /// All rules, sorted by ID
    fn list(&self) -> Result<Vec<Rule>>;

    /// Fetch one rule
    fn get(&self, id: &str) -> Result<Rule>;

    /// Durably create a rule; on error the store is unchanged
    fn create(&mut self, rule: Rule) -> Result<()>;

    /// Durably delete a rule; on error the store is unchanged
    fn delete(&mut self, id: &str) -> Result<()>;

    /// Number of rules
    fn count(&self) -> usize;
}

/// Rule store persisting a single checksummed record through a `FileSystem`
#[derive(Debug)]
pub struct DiskRuleStore<F: FileSystem> {
    fs: F,
    dir: PathBuf,
    file_mode: u32,
    rules: BTreeMap<String, Rule>,
}

impl<F: FileSystem> DiskRuleStore<F> {
    /// Open the store rooted at `dir`, loading any committed record
    ///
    /// A missing record is a fresh start. Any other read or decode failure is
    /// returned; the caller decides whether to retry.
    pub fn open(fs: F, dir: impl Into<PathBuf>, file_mode: u32) -> Result<Self> {
        let dir = dir.into();
        fs.mkdir_all(&dir, STORAGE_DIR_MODE_DEFAULT)?;

        let mut store = Self {
            fs,
            dir,
            file_mode,
            rules: BTreeMap::new(),
        };

        match store.read_durable() {
            Ok(rules) => {
                store.rules = rules.into_iter().map(|r| (r.id.clone(), r)).collect();
            }
            Err(Error::FileNotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        // A leftover temp file is an uncommitted write from before a crash.
        let tmp = store.tmp_path();
        if store.fs.stat(&tmp).is_ok() {
            tracing::debug!(path = %tmp.display(), "Discarding uncommitted rule record");
            store.discard_tmp(&tmp);
        }

        tracing::debug!(
            dir = %store.dir.display(),
            rules = store.rules.len(),
            "Rule store opened"
        );
        Ok(store)
    }

    /// Path of the committed record
    pub fn path(&self) -> PathBuf {
        self.dir.join(RULES_FILE_NAME)
    }

    fn tmp_path(&self) -> PathBuf {
        self.dir.join(RULES_TMP_FILE_NAME)
    }

    /// The file system this store writes through
    pub fn file_system(&self) -> &F {
        &self.fs
    }

    /// Re-read the committed record without touching in-memory state
    pub fn read_durable(&self) -> Result<Vec<Rule>> {
        let path = self.path();
        let data = self.fs.read_file(&path)?;
        decode_record(&path, &data)
    }

    fn persist(&self) -> Result<()> {
        let rules: Vec<&Rule> = self.rules.values().collect();
        let data = encode_record(&rules)?;
        let tmp = self.tmp_path();

        let result = self.write_and_commit(&tmp, &data);
        if result.is_err() {
            self.discard_tmp(&tmp);
        }
        result
    }

    /// Best-effort removal of the temp record; a leftover is cleaned on next open
    fn discard_tmp(&self, tmp: &Path) {
        match self.fs.remove(tmp) {
            Ok(()) | Err(Error::FileNotFound { .. }) => {}
            Err(e) => {
                tracing::debug!(
                    path = %tmp.display(),
                    error = %e,
                    "Failed to remove temp rule record"
                );
            }
        }
    }

    fn write_and_commit(&self, tmp: &Path, data: &[u8]) -> Result<()> {
        self.fs.write_file(tmp, data, self.file_mode)?;

        let written = self.fs.stat(tmp)?.size_bytes as usize;
        if written != data.len() {
            return Err(Error::ShortWrite {
                path: tmp.display().to_string(),
                written,
                expected: data.len(),
            });
        }

        self.fs.rename(tmp, &self.path())
    }
}

impl<F: FileSystem> RuleStore for DiskRuleStore<F> {
    fn list(&self) -> Result<Vec<Rule>> {
        Ok(self.rules.values().cloned().collect())
    }

    fn get(&self, id: &str) -> Result<Rule> {
        self.rules
            .get(id)
            .cloned()
            .ok_or_else(|| Error::rule_not_found(id))
    }

    fn create(&mut self, rule: Rule) -> Result<()> {
        rule.validate()?;
        if self.rules.contains_key(&rule.id) {
            return Err(Error::RuleAlreadyExists { id: rule.id });
        }
        if self.rules.len() >= RULE_STORE_RULES_COUNT_MAX {
            return Err(Error::invalid_argument(
                "rule",
                format!("store holds the maximum of {} rules", RULE_STORE_RULES_COUNT_MAX),
            ));
        }

        let id = rule.id.clone();
        self.rules.insert(id.clone(), rule);
        if let Err(e) = self.persist() {
            self.rules.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<()> {
        let removed = self
            .rules
            .remove(id)
            .ok_or_else(|| Error::rule_not_found(id))?;
        if let Err(e) = self.persist() {
            self.rules.insert(id.to_string(), removed);
            return Err(e);
        }
        Ok(())
    }

    fn count(&self) -> usize {
        self.rules.len()
    }
}

/// Encode rules as a checksummed record
pub fn encode_record(rules: &[&Rule]) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(rules)?;
    if body.len() > RULES_FILE_SIZE_BYTES_MAX {
        return Err(Error::SerializationFailed {
            reason: format!(
                "rule record is {} bytes, max {}",
                body.len(),
                RULES_FILE_SIZE_BYTES_MAX
            ),
        });
    }

    let header = format!(
        "{} {} len={} crc32={:08x}\n",
        RECORD_MAGIC,
        RECORD_VERSION,
        body.len(),
        crc32fast::hash(&body)
    );
    let mut data = Vec::with_capacity(header.len() + body.len());
    data.extend_from_slice(header.as_bytes());
    data.extend_from_slice(&body);
    Ok(data)
}

/// Decode and verify a record produced by `encode_record`
pub fn decode_record(path: &Path, data: &[u8]) -> Result<Vec<Rule>> {
    let corrupt = |reason: String| Error::corrupt_record(path.display().to_string(), reason);

    let newline = data
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| corrupt("missing header".into()))?;
    let header = std::str::from_utf8(&data[..newline])
        .map_err(|_| corrupt("header is not utf-8".into()))?;
    let body = &data[newline + 1..];

    let (len, crc) = parse_header(header).ok_or_else(|| corrupt(format!("bad header {:?}", header)))?;
    if body.len() != len {
        return Err(corrupt(format!(
            "length mismatch: header {} bytes, body {} bytes",
            len,
            body.len()
        )));
    }
    let actual = crc32fast::hash(body);
    if actual != crc {
        return Err(corrupt(format!(
            "checksum mismatch: expected {:08x}, got {:08x}",
            crc, actual
        )));
    }

    let rules: Vec<Rule> =
        serde_json::from_slice(body).map_err(|e| corrupt(format!("invalid body: {}", e)))?;

    let mut seen = BTreeSet::new();
    for rule in &rules {
        rule.validate().map_err(|e| corrupt(e.to_string()))?;
        if !seen.insert(rule.id.as_str()) {
            return Err(corrupt(format!("duplicate rule id {}", rule.id)));
        }
    }
    Ok(rules)
}

fn parse_header(header: &str) -> Option<(usize, u32)> {
    let mut parts = header.split(' ');
    if parts.next()? != RECORD_MAGIC || parts.next()? != RECORD_VERSION {
        return None;
    }
    let len = parts.next()?.strip_prefix("len=")?.parse().ok()?;
    let crc_hex = parts.next()?.strip_prefix("crc32=")?;
    if crc_hex.len() != 8 || parts.next().is_some() {
        return None;
    }
    let crc = u32::from_str_radix(crc_hex, 16).ok()?;
    Some((len, crc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileInfo, MemFileSystem, StdFileSystem};
    use std::sync::Arc;

    const DIR: &str = "/data";

    fn rule(id: &str) -> Rule {
        Rule::new(id, format!("rule {}", id), "span.duration > 100").unwrap()
    }

    #[test]
    fn test_create_and_reopen() {
        let fs = Arc::new(MemFileSystem::new());
        let mut store = DiskRuleStore::open(fs.clone(), DIR, 0o644).unwrap();
        store.create(rule("a")).unwrap();
        store.create(rule("b")).unwrap();
        assert_eq!(store.count(), 2);

        let reopened = DiskRuleStore::open(fs.clone(), DIR, 0o644).unwrap();
        let ids: Vec<String> = reopened.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(!fs.exists(Path::new("/data/rules.json.tmp")));
    }

    #[test]
    fn test_open_fresh() {
        let fs = Arc::new(MemFileSystem::new());
        let store = DiskRuleStore::open(fs, DIR, 0o644).unwrap();
        assert_eq!(store.count(), 0);
        assert!(matches!(store.read_durable(), Err(Error::FileNotFound { .. })));
    }

    #[test]
    fn test_duplicate_rejected() {
        let fs = Arc::new(MemFileSystem::new());
        let mut store = DiskRuleStore::open(fs, DIR, 0o644).unwrap();
        store.create(rule("a")).unwrap();
        assert!(matches!(
            store.create(rule("a")),
            Err(Error::RuleAlreadyExists { .. })
        ));
        assert_eq!(store.count(), 1);
    }

    /// Memory file system whose renames and removes always fail
    struct StuckFs(MemFileSystem);

    impl FileSystem for StuckFs {
        fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
            self.0.read_file(path)
        }
        fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<()> {
            self.0.write_file(path, data, mode)
        }
        fn rename(&self, from: &Path, _to: &Path) -> Result<()> {
            Err(Error::interrupted(from.display().to_string(), "rename"))
        }
        fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()> {
            self.0.mkdir_all(path, mode)
        }
        fn remove(&self, _path: &Path) -> Result<()> {
            Err(Error::internal("remove refused"))
        }
        fn stat(&self, path: &Path) -> Result<FileInfo> {
            self.0.stat(path)
        }
    }

    #[test]
    fn test_failed_cleanup_keeps_original_error() {
        let fs = Arc::new(StuckFs(MemFileSystem::new()));
        let mut store = DiskRuleStore::open(fs.clone(), DIR, 0o644).unwrap();

        let err = store.create(rule("a")).unwrap_err();
        assert!(matches!(err, Error::Interrupted { .. }), "{}", err);
        assert_eq!(store.count(), 0);
        assert!(fs.0.exists(Path::new("/data/rules.json.tmp")));

        // Open tolerates a temp record it cannot remove.
        let reopened = DiskRuleStore::open(fs, DIR, 0o644).unwrap();
        assert_eq!(reopened.count(), 0);
    }

    #[test]
    fn test_store_on_host_file_system() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("rules");
        let mut store = DiskRuleStore::open(StdFileSystem::new(), &dir, 0o600).unwrap();
        store.create(rule("a")).unwrap();
        store.create(rule("b")).unwrap();
        store.delete("a").unwrap();

        let reopened = DiskRuleStore::open(StdFileSystem::new(), &dir, 0o600).unwrap();
        assert_eq!(reopened.list().unwrap(), vec![rule("b")]);
        assert!(!dir.join(RULES_TMP_FILE_NAME).exists());
        #[cfg(unix)]
        assert_eq!(StdFileSystem::new().stat(&reopened.path()).unwrap().mode, 0o600);
    }

    #[test]
    fn test_delete_persists() {
        let fs = Arc::new(MemFileSystem::new());
        let mut store = DiskRuleStore::open(fs.clone(), DIR, 0o644).unwrap();
        store.create(rule("a")).unwrap();
        store.create(rule("b")).unwrap();
        store.delete("a").unwrap();
        assert!(matches!(store.get("a"), Err(Error::RuleNotFound { .. })));

        let reopened = DiskRuleStore::open(fs, DIR, 0o644).unwrap();
        assert_eq!(reopened.count(), 1);
        assert_eq!(reopened.get("b").unwrap().id, "b");
    }

    #[test]
    fn test_open_discards_stale_tmp() {
        let fs = Arc::new(MemFileSystem::new());
        fs.write_file(Path::new("/data/rules.json.tmp"), b"garbage", 0o644)
            .unwrap();
        let store = DiskRuleStore::open(fs.clone(), DIR, 0o644).unwrap();
        assert_eq!(store.count(), 0);
        assert!(!fs.exists(Path::new("/data/rules.json.tmp")));
    }

    #[test]
    fn test_decode_detects_bit_flip() {
        let r = rule("a");
        let mut data = encode_record(&[&r]).unwrap();
        let path = Path::new("/data/rules.json");
        assert_eq!(decode_record(path, &data).unwrap(), vec![r]);

        for i in 0..data.len() {
            data[i] = !data[i];
            assert!(
                matches!(decode_record(path, &data), Err(Error::CorruptRecord { .. })),
                "flip at byte {} was not detected",
                i
            );
            data[i] = !data[i];
        }
    }

    #[test]
    fn test_decode_detects_truncation() {
        let data = encode_record(&[&rule("a"), &rule("b")]).unwrap();
        let path = Path::new("/data/rules.json");
        for len in 0..data.len() {
            assert!(decode_record(path, &data[..len]).is_err(), "prefix {} accepted", len);
        }
    }

    #[test]
    fn test_empty_record_round_trips() {
        let data = encode_record(&[]).unwrap();
        assert!(decode_record(Path::new("/r"), &data).unwrap().is_empty());
    }
}
