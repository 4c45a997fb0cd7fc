//! Two-level result cache: page-level OCR output and file-level extraction
//! output, both content-addressed and LRU-bounded.
//!
//! One SQLite database holds two independent tables:
//!
//!   page_cache  - keyed by (image digest, page-option digest)
//!                 stores recognized text + confidence + searchable bytes
//!                 hit = zero engine invocations for that page
//!
//!   file_cache  - keyed by (file digest, file-option digest)
//!                 stores the remote extraction payload (text mode)
//!                 hit = zero round-trips to the extraction service
//!
//! Every public operation takes one coarse lock around the whole table
//! operation. The external OCR cost dominates lock hold time by orders of
//! magnitude, so correctness wins over fine-grained locking here.
//!
//! Only successful results are ever written. A failed recognition or
//! extraction leaves no entry behind, so transient failures get retried
//! instead of being served back from the cache.

use crate::error::{Result, TextmillError};
use crate::hashing::{FileFingerprint, PageFingerprint};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

/// Cached OCR output for one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageEntry {
    pub text: String,
    pub confidence: Option<f64>,
    /// Optional searchable artifact (hOCR bytes) produced by the engine.
    pub page_bytes: Option<Vec<u8>>,
}

/// Cached remote-extraction payload for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub extracted_text: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub final_text: String,
}

/// Entry and cumulative hit counts per table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub page_entries: usize,
    pub page_hits: u64,
    pub file_entries: usize,
    pub file_hits: u64,
}

/// SQLite-backed LRU cache shared by all pipeline invocations.
///
/// Construct once at startup and share by `Arc`; the internal lock
/// serializes access from concurrent OCR workers.
pub struct ResultCache {
    conn: Mutex<Connection>,
    max_page_entries: usize,
    max_file_entries: usize,
}

impl ResultCache {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: &Path, max_page_entries: usize, max_file_entries: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, max_page_entries, max_file_entries)
    }

    /// In-memory cache, used by tests.
    pub fn open_in_memory(max_page_entries: usize, max_file_entries: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, max_page_entries, max_file_entries)
    }

    fn from_connection(
        conn: Connection,
        max_page_entries: usize,
        max_file_entries: usize,
    ) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS page_cache (
                cache_key   TEXT PRIMARY KEY,
                ocr_text    TEXT NOT NULL,
                confidence  REAL,
                page_bytes  BLOB,
                created_at  INTEGER NOT NULL,
                accessed_at INTEGER NOT NULL,
                hit_count   INTEGER DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS file_cache (
                cache_key   TEXT PRIMARY KEY,
                result_json TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                accessed_at INTEGER NOT NULL,
                hit_count   INTEGER DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_page_accessed ON page_cache(accessed_at);
            CREATE INDEX IF NOT EXISTS idx_file_accessed ON file_cache(accessed_at);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            max_page_entries,
            max_file_entries,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TextmillError::LockPoisoned(format!("Cache connection mutex poisoned: {}", e)))
    }

    fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    /// Look up a page result. A hit refreshes `accessed_at` and bumps the
    /// hit counter inside the same locked section.
    pub fn get_page(&self, fingerprint: &PageFingerprint) -> Result<Option<PageEntry>> {
        let key = fingerprint.cache_key();
        let conn = self.lock()?;

        let row = conn
            .query_row(
                "SELECT ocr_text, confidence, page_bytes FROM page_cache WHERE cache_key = ?1",
                params![key],
                |row| {
                    Ok(PageEntry {
                        text: row.get(0)?,
                        confidence: row.get(1)?,
                        page_bytes: row.get(2)?,
                    })
                },
            )
            .optional()?;

        if row.is_some() {
            conn.execute(
                "UPDATE page_cache SET accessed_at = ?1, hit_count = hit_count + 1 WHERE cache_key = ?2",
                params![Self::now_millis(), key],
            )?;
            tracing::debug!("Page cache HIT: {}", &key[..key.len().min(40)]);
        }

        Ok(row)
    }

    /// Store a successful page result, then enforce the table bound.
    pub fn set_page(&self, fingerprint: &PageFingerprint, entry: &PageEntry) -> Result<()> {
        let key = fingerprint.cache_key();
        let now = Self::now_millis();
        let conn = self.lock()?;

        conn.execute(
            "INSERT OR REPLACE INTO page_cache \
             (cache_key, ocr_text, confidence, page_bytes, created_at, accessed_at, hit_count) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![key, entry.text, entry.confidence, entry.page_bytes, now, now],
        )?;

        Self::evict(&conn, "page_cache", self.max_page_entries)?;
        tracing::debug!("Page cache SET: {}", &key[..key.len().min(40)]);
        Ok(())
    }

    /// Look up a file-level extraction result.
    pub fn get_file(&self, fingerprint: &FileFingerprint) -> Result<Option<FileEntry>> {
        let key = fingerprint.cache_key();
        let conn = self.lock()?;

        let row: Option<String> = conn
            .query_row(
                "SELECT result_json FROM file_cache WHERE cache_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        let Some(json) = row else {
            return Ok(None);
        };

        conn.execute(
            "UPDATE file_cache SET accessed_at = ?1, hit_count = hit_count + 1 WHERE cache_key = ?2",
            params![Self::now_millis(), key],
        )?;
        tracing::info!("File cache HIT: {}", &key[..key.len().min(40)]);

        let entry: FileEntry = serde_json::from_str(&json)?;
        Ok(Some(entry))
    }

    /// Store a successful file-level extraction result.
    pub fn set_file(&self, fingerprint: &FileFingerprint, entry: &FileEntry) -> Result<()> {
        let key = fingerprint.cache_key();
        let json = serde_json::to_string(entry)?;
        let now = Self::now_millis();
        let conn = self.lock()?;

        conn.execute(
            "INSERT OR REPLACE INTO file_cache \
             (cache_key, result_json, created_at, accessed_at, hit_count) \
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![key, json, now, now],
        )?;

        Self::evict(&conn, "file_cache", self.max_file_entries)?;
        tracing::info!("File cache SET: {}", &key[..key.len().min(40)]);
        Ok(())
    }

    /// Entry and hit counts for both tables. Observability only.
    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.lock()?;

        let (page_entries, page_hits) = Self::table_stats(&conn, "page_cache")?;
        let (file_entries, file_hits) = Self::table_stats(&conn, "file_cache")?;

        Ok(CacheStats {
            page_entries,
            page_hits,
            file_entries,
            file_hits,
        })
    }

    /// Remove every entry from both tables.
    pub fn clear(&self) -> Result<(usize, usize)> {
        let conn = self.lock()?;
        let pages = conn.execute("DELETE FROM page_cache", [])?;
        let files = conn.execute("DELETE FROM file_cache", [])?;
        Ok((pages, files))
    }

    fn table_stats(conn: &Connection, table: &str) -> Result<(usize, u64)> {
        let sql = format!("SELECT COUNT(*), COALESCE(SUM(hit_count), 0) FROM {}", table);
        let stats = conn.query_row(&sql, [], |row| {
            Ok((row.get::<_, i64>(0)? as usize, row.get::<_, i64>(1)? as u64))
        })?;
        Ok(stats)
    }

    /// LRU eviction: while the table exceeds its bound, delete the excess
    /// entries with the oldest `accessed_at` in one batched statement.
    fn evict(conn: &Connection, table: &str, max_entries: usize) -> Result<()> {
        let count_sql = format!("SELECT COUNT(*) FROM {}", table);
        let count: i64 = conn.query_row(&count_sql, [], |row| row.get(0))?;

        if count as usize > max_entries {
            let excess = count as usize - max_entries;
            let delete_sql = format!(
                "DELETE FROM {table} WHERE cache_key IN \
                 (SELECT cache_key FROM {table} ORDER BY accessed_at ASC LIMIT ?1)",
                table = table
            );
            conn.execute(&delete_sql, params![excess as i64])?;
            tracing::info!("Evicted {} entries from {}", excess, table);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobOptions;

    fn page_fp(n: usize) -> PageFingerprint {
        PageFingerprint {
            image_hash: format!("{:064x}", n),
            options_hash: "0123456789abcdef".to_string(),
        }
    }

    fn file_fp(n: usize) -> FileFingerprint {
        FileFingerprint {
            file_hash: format!("{:064x}", n),
            options_hash: "fedcba9876543210".to_string(),
        }
    }

    fn page_entry(text: &str) -> PageEntry {
        PageEntry {
            text: text.to_string(),
            confidence: Some(91.5),
            page_bytes: None,
        }
    }

    fn set_accessed_at(cache: &ResultCache, table: &str, key: &str, value: i64) {
        let conn = cache.conn.lock().unwrap();
        let sql = format!("UPDATE {} SET accessed_at = ?1 WHERE cache_key = ?2", table);
        conn.execute(&sql, params![value, key]).unwrap();
    }

    #[test]
    fn test_page_get_set_roundtrip() {
        let cache = ResultCache::open_in_memory(100, 100).unwrap();
        let fp = page_fp(1);

        assert!(cache.get_page(&fp).unwrap().is_none());

        let entry = PageEntry {
            text: "recognized text".to_string(),
            confidence: Some(87.0),
            page_bytes: Some(b"<hocr/>".to_vec()),
        };
        cache.set_page(&fp, &entry).unwrap();

        let cached = cache.get_page(&fp).unwrap().unwrap();
        assert_eq!(cached, entry);
    }

    #[test]
    fn test_file_get_set_roundtrip() {
        let cache = ResultCache::open_in_memory(100, 100).unwrap();
        let fp = file_fp(1);

        assert!(cache.get_file(&fp).unwrap().is_none());

        let mut metadata = HashMap::new();
        metadata.insert("Content-Type".to_string(), serde_json::json!("application/pdf"));
        let entry = FileEntry {
            extracted_text: "full text".to_string(),
            metadata,
            final_text: "full text".to_string(),
        };
        cache.set_file(&fp, &entry).unwrap();

        let cached = cache.get_file(&fp).unwrap().unwrap();
        assert_eq!(cached, entry);
    }

    #[test]
    fn test_hit_bookkeeping() {
        let cache = ResultCache::open_in_memory(100, 100).unwrap();
        let fp = page_fp(1);
        cache.set_page(&fp, &page_entry("text")).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.page_entries, 1);
        assert_eq!(stats.page_hits, 0);

        cache.get_page(&fp).unwrap();
        cache.get_page(&fp).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.page_hits, 2);
    }

    #[test]
    fn test_miss_does_not_count_as_hit() {
        let cache = ResultCache::open_in_memory(100, 100).unwrap();
        cache.get_page(&page_fp(42)).unwrap();
        assert_eq!(cache.stats().unwrap().page_hits, 0);
    }

    #[test]
    fn test_replace_keeps_single_entry() {
        let cache = ResultCache::open_in_memory(100, 100).unwrap();
        let fp = page_fp(1);
        cache.set_page(&fp, &page_entry("first")).unwrap();
        cache.set_page(&fp, &page_entry("second")).unwrap();

        assert_eq!(cache.stats().unwrap().page_entries, 1);
        assert_eq!(cache.get_page(&fp).unwrap().unwrap().text, "second");
    }

    #[test]
    fn test_eviction_bound_exact() {
        // maxEntries + K inserts with strictly increasing access times leave
        // exactly maxEntries behind, dropping precisely the K oldest.
        let max = 5usize;
        let extra = 3usize;
        let cache = ResultCache::open_in_memory(max, 100).unwrap();

        for i in 1..=(max + extra) {
            let fp = page_fp(i);
            cache.set_page(&fp, &page_entry(&format!("page {}", i))).unwrap();
            set_accessed_at(&cache, "page_cache", &fp.cache_key(), i as i64);
        }

        assert_eq!(cache.stats().unwrap().page_entries, max);
        for i in 1..=extra {
            assert!(cache.get_page(&page_fp(i)).unwrap().is_none(), "entry {} should be evicted", i);
        }
        for i in (extra + 1)..=(max + extra) {
            assert!(cache.get_page(&page_fp(i)).unwrap().is_some(), "entry {} should survive", i);
        }
    }

    #[test]
    fn test_eviction_respects_recency() {
        let cache = ResultCache::open_in_memory(2, 100).unwrap();

        let a = page_fp(1);
        let b = page_fp(2);
        cache.set_page(&a, &page_entry("a")).unwrap();
        cache.set_page(&b, &page_entry("b")).unwrap();
        set_accessed_at(&cache, "page_cache", &a.cache_key(), 1);
        set_accessed_at(&cache, "page_cache", &b.cache_key(), 2);

        // Touch A so it becomes the most recently used entry.
        cache.get_page(&a).unwrap();

        let c = page_fp(3);
        cache.set_page(&c, &page_entry("c")).unwrap();

        assert!(cache.get_page(&a).unwrap().is_some());
        assert!(cache.get_page(&b).unwrap().is_none());
        assert!(cache.get_page(&c).unwrap().is_some());
    }

    #[test]
    fn test_file_eviction_independent_of_page_table() {
        let cache = ResultCache::open_in_memory(1, 2).unwrap();

        for i in 1..=3 {
            let entry = FileEntry {
                extracted_text: format!("text {}", i),
                metadata: HashMap::new(),
                final_text: format!("text {}", i),
            };
            let fp = file_fp(i);
            cache.set_file(&fp, &entry).unwrap();
            set_accessed_at(&cache, "file_cache", &fp.cache_key(), i as i64);
        }
        cache.set_page(&page_fp(1), &page_entry("only page")).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.file_entries, 2);
        assert_eq!(stats.page_entries, 1);
    }

    #[test]
    fn test_clear() {
        let cache = ResultCache::open_in_memory(100, 100).unwrap();
        cache.set_page(&page_fp(1), &page_entry("p")).unwrap();
        cache
            .set_file(
                &file_fp(1),
                &FileEntry {
                    extracted_text: "t".to_string(),
                    metadata: HashMap::new(),
                    final_text: "t".to_string(),
                },
            )
            .unwrap();

        let (pages, files) = cache.clear().unwrap();
        assert_eq!((pages, files), (1, 1));
        assert_eq!(cache.stats().unwrap().page_entries, 0);
        assert_eq!(cache.stats().unwrap().file_entries, 0);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");
        let cache = ResultCache::open(&path, 10, 10).unwrap();
        cache.set_page(&page_fp(1), &page_entry("persisted")).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_distinct_option_hashes_distinct_keys() {
        // Sanity check that fingerprints built from real options map to
        // distinct keys in the same table.
        let cache = ResultCache::open_in_memory(100, 100).unwrap();
        let image_hash = format!("{:064x}", 7);

        let eng = PageFingerprint {
            image_hash: image_hash.clone(),
            options_hash: crate::hashing::page_options_hash(&JobOptions::default()),
        };
        let mut deu_options = JobOptions::default();
        deu_options.language = "deu".to_string();
        let deu = PageFingerprint {
            image_hash,
            options_hash: crate::hashing::page_options_hash(&deu_options),
        };

        cache.set_page(&eng, &page_entry("english")).unwrap();
        assert!(cache.get_page(&deu).unwrap().is_none());
    }
}
