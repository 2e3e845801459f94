//! Pattern persistence.
//!
//! Patterns are stored as JSON blobs keyed by id. The store is a sync
//! trait; calls are short and the pattern engine serializes access, so
//! wrapping the connection in a mutex is enough.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use hestia_common::Pattern;
use rusqlite::{params, Connection};
use tracing::info;

pub trait PatternStore: Send + Sync {
    fn save(&self, pattern: &Pattern) -> Result<()>;
    fn load_all(&self) -> Result<Vec<Pattern>>;
    fn delete(&self, pattern_id: &str) -> Result<()>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS patterns (
                pattern_id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            )",
            [],
        )
        .context("failed to create patterns table")?;
        info!("Pattern store ready at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl PatternStore for SqliteStore {
    fn save(&self, pattern: &Pattern) -> Result<()> {
        let data = serde_json::to_string(pattern).context("failed to serialize pattern")?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO patterns (pattern_id, data) VALUES (?1, ?2)
             ON CONFLICT(pattern_id) DO UPDATE SET data = ?2",
            params![pattern.pattern_id, data],
        )
        .context("failed to save pattern")?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Pattern>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT data FROM patterns")
            .context("failed to prepare pattern query")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("failed to query patterns")?;

        let mut patterns = Vec::new();
        for row in rows {
            let data = row.context("failed to read pattern row")?;
            let pattern: Pattern =
                serde_json::from_str(&data).context("failed to deserialize pattern")?;
            patterns.push(pattern);
        }
        Ok(patterns)
    }

    fn delete(&self, pattern_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM patterns WHERE pattern_id = ?1", params![pattern_id])
            .context("failed to delete pattern")?;
        Ok(())
    }
}

/// Volatile store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    patterns: Mutex<Vec<Pattern>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PatternStore for MemoryStore {
    fn save(&self, pattern: &Pattern) -> Result<()> {
        let mut patterns = self.patterns.lock().unwrap();
        if let Some(existing) = patterns.iter_mut().find(|p| p.pattern_id == pattern.pattern_id) {
            *existing = pattern.clone();
        } else {
            patterns.push(pattern.clone());
        }
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Pattern>> {
        Ok(self.patterns.lock().unwrap().clone())
    }

    fn delete(&self, pattern_id: &str) -> Result<()> {
        self.patterns.lock().unwrap().retain(|p| p.pattern_id != pattern_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hestia_common::{PatternType, Trigger, TriggerKind};

    fn sample(id: &str) -> Pattern {
        Pattern {
            pattern_id: id.to_string(),
            pattern_type: PatternType::UserDefined,
            display_name: "Evening lights".to_string(),
            description: "Dim the living room at sunset".to_string(),
            trigger: Trigger::new(TriggerKind::Time, "19:30"),
            action_sequence: vec![],
            confidence: 1.0,
            frequency: 1,
            approved: false,
            source_utterance: "dim the lights in the evening".to_string(),
            created_at: Utc::now(),
            last_occurrence: Utc::now(),
        }
    }

    #[test]
    fn sqlite_round_trip_and_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("patterns.db")).unwrap();

        let mut pattern = sample("p1");
        store.save(&pattern).unwrap();
        pattern.frequency = 4;
        store.save(&pattern).unwrap();
        store.save(&sample("p2")).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 2);
        let p1 = loaded.iter().find(|p| p.pattern_id == "p1").unwrap();
        assert_eq!(p1.frequency, 4);
        assert_eq!(p1.trigger.value, "19:30");
    }

    #[test]
    fn sqlite_delete_removes_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("patterns.db")).unwrap();
        store.save(&sample("p1")).unwrap();
        store.delete("p1").unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn memory_store_upserts() {
        let store = MemoryStore::new();
        let mut pattern = sample("p1");
        store.save(&pattern).unwrap();
        pattern.approved = true;
        store.save(&pattern).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].approved);
    }
}
