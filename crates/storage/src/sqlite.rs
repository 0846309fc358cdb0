use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hivemind_core::{Error, Result};
use hivemind_learning::store::SNAPSHOT_VERSION;
use hivemind_learning::{
    CapabilityEntry, KnowledgeEntry, LearningPattern, LearningSnapshot, LearningStore, Pathway,
    PracticeSession,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

fn db_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("bad timestamp {:?}: {}", raw, e)))
}

/// Learning state in SQLite, one table per collection.
///
/// `save_all` replaces everything inside a single transaction, so a reader
/// never sees a half-written snapshot.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| Error::Storage(format!("Failed to open learning db: {}", e)))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        init_schema(&conn)?;

        info!(path = %db_path.display(), "Opened learning db");
        Ok(Self {
            inner: Arc::new(Mutex::new(conn)),
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = inner
                .lock()
                .map_err(|e| Error::Storage(format!("Lock error: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| Error::Storage(format!("Storage task failed: {}", e)))?
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS learning_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS learning_patterns (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            agent_id TEXT NOT NULL,
            topic TEXT NOT NULL,
            source TEXT NOT NULL,
            knowledge TEXT NOT NULL,
            confidence REAL NOT NULL,
            timestamp TEXT NOT NULL,
            application_count INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_patterns_topic ON learning_patterns(topic);

        CREATE TABLE IF NOT EXISTS capabilities (
            agent_id TEXT NOT NULL,
            capability TEXT NOT NULL,
            strength REAL NOT NULL,
            success_rate REAL NOT NULL,
            last_used TEXT NOT NULL,
            usage_count INTEGER NOT NULL DEFAULT 0,
            history TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY (agent_id, capability)
        );

        CREATE TABLE IF NOT EXISTS pathways (
            from_agent TEXT NOT NULL,
            to_agent TEXT NOT NULL,
            strength REAL NOT NULL,
            frequency INTEGER NOT NULL,
            purpose TEXT NOT NULL,
            created_at TEXT NOT NULL,
            last_traversed TEXT NOT NULL,
            emergent_reported INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (from_agent, to_agent)
        );

        CREATE TABLE IF NOT EXISTS knowledge (
            topic TEXT PRIMARY KEY,
            entry TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS practice_sessions (
            agent_id TEXT NOT NULL,
            capability TEXT NOT NULL,
            session TEXT NOT NULL,
            PRIMARY KEY (agent_id, capability)
        );
        ",
    )
    .map_err(|e| Error::Storage(format!("Failed to init schema: {}", e)))
}

fn write_snapshot(conn: &mut Connection, snapshot: &LearningSnapshot) -> Result<()> {
    let tx = conn.transaction().map_err(db_err)?;
    tx.execute_batch(
        "DELETE FROM learning_patterns;
         DELETE FROM capabilities;
         DELETE FROM pathways;
         DELETE FROM knowledge;
         DELETE FROM practice_sessions;
         DELETE FROM learning_meta;",
    )
    .map_err(db_err)?;

    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO learning_patterns
                 (id, agent_id, topic, source, knowledge, confidence, timestamp, application_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .map_err(db_err)?;
        for p in &snapshot.patterns {
            stmt.execute(params![
                p.id,
                p.agent_id,
                p.topic,
                p.source.to_string(),
                to_json(&p.knowledge)?,
                p.confidence,
                p.timestamp.to_rfc3339(),
                p.application_count as i64,
            ])
            .map_err(db_err)?;
        }
    }

    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO capabilities
                 (agent_id, capability, strength, success_rate, last_used, usage_count, history)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .map_err(db_err)?;
        for (agent_id, caps) in &snapshot.capabilities {
            for (capability, entry) in caps {
                stmt.execute(params![
                    agent_id,
                    capability,
                    entry.strength,
                    entry.success_rate,
                    entry.last_used.to_rfc3339(),
                    entry.usage_count as i64,
                    to_json(&entry.history)?,
                ])
                .map_err(db_err)?;
            }
        }
    }

    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO pathways
                 (from_agent, to_agent, strength, frequency, purpose, created_at, last_traversed, emergent_reported)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .map_err(db_err)?;
        for p in &snapshot.pathways {
            stmt.execute(params![
                p.from,
                p.to,
                p.strength,
                p.frequency as i64,
                p.purpose,
                p.created_at.to_rfc3339(),
                p.last_traversed.to_rfc3339(),
                p.emergent_reported,
            ])
            .map_err(db_err)?;
        }
    }

    for (topic, entry) in &snapshot.knowledge {
        tx.execute(
            "INSERT INTO knowledge (topic, entry) VALUES (?1, ?2)",
            params![topic, to_json(entry)?],
        )
        .map_err(db_err)?;
    }

    for session in &snapshot.sessions {
        tx.execute(
            "INSERT INTO practice_sessions (agent_id, capability, session) VALUES (?1, ?2, ?3)",
            params![session.agent_id, session.capability, to_json(session)?],
        )
        .map_err(db_err)?;
    }

    for (key, value) in [
        ("version", snapshot.version.to_string()),
        ("metrics", to_json(&snapshot.metrics)?),
        ("known_agents", to_json(&snapshot.known_agents)?),
    ] {
        tx.execute(
            "INSERT INTO learning_meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(db_err)?;
    }

    tx.commit().map_err(db_err)
}

fn meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM learning_meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .map_err(db_err)
}

fn read_snapshot(conn: &Connection) -> Result<Option<LearningSnapshot>> {
    let Some(version) = meta(conn, "version")? else {
        return Ok(None);
    };
    let version: u32 = version
        .parse()
        .map_err(|_| Error::Storage(format!("bad snapshot version {:?}", version)))?;
    if version > SNAPSHOT_VERSION {
        return Err(Error::Storage(format!(
            "learning state version {} is newer than supported version {}",
            version, SNAPSHOT_VERSION
        )));
    }

    let mut snapshot = LearningSnapshot {
        version,
        ..LearningSnapshot::default()
    };
    if let Some(raw) = meta(conn, "metrics")? {
        snapshot.metrics = from_json(&raw)?;
    }
    if let Some(raw) = meta(conn, "known_agents")? {
        snapshot.known_agents = from_json(&raw)?;
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, agent_id, topic, source, knowledge, confidence, timestamp, application_count
             FROM learning_patterns ORDER BY seq",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, i64>(7)?,
            ))
        })
        .map_err(db_err)?;
    for row in rows {
        let (id, agent_id, topic, source, knowledge, confidence, timestamp, application_count) =
            row.map_err(db_err)?;
        snapshot.patterns.push(LearningPattern {
            id,
            agent_id,
            topic,
            source: from_json(&format!("\"{}\"", source))?,
            knowledge: from_json(&knowledge)?,
            confidence,
            timestamp: parse_time(&timestamp)?,
            application_count: application_count.max(0) as u64,
        });
    }

    let mut stmt = conn
        .prepare(
            "SELECT agent_id, capability, strength, success_rate, last_used, usage_count, history
             FROM capabilities",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
            ))
        })
        .map_err(db_err)?;
    for row in rows {
        let (agent_id, capability, strength, success_rate, last_used, usage_count, history) =
            row.map_err(db_err)?;
        snapshot.capabilities.entry(agent_id).or_default().insert(
            capability,
            CapabilityEntry {
                strength,
                success_rate,
                last_used: parse_time(&last_used)?,
                usage_count: usage_count.max(0) as u64,
                history: from_json(&history)?,
            },
        );
    }

    let mut stmt = conn
        .prepare(
            "SELECT from_agent, to_agent, strength, frequency, purpose, created_at, last_traversed, emergent_reported
             FROM pathways ORDER BY from_agent, to_agent",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, bool>(7)?,
            ))
        })
        .map_err(db_err)?;
    for row in rows {
        let (from, to, strength, frequency, purpose, created_at, last_traversed, emergent_reported) =
            row.map_err(db_err)?;
        snapshot.pathways.push(Pathway {
            from,
            to,
            strength,
            frequency: frequency.max(0) as u64,
            purpose,
            created_at: parse_time(&created_at)?,
            last_traversed: parse_time(&last_traversed)?,
            emergent_reported,
        });
    }

    let mut stmt = conn
        .prepare("SELECT topic, entry FROM knowledge")
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(db_err)?;
    for row in rows {
        let (topic, raw) = row.map_err(db_err)?;
        let entry: KnowledgeEntry = from_json(&raw)?;
        snapshot.knowledge.insert(topic, entry);
    }

    let mut stmt = conn
        .prepare("SELECT session FROM practice_sessions ORDER BY agent_id, capability")
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(db_err)?;
    for row in rows {
        let session: PracticeSession = from_json(&row.map_err(db_err)?)?;
        snapshot.sessions.push(session);
    }

    Ok(Some(snapshot))
}

#[async_trait]
impl LearningStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn save_all(&self, snapshot: &LearningSnapshot) -> Result<()> {
        let snapshot = snapshot.clone();
        let patterns = snapshot.patterns.len();
        self.with_conn(move |conn| write_snapshot(conn, &snapshot))
            .await?;
        debug!(path = %self.db_path.display(), patterns, "Saved learning state");
        Ok(())
    }

    async fn load_all(&self) -> Result<Option<LearningSnapshot>> {
        self.with_conn(|conn| read_snapshot(conn)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivemind_core::config::{LearningConfig, PracticeConfig};
    use hivemind_core::{EventHub, ExecutionCommand, KnowledgePayload, TaskOutcome};
    use hivemind_learning::{LearningCore, LearningSource};
    use tempfile::TempDir;

    fn test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("state/learning.db")).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_empty_db_loads_nothing() {
        let (store, _dir) = test_store();
        assert!(store.load_all().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_round_trip_snapshot() {
        let (store, _dir) = test_store();
        let core = LearningCore::new(LearningConfig::default(), Arc::new(EventHub::default()));

        core.learn_from_execution(
            "senior-1",
            &ExecutionCommand::new("review the build", "architecture").with_collaborators(["junior-1"]),
            &TaskOutcome::success(serde_json::json!({"ok": true})),
        )
        .await;
        core.ingest_external_learning("junior-1", "rust", KnowledgePayload::new("borrowck"))
            .await;
        core.learn_new_capability("junior-1", &ExecutionCommand::new("automate deploys", "ops"))
            .await;

        let snapshot = core.snapshot().await;
        store.save_all(&snapshot).await.unwrap();
        let loaded = store.load_all().await.unwrap().unwrap();

        assert_eq!(loaded.patterns.len(), 3);
        assert_eq!(loaded.patterns[0].source, LearningSource::Delegation);
        assert_eq!(loaded.capabilities, snapshot.capabilities);
        assert_eq!(loaded.pathways, snapshot.pathways);
        assert_eq!(loaded.knowledge, snapshot.knowledge);
        assert_eq!(loaded.sessions, snapshot.sessions);
        assert_eq!(loaded.known_agents, snapshot.known_agents);
        assert_eq!(loaded.metrics.pattern_count, 3);
        assert_eq!(loaded.metrics.pathway_count, 1);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_snapshot() {
        let (store, _dir) = test_store();
        let mut snapshot = LearningSnapshot::default();
        snapshot.sessions.push(PracticeSession::open("a", "testing", &PracticeConfig::default()));
        store.save_all(&snapshot).await.unwrap();

        snapshot.sessions.clear();
        store.save_all(&snapshot).await.unwrap();
        let loaded = store.load_all().await.unwrap().unwrap();
        assert!(loaded.sessions.is_empty());
    }
}
