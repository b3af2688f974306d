use sqlx::{sqlite::{SqliteConnectOptions, SqlitePoolOptions}, Pool, Row, Sqlite};
use std::collections::HashSet;
use std::str::FromStr;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::error::{ArchiveError, Result};
use crate::model::{BlacklistState, FetchRecord, Haves, PackRef, RefMap, WorkItem};

use super::SCHEMA_VERSION;

/// A fetch about to be recorded
#[derive(Debug, Clone)]
pub struct NewFetch<'a> {
    pub name: &'a str,
    /// Empty when not a fork
    pub parent: &'a str,
    pub timestamp: OffsetDateTime,
    pub refs: &'a RefMap,
    pub pack_ref: &'a PackRef,
    /// pack_ids the new pack's thin deltas may reference
    pub deps: &'a [i64],
}

/// A dependency edge pointing at a missing or later pack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingDep {
    pub id: i64,
    pub dep: i64,
}

fn to_nanos(t: OffsetDateTime) -> i64 {
    t.unix_timestamp_nanos() as i64
}

fn from_nanos(n: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(n as i128).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

fn decode_refs(json: &str) -> Result<RefMap> {
    serde_json::from_str(json).map_err(|e| ArchiveError::IndexFailed {
        op: "decode refs",
        source: sqlx::Error::Decode(Box::new(e)),
    })
}

/// Archive index backed by SQLite
///
/// Tables:
/// - `fetches`: one immutable row per fetch, `pack_id` auto-assigned and never reused
/// - `pack_deps`: `(id, dep)` edges between pack_ids
/// - `blacklist`: `(name, whitelisted)` administration state
/// - `queue`: FIFO of pending work
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", db_path))
            .map_err(ArchiveError::index("open"))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(ArchiveError::index("connect"))?;

        Ok(Self { pool })
    }

    /// Initialize database schema, returns true if it was freshly created
    ///
    /// A database written by a different schema version is refused rather
    /// than rebuilt: the index is the only record of what the archive holds.
    pub async fn init_schema(&self) -> Result<bool> {
        let op = ArchiveError::index;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )"
        ).execute(&self.pool).await.map_err(op("create metadata"))?;

        let stored_version = self.get_metadata("schema_version").await?;
        match stored_version.as_deref() {
            Some(SCHEMA_VERSION) => return Ok(false),
            Some(other) => {
                return Err(ArchiveError::IndexFailed {
                    op: "check schema version",
                    source: sqlx::Error::Protocol(format!(
                        "index has schema version {other}, expected {SCHEMA_VERSION}"
                    )),
                });
            }
            None => {}
        }

        info!(version = SCHEMA_VERSION, "creating archive index schema");

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS fetches (
                pack_id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL CHECK (length(name) <= 255),
                parent TEXT NOT NULL DEFAULT '',
                timestamp INTEGER NOT NULL,
                refs TEXT NOT NULL,
                pack_ref TEXT NOT NULL UNIQUE
            )"
        ).execute(&self.pool).await.map_err(op("create fetches"))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS fetches_name ON fetches (name)")
            .execute(&self.pool).await.map_err(op("create fetches index"))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pack_deps (
                id INTEGER NOT NULL,
                dep INTEGER NOT NULL
            )"
        ).execute(&self.pool).await.map_err(op("create pack_deps"))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS pack_deps_id ON pack_deps (id)")
            .execute(&self.pool).await.map_err(op("create pack_deps index"))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS pack_deps_dep ON pack_deps (dep)")
            .execute(&self.pool).await.map_err(op("create pack_deps index"))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS blacklist (
                name TEXT NOT NULL,
                whitelisted INTEGER NOT NULL DEFAULT 0
            )"
        ).execute(&self.pool).await.map_err(op("create blacklist"))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS blacklist_name ON blacklist (name)")
            .execute(&self.pool).await.map_err(op("create blacklist index"))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                parent TEXT NOT NULL DEFAULT ''
            )"
        ).execute(&self.pool).await.map_err(op("create queue"))?;

        self.set_metadata("schema_version", SCHEMA_VERSION).await?;
        Ok(true)
    }

    /// Get metadata value by key
    pub async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(ArchiveError::index("get metadata"))?;
        Ok(row.map(|row| row.get("value")))
    }

    /// Set metadata value
    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(ArchiveError::index("set metadata"))?;
        Ok(())
    }

    /// Record a fetch and its dependency edges, returning the new pack_id
    ///
    /// Both steps share one transaction, so a record is never left
    /// under-linked by a failure between them.
    pub async fn add_fetch(&self, fetch: &NewFetch<'_>) -> Result<i64> {
        let op = ArchiveError::index;
        let refs = serde_json::to_string(fetch.refs).map_err(|e| ArchiveError::IndexFailed {
            op: "encode refs",
            source: sqlx::Error::Encode(Box::new(e)),
        })?;

        let mut tx = self.pool.begin().await.map_err(op("begin add_fetch"))?;

        let pack_id = sqlx::query(
            "INSERT INTO fetches (name, parent, timestamp, refs, pack_ref) VALUES (?, ?, ?, ?, ?)"
        )
        .bind(fetch.name)
        .bind(fetch.parent)
        .bind(to_nanos(fetch.timestamp))
        .bind(&refs)
        .bind(fetch.pack_ref.as_str())
        .execute(&mut *tx)
        .await
        .map_err(op("insert fetch"))?
        .last_insert_rowid();

        for dep in fetch.deps {
            sqlx::query("INSERT INTO pack_deps (id, dep) VALUES (?, ?)")
                .bind(pack_id)
                .bind(dep)
                .execute(&mut *tx)
                .await
                .map_err(op("insert pack dep"))?;
        }

        tx.commit().await.map_err(op("commit add_fetch"))?;
        debug!(name = fetch.name, pack_id, deps = ?fetch.deps, "recorded fetch");
        Ok(pack_id)
    }

    async fn latest_snapshot(&self, name: &str) -> Result<Option<(String, RefMap, i64)>> {
        let row = sqlx::query(
            "SELECT parent, refs, pack_id FROM fetches WHERE name = ? ORDER BY pack_id DESC LIMIT 1"
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(ArchiveError::index("select latest fetch"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let refs = decode_refs(row.get::<&str, _>("refs"))?;
        Ok(Some((row.get("parent"), refs, row.get("pack_id"))))
    }

    /// Everything already archived for `name`, plus its fork parent
    ///
    /// The parent comes from `name`'s latest record, or from `parent_hint`
    /// when `name` has never been fetched. At most one hop is followed.
    pub async fn get_haves(&self, name: &str, parent_hint: Option<&str>) -> Result<Haves> {
        let mut haves = Haves::default();

        let mut parent = parent_hint.unwrap_or_default().to_string();
        if let Some((recorded_parent, refs, pack_id)) = self.latest_snapshot(name).await? {
            haves.absorb(&refs, pack_id);
            haves.known = true;
            if !recorded_parent.is_empty() {
                parent = recorded_parent;
            }
        }

        if !parent.is_empty() && parent != name {
            if let Some((_, refs, pack_id)) = self.latest_snapshot(&parent).await? {
                haves.absorb(&refs, pack_id);
            }
        }

        Ok(haves)
    }

    /// Time of the most recent fetch of `name`, or the Unix epoch if none
    pub async fn get_latest(&self, name: &str) -> Result<OffsetDateTime> {
        let latest: Option<i64> = sqlx::query_scalar("SELECT MAX(timestamp) FROM fetches WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(ArchiveError::index("select latest timestamp"))?;
        Ok(latest.map(from_nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH))
    }

    /// All fetch records for `name`, oldest first
    pub async fn fetches_for(&self, name: &str) -> Result<Vec<FetchRecord>> {
        let rows = sqlx::query(
            "SELECT name, parent, timestamp, refs, pack_id, pack_ref FROM fetches
             WHERE name = ? ORDER BY pack_id"
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(ArchiveError::index("select fetches"))?;

        rows.into_iter()
            .map(|row| {
                Ok(FetchRecord {
                    name: row.get("name"),
                    parent: row.get("parent"),
                    timestamp: from_nanos(row.get("timestamp")),
                    refs: decode_refs(row.get::<&str, _>("refs"))?,
                    pack_id: row.get("pack_id"),
                    pack_ref: PackRef::from_stored(row.get("pack_ref")),
                })
            })
            .collect()
    }

    /// Dependency edges of `pack_id`, in insertion order
    pub async fn deps_of(&self, pack_id: i64) -> Result<Vec<i64>> {
        sqlx::query_scalar("SELECT dep FROM pack_deps WHERE id = ? ORDER BY rowid")
            .bind(pack_id)
            .fetch_all(&self.pool)
            .await
            .map_err(ArchiveError::index("select pack deps"))
    }

    /// Every recorded pack-ref, empty-pack sentinels included
    pub async fn pack_refs(&self) -> Result<HashSet<String>> {
        let refs: Vec<String> = sqlx::query_scalar("SELECT pack_ref FROM fetches")
            .fetch_all(&self.pool)
            .await
            .map_err(ArchiveError::index("select pack refs"))?;
        Ok(refs.into_iter().collect())
    }

    /// Records with an earlier record of the same name but no dependency edge
    pub async fn under_linked(&self) -> Result<Vec<(i64, String)>> {
        let rows = sqlx::query(
            "SELECT f.pack_id, f.name FROM fetches f
             WHERE EXISTS (SELECT 1 FROM fetches p WHERE p.name = f.name AND p.pack_id < f.pack_id)
               AND NOT EXISTS (SELECT 1 FROM pack_deps d WHERE d.id = f.pack_id)
             ORDER BY f.pack_id"
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ArchiveError::index("audit under-linked"))?;
        Ok(rows.into_iter().map(|row| (row.get("pack_id"), row.get("name"))).collect())
    }

    /// Edges whose target pack is unknown or not older than the source
    pub async fn dangling_deps(&self) -> Result<Vec<DanglingDep>> {
        let rows = sqlx::query(
            "SELECT d.id, d.dep FROM pack_deps d
             LEFT JOIN fetches f ON f.pack_id = d.dep
             WHERE f.pack_id IS NULL OR d.dep >= d.id
             ORDER BY d.id, d.dep"
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ArchiveError::index("audit dangling deps"))?;
        Ok(rows
            .into_iter()
            .map(|row| DanglingDep { id: row.get("id"), dep: row.get("dep") })
            .collect())
    }

    /// Mark `name` as blacklisted
    pub async fn add_blacklist(&self, name: &str) -> Result<()> {
        sqlx::query("INSERT INTO blacklist (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(ArchiveError::index("insert blacklist"))?;
        Ok(())
    }

    pub async fn blacklist_state(&self, name: &str) -> Result<BlacklistState> {
        let whitelisted: Option<bool> = sqlx::query_scalar(
            "SELECT whitelisted FROM blacklist WHERE name = ? LIMIT 1"
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(ArchiveError::index("select blacklist"))?;

        Ok(match whitelisted {
            None => BlacklistState::Neutral,
            Some(true) => BlacklistState::Whitelisted,
            Some(false) => BlacklistState::Blacklisted,
        })
    }

    /// Append a work item to the queue
    pub async fn enqueue(&self, item: &WorkItem) -> Result<()> {
        sqlx::query("INSERT INTO queue (name, parent) VALUES (?, ?)")
            .bind(&item.name)
            .bind(item.parent.as_deref().unwrap_or_default())
            .execute(&self.pool)
            .await
            .map_err(|e| ArchiveError::QueueFailed(e.to_string()))?;
        Ok(())
    }

    /// Remove and return the oldest queued item
    pub async fn pop_queue(&self) -> Result<Option<WorkItem>> {
        let row = sqlx::query(
            "DELETE FROM queue WHERE seq = (SELECT MIN(seq) FROM queue) RETURNING name, parent"
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ArchiveError::QueueFailed(e.to_string()))?;

        Ok(row.map(|row| WorkItem::fork_of(row.get::<String, _>("name"), row.get::<String, _>("parent"))))
    }

    pub async fn queue_len(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM queue")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ArchiveError::QueueFailed(e.to_string()))
    }
}
