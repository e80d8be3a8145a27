//! Connection pools for the checkpoint database.
//!
//! SQLite allows one writer at a time, so [`DatabasePool`] pairs a
//! single-connection writer, which also serializes every versioned checkpoint
//! write, with a small read-only pool for status lookups and reads.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

/// Concurrent read connections.
const READER_CONNECTIONS: u32 = 8;

/// Split read/write pool over one checkpoint database in WAL mode.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Connect to `database_url` (e.g. `sqlite:///var/lib/flowpoint/checkpoints.db`).
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        Self::connect(SqliteConnectOptions::from_str(database_url)?).await
    }

    /// Open or create the checkpoint database file at `path`, creating its
    /// parent directory if needed.
    pub async fn open(path: &Path) -> Result<Self, sqlx::Error> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        Self::connect(SqliteConnectOptions::new().filename(path)).await
    }

    /// Both pools use WAL with `synchronous = FULL`: a checkpoint write that
    /// returned a new version survives power loss. Migrations run on the
    /// writer before the reader pool opens.
    async fn connect(options: SqliteConnectOptions) -> Result<Self, sqlx::Error> {
        let options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(options.read_only(true))
            .await?;

        tracing::debug!(
            filename = %writer.connect_options().get_filename().display(),
            "checkpoint database ready"
        );
        Ok(Self { reader, writer })
    }
}
