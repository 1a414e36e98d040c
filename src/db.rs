/// Logic related to database logistics; creating the database file, running migrations, etc.

use std::fs;
use std::path::Path;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::info;

pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

const BUSY_TIMEOUT_SECONDS: u64 = 5;

#[derive(Debug)]
pub struct ConnectionOptions {
    pub enable_wal: bool,
    pub busy_timeout: Option<Duration>,
}

impl diesel::r2d2::CustomizeConnection<SqliteConnection, diesel::r2d2::Error>
    for ConnectionOptions
{
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        (|| {
            if self.enable_wal {
                conn.batch_execute("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
            }
            if let Some(d) = self.busy_timeout {
                conn.batch_execute(&format!("PRAGMA busy_timeout = {};", d.as_millis()))?;
            }
            Ok(())
        })()
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Opens (creating if needed) the SQLite file at `db_path` and runs pending migrations.
pub fn open(db_path: &Path) -> anyhow::Result<SqlitePool> {
    let pool = get_connection_pool(db_path)?;
    run_migrations(&pool)?;
    Ok(pool)
}

pub fn get_connection_pool(db_path: &Path) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let db_path_str = db_path.to_str().ok_or(anyhow::anyhow!("Error converting path to string"))?;

    // Ensure the db file exists at the path.
    // This doesn't run the migrations, we just ensure the file exists.
    if !db_path.exists() {
        SqliteConnection::establish(db_path_str)?;
    }

    let manager = ConnectionManager::<SqliteConnection>::new(db_path_str);

    let result = Pool::builder()
        .test_on_check_out(true)
        .connection_customizer(Box::new(ConnectionOptions {
            enable_wal: true,
            busy_timeout: Some(Duration::from_secs(BUSY_TIMEOUT_SECONDS)),
        }))
        .build(manager);

    match result {
        Ok(pool) => Ok(pool),
        Err(e) => Err(anyhow::anyhow!("Error creating connection pool: {:?}", e)),
    }
}

fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let mut connection = pool.get()?;
    // Since this error size isn't known at compile-time, convert the error as necessary.
    let applied = connection
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Error running migrations: {:?}", e))?;
    if !applied.is_empty() {
        info!("Applied {} database migration(s)", applied.len());
    }
    Ok(())
}
