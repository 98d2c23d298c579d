use rusqlite::{Connection, Result, Transaction, TransactionBehavior};
use tracing::debug;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.configure_pragmas()?;
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.configure_pragmas()?;
        db.init_schema()?;
        Ok(db)
    }

    fn configure_pragmas(&self) -> Result<()> {
        // journal_mode reports the resulting mode as a row.
        let _mode: String = self
            .conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        self.conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -64000;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, foreign keys on, 5s busy timeout)");
        Ok(())
    }

    /// Create tables, indexes and the `file_cache` view if they don't exist.
    /// Safe to run against an already bootstrapped database.
    pub fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(include_str!("schema.sql"))?;
        debug!("SQLite schema initialized");
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Open one unit of work. Every mutation issued through the returned
    /// transaction commits or rolls back together.
    ///
    /// The write lock is taken up front (`BEGIN IMMEDIATE`): a second agent
    /// writing the same database waits on `busy_timeout` and then reads the
    /// rows the first one committed, instead of failing with a stale WAL
    /// snapshot after its first read.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
    }
}
