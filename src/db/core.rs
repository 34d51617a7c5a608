use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use include_dir::{include_dir, Dir};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, Params, Transaction, TransactionBehavior};
use rusqlite_migration::Migrations;
use serde::de::DeserializeOwned;

use crate::config::StoreConfig;

static MIGRATIONS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/migrations");

/// SQLite VM instructions between deadline checks.
const PROGRESS_CHECK_OPS: i32 = 1_000;

/// Bounds for the operations of one caller: an optional deadline and an
/// optional cancellation flag. The default context never expires.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancelled: Option<Arc<AtomicBool>>,
}

impl CallContext {
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Storing `true` in `flag` interrupts the running statement and fails
    /// every later operation made with this context.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = Some(flag);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_done(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
            || self.cancelled.as_ref().is_some_and(|c| c.load(Ordering::Relaxed))
    }
}

/// A pool of SQLite connections to one database. Cheap to clone.
#[derive(Clone)]
pub struct Db {
    pool: Pool<SqliteConnectionManager>,
    connection_timeout: Duration,
    busy_timeout: Duration,
    statement_timeout: Option<Duration>,
    context: CallContext,
}

impl Db {
    pub fn open_memory() -> Result<Self> {
        Self::open(&StoreConfig::memory())
    }

    pub fn open(config: &StoreConfig) -> Result<Self> {
        let busy_timeout = config.busy_timeout();
        let builder = Pool::builder().connection_timeout(config.connection_timeout());

        let pool = match &config.path {
            Some(path) => {
                log::info!("Opening changelog database at {}", path.display());
                let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
                    Self::init_connection(conn, busy_timeout)?;
                    conn.pragma_update(None, "journal_mode", "WAL")
                });
                builder.max_size(config.pool_size.max(1)).build(manager)?
            }
            None => {
                // Every in-memory connection is its own database, so the pool
                // holds exactly one connection and never recycles it.
                log::info!("Opening in-memory changelog database");
                let manager = SqliteConnectionManager::memory()
                    .with_init(move |conn| Self::init_connection(conn, busy_timeout));
                builder
                    .max_size(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .build(manager)?
            }
        };

        let db = Db {
            pool,
            connection_timeout: config.connection_timeout(),
            busy_timeout,
            statement_timeout: config.statement_timeout(),
            context: CallContext::default(),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Returns a handle sharing this pool whose operations are bounded by
    /// `context` as well as by the configured timeouts.
    pub fn with_context(&self, context: CallContext) -> Db {
        Db {
            context,
            ..self.clone()
        }
    }

    fn init_connection(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(busy_timeout)?;
        Ok(())
    }

    /// Brings the schema up to date with the migrations embedded from
    /// `migrations/`.
    pub fn migrate(&self) -> Result<()> {
        let migrations = Migrations::from_directory(&MIGRATIONS_DIR)?;
        let mut conn = self.pool.get()?;
        migrations.to_latest(&mut *conn)?;
        log::info!("Changelog schema migrated to latest");
        Ok(())
    }

    /// Calls the supplied closure with a write transaction. Commits
    /// automatically if the closure returns Ok, otherwise rolls back.
    ///
    /// The write lock is taken up front (`BEGIN IMMEDIATE`) so concurrent
    /// writers wait on the busy timeout instead of failing at commit.
    pub fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction) -> Result<R>,
    {
        self.run(TransactionBehavior::Immediate, f)
    }

    /// Like `transaction` but only takes a read snapshot.
    pub fn read_transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction) -> Result<R>,
    {
        self.run(TransactionBehavior::Deferred, f)
    }

    fn run<F, R>(&self, behavior: TransactionBehavior, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction) -> Result<R>,
    {
        let mut context = self.context.clone();
        if let Some(timeout) = self.statement_timeout {
            context = context.with_timeout(timeout);
        }
        if context.is_done() {
            anyhow::bail!("deadline exceeded or cancelled before the operation started");
        }

        let wait = match context.deadline() {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(self.connection_timeout),
            None => self.connection_timeout,
        };
        let conn = self.pool.get_timeout(wait)?;
        let mut checkout = Checkout::new(conn, context, self.busy_timeout)?;
        let txn = checkout.conn.transaction_with_behavior(behavior)?;
        match f(&txn) {
            Ok(result) => {
                txn.commit()?;
                Ok(result)
            }
            Err(e) => {
                // The deadline may have passed already; it must not interrupt
                // the rollback.
                txn.progress_handler(0, None::<fn() -> bool>);
                drop(txn);
                Err(e)
            }
        }
    }

    /// Runs a query and maps each row to `E` by column name.
    pub fn query<E: DeserializeOwned, P: Params>(
        conn: &Connection,
        sql: &str,
        params: P,
    ) -> Result<Vec<E>> {
        log::debug!("SQL QUERY: {}", sql);
        let mut stmt = conn.prepare(sql)?;
        let entities = serde_rusqlite::from_rows::<E>(stmt.query(params)?)
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!("SQL QUERY RESULT: {} rows", entities.len());
        Ok(entities)
    }

    pub fn execute<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<usize> {
        log::debug!("SQL EXECUTE: {}", sql);
        let affected_rows = conn.execute(sql, params)?;
        log::debug!("SQL EXECUTE RESULT: {} rows affected", affected_rows);
        Ok(affected_rows)
    }

    /// Releases the pool. Connections still checked out close when returned.
    pub fn close(self) {
        log::info!("Closing changelog database");
        drop(self.pool);
    }
}

/// A pooled connection bounded by a `CallContext`. The context is checked
/// from SQLite's progress handler and caps the busy timeout. Both go back to
/// their defaults before the connection returns to the pool.
struct Checkout {
    conn: PooledConnection<SqliteConnectionManager>,
    busy_timeout: Option<Duration>,
    armed: bool,
}

impl Checkout {
    fn new(
        conn: PooledConnection<SqliteConnectionManager>,
        context: CallContext,
        busy_timeout: Duration,
    ) -> rusqlite::Result<Self> {
        let mut checkout = Self {
            conn,
            busy_timeout: None,
            armed: false,
        };
        if let Some(deadline) = context.deadline() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining < busy_timeout {
                checkout.conn.busy_timeout(remaining)?;
                checkout.busy_timeout = Some(busy_timeout);
            }
        }
        if context.deadline().is_some() || context.cancelled.is_some() {
            checkout
                .conn
                .progress_handler(PROGRESS_CHECK_OPS, Some(move || context.is_done()));
            checkout.armed = true;
        }
        Ok(checkout)
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if self.armed {
            self.conn.progress_handler(0, None::<fn() -> bool>);
        }
        if let Some(busy_timeout) = self.busy_timeout {
            if let Err(e) = self.conn.busy_timeout(busy_timeout) {
                log::warn!("Failed to restore busy timeout: {}", e);
            }
        }
    }
}
