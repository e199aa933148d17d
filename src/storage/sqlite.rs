//! SQLite-backed record store

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use rusqlite::{Connection, OpenFlags, params};

use super::hooks::{ArmGuard, Hooks, Slot};
use super::schema;
use crate::codec::{Codec, JsonCodec, Stored};
use crate::maintenance::Maintenance;
use crate::predicate::Predicate;
use crate::store::{RecordStore, StoreOptions};
use crate::{Error, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

static MEMORY_DB_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Where the record table lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Database file on disk, created if missing
    File(PathBuf),
    /// Private in-memory database shared by all of the store's connections
    Memory,
}

impl Location {
    /// Sentinel path selecting [`Location::Memory`]
    pub const MEMORY_SENTINEL: &'static str = ":memory:";

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if path.as_os_str() == Self::MEMORY_SENTINEL {
            Location::Memory
        } else {
            Location::File(path.to_path_buf())
        }
    }

    /// Resolve to something `Connection::open_with_flags` accepts.
    ///
    /// Plain `:memory:` would give every thread its own empty database, so
    /// the in-memory mode uses a uniquely named shared-cache URI instead.
    /// File paths are never parsed as URIs.
    fn resolve(&self) -> Result<(String, OpenFlags)> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        match self {
            Location::File(path) => {
                crate::config::ensure_db_dir(path)?;
                let target = path.to_str().ok_or_else(|| {
                    Error::Config(format!("non UTF-8 database path: {}", path.display()))
                })?;
                Ok((target.to_string(), flags))
            }
            Location::Memory => {
                let seq = MEMORY_DB_SEQ.fetch_add(1, Ordering::Relaxed);
                let uri = format!(
                    "file:recstore-{}-{}?mode=memory&cache=shared",
                    std::process::id(),
                    seq
                );
                let memory_flags = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_SHARED_CACHE;
                Ok((uri, flags | memory_flags))
            }
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::File(path) => write!(f, "{}", path.display()),
            Location::Memory => f.write_str(Self::MEMORY_SENTINEL),
        }
    }
}

struct State<T> {
    /// One connection per thread that has touched the store
    connections: HashMap<ThreadId, Connection>,
    maintenance: Maintenance<T>,
}

/// Durable record store: one SQLite table, one connection per thread.
///
/// Predicates are evaluated by the `check_filter`/`check_exclude` SQL
/// functions registered on every connection, so each filtered query decodes
/// every row once and runs the predicate under the store lock.
pub struct SqliteStore<T, C = JsonCodec> {
    location: Location,
    /// Target handed to SQLite, fixed at construction so every thread
    /// reaches the same in-memory instance
    target: (String, OpenFlags),
    codec: Arc<C>,
    hooks: Hooks<T, C>,
    state: Mutex<State<T>>,
}

impl<T> SqliteStore<T, JsonCodec>
where
    T: serde::Serialize + serde::de::DeserializeOwned + Send + 'static,
{
    /// Open a store of JSON-encoded records at `location`
    pub fn open(location: Location, options: StoreOptions<T>) -> Result<Self> {
        Self::with_codec(location, JsonCodec, options)
    }

    /// Open a private in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Location::Memory, StoreOptions::default())
    }
}

impl<T, C> SqliteStore<T, C>
where
    T: Send + 'static,
    C: Codec<T>,
{
    /// Open a store using a custom codec
    pub fn with_codec(location: Location, codec: C, options: StoreOptions<T>) -> Result<Self> {
        let codec = Arc::new(codec);
        let store = Self {
            target: location.resolve()?,
            location,
            hooks: Hooks::new(Arc::clone(&codec)),
            codec,
            state: Mutex::new(State {
                connections: HashMap::new(),
                maintenance: options.into_maintenance()?,
            }),
        };

        // Opening the first connection up front surfaces resource errors here
        // and keeps a shared in-memory database alive for the store's lifetime.
        {
            let mut state = store.lock();
            let conn = store.connection(&mut state)?;
            conn.execute(&schema::create_table(store.codec.column_type()), [])?;
        }
        tracing::debug!(location = %store.location, "Opened record store");

        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connection for the calling thread, opened on first use
    fn connection<'s>(&self, state: &'s mut State<T>) -> Result<&'s mut Connection> {
        match state.connections.entry(thread::current().id()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let (target, flags) = &self.target;
                let conn = Connection::open_with_flags(target, *flags)?;
                conn.busy_timeout(BUSY_TIMEOUT)?;
                self.hooks.register(&conn)?;
                tracing::trace!(
                    thread = ?entry.key(),
                    location = %self.location,
                    "Opened connection"
                );
                Ok(entry.insert(conn))
            }
        }
    }

    /// Lock the store, run a due sweep and hand back the thread's connection
    fn maintained(&self) -> Result<MutexGuard<'_, State<T>>> {
        let mut state = self.lock();
        if let Some(outdate) = state.maintenance.due(Instant::now()) {
            let conn = self.connection(&mut state)?;
            let removed = {
                let armed = self.hooks.arm(Slot::Exclude, Some(&outdate));
                let result = conn.execute(schema::DELETE_EXCLUDED, []);
                self.checked(&armed, result)?
            };
            state.maintenance.advance(Instant::now());
            if removed > 0 {
                tracing::debug!(removed, location = %self.location, "Swept outdated records");
            }
        }
        Ok(state)
    }

    /// Prefer a decode failure captured by a callback over the engine error
    /// it caused
    fn checked<R>(&self, armed: &ArmGuard<'_, T, C>, result: rusqlite::Result<R>) -> Result<R> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => match armed.take_fault() {
                Some(fault) => Err(Error::Codec(fault)),
                None => Err(Error::Storage(e)),
            },
        }
    }

    /// Run `sql` and collect `(id, raw value)` rows
    fn select_rows(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<(i64, Stored)>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn decode_rows(&self, rows: Vec<(i64, Stored)>) -> Result<Vec<T>> {
        rows.into_iter()
            .map(|(_, raw)| self.codec.decode(raw).map_err(Error::from))
            .collect()
    }

    /// Names of the record table's columns
    pub fn columns(&self) -> Result<Vec<String>> {
        let mut state = self.maintained()?;
        let conn = self.connection(&mut state)?;
        let stmt = conn.prepare(schema::PROBE_COLUMNS)?;
        Ok(stmt.column_names().into_iter().map(String::from).collect())
    }
}

impl<T, C> RecordStore<T> for SqliteStore<T, C>
where
    T: Send + 'static,
    C: Codec<T>,
{
    fn add(&self, values: Vec<T>) -> Result<()> {
        let mut state = self.maintained()?;
        if values.is_empty() {
            return Ok(());
        }

        // Encode everything before touching the table so a bad value aborts
        // the whole batch
        let encoded = values
            .iter()
            .map(|value| self.codec.encode(value))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let conn = self.connection(&mut state)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(schema::INSERT)?;
            for raw in &encoded {
                stmt.execute(params![raw])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn filter(&self, predicate: Option<&Predicate<T>>) -> Result<Vec<T>> {
        let mut state = self.maintained()?;
        let conn = self.connection(&mut state)?;

        let rows = match predicate {
            None => Self::select_rows(conn, schema::SELECT_ALL)?,
            Some(predicate) => {
                let armed = self.hooks.arm(Slot::Filter, Some(predicate));
                let result = Self::select_rows(conn, schema::SELECT_FILTERED);
                self.checked(&armed, result)?
            }
        };

        self.decode_rows(rows)
    }

    fn exclude(&self, predicate: Option<&Predicate<T>>) -> Result<Vec<T>> {
        let mut state = self.maintained()?;
        let conn = self.connection(&mut state)?;
        let tx = conn.transaction()?;

        let rows = match predicate {
            None => {
                let rows = Self::select_rows(&tx, schema::SELECT_ALL)?;
                tx.execute(schema::DELETE_ALL, [])?;
                rows
            }
            Some(predicate) => {
                let rows = {
                    let armed = self.hooks.arm(Slot::Exclude, Some(predicate));
                    let result = Self::select_rows(&tx, schema::SELECT_EXCLUDED);
                    self.checked(&armed, result)?
                };
                // Delete exactly the rows that were returned rather than
                // re-running the predicate
                let mut stmt = tx.prepare_cached(schema::DELETE_BY_ID)?;
                for (id, _) in &rows {
                    stmt.execute([id])?;
                }
                rows
            }
        };

        // Decode before committing: a corrupt row leaves the table untouched
        let values = self.decode_rows(rows)?;
        tx.commit()?;
        Ok(values)
    }

    fn len(&self) -> Result<usize> {
        let mut state = self.maintained()?;
        let conn = self.connection(&mut state)?;
        let count: i64 = conn.query_row(schema::COUNT, [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
