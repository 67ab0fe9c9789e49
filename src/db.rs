use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::card::{self, SetAlgebra};
use crate::error::{KvError, Result};
use crate::range::RangeQuery;
use crate::scan::{self, KeyResolver, MembershipOracle, RangeScanner};
use crate::types::{KeyType, ScanDirection, ScoreRange, SetOp, ZMember};

/// Rows fetched per range cursor refill unless configured otherwise
pub const DEFAULT_SCAN_BATCH: usize = 128;

/// Shared state behind every session of one database file
struct DbCore {
    conn: Mutex<Connection>,
    /// Rows fetched per range cursor refill
    scan_batch: AtomicUsize,
}

pub struct Db {
    core: Arc<DbCore>,
    selected_db: i32,
}

impl Db {
    /// Open or create a database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode and optimize pragmas
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;

        let db = Self {
            core: Arc::new(DbCore {
                conn: Mutex::new(conn),
                scan_batch: AtomicUsize::new(DEFAULT_SCAN_BATCH),
            }),
            selected_db: 0,
        };

        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Run schema migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.core.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a new session sharing the same database backend.
    /// The new session starts at database 0.
    pub fn session(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            selected_db: 0,
        }
    }

    /// Select a database (0-15) for this session
    pub fn select(&mut self, db: i32) -> Result<()> {
        if !(0..=15).contains(&db) {
            return Err(KvError::OutOfRange);
        }
        self.selected_db = db;
        Ok(())
    }

    /// Get current database number
    pub fn current_db(&self) -> i32 {
        self.selected_db
    }

    /// Set how many rows a range scan fetches per round trip (minimum 1)
    pub fn set_scan_batch(&self, rows: usize) {
        self.core.scan_batch.store(rows.max(1), Ordering::Relaxed);
    }

    pub fn scan_batch(&self) -> usize {
        self.core.scan_batch.load(Ordering::Relaxed)
    }

    /// Current time in milliseconds since epoch
    pub fn now_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    /// DBSIZE - number of keys in the selected database
    pub fn dbsize(&self) -> Result<i64> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM keys WHERE db = ?1",
            params![self.selected_db],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// FLUSHDB - Delete all keys in the currently selected database
    pub fn flushdb(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute("DELETE FROM keys WHERE db = ?1", params![self.selected_db])?;
        Ok(())
    }

    // --- Keys and strings ---

    /// GET key
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.lock();
        let key_id = match typed_key_id(&conn, self.selected_db, key, KeyType::String)? {
            Some(id) => id,
            None => return Ok(None),
        };

        let value = conn
            .query_row(
                "SELECT value FROM strings WHERE key_id = ?1",
                params![key_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// SET key value - replaces whatever the key held before
    pub fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.lock();
        let db = self.selected_db;

        if let Some((key_id, key_type)) = lookup_key(&conn, db, key)? {
            if key_type != KeyType::String as i32 {
                conn.execute("DELETE FROM keys WHERE id = ?1", params![key_id])?;
            }
        }

        let key_id = get_or_create_key(&conn, db, key, KeyType::String)?;
        conn.execute(
            "INSERT INTO strings (key_id, value) VALUES (?1, ?2)
             ON CONFLICT(key_id) DO UPDATE SET value = excluded.value",
            params![key_id, value],
        )?;
        touch(&conn, key_id)
    }

    /// DEL key [key ...]
    pub fn del(&self, keys: &[&str]) -> Result<i64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let conn = self.lock();
        let db = self.selected_db;

        let placeholders: String = (0..keys.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "DELETE FROM keys WHERE db = ?1 AND key IN ({})",
            placeholders
        );

        let mut stmt = conn.prepare(&sql)?;

        // Build params: [db, key1, key2, ...]
        let mut params_vec: Vec<&dyn rusqlite::ToSql> = vec![&db];
        for key in keys {
            params_vec.push(key);
        }

        let count = stmt.execute(params_vec.as_slice())?;
        Ok(count as i64)
    }

    /// EXISTS key [key ...] - duplicates count once per occurrence
    pub fn exists(&self, keys: &[&str]) -> Result<i64> {
        let conn = self.lock();
        let mut count = 0i64;
        for key in keys {
            if lookup_key(&conn, self.selected_db, key)?.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// TYPE key - returns key type or None if not found
    pub fn key_type(&self, key: &str) -> Result<Option<KeyType>> {
        let conn = self.lock();
        Ok(lookup_key(&conn, self.selected_db, key)?.and_then(|(_, t)| KeyType::from_i32(t)))
    }

    // --- Set operations ---

    /// SADD key member [member ...] - add members to set, returns count of new members added
    pub fn sadd(&self, key: &str, members: &[&[u8]]) -> Result<i64> {
        if members.is_empty() {
            return Ok(0);
        }

        let conn = self.lock();
        let key_id = get_or_create_key(&conn, self.selected_db, key, KeyType::Set)?;

        let mut added = 0i64;
        for member in members {
            let result = conn.execute(
                "INSERT OR IGNORE INTO sets (key_id, member) VALUES (?1, ?2)",
                params![key_id, member],
            )?;
            added += result as i64;
        }

        touch(&conn, key_id)?;
        Ok(added)
    }

    /// SREM key member [member ...] - remove members from set, returns count removed
    pub fn srem(&self, key: &str, members: &[&[u8]]) -> Result<i64> {
        if members.is_empty() {
            return Ok(0);
        }

        let conn = self.lock();
        let key_id = match typed_key_id(&conn, self.selected_db, key, KeyType::Set)? {
            Some(id) => id,
            None => return Ok(0),
        };

        let mut removed = 0i64;
        for member in members {
            let result = conn.execute(
                "DELETE FROM sets WHERE key_id = ?1 AND member = ?2",
                params![key_id, member],
            )?;
            removed += result as i64;
        }

        drop_if_empty(&conn, key_id, "sets")?;
        Ok(removed)
    }

    /// SMEMBERS key - get all members of set
    pub fn smembers(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        let conn = self.lock();
        set_members(&conn, self.selected_db, key)
    }

    /// SCARD key - get cardinality (number of members) of set
    pub fn scard(&self, key: &str) -> Result<i64> {
        let conn = self.lock();
        let key_id = match typed_key_id(&conn, self.selected_db, key, KeyType::Set)? {
            Some(id) => id,
            None => return Ok(0),
        };

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sets WHERE key_id = ?1",
            params![key_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// SDIFF key [key ...] - return members in first set but not in subsequent sets
    pub fn sdiff(&self, keys: &[&str]) -> Result<Vec<Vec<u8>>> {
        let Some((first, rest)) = keys.split_first() else {
            return Ok(vec![]);
        };

        let conn = self.lock();
        let mut result = set_members(&conn, self.selected_db, first)?;
        for key in rest {
            let other: HashSet<Vec<u8>> =
                set_members(&conn, self.selected_db, key)?.into_iter().collect();
            result.retain(|m| !other.contains(m));
        }
        Ok(result)
    }

    /// SINTER key [key ...] - return intersection of all sets
    pub fn sinter(&self, keys: &[&str]) -> Result<Vec<Vec<u8>>> {
        let Some((first, rest)) = keys.split_first() else {
            return Ok(vec![]);
        };

        let conn = self.lock();
        let mut result = set_members(&conn, self.selected_db, first)?;
        for key in rest {
            let other: HashSet<Vec<u8>> =
                set_members(&conn, self.selected_db, key)?.into_iter().collect();
            result.retain(|m| other.contains(m));
        }
        Ok(result)
    }

    /// SUNION key [key ...] - return union of all sets
    pub fn sunion(&self, keys: &[&str]) -> Result<Vec<Vec<u8>>> {
        let conn = self.lock();
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for key in keys {
            for member in set_members(&conn, self.selected_db, key)? {
                if seen.insert(member.clone()) {
                    result.push(member);
                }
            }
        }
        Ok(result)
    }

    /// SDIFFCARD / SINTERCARD / SUNIONCARD - size of the set algebra result
    pub fn setop_card(&self, op: SetOp, keys: &[&str]) -> Result<i64> {
        card::cardinality(self, op, keys)
    }

    // --- Sorted set operations ---

    /// ZADD key score member [score member ...] - add members with scores, returns count added
    pub fn zadd(&self, key: &str, members: &[ZMember]) -> Result<i64> {
        if members.is_empty() {
            return Ok(0);
        }
        if members.iter().any(|m| m.score.is_nan()) {
            return Err(KvError::NotFloat);
        }

        let conn = self.lock();
        let key_id = get_or_create_key(&conn, self.selected_db, key, KeyType::ZSet)?;

        let mut added = 0i64;
        for m in members {
            let exists = zset_score(&conn, key_id, &m.member)?.is_some();
            if exists {
                conn.execute(
                    "UPDATE zsets SET score = ?1 WHERE key_id = ?2 AND member = ?3",
                    params![m.score, key_id, &m.member],
                )?;
            } else {
                conn.execute(
                    "INSERT INTO zsets (key_id, member, score) VALUES (?1, ?2, ?3)",
                    params![key_id, &m.member, m.score],
                )?;
                added += 1;
            }
        }

        touch(&conn, key_id)?;
        Ok(added)
    }

    /// ZREM key member [member ...] - remove members, returns count removed
    pub fn zrem(&self, key: &str, members: &[&[u8]]) -> Result<i64> {
        if members.is_empty() {
            return Ok(0);
        }

        let conn = self.lock();
        let key_id = match typed_key_id(&conn, self.selected_db, key, KeyType::ZSet)? {
            Some(id) => id,
            None => return Ok(0),
        };

        let mut removed = 0i64;
        for member in members {
            let result = conn.execute(
                "DELETE FROM zsets WHERE key_id = ?1 AND member = ?2",
                params![key_id, member],
            )?;
            removed += result as i64;
        }

        drop_if_empty(&conn, key_id, "zsets")?;
        Ok(removed)
    }

    /// ZSCORE key member - get score of member
    pub fn zscore(&self, key: &str, member: &[u8]) -> Result<Option<f64>> {
        let conn = self.lock();
        match typed_key_id(&conn, self.selected_db, key, KeyType::ZSet)? {
            Some(key_id) => zset_score(&conn, key_id, member),
            None => Ok(None),
        }
    }

    /// ZCARD key - get cardinality
    pub fn zcard(&self, key: &str) -> Result<i64> {
        let conn = self.lock();
        let key_id = match typed_key_id(&conn, self.selected_db, key, KeyType::ZSet)? {
            Some(id) => id,
            None => return Ok(0),
        };

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM zsets WHERE key_id = ?1",
            params![key_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Read view over the selected database. Holds the connection for its
    /// whole lifetime, so keys opened through it cannot change underneath.
    pub fn reader(&self) -> DbReader<'_> {
        DbReader {
            conn: self.lock(),
            db: self.selected_db,
            scan_batch: self.scan_batch(),
        }
    }

    /// Z{INTER,DIFF}[REV]RANGEBYSCORE - members of `query.subject` within the
    /// window that pass the membership test against `query.filter`
    pub fn zrangebyscore_filtered(&self, query: &RangeQuery) -> Result<Vec<ZMember>> {
        let reader = self.reader();
        let mut out = Vec::new();
        scan::run(&reader, query, &mut out)?;
        Ok(out)
    }
}

impl SetAlgebra for Db {
    fn sdiff(&self, keys: &[&str]) -> Result<Vec<Vec<u8>>> {
        Db::sdiff(self, keys)
    }

    fn sinter(&self, keys: &[&str]) -> Result<Vec<Vec<u8>>> {
        Db::sinter(self, keys)
    }

    fn sunion(&self, keys: &[&str]) -> Result<Vec<Vec<u8>>> {
        Db::sunion(self, keys)
    }
}

/// `(id, type)` of `key` in `db`
fn lookup_key(conn: &Connection, db: i32, key: &str) -> Result<Option<(i64, i32)>> {
    let found = conn
        .query_row(
            "SELECT id, type FROM keys WHERE db = ?1 AND key = ?2",
            params![db, key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(found)
}

/// Key id if `key` exists with the `expected` type, `WrongType` if it exists with another
fn typed_key_id(conn: &Connection, db: i32, key: &str, expected: KeyType) -> Result<Option<i64>> {
    match lookup_key(conn, db, key)? {
        Some((key_id, key_type)) if key_type == expected as i32 => Ok(Some(key_id)),
        Some(_) => Err(KvError::WrongType),
        None => Ok(None),
    }
}

fn get_or_create_key(conn: &Connection, db: i32, key: &str, expected: KeyType) -> Result<i64> {
    if let Some(key_id) = typed_key_id(conn, db, key, expected)? {
        return Ok(key_id);
    }

    let now = Db::now_ms();
    conn.execute(
        "INSERT INTO keys (db, key, type, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![db, key, expected as i32, now],
    )?;
    Ok(conn.last_insert_rowid())
}

fn touch(conn: &Connection, key_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE keys SET updated_at = ?1 WHERE id = ?2",
        params![Db::now_ms(), key_id],
    )?;
    Ok(())
}

/// Delete the key once its value table (`sets` or `zsets`) has no rows left for it
fn drop_if_empty(conn: &Connection, key_id: i64, table: &str) -> Result<()> {
    let remaining: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE key_id = ?1", table),
        params![key_id],
        |row| row.get(0),
    )?;

    if remaining == 0 {
        conn.execute("DELETE FROM keys WHERE id = ?1", params![key_id])?;
        Ok(())
    } else {
        touch(conn, key_id)
    }
}

fn set_members(conn: &Connection, db: i32, key: &str) -> Result<Vec<Vec<u8>>> {
    let key_id = match typed_key_id(conn, db, key, KeyType::Set)? {
        Some(id) => id,
        None => return Ok(vec![]),
    };

    let mut stmt = conn.prepare_cached("SELECT member FROM sets WHERE key_id = ?1")?;
    let rows = stmt.query_map(params![key_id], |row| row.get::<_, Vec<u8>>(0))?;

    let mut members = Vec::new();
    for row in rows {
        members.push(row?);
    }
    Ok(members)
}

fn zset_score(conn: &Connection, key_id: i64, member: &[u8]) -> Result<Option<f64>> {
    let mut stmt =
        conn.prepare_cached("SELECT score FROM zsets WHERE key_id = ?1 AND member = ?2")?;
    let score = stmt
        .query_row(params![key_id, member], |row| row.get(0))
        .optional()?;
    Ok(score)
}

/// Command-scoped read access to one database, see [`Db::reader`]
pub struct DbReader<'a> {
    conn: MutexGuard<'a, Connection>,
    db: i32,
    scan_batch: usize,
}

/// A sorted set opened through a [`DbReader`]
#[derive(Debug)]
pub struct ZSetHandle {
    key_id: i64,
}

impl KeyResolver for DbReader<'_> {
    type Handle = ZSetHandle;

    fn open_zset(&self, key: &str) -> Result<Option<ZSetHandle>> {
        let key_id = typed_key_id(&self.conn, self.db, key, KeyType::ZSet)?;
        Ok(key_id.map(|key_id| ZSetHandle { key_id }))
    }
}

impl RangeScanner for DbReader<'_> {
    fn range<'a>(
        &'a self,
        zset: &'a ZSetHandle,
        window: &ScoreRange,
        direction: ScanDirection,
    ) -> Result<Box<dyn Iterator<Item = Result<ZMember>> + 'a>> {
        Ok(Box::new(ScoreCursor::new(
            &self.conn,
            zset.key_id,
            *window,
            direction,
            self.scan_batch,
        )))
    }
}

impl MembershipOracle for DbReader<'_> {
    fn score(&self, zset: &ZSetHandle, member: &[u8]) -> Result<Option<f64>> {
        zset_score(&self.conn, zset.key_id, member)
    }
}

/// Keyset-paginated walk over a score window.
///
/// Fetches `batch` rows at a time ordered by `(score, member)` and resumes
/// strictly after the last row handed out, so only one batch is ever buffered.
struct ScoreCursor<'a> {
    conn: &'a Connection,
    key_id: i64,
    window: ScoreRange,
    direction: ScanDirection,
    batch: usize,
    buffer: VecDeque<ZMember>,
    last: Option<(f64, Vec<u8>)>,
    exhausted: bool,
}

impl<'a> ScoreCursor<'a> {
    fn new(
        conn: &'a Connection,
        key_id: i64,
        window: ScoreRange,
        direction: ScanDirection,
        batch: usize,
    ) -> Self {
        Self {
            conn,
            key_id,
            window,
            direction,
            batch: batch.max(1),
            buffer: VecDeque::new(),
            last: None,
            exhausted: false,
        }
    }

    fn sql(&self) -> String {
        let min_op = if self.window.min_exclusive { ">" } else { ">=" };
        let max_op = if self.window.max_exclusive { "<" } else { "<=" };
        let (order, after) = match self.direction {
            ScanDirection::Forward => ("ASC", ">"),
            ScanDirection::Reverse => ("DESC", "<"),
        };
        let resume = if self.last.is_some() {
            format!(
                " AND (score {after} ?5 OR (score = ?5 AND member {after} ?6))",
                after = after
            )
        } else {
            String::new()
        };

        format!(
            "SELECT member, score FROM zsets
             WHERE key_id = ?1 AND score {min_op} ?2 AND score {max_op} ?3{resume}
             ORDER BY score {order}, member {order} LIMIT ?4",
            min_op = min_op,
            max_op = max_op,
            resume = resume,
            order = order
        )
    }

    fn refill(&mut self) -> Result<()> {
        let sql = self.sql();
        let conn = self.conn;
        let mut stmt = conn.prepare_cached(&sql)?;
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<ZMember> {
            Ok(ZMember {
                member: row.get(0)?,
                score: row.get(1)?,
            })
        };

        let limit = self.batch as i64;
        let rows = match &self.last {
            None => stmt.query_map(
                params![self.key_id, self.window.min, self.window.max, limit],
                map_row,
            )?,
            Some((score, member)) => stmt.query_map(
                params![
                    self.key_id,
                    self.window.min,
                    self.window.max,
                    limit,
                    score,
                    member
                ],
                map_row,
            )?,
        };

        for row in rows {
            self.buffer.push_back(row?);
        }

        if self.buffer.len() < self.batch {
            self.exhausted = true;
        }
        if let Some(tail) = self.buffer.back() {
            self.last = Some((tail.score, tail.member.clone()));
        }
        Ok(())
    }
}

impl Iterator for ScoreCursor<'_> {
    type Item = Result<ZMember>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.refill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
