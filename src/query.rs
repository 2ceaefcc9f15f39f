// 🔎 Query Service - read-only lookups against the populated store
//
// None is the "empty result": the target is absent. It is never an error;
// the HTTP boundary maps it to 404. Storage failures are Err.

use crate::db::setup_database;
use crate::error::{CrosswalkError, Result};
use crate::models::{NocEquivalency, OccupationData, RankEntry};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Responsibilities of a rank (exact, case-sensitive name match)
pub fn get_rank_data(conn: &Connection, rank_name: &str) -> Result<Option<RankEntry>> {
    let rank_id: Option<i64> = conn
        .query_row(
            "SELECT id FROM ranks WHERE rank_name = ?1",
            params![rank_name],
            |row| row.get(0),
        )
        .optional()?;

    let Some(rank_id) = rank_id else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT responsibility FROM rank_responsibilities WHERE rank_id = ?1 ORDER BY id",
    )?;
    let responsibilities = stmt
        .query_map(params![rank_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;

    Ok(Some(RankEntry {
        rank: rank_name.to_string(),
        responsibilities,
    }))
}

/// Equivalencies and task statements for one MOSID code.
///
/// When the code was stored under several titles, the first stored title wins.
pub fn get_occupation_data(conn: &Connection, mosid_code: &str) -> Result<Option<OccupationData>> {
    let mosid_row: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, mosid_title FROM mosids WHERE mosid_code = ?1 ORDER BY id LIMIT 1",
            params![mosid_code],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((mosid_id, title)) = mosid_row else {
        return Ok(None);
    };

    let mut eq_stmt = conn.prepare(
        "SELECT id, noc_code, civilian_title FROM noc_equivalencies
         WHERE mosid_id = ?1 ORDER BY id",
    )?;
    let rows = eq_stmt
        .query_map(params![mosid_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<Result<Vec<(i64, String, String)>, _>>()?;

    let mut task_stmt = conn.prepare(
        "SELECT statement FROM task_statements WHERE noc_equivalency_id = ?1 ORDER BY id",
    )?;

    let mut equivalencies = Vec::with_capacity(rows.len());
    for (equivalency_id, noc_code, civilian_title) in rows {
        let task_statements = task_stmt
            .query_map(params![equivalency_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        equivalencies.push(NocEquivalency {
            noc_code,
            civilian_title,
            task_statements,
        });
    }

    Ok(Some(OccupationData {
        mosid: mosid_code.to_string(),
        title,
        equivalencies,
    }))
}

/// Independent single lookups, keyed by requested code.
///
/// Repeated codes collapse into one entry. Absent codes map to None.
pub fn get_occupation_data_batch<S: AsRef<str>>(
    conn: &Connection,
    mosid_codes: &[S],
) -> Result<BTreeMap<String, Option<OccupationData>>> {
    let mut results = BTreeMap::new();
    for code in mosid_codes {
        let code = code.as_ref();
        if results.contains_key(code) {
            continue;
        }
        results.insert(code.to_string(), get_occupation_data(conn, code)?);
    }
    Ok(results)
}

// ============================================================================
// STORE HANDLE
// ============================================================================

/// Handle on the on-disk store.
///
/// Each lookup opens its own short-lived read-only connection, so lookups
/// can run concurrently with each other.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Store { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read-write connection with the schema in place (population, maintenance)
    pub fn open_writer(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).map_err(|source| self.unavailable(source))?;
        setup_database(&conn)?;
        Ok(conn)
    }

    /// Query-only connection for a single request.
    ///
    /// Opened read-write without CREATE (a WAL store needs its -shm file)
    /// and locked down with `query_only`; a missing store is an error.
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| self.unavailable(source))?;
        conn.pragma_update(None, "query_only", true)?;
        Ok(conn)
    }

    fn unavailable(&self, source: rusqlite::Error) -> CrosswalkError {
        CrosswalkError::StorageUnavailable {
            path: self.path.display().to_string(),
            source,
        }
    }

    pub fn rank(&self, rank_name: &str) -> Result<Option<RankEntry>> {
        get_rank_data(&self.connect()?, rank_name)
    }

    pub fn occupation(&self, mosid_code: &str) -> Result<Option<OccupationData>> {
        get_occupation_data(&self.connect()?, mosid_code)
    }

    pub fn occupation_batch<S: AsRef<str>>(
        &self,
        mosid_codes: &[S],
    ) -> Result<BTreeMap<String, Option<OccupationData>>> {
        get_occupation_data_batch(&self.connect()?, mosid_codes)
    }
}
