// 🗄️ Store Builder - schema + idempotent population
//
// Canonical inputs:
//   mnet_data.json              {"<code>: <title>": [{noc_code, civilian_title, task_statements}]}
//   rank_responsibilities.yaml  [{rank, responsibilities}]
//
// Population is delete-all-then-reinsert, children before parents, so the
// end state depends only on the current content of those two documents.

use crate::error::{CrosswalkError, Result};
use crate::models::{CrosswalkData, NocEquivalency, OccupationCode, RankEntry};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Tables cleared on every population run, children first
pub const CLEAR_ORDER: [&str; 5] = [
    "task_statements",
    "noc_equivalencies",
    "mosids",
    "rank_responsibilities",
    "ranks",
];

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL so readers are not blocked by a maintenance run
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS mosids (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            mosid_code TEXT NOT NULL,
            mosid_title TEXT NOT NULL,
            UNIQUE(mosid_code, mosid_title)
        );

        CREATE TABLE IF NOT EXISTS noc_equivalencies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            noc_code TEXT NOT NULL,
            civilian_title TEXT NOT NULL,
            mosid_id INTEGER NOT NULL REFERENCES mosids (id),
            UNIQUE(mosid_id, noc_code, civilian_title)
        );

        CREATE TABLE IF NOT EXISTS task_statements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            statement TEXT NOT NULL,
            noc_equivalency_id INTEGER NOT NULL REFERENCES noc_equivalencies (id)
        );

        CREATE TABLE IF NOT EXISTS ranks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rank_name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS rank_responsibilities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            responsibility TEXT NOT NULL,
            rank_id INTEGER NOT NULL REFERENCES ranks (id)
        );

        CREATE INDEX IF NOT EXISTS idx_mosids_code ON mosids(mosid_code);
        CREATE INDEX IF NOT EXISTS idx_equivalencies_mosid ON noc_equivalencies(mosid_id);
        CREATE INDEX IF NOT EXISTS idx_statements_equivalency ON task_statements(noc_equivalency_id);
        CREATE INDEX IF NOT EXISTS idx_responsibilities_rank ON rank_responsibilities(rank_id);",
    )?;

    Ok(())
}

// ============================================================================
// CANONICAL DOCUMENTS
// ============================================================================

pub fn load_crosswalk_data(path: &Path) -> Result<CrosswalkData> {
    let content = read_document(path)?;
    serde_json::from_str(&content).map_err(|source| CrosswalkError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// Rank document: YAML for .yaml/.yml, JSON otherwise
pub fn load_rank_entries(path: &Path) -> Result<Vec<RankEntry>> {
    let content = read_document(path)?;
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "yaml" | "yml"))
        .unwrap_or(false);

    if is_yaml {
        serde_yaml::from_str(&content).map_err(|source| CrosswalkError::Yaml {
            path: path.display().to_string(),
            source,
        })
    } else {
        serde_json::from_str(&content).map_err(|source| CrosswalkError::Json {
            path: path.display().to_string(),
            source,
        })
    }
}

fn read_document(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| CrosswalkError::Io {
        path: path.display().to_string(),
        source,
    })
}

// ============================================================================
// POPULATION
// ============================================================================

/// Rows inserted by one population run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopulateReport {
    pub mosids: usize,
    pub equivalencies: usize,
    pub task_statements: usize,
    pub ranks: usize,
    pub responsibilities: usize,
    /// Equivalencies whose identity could not be re-fetched; their task
    /// statements were not inserted.
    pub skipped_equivalencies: usize,
}

/// Load both documents and repopulate the store
pub fn populate_from_files(
    conn: &Connection,
    mnet_data: &Path,
    ranks: &Path,
) -> Result<PopulateReport> {
    let crosswalk = load_crosswalk_data(mnet_data)?;
    let rank_entries = load_rank_entries(ranks)?;
    populate_database(conn, &crosswalk, &rank_entries)
}

/// Replace the whole entity graph with the given documents.
///
/// Every key is parsed before anything is deleted; a malformed key aborts
/// the run with the store untouched. The rest runs in one transaction.
pub fn populate_database(
    conn: &Connection,
    crosswalk: &CrosswalkData,
    rank_entries: &[RankEntry],
) -> Result<PopulateReport> {
    let occupations = crosswalk
        .iter()
        .map(|(key, equivalencies)| Ok((OccupationCode::parse_key(key)?, equivalencies)))
        .collect::<Result<Vec<(OccupationCode, &Vec<NocEquivalency>)>>>()?;

    let tx = conn.unchecked_transaction()?;

    for table in CLEAR_ORDER {
        tx.execute(&format!("DELETE FROM {table}"), [])?;
    }

    let mut report = PopulateReport::default();

    for (occupation, equivalencies) in &occupations {
        report.mosids += tx.execute(
            "INSERT OR IGNORE INTO mosids (mosid_code, mosid_title) VALUES (?1, ?2)",
            params![occupation.code, occupation.title],
        )?;
        let mosid_id: i64 = tx.query_row(
            "SELECT id FROM mosids WHERE mosid_code = ?1 AND mosid_title = ?2",
            params![occupation.code, occupation.title],
            |row| row.get(0),
        )?;

        for item in equivalencies.iter() {
            report.equivalencies += tx.execute(
                "INSERT OR IGNORE INTO noc_equivalencies (noc_code, civilian_title, mosid_id)
                 VALUES (?1, ?2, ?3)",
                params![item.noc_code, item.civilian_title, mosid_id],
            )?;
            let equivalency_id: Option<i64> = tx
                .query_row(
                    "SELECT id FROM noc_equivalencies
                     WHERE noc_code = ?1 AND civilian_title = ?2 AND mosid_id = ?3",
                    params![item.noc_code, item.civilian_title, mosid_id],
                    |row| row.get(0),
                )
                .optional()?;

            // The UNIQUE constraint means the row is normally there whether the
            // insert happened or was ignored. Only a trigger or an external
            // writer removing it lands here.
            let Some(equivalency_id) = equivalency_id else {
                warn!(
                    mosid = %occupation.code,
                    noc_code = %item.noc_code,
                    "equivalency not found after insert, skipping its task statements"
                );
                report.skipped_equivalencies += 1;
                continue;
            };

            for statement in &item.task_statements {
                report.task_statements += tx.execute(
                    "INSERT OR IGNORE INTO task_statements (statement, noc_equivalency_id)
                     VALUES (?1, ?2)",
                    params![statement, equivalency_id],
                )?;
            }
        }
    }

    for entry in rank_entries {
        report.ranks += tx.execute(
            "INSERT OR IGNORE INTO ranks (rank_name) VALUES (?1)",
            params![entry.rank],
        )?;
        let rank_id: i64 = tx.query_row(
            "SELECT id FROM ranks WHERE rank_name = ?1",
            params![entry.rank],
            |row| row.get(0),
        )?;

        for responsibility in &entry.responsibilities {
            report.responsibilities += tx.execute(
                "INSERT OR IGNORE INTO rank_responsibilities (responsibility, rank_id)
                 VALUES (?1, ?2)",
                params![responsibility, rank_id],
            )?;
        }
    }

    tx.commit()?;

    info!(
        mosids = report.mosids,
        equivalencies = report.equivalencies,
        task_statements = report.task_statements,
        ranks = report.ranks,
        responsibilities = report.responsibilities,
        skipped = report.skipped_equivalencies,
        "store populated"
    );

    Ok(report)
}

// ============================================================================
// STORE INSPECTION
// ============================================================================

/// Row count per table, in CLEAR_ORDER
pub fn table_counts(conn: &Connection) -> Result<Vec<(&'static str, i64)>> {
    CLEAR_ORDER
        .iter()
        .map(|table| {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok((*table, count))
        })
        .collect()
}

/// SHA-256 over the store content, ignoring autoincrement ids.
///
/// Two stores holding the same logical rows in the same stored order
/// produce the same digest.
pub fn store_fingerprint(conn: &Connection) -> Result<String> {
    let queries = [
        "SELECT m.mosid_code, m.mosid_title FROM mosids m ORDER BY m.id",
        "SELECT m.mosid_code, m.mosid_title, e.noc_code, e.civilian_title
         FROM noc_equivalencies e JOIN mosids m ON e.mosid_id = m.id
         ORDER BY e.id",
        "SELECT m.mosid_code, e.noc_code, e.civilian_title, t.statement
         FROM task_statements t
         JOIN noc_equivalencies e ON t.noc_equivalency_id = e.id
         JOIN mosids m ON e.mosid_id = m.id
         ORDER BY t.id",
        "SELECT r.rank_name FROM ranks r ORDER BY r.id",
        "SELECT r.rank_name, rr.responsibility
         FROM rank_responsibilities rr JOIN ranks r ON rr.rank_id = r.id
         ORDER BY rr.id",
    ];

    let mut hasher = Sha256::new();
    for sql in queries {
        let mut stmt = conn.prepare(sql)?;
        let columns = stmt.column_count();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            for i in 0..columns {
                let value: String = row.get(i)?;
                hasher.update(value.as_bytes());
                hasher.update(b"\x1f");
            }
            hasher.update(b"\x1e");
        }
        hasher.update(b"\x1d");
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Distinct MOSID codes in the store, sorted
pub fn list_mosid_codes(conn: &Connection) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT mosid_code FROM mosids")?;
    let codes = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<BTreeSet<String>, _>>()?;
    Ok(codes)
}

/// Codes from `expected` that the store does not know about.
///
/// Entries may be `"<code>: <title>"` labels or bare codes.
pub fn missing_mosids<'a>(
    conn: &Connection,
    expected: impl IntoIterator<Item = &'a str>,
) -> Result<BTreeSet<String>> {
    let present = list_mosid_codes(conn)?;
    let missing = expected
        .into_iter()
        .map(|label| label.split(':').next().unwrap_or(label).trim())
        .filter(|code| !code.is_empty() && !present.contains(*code))
        .map(str::to_string)
        .collect();
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_crosswalk() -> CrosswalkData {
        serde_json::from_str(
            r#"{
                "00005: Infantry Officer": [
                    {"noc_code": "40042", "civilian_title": "Commissioned officers of the Canadian Armed Forces",
                     "task_statements": ["Lead soldiers in operations", "Plan training"]},
                    {"noc_code": "70010", "civilian_title": "Construction managers", "task_statements": []}
                ],
                "00008: Naval Warfare Officer": [
                    {"noc_code": "40042", "civilian_title": "Commissioned officers of the Canadian Armed Forces",
                     "task_statements": ["Command a ship's watch"]}
                ]
            }"#,
        )
        .unwrap()
    }

    fn sample_ranks() -> Vec<RankEntry> {
        vec![
            RankEntry {
                rank: "Captain".to_string(),
                responsibilities: vec!["Command a sub-unit".to_string(), "Advise the CO".to_string()],
            },
            RankEntry {
                rank: "Sergeant".to_string(),
                responsibilities: vec!["Supervise a section".to_string()],
            },
        ]
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_setup_database_is_idempotent() {
        let conn = setup();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();

        assert_eq!(count(&conn, "mosids"), 0);
    }

    #[test]
    fn test_populate_inserts_full_graph() {
        let conn = setup();

        let report = populate_database(&conn, &sample_crosswalk(), &sample_ranks()).unwrap();

        assert_eq!(
            report,
            PopulateReport {
                mosids: 2,
                equivalencies: 3,
                task_statements: 3,
                ranks: 2,
                responsibilities: 3,
                skipped_equivalencies: 0,
            }
        );
        assert_eq!(count(&conn, "task_statements"), 3);
        assert_eq!(count(&conn, "rank_responsibilities"), 3);
    }

    #[test]
    fn test_populate_twice_yields_identical_store() {
        let conn = setup();

        populate_database(&conn, &sample_crosswalk(), &sample_ranks()).unwrap();
        let first = store_fingerprint(&conn).unwrap();
        let first_counts = table_counts(&conn).unwrap();

        populate_database(&conn, &sample_crosswalk(), &sample_ranks()).unwrap();
        let second = store_fingerprint(&conn).unwrap();

        assert_eq!(first, second);
        assert_eq!(first_counts, table_counts(&conn).unwrap());
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_populate_replaces_previous_content() {
        let conn = setup();
        populate_database(&conn, &sample_crosswalk(), &sample_ranks()).unwrap();

        let mut smaller = sample_crosswalk();
        smaller.remove("00008: Naval Warfare Officer");
        populate_database(&conn, &smaller, &sample_ranks()[..1]).unwrap();

        assert_eq!(count(&conn, "mosids"), 1);
        assert_eq!(count(&conn, "ranks"), 1);
        assert_eq!(count(&conn, "rank_responsibilities"), 2);
    }

    #[test]
    fn test_duplicate_pairs_are_silently_ignored() {
        let conn = setup();
        let crosswalk: CrosswalkData = serde_json::from_str(
            r#"{"00005: Infantry Officer": [
                {"noc_code": "40042", "civilian_title": "Officers", "task_statements": ["A"]},
                {"noc_code": "40042", "civilian_title": "Officers", "task_statements": ["B"]}
            ]}"#,
        )
        .unwrap();
        let ranks = vec![
            RankEntry {
                rank: "Captain".to_string(),
                responsibilities: vec!["X".to_string()],
            },
            RankEntry {
                rank: "Captain".to_string(),
                responsibilities: vec!["Y".to_string()],
            },
        ];

        let report = populate_database(&conn, &crosswalk, &ranks).unwrap();

        assert_eq!(report.equivalencies, 1);
        assert_eq!(report.task_statements, 2);
        assert_eq!(report.ranks, 1);
        assert_eq!(report.responsibilities, 2);
        assert_eq!(count(&conn, "noc_equivalencies"), 1);
    }

    #[test]
    fn test_equivalency_gone_after_insert_is_skipped_not_fatal() {
        let conn = setup();
        conn.execute_batch(
            "CREATE TRIGGER drop_gap_equivalency AFTER INSERT ON noc_equivalencies
             WHEN NEW.noc_code = '00000'
             BEGIN
                 DELETE FROM noc_equivalencies WHERE id = NEW.id;
             END;",
        )
        .unwrap();
        let crosswalk: CrosswalkData = serde_json::from_str(
            r#"{"00005: Infantry Officer": [
                {"noc_code": "00000", "civilian_title": "Vanishing", "task_statements": ["Lost"]},
                {"noc_code": "40042", "civilian_title": "Officers", "task_statements": ["Kept"]}
            ]}"#,
        )
        .unwrap();

        let report = populate_database(&conn, &crosswalk, &[]).unwrap();

        assert_eq!(report.skipped_equivalencies, 1);
        assert_eq!(report.task_statements, 1);
        assert_eq!(count(&conn, "noc_equivalencies"), 1);
        assert_eq!(count(&conn, "task_statements"), 1);
    }

    #[test]
    fn test_malformed_key_aborts_before_any_deletion() {
        let conn = setup();
        populate_database(&conn, &sample_crosswalk(), &sample_ranks()).unwrap();
        let before = store_fingerprint(&conn).unwrap();

        let mut bad = sample_crosswalk();
        bad.insert("00099 No Separator".to_string(), vec![]);
        let err = populate_database(&conn, &bad, &sample_ranks()).unwrap_err();

        assert!(matches!(err, CrosswalkError::MalformedKey { .. }));
        assert_eq!(store_fingerprint(&conn).unwrap(), before);
    }

    #[test]
    fn test_populate_from_files_yaml_and_json() {
        let dir = TempDir::new().unwrap();
        let mnet = dir.path().join("mnet_data.json");
        let yaml = dir.path().join("ranks.yaml");
        let json = dir.path().join("ranks.json");
        fs::write(&mnet, serde_json::to_string(&sample_crosswalk()).unwrap()).unwrap();
        fs::write(
            &yaml,
            "- rank: Captain\n  responsibilities:\n    - Command a sub-unit\n",
        )
        .unwrap();
        fs::write(&json, r#"[{"rank": "Major", "responsibilities": ["Lead a company"]}]"#).unwrap();

        let conn = setup();
        let report = populate_from_files(&conn, &mnet, &yaml).unwrap();
        assert_eq!(report.ranks, 1);
        assert_eq!(report.mosids, 2);

        let report = populate_from_files(&conn, &mnet, &json).unwrap();
        assert_eq!(report.responsibilities, 1);
    }

    #[test]
    fn test_invalid_documents_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mnet = dir.path().join("mnet_data.json");
        fs::write(&mnet, r#"{"00005: Infantry Officer": [{"noc_code": 40042}]}"#).unwrap();

        let err = load_crosswalk_data(&mnet).unwrap_err();
        assert!(matches!(err, CrosswalkError::Json { .. }));

        let err = load_rank_entries(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, CrosswalkError::Io { .. }));
    }

    #[test]
    fn test_missing_mosids() {
        let conn = setup();
        populate_database(&conn, &sample_crosswalk(), &sample_ranks()).unwrap();

        let expected = ["00005: Infantry Officer", "00008", "00179: Pilot", ""];
        let missing = missing_mosids(&conn, expected).unwrap();

        assert_eq!(missing.into_iter().collect::<Vec<_>>(), vec!["00179".to_string()]);
    }
}
