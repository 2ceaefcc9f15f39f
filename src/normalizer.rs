// 🧹 Record Normalizer - MOSID ↔ NOC crosswalk tables
// Raw delimiter-separated tables (any header naming) → one clean record set
//
// Pipeline:
//   collect_raw_files → read_raw_rows → build_record → dedupe_records → write_csv / write_json

use anyhow::{bail, Context, Result};
use chrono::Utc;
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File names written into the output directory
pub const OUTPUT_CSV: &str = "mosid_noc.csv";
pub const OUTPUT_JSON: &str = "mosid_noc.json";

/// Column order of the tabular output
pub const OUTPUT_FIELDS: [&str; 8] = [
    "mosid",
    "caf_title",
    "noc_code",
    "civilian_title",
    "role_description",
    "source_file",
    "source_publication_date",
    "transcription_date",
];

/// Bytes inspected when sniffing the delimiter
const SNIFF_SAMPLE_LEN: usize = 2048;

/// Delimiters we are willing to detect, in tie-break order
const DELIMITER_CANDIDATES: [u8; 3] = [b',', b'\t', b';'];

// ============================================================================
// CANONICAL FIELDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Mosid,
    CafTitle,
    NocCode,
    CivilianTitle,
    RoleDescription,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Mosid,
        Field::CafTitle,
        Field::NocCode,
        Field::CivilianTitle,
        Field::RoleDescription,
    ];

    /// Accepted (lowercased, trimmed) headers, in priority order
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Field::Mosid => &["mosid", "mos id", "mosid code"],
            Field::CafTitle => &["caf trade title", "caf title", "occupation title"],
            Field::NocCode => &["noc 2021", "noc", "noc code"],
            Field::CivilianTitle => &["civilian occupation title", "noc title", "civilian title"],
            Field::RoleDescription => &["role description", "summary"],
        }
    }
}

/// One raw row: normalized header → cell value
pub type RawRow = HashMap<String, String>;

// ============================================================================
// NORMALIZED RECORD
// ============================================================================

/// Normalized MOSID ↔ NOC mapping. Field order is the output column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MosidNocRecord {
    pub mosid: String,
    pub caf_title: String,
    pub noc_code: String,
    pub civilian_title: String,
    pub role_description: String,
    pub source_file: String,
    pub source_publication_date: Option<String>,
    pub transcription_date: Option<String>,
}

impl MosidNocRecord {
    /// Deduplication key
    pub fn key(&self) -> (String, String) {
        (self.mosid.clone(), self.noc_code.clone())
    }
}

// ============================================================================
// FIELD EXTRACTION
// ============================================================================

/// Lowercase and trim a raw header
pub fn normalize_header(raw: &str) -> String {
    raw.trim().trim_matches('\u{feff}').trim().to_lowercase()
}

/// First alias with a non-empty raw value wins, returned trimmed.
///
/// A whitespace-only cell still counts as present: it yields `""` and stops
/// the search, so a blank `mosid` column drops the row.
pub fn extract_value(row: &RawRow, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .filter_map(|alias| row.get(*alias))
        .find(|value| !value.is_empty())
        .map(|value| value.trim().to_string())
}

/// Strip everything that is not alphanumeric.
/// Never turns a present code into an empty one.
pub fn sanitize_noc_code(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| c.is_alphanumeric()).collect();
    if cleaned.is_empty() {
        raw.trim().to_string()
    } else {
        cleaned
    }
}

/// Publication date from underscore-delimited filename segments.
///
/// `crosswalk_20230101.csv` → `2023-01-01`, `crosswalk_2021.csv` → `2021`.
/// Every segment is checked; the last one matching either rule wins.
pub fn derive_publication_date(filename: &str) -> Option<String> {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);

    stem.split('_')
        .filter_map(|part| {
            if !part.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            match part.len() {
                8 => Some(format!("{}-{}-{}", &part[..4], &part[4..6], &part[6..])),
                4 => Some(part.to_string()),
                _ => None,
            }
        })
        .last()
}

/// Build a record from one raw row, or None when mosid / noc_code is missing
pub fn build_record(
    source_file: &str,
    row: &RawRow,
    transcription_date: &str,
) -> Option<MosidNocRecord> {
    let mut values: HashMap<&'static str, String> = HashMap::new();

    for field in Field::ALL {
        if let Some(value) = extract_value(row, field.aliases()) {
            let value = if field == Field::NocCode {
                sanitize_noc_code(&value)
            } else {
                value
            };
            values.insert(field.aliases()[0], value);
        }
    }

    let mut take = |field: Field| {
        values
            .remove(field.aliases()[0])
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    };

    let mosid = take(Field::Mosid);
    let noc_code = take(Field::NocCode);
    if mosid.is_empty() || noc_code.is_empty() {
        return None;
    }

    Some(MosidNocRecord {
        mosid,
        caf_title: take(Field::CafTitle),
        noc_code,
        civilian_title: take(Field::CivilianTitle),
        role_description: take(Field::RoleDescription),
        source_file: source_file.to_string(),
        source_publication_date: derive_publication_date(source_file),
        transcription_date: Some(transcription_date.to_string()),
    })
}

/// Last-write-wins merge on (mosid, noc_code), sorted by that key
pub fn dedupe_records(records: impl IntoIterator<Item = MosidNocRecord>) -> Vec<MosidNocRecord> {
    let mut seen: BTreeMap<(String, String), MosidNocRecord> = BTreeMap::new();
    for record in records {
        seen.insert(record.key(), record);
    }
    seen.into_values().collect()
}

// ============================================================================
// RAW FILE READING
// ============================================================================

/// Pick the delimiter among comma / tab / semicolon.
///
/// A candidate qualifies when it appears (outside quotes) the same non-zero
/// number of times on every sampled line. The most frequent qualifying
/// candidate wins; no qualifying candidate falls back to comma.
pub fn detect_delimiter(sample: &str) -> u8 {
    let mut lines: Vec<&str> = sample.lines().filter(|l| !l.trim().is_empty()).collect();

    // Last line of a truncated sample is probably partial
    if lines.len() > 1 && !sample.ends_with('\n') {
        lines.pop();
    }

    let mut best: Option<(u8, usize)> = None;
    for delimiter in DELIMITER_CANDIDATES {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| count_unquoted(line, delimiter))
            .collect();

        let Some(&first) = counts.first() else {
            continue;
        };
        if first == 0 || counts.iter().any(|&c| c != first) {
            continue;
        }
        if best.map_or(true, |(_, n)| first > n) {
            best = Some((delimiter, first));
        }
    }

    best.map(|(d, _)| d).unwrap_or(b',')
}

fn count_unquoted(line: &str, delimiter: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for byte in line.bytes() {
        if byte == b'"' {
            in_quotes = !in_quotes;
        } else if byte == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

/// All .csv / .tsv files under `raw_dir`, recursively, sorted by path
pub fn collect_raw_files(raw_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![raw_dir.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let is_table = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| matches!(e.to_ascii_lowercase().as_str(), "csv" | "tsv"))
                .unwrap_or(false);
            if is_table {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Read one raw table into header-normalized rows
pub fn read_raw_rows(file_path: &Path) -> Result<Vec<RawRow>> {
    let content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to open file: {}", file_path.display()))?;
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);

    let sample_end = content
        .char_indices()
        .nth(SNIFF_SAMPLE_LEN)
        .map(|(i, _)| i)
        .unwrap_or(content.len());
    let delimiter = detect_delimiter(&content[..sample_end]);

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read header row in {}", file_path.display()))?
        .iter()
        .map(normalize_header)
        .collect();

    let mut rows = Vec::new();
    for (line_num, result) in reader.records().enumerate() {
        let record = result.with_context(|| {
            format!("Failed to parse line {} in {}", line_num + 2, file_path.display())
        })?;

        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .filter(|(header, _)| !header.is_empty())
            .map(|(header, value)| (header.clone(), value.to_string()))
            .collect();
        rows.push(row);
    }

    let delimiter_shown = (delimiter as char).escape_default().to_string();
    debug!(
        file = %file_path.display(),
        delimiter = %delimiter_shown,
        rows = rows.len(),
        "read raw table"
    );

    Ok(rows)
}

// ============================================================================
// OUTPUT
// ============================================================================

pub fn write_csv(records: &[MosidNocRecord], path: &Path) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    // Header written by hand so an empty record set still gets one
    writer.write_record(OUTPUT_FIELDS)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_json(records: &[MosidNocRecord], path: &Path) -> Result<()> {
    let mut json = serde_json::to_string_pretty(records)?;
    json.push('\n');
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn read_records_csv(path: &Path) -> Result<Vec<MosidNocRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let records = reader
        .deserialize()
        .collect::<Result<Vec<MosidNocRecord>, _>>()
        .with_context(|| format!("Failed to deserialize records in {}", path.display()))?;
    Ok(records)
}

pub fn read_records_json(path: &Path) -> Result<Vec<MosidNocRecord>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to deserialize records in {}", path.display()))
}

// ============================================================================
// ENTRY POINT
// ============================================================================

/// Normalize every raw table under `raw_dir` into `output_dir`.
///
/// Returns the deduplicated, sorted records that were written.
pub fn ingest(raw_dir: &Path, output_dir: &Path) -> Result<Vec<MosidNocRecord>> {
    if !raw_dir.is_dir() {
        bail!("Raw directory not found: {}", raw_dir.display());
    }
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let transcription_date = Utc::now().date_naive().format("%Y-%m-%d").to_string();

    let files = collect_raw_files(raw_dir)?;
    let mut records = Vec::new();
    let mut dropped = 0usize;

    for file_path in &files {
        let filename = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown.csv")
            .to_string();

        for row in read_raw_rows(file_path)? {
            match build_record(&filename, &row, &transcription_date) {
                Some(record) => records.push(record),
                None => dropped += 1,
            }
        }
    }

    let extracted = records.len();
    let normalized = dedupe_records(records);

    write_csv(&normalized, &output_dir.join(OUTPUT_CSV))?;
    write_json(&normalized, &output_dir.join(OUTPUT_JSON))?;

    info!(
        files = files.len(),
        extracted,
        dropped,
        written = normalized.len(),
        output = %output_dir.display(),
        "normalized crosswalk tables"
    );

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn write_raw(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_ingest_scenario_with_dated_filename() {
        let raw = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        write_raw(
            raw.path(),
            "a_20230101.csv",
            "MOSID,NOC 2021,Civilian Title\n00005,1234,Technician\n",
        );

        let records = ingest(raw.path(), out.path()).unwrap();

        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.mosid, "00005");
        assert_eq!(rec.noc_code, "1234");
        assert_eq!(rec.civilian_title, "Technician");
        assert_eq!(rec.source_file, "a_20230101.csv");
        assert_eq!(rec.source_publication_date.as_deref(), Some("2023-01-01"));
        assert!(rec.transcription_date.is_some());
    }

    #[test]
    fn test_duplicates_across_files_last_write_wins() {
        let raw = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        write_raw(raw.path(), "a.csv", "mosid,noc,civilian title\n00005,1234,Old Title\n");
        write_raw(raw.path(), "b.csv", "mosid,noc,civilian title\n00005,1234,New Title\n");

        let records = ingest(raw.path(), out.path()).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].civilian_title, "New Title");
        assert_eq!(records[0].source_file, "b.csv");
    }

    #[test]
    fn test_nested_directories_are_traversed_in_path_order() {
        let raw = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        write_raw(raw.path(), "2021/table.csv", "mosid,noc,noc title\n00005,1234,First\n");
        write_raw(raw.path(), "2023/table.csv", "mosid,noc,noc title\n00005,1234,Second\n");
        write_raw(raw.path(), "notes.txt", "mosid,noc\n99999,0000\n");

        let records = ingest(raw.path(), out.path()).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].civilian_title, "Second");
    }

    #[test]
    fn test_rows_missing_mosid_or_noc_are_dropped() {
        let r1 = row(&[("mosid", "00005"), ("noc title", "Technician")]);
        let r2 = row(&[("noc", "1234"), ("noc title", "Technician")]);
        let r3 = row(&[("mosid", "   "), ("noc", "1234")]);

        assert!(build_record("x.csv", &r1, "2024-01-01").is_none());
        assert!(build_record("x.csv", &r2, "2024-01-01").is_none());
        assert!(build_record("x.csv", &r3, "2024-01-01").is_none());
    }

    #[test]
    fn test_alias_priority_and_fallthrough() {
        // "mosid" is empty, so "mos id" is used; "noc 2021" beats "noc"
        let r = row(&[
            ("mosid", ""),
            ("mos id", " 00008 "),
            ("noc 2021", "40042"),
            ("noc", "9999"),
            ("caf title", "Naval Warfare Officer"),
            ("summary", "Commands ships"),
        ]);

        let rec = build_record("x.csv", &r, "2024-01-01").unwrap();

        assert_eq!(rec.mosid, "00008");
        assert_eq!(rec.noc_code, "40042");
        assert_eq!(rec.caf_title, "Naval Warfare Officer");
        assert_eq!(rec.role_description, "Commands ships");
        assert_eq!(rec.civilian_title, "");
    }

    #[test]
    fn test_whitespace_only_alias_stops_resolution() {
        // "mosid" holds only spaces: present but blank, so "mos id" is never consulted
        let r = row(&[("mosid", "   "), ("mos id", "00008"), ("noc", "40042")]);

        assert_eq!(extract_value(&r, Field::Mosid.aliases()).as_deref(), Some(""));
        assert!(build_record("x.csv", &r, "2024-01-01").is_none());
    }

    #[test]
    fn test_sanitize_noc_code() {
        assert_eq!(sanitize_noc_code("4004-2"), "40042");
        assert_eq!(sanitize_noc_code(" 1234 "), "1234");
        assert_eq!(sanitize_noc_code("A1.2"), "A12");
        assert_eq!(sanitize_noc_code(" -- "), "--");
    }

    #[test]
    fn test_derive_publication_date() {
        assert_eq!(derive_publication_date("a_20230101.csv").as_deref(), Some("2023-01-01"));
        assert_eq!(derive_publication_date("crosswalk_2021_v2.tsv").as_deref(), Some("2021"));
        assert_eq!(
            derive_publication_date("crosswalk_2021_20230315.csv").as_deref(),
            Some("2023-03-15")
        );
        assert_eq!(
            derive_publication_date("crosswalk_20230315_2024.csv").as_deref(),
            Some("2024")
        );
        assert_eq!(derive_publication_date("crosswalk_v12345.csv"), None);
        assert_eq!(derive_publication_date("crosswalk.csv"), None);
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("mosid,noc\n00005,1234\n"), b',');
        assert_eq!(detect_delimiter("mosid\tnoc\tnoc title\n00005\t1234\tTech, senior\n"), b'\t');
        assert_eq!(detect_delimiter("mosid;noc\n00005;1234\n"), b';');
        assert_eq!(detect_delimiter("\"a,b\";c\n\"d,e\";f\n"), b';');
        // Nothing consistent → comma
        assert_eq!(detect_delimiter("just one column\n"), b',');
    }

    #[test]
    fn test_tsv_with_bom_and_messy_headers() {
        let raw = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        write_raw(
            raw.path(),
            "navy.tsv",
            "\u{feff}  MOSID Code \t NOC Code\tCivilian Occupation Title\n00008\t4004-2\tOfficers\n",
        );

        let records = ingest(raw.path(), out.path()).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mosid, "00008");
        assert_eq!(records[0].noc_code, "40042");
        assert_eq!(records[0].civilian_title, "Officers");
        assert_eq!(records[0].source_publication_date, None);
    }

    #[test]
    fn test_output_sorted_and_both_serializations_agree() {
        let raw = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        write_raw(
            raw.path(),
            "crosswalk_2022.csv",
            "mosid,noc,noc title\n00010,2222,B\n00005,3333,C\n00005,1111,A\n,4444,dropped\n",
        );

        let records = ingest(raw.path(), out.path()).unwrap();
        let keys: Vec<_> = records.iter().map(|r| r.key()).collect();
        assert_eq!(
            keys,
            vec![
                ("00005".to_string(), "1111".to_string()),
                ("00005".to_string(), "3333".to_string()),
                ("00010".to_string(), "2222".to_string()),
            ]
        );

        let from_csv = read_records_csv(&out.path().join(OUTPUT_CSV)).unwrap();
        let from_json = read_records_json(&out.path().join(OUTPUT_JSON)).unwrap();
        assert_eq!(from_csv, records);
        assert_eq!(from_json, records);
    }

    #[test]
    fn test_empty_raw_dir_still_writes_headers() {
        let raw = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();

        let records = ingest(raw.path(), out.path()).unwrap();
        assert!(records.is_empty());

        let csv_text = fs::read_to_string(out.path().join(OUTPUT_CSV)).unwrap();
        assert_eq!(csv_text.lines().next(), Some(OUTPUT_FIELDS.join(",").as_str()));
        let json_text = fs::read_to_string(out.path().join(OUTPUT_JSON)).unwrap();
        assert_eq!(json_text, "[]\n");
    }

    #[test]
    fn test_missing_raw_dir_is_an_error() {
        let out = TempDir::new().unwrap();
        let missing = out.path().join("does-not-exist");

        assert!(ingest(&missing, out.path()).is_err());
    }
}
