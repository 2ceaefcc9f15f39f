// 🎖️ Crosswalk data model
// Shapes shared by the canonical input documents and the query results

use crate::error::{CrosswalkError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// OCCUPATION CODES
// ============================================================================

/// A military occupation (MOSID) as stored: unique by (code, title).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupationCode {
    pub code: String,
    pub title: String,
}

impl OccupationCode {
    /// Parse a `"<code>: <title>"` label, splitting on the FIRST `": "`.
    ///
    /// ```
    /// use caf_crosswalk::OccupationCode;
    ///
    /// let occ = OccupationCode::parse_key("00005: Infantry Officer").unwrap();
    /// assert_eq!(occ.code, "00005");
    /// assert_eq!(occ.title, "Infantry Officer");
    /// ```
    pub fn parse_key(key: &str) -> Result<Self> {
        let (code, title) = key
            .split_once(": ")
            .ok_or_else(|| CrosswalkError::MalformedKey {
                key: key.to_string(),
            })?;

        Ok(OccupationCode {
            code: code.to_string(),
            title: title.to_string(),
        })
    }

    /// Inverse of `parse_key`
    pub fn key(&self) -> String {
        format!("{}: {}", self.code, self.title)
    }
}

/// One civilian NOC match for a MOSID, with its task statements in stored order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NocEquivalency {
    pub noc_code: String,
    pub civilian_title: String,
    #[serde(default)]
    pub task_statements: Vec<String>,
}

/// The scraped crosswalk document: `"<code>: <title>"` → equivalencies.
///
/// BTreeMap keeps population order deterministic regardless of the
/// document's key order.
pub type CrosswalkData = BTreeMap<String, Vec<NocEquivalency>>;

/// Result of a single MOSID lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupationData {
    pub mosid: String,
    pub title: String,
    pub equivalencies: Vec<NocEquivalency>,
}

// ============================================================================
// RANKS
// ============================================================================

/// A rank with its responsibilities. Used both as an entry of the rank
/// document and as the result of a rank lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    pub rank: String,
    #[serde(default)]
    pub responsibilities: Vec<String>,
}
