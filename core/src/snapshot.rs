//! Table snapshot: a content fingerprint of the derived table.
//!
//! Taken after every successful build. Two runs over unchanged sources
//! must produce equal snapshots.

use crate::{model::DatamodelRow, types::RunId};
use serde::{Deserialize, Serialize};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub run_id:    RunId,
    pub table:     String,
    pub row_count: u64,
    /// Order-independent digest of the canonical row text.
    pub checksum:  String,
}

impl TableSnapshot {
    pub fn of_rows(run_id: &str, table: &str, rows: &[DatamodelRow]) -> Self {
        Self {
            run_id:    run_id.to_string(),
            table:     table.to_string(),
            row_count: rows.len() as u64,
            checksum:  format!("{:016x}", content_digest(rows)),
        }
    }

    /// Same table content, regardless of which run produced it.
    pub fn same_content(&self, other: &TableSnapshot) -> bool {
        self.row_count == other.row_count && self.checksum == other.checksum
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |h, b| (h ^ *b as u64).wrapping_mul(FNV_PRIME))
}

/// Sum of per-row hashes, so storage order does not matter but duplicate
/// rows still count.
fn content_digest(rows: &[DatamodelRow]) -> u64 {
    rows.iter()
        .map(|r| fnv1a(r.canonical().as_bytes()))
        .fold(0u64, |acc, h| acc.wrapping_add(h))
}
