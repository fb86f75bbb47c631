//! Identity roster files for `import-identities`.
//!
//! A roster is either a CSV export with a `name,universitas,kategori` header
//! (or `label,affiliation,category`) or a JSON array of the same records.

use crate::store::IdentityRecord;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("cannot read roster {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid CSV roster: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid JSON roster: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read `path` as CSV when its extension is `.csv`, as JSON otherwise.
pub fn read_roster(path: &Path) -> Result<Vec<IdentityRecord>, RosterError> {
    let io = |source| RosterError::Io {
        path: path.display().to_string(),
        source,
    };
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        let file = std::fs::File::open(path).map_err(io)?;
        parse_csv(file)
    } else {
        let raw = std::fs::read_to_string(path).map_err(io)?;
        parse_json(&raw)
    }
}

pub fn parse_csv(reader: impl Read) -> Result<Vec<IdentityRecord>, RosterError> {
    let mut rows = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let records = rows
        .deserialize::<IdentityRecord>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

pub fn parse_json(raw: &str) -> Result<Vec<IdentityRecord>, RosterError> {
    Ok(serde_json::from_str(raw)?)
}
