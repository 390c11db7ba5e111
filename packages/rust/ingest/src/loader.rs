//! Reading model exports from a directory of CSV files.

use std::fs;
use std::path::{Path, PathBuf};

use modeldoc_shared::{ModelData, ModelDocError, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::fields::RawRow;
use crate::normalize::{IngestStats, RawModel, normalize};

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Which export a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Measures,
    Tables,
    Columns,
    Relationships,
}

impl InputKind {
    pub const ALL: [InputKind; 4] = [
        Self::Measures,
        Self::Tables,
        Self::Columns,
        Self::Relationships,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Measures => "measures",
            Self::Tables => "tables",
            Self::Columns => "columns",
            Self::Relationships => "relationships",
        }
    }

    /// Classify a file name. The most specific word wins, so
    /// `TableColumns.csv` is a column export and `TableRelationships.csv`
    /// a relationship export.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if !lower.ends_with(".csv") {
            return None;
        }
        if lower.contains("relationship") {
            Some(Self::Relationships)
        } else if lower.contains("column") {
            Some(Self::Columns)
        } else if lower.contains("measure") {
            Some(Self::Measures)
        } else if lower.contains("table") {
            Some(Self::Tables)
        } else {
            None
        }
    }
}

/// The export files found in an input directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputFiles {
    pub measures: Option<PathBuf>,
    pub tables: Option<PathBuf>,
    pub columns: Option<PathBuf>,
    pub relationships: Option<PathBuf>,
}

impl InputFiles {
    pub fn get(&self, kind: InputKind) -> Option<&Path> {
        match kind {
            InputKind::Measures => self.measures.as_deref(),
            InputKind::Tables => self.tables.as_deref(),
            InputKind::Columns => self.columns.as_deref(),
            InputKind::Relationships => self.relationships.as_deref(),
        }
    }

    fn slot(&mut self, kind: InputKind) -> &mut Option<PathBuf> {
        match kind {
            InputKind::Measures => &mut self.measures,
            InputKind::Tables => &mut self.tables,
            InputKind::Columns => &mut self.columns,
            InputKind::Relationships => &mut self.relationships,
        }
    }

    pub fn is_empty(&self) -> bool {
        InputKind::ALL.iter().all(|k| self.get(*k).is_none())
    }
}

/// Find the export files in `dir` by case-insensitive file name. When two
/// files claim the same export, the first in name order wins.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn discover_inputs(dir: &Path) -> Result<InputFiles> {
    let entries = fs::read_dir(dir).map_err(|e| ModelDocError::io(dir, e))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut files = InputFiles::default();
    for path in paths {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(kind) = InputKind::from_file_name(name) else {
            continue;
        };
        let slot = files.slot(kind);
        match slot {
            Some(existing) => {
                warn!(
                    kind = kind.as_str(),
                    kept = %existing.display(),
                    ignored = %path.display(),
                    "multiple files for one export; ignoring later file"
                );
            }
            None => {
                debug!(kind = kind.as_str(), path = %path.display(), "found export");
                *slot = Some(path);
            }
        }
    }

    if files.is_empty() {
        warn!("no measure, table, column or relationship CSV files found");
    }
    Ok(files)
}

// ---------------------------------------------------------------------------
// CSV reading
// ---------------------------------------------------------------------------

/// Pick the delimiter that appears most in the header line.
fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let header = bytes.split(|b| *b == b'\n').next().unwrap_or(&[]);
    [b',', b';', b'\t']
        .into_iter()
        .max_by_key(|d| header.iter().filter(|b| *b == d).count())
        .filter(|d| header.contains(d))
        .unwrap_or(b',')
}

/// Parse CSV bytes into header-keyed rows. Ragged rows are tolerated, a
/// leading byte-order mark is dropped, invalid UTF-8 is replaced, and rows
/// with no content are skipped.
pub fn parse_csv(bytes: &[u8]) -> std::result::Result<Vec<RawRow>, csv::Error> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(bytes))
        .flexible(true)
        .has_headers(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .byte_headers()?
        .iter()
        .map(|h| String::from_utf8_lossy(h).trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record?;
        if record.iter().all(|field| field.iter().all(u8::is_ascii_whitespace)) {
            continue;
        }
        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .filter(|(header, _)| !header.is_empty())
            .map(|(header, value)| (header.clone(), String::from_utf8_lossy(value).into_owned()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Everything read from an input directory.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub model: ModelData,
    pub stats: IngestStats,
    pub files: InputFiles,
    /// SHA-256 over the kinds, names and bytes of the files read.
    pub fingerprint: String,
}

/// Read the discovered files into raw rows and fingerprint them.
pub fn read_inputs(files: &InputFiles) -> Result<(RawModel, String)> {
    let mut raw = RawModel::default();
    let mut hasher = Sha256::new();

    for kind in InputKind::ALL {
        let Some(path) = files.get(kind) else {
            continue;
        };
        let bytes = fs::read(path).map_err(|e| ModelDocError::io(path, e))?;
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(name.as_bytes());
        hasher.update(&bytes);

        let rows = parse_csv(&bytes)
            .map_err(|e| ModelDocError::parse(format!("{}: {e}", path.display())))?;
        debug!(kind = kind.as_str(), rows = rows.len(), "read export");

        match kind {
            InputKind::Measures => raw.measures = rows,
            InputKind::Tables => raw.tables = rows,
            InputKind::Columns => raw.columns = rows,
            InputKind::Relationships => raw.relationships = rows,
        }
    }

    Ok((raw, format!("{:x}", hasher.finalize())))
}

/// Discover, read and normalize the exports in `dir`.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn load_model(dir: &Path, fact_row_threshold: u64) -> Result<LoadedModel> {
    let files = discover_inputs(dir)?;
    for kind in InputKind::ALL {
        if files.get(kind).is_none() {
            warn!(kind = kind.as_str(), "export not found; continuing without it");
        }
    }

    let (raw, fingerprint) = read_inputs(&files)?;
    let (model, stats) = normalize(&raw, fact_row_threshold);

    let counts = model.counts();
    info!(
        measures = counts.measures,
        tables = counts.tables,
        columns = counts.columns,
        relationships = counts.relationships,
        skipped = stats.total_skipped(),
        "model loaded"
    );

    Ok(LoadedModel {
        model,
        stats,
        files,
        fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).expect("write fixture");
    }

    #[test]
    fn classifies_file_names_by_specificity() {
        assert_eq!(InputKind::from_file_name("Measures.csv"), Some(InputKind::Measures));
        assert_eq!(InputKind::from_file_name("TableColumns.CSV"), Some(InputKind::Columns));
        assert_eq!(
            InputKind::from_file_name("model_table_relationships.csv"),
            Some(InputKind::Relationships)
        );
        assert_eq!(InputKind::from_file_name("tables.csv"), Some(InputKind::Tables));
        assert_eq!(InputKind::from_file_name("measures.txt"), None);
        assert_eq!(InputKind::from_file_name("notes.csv"), None);
    }

    #[test]
    fn parses_bom_ragged_rows_and_semicolons() {
        let rows = parse_csv(b"\xEF\xBB\xBFName;Expression\nA;SUM(x[y])\nB\n;\n").expect("parse");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Name").map(String::as_str), Some("A"));
        assert_eq!(rows[0].get("Expression").map(String::as_str), Some("SUM(x[y])"));
        assert_eq!(rows[1].get("Expression"), None);
    }

    #[test]
    fn keeps_quoted_commas_in_formulas() {
        let rows = parse_csv(b"Name,Expression\n\"Ratio\",\"DIVIDE([A], [B])\"\n").expect("parse");
        assert_eq!(rows[0].get("Expression").map(String::as_str), Some("DIVIDE([A], [B])"));
    }

    #[test]
    fn loads_a_directory() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "Measures.csv", "Name,Expression\nTotal Sales,SUM(Sales[Amount])\n");
        write(dir.path(), "Tables.csv", "Name,RowCount\nSales,50000\nCustomer,1200\n");
        write(
            dir.path(),
            "Relationships.csv",
            "Relationship\n'Sales'[CustomerID] *-1 'Customer'[ID]\n",
        );
        write(dir.path(), "readme.txt", "ignored");

        let loaded = load_model(dir.path(), 10_000).expect("load");
        assert_eq!(loaded.model.measures.len(), 1);
        assert_eq!(loaded.model.tables.len(), 2);
        assert!(loaded.model.columns.is_empty());
        assert_eq!(loaded.model.relationships.len(), 1);
        assert_eq!(loaded.fingerprint.len(), 64);
        assert!(loaded.files.columns.is_none());

        let again = load_model(dir.path(), 10_000).expect("reload");
        assert_eq!(again.fingerprint, loaded.fingerprint);
    }

    #[test]
    fn empty_directory_yields_an_empty_model() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "notes.txt", "nothing to read");

        let loaded = load_model(dir.path(), 10_000).expect("load");
        assert!(loaded.files.is_empty());
        let counts = loaded.model.counts();
        assert_eq!(counts.measures, 0);
        assert_eq!(counts.tables, 0);
        assert_eq!(counts.columns, 0);
        assert_eq!(counts.relationships, 0);
        assert_eq!(loaded.stats.total_skipped(), 0);
    }

    #[test]
    fn fingerprint_covers_file_names() {
        let first = TempDir::new().expect("tempdir");
        let second = TempDir::new().expect("tempdir");
        let contents = "Name,Expression\nTotal Sales,SUM(Sales[Amount])\n";
        write(first.path(), "Measures.csv", contents);
        write(second.path(), "model_measures.csv", contents);

        let a = load_model(first.path(), 10_000).expect("load");
        let b = load_model(second.path(), 10_000).expect("load");
        assert_eq!(a.model, b.model);
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let err = discover_inputs(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, ModelDocError::Io { .. }));
    }
}
