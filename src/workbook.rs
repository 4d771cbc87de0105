//! JSON workbook format.
//!
//! A workbook holds sheets of column-major cells. Row 0 of every column is
//! its header. Input files use plain JSON scalars for cells; cells written by
//! the engine become `{"value": ..., "status": "complete" | "error"}` so that
//! results and failures stay distinguishable in the output file.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix marking sheets, headers and command rows that must be skipped.
pub const COMMENT_CHAR: char = '#';

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("failed to read workbook '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid workbook '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write workbook '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize workbook: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("illegal character in value for cell {0}")]
    IllegalCharacter(CellRef),

    #[error("cell {0} is outside the workbook")]
    OutOfRange(CellRef),
}

/// Supported and recognized input file types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Text,
    Csv,
    Workbook,
}

impl FileType {
    /// Map a path to a file type by its (case-insensitive) extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "text" => Some(FileType::Text),
            "csv" => Some(FileType::Csv),
            "json" => Some(FileType::Workbook),
            _ => None,
        }
    }

    /// Only workbooks can be completed for now.
    pub fn is_supported(self) -> bool {
        matches!(self, FileType::Workbook)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::Text => write!(f, "Text"),
            FileType::Csv => write!(f, "CSV"),
            FileType::Workbook => write!(f, "Workbook"),
        }
    }
}

/// Marks a cell written by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Complete,
    Error,
}

/// A single cell. Untagged so input files can use bare JSON scalars.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
    Written { value: String, status: CellStatus },
}

impl Cell {
    /// Text content of the cell, if any.
    pub fn text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => Some(s.clone()),
            Cell::Number(n) => Some(n.to_string()),
            Cell::Bool(b) => Some(b.to_string()),
            Cell::Written { value, .. } => Some(value.clone()),
        }
    }

    pub fn status(&self) -> Option<CellStatus> {
        match self {
            Cell::Written { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the text starts with [`COMMENT_CHAR`].
    pub fn is_comment(&self) -> bool {
        self.text()
            .is_some_and(|t| t.trim_start().starts_with(COMMENT_CHAR))
    }
}

/// Position of a cell: sheet index, column index, row index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub sheet: usize,
    pub column: usize,
    pub row: usize,
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[sheet {}, column {}, row {}]", self.sheet, self.column, self.row)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub title: String,
    #[serde(default)]
    pub columns: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn is_comment(&self) -> bool {
        self.title.starts_with(COMMENT_CHAR)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    #[serde(default)]
    pub sheets: Vec<Sheet>,
}

/// Whether `c` cannot be stored in a workbook cell.
fn is_illegal(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{8}' | '\u{b}'..='\u{c}' | '\u{e}'..='\u{1f}')
}

/// Strip characters that cannot be stored in a workbook cell.
pub fn sanitize(value: &str) -> String {
    value.chars().filter(|c| !is_illegal(*c)).collect()
}

impl Workbook {
    pub fn from_json(path: &Path, contents: &str) -> Result<Self, WorkbookError> {
        serde_json::from_str(contents).map_err(|source| WorkbookError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub async fn load(path: &Path) -> Result<Self, WorkbookError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| WorkbookError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(path, &contents)
    }

    /// Write the workbook to `path` through a temporary sibling file and a
    /// rename, so readers never observe a half-written document.
    pub async fn save_atomic(&self, path: &Path) -> Result<(), WorkbookError> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = temp_sibling(path);
        let write_err = |source| WorkbookError::Write {
            path: path.to_path_buf(),
            source,
        };

        tokio::fs::write(&tmp, json).await.map_err(write_err)?;
        if let Err(source) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_err(source));
        }
        Ok(())
    }

    pub fn cell(&self, at: CellRef) -> Option<&Cell> {
        self.sheets.get(at.sheet)?.columns.get(at.column)?.get(at.row)
    }

    /// Store `value` at `at`, growing the column with empty cells if needed.
    ///
    /// Fails without touching the cell if the value holds characters a
    /// workbook cannot store; see [`sanitize`].
    pub fn write(&mut self, at: CellRef, value: &str, status: CellStatus) -> Result<(), WorkbookError> {
        let column = self
            .sheets
            .get_mut(at.sheet)
            .and_then(|s| s.columns.get_mut(at.column))
            .ok_or(WorkbookError::OutOfRange(at))?;

        if value.chars().any(is_illegal) {
            return Err(WorkbookError::IllegalCharacter(at));
        }

        if column.len() <= at.row {
            column.resize(at.row + 1, Cell::Empty);
        }
        column[at.row] = Cell::Written {
            value: value.to_string(),
            status,
        };
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"{
        "sheets": [
            {
                "title": "Chats",
                "columns": [
                    ["commands", "system", "temperature", "user", "complete"],
                    ["first", "Be brief", 0.5, "Hello", null],
                    ["#skipped", null, null, null, null]
                ]
            },
            { "title": "#notes", "columns": [] }
        ]
    }"##;

    fn sample() -> Workbook {
        Workbook::from_json(Path::new("sample.json"), SAMPLE).unwrap()
    }

    fn at(column: usize, row: usize) -> CellRef {
        CellRef { sheet: 0, column, row }
    }

    #[test]
    fn parses_bare_scalars() {
        let wb = sample();
        assert_eq!(wb.sheets.len(), 2);
        assert!(wb.sheets[1].is_comment());
        assert_eq!(wb.cell(at(1, 1)).unwrap().text().as_deref(), Some("Be brief"));
        assert_eq!(wb.cell(at(1, 2)).unwrap().text().as_deref(), Some("0.5"));
        assert_eq!(wb.cell(at(1, 4)), Some(&Cell::Empty));
        assert!(wb.cell(at(2, 0)).unwrap().is_comment());
    }

    #[test]
    fn write_marks_cell() {
        let mut wb = sample();
        wb.write(at(1, 4), "Hi there", CellStatus::Complete).unwrap();
        let cell = wb.cell(at(1, 4)).unwrap();
        assert_eq!(cell.text().as_deref(), Some("Hi there"));
        assert_eq!(cell.status(), Some(CellStatus::Complete));

        let json = serde_json::to_string(&wb).unwrap();
        assert!(json.contains(r#"{"value":"Hi there","status":"complete"}"#));
    }

    #[test]
    fn write_grows_short_columns() {
        let mut wb = sample();
        wb.sheets[0].columns[1].truncate(2);
        wb.write(at(1, 4), "late", CellStatus::Error).unwrap();
        assert_eq!(wb.sheets[0].columns[1].len(), 5);
        assert_eq!(wb.cell(at(1, 3)), Some(&Cell::Empty));
    }

    #[test]
    fn write_rejects_illegal_characters() {
        let mut wb = sample();
        let err = wb.write(at(1, 4), "bad\u{1}value", CellStatus::Complete).unwrap_err();
        assert!(matches!(err, WorkbookError::IllegalCharacter(_)));
        assert_eq!(wb.cell(at(1, 4)), Some(&Cell::Empty));

        wb.write(at(1, 4), &sanitize("bad\u{1}value"), CellStatus::Complete)
            .unwrap();
        assert_eq!(wb.cell(at(1, 4)).unwrap().text().as_deref(), Some("badvalue"));
    }

    #[test]
    fn sanitize_keeps_whitespace() {
        assert_eq!(sanitize("a\tb\nc\r\u{7}d\u{1f}"), "a\tb\nc\rd");
    }

    #[test]
    fn write_out_of_range() {
        let mut wb = sample();
        let err = wb
            .write(CellRef { sheet: 5, column: 0, row: 0 }, "x", CellStatus::Complete)
            .unwrap_err();
        assert!(matches!(err, WorkbookError::OutOfRange(_)));
    }

    #[test]
    fn file_types_from_extension() {
        assert_eq!(FileType::from_path(Path::new("a.json")), Some(FileType::Workbook));
        assert_eq!(FileType::from_path(Path::new("b.JSON")), Some(FileType::Workbook));
        assert_eq!(FileType::from_path(Path::new("c.csv")), Some(FileType::Csv));
        assert_eq!(FileType::from_path(Path::new("d.txt")), Some(FileType::Text));
        assert_eq!(FileType::from_path(Path::new("e.xlsx")), None);
        assert_eq!(FileType::from_path(Path::new("noext")), None);
        assert!(FileType::Workbook.is_supported());
        assert!(!FileType::Csv.is_supported());
    }

    #[tokio::test]
    async fn save_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        std::fs::write(&path, "stale").unwrap();

        let mut wb = sample();
        wb.write(at(1, 4), "done", CellStatus::Complete).unwrap();
        wb.save_atomic(&path).await.unwrap();

        let loaded = Workbook::load(&path).await.unwrap();
        assert_eq!(loaded, wb);
        assert!(!dir.path().join(".out.json.tmp").exists());
    }

    #[tokio::test]
    async fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Workbook::load(&path).await.unwrap_err();
        assert!(matches!(err, WorkbookError::Parse { .. }));
    }
}
