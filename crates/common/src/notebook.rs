//! Notebook documents (nbformat v4 JSON)
//!
//! Only the parts the harness needs are typed: the ordered cell list, each
//! cell's type tag and its source text. Everything else (metadata, outputs,
//! attachments, ids) is carried as raw JSON so a read/write cycle leaves it
//! untouched, key order included.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};

/// Cell type tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellType {
    Code,
    Markdown,
    Raw,
    Other(String),
}

impl CellType {
    fn parse(tag: &str) -> Self {
        match tag {
            "code" => CellType::Code,
            "markdown" => CellType::Markdown,
            "raw" => CellType::Raw,
            other => CellType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CellType::Code => "code",
            CellType::Markdown => "markdown",
            CellType::Raw => "raw",
            CellType::Other(tag) => tag,
        }
    }
}

/// One notebook cell, stored as its raw JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cell {
    raw: Map<String, Value>,
}

impl Cell {
    /// Build a fresh cell with nbformat's minimal keys.
    pub fn new(cell_type: CellType, source: &str) -> Self {
        let mut raw = Map::new();
        raw.insert("cell_type".into(), Value::String(cell_type.as_str().to_string()));
        if cell_type == CellType::Code {
            raw.insert("execution_count".into(), Value::Null);
        }
        raw.insert("metadata".into(), Value::Object(Map::new()));
        if cell_type == CellType::Code {
            raw.insert("outputs".into(), Value::Array(Vec::new()));
        }
        raw.insert("source".into(), Value::String(source.to_string()));
        Self { raw }
    }

    pub fn code(source: &str) -> Self {
        Self::new(CellType::Code, source)
    }

    pub fn markdown(source: &str) -> Self {
        Self::new(CellType::Markdown, source)
    }

    pub fn cell_type(&self) -> CellType {
        CellType::parse(self.raw.get("cell_type").and_then(Value::as_str).unwrap_or_default())
    }

    pub fn is_code(&self) -> bool {
        self.cell_type() == CellType::Code
    }

    /// Source text; list-of-lines sources are concatenated.
    pub fn source(&self) -> String {
        match self.raw.get("source") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(lines)) => lines.iter().filter_map(Value::as_str).collect(),
            _ => String::new(),
        }
    }

    /// Replace the source text, keeping the shape (string or list of lines)
    /// the cell was stored with.
    pub fn set_source(&mut self, text: &str) {
        let as_lines = matches!(self.raw.get("source"), Some(Value::Array(_)));
        let value = if as_lines {
            Value::Array(
                text.split_inclusive('\n')
                    .map(|line| Value::String(line.to_string()))
                    .collect(),
            )
        } else {
            Value::String(text.to_string())
        };
        self.raw.insert("source".into(), value);
    }

    /// Outputs recorded by the last execution (code cells only).
    pub fn outputs(&self) -> &[Value] {
        self.raw
            .get("outputs")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Raw JSON field access for anything the typed API does not cover.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }
}

/// A notebook document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,

    /// `metadata`, `nbformat`, `nbformat_minor` and any other top-level key
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Notebook {
    /// An empty v4.5 notebook.
    pub fn new(cells: Vec<Cell>) -> Self {
        let mut extra = Map::new();
        extra.insert("metadata".into(), Value::Object(Map::new()));
        extra.insert("nbformat".into(), Value::from(4));
        extra.insert("nbformat_minor".into(), Value::from(5));
        Self { cells, extra }
    }

    /// Parse a notebook from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        Self::parse(json, "<memory>")
    }

    /// Read a notebook from disk
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let notebook = Self::parse(&content, &path.display().to_string())?;
        debug!("Read notebook {} ({} cells)", path.display(), notebook.cells.len());
        Ok(notebook)
    }

    fn parse(json: &str, origin: &str) -> Result<Self> {
        let notebook: Self = serde_json::from_str(json).map_err(|e| Error::InvalidNotebook {
            path: origin.to_string(),
            reason: e.to_string(),
        })?;

        for (index, cell) in notebook.cells.iter().enumerate() {
            if cell.field("cell_type").and_then(Value::as_str).is_none() {
                return Err(Error::InvalidNotebook {
                    path: origin.to_string(),
                    reason: format!("cell {} has no cell_type", index),
                });
            }
        }

        Ok(notebook)
    }

    /// Serialize in the on-disk style: one-space indent, trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut serializer)?;
        buf.push(b'\n');
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Write the notebook to disk, replacing any existing file
    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        debug!("Wrote notebook {} ({} cells)", path.display(), self.cells.len());
        Ok(())
    }

    /// Code cells in document order
    pub fn code_cells_mut(&mut self) -> impl Iterator<Item = &mut Cell> {
        self.cells.iter_mut().filter(|c| c.is_code())
    }

    pub fn code_cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter().filter(|c| c.is_code())
    }
}
