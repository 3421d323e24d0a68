//! Automerge-backed notebook document.
//!
//! Cells are addressed by position. Mutations stay pending until
//! [`NotebookDoc::commit`] closes them into one change or
//! [`NotebookDoc::rollback`] drops them, which is how [`crate::SimNotebook`]
//! makes a multi-step edit atomic.
//!
//! ```text
//! ROOT
//!   notebook_id   Str
//!   cells         List<Map>
//!     id              Str
//!     cell_type       Str   "code" | "markdown" | "raw"
//!     source          Text
//!     execution_count Str   integer or "null"
//!     outputs         List<Str>, one JSON output each
//! ```

use std::path::Path;

use anyhow::Context;
use automerge::transaction::Transactable;
use automerge::{AutoCommit, AutomergeError, ObjId, ObjType, Prop, ReadDoc, ScalarValue, Value};
use inpage::CellType;
use log::info;
use serde::{Deserialize, Serialize};

/// Plain copy of one cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellSnapshot {
    pub id: String,
    pub cell_type: CellType,
    pub source: String,
    pub execution_count: Option<i64>,
    /// JSON-encoded Jupyter outputs
    pub outputs: Vec<String>,
}

pub struct NotebookDoc {
    doc: AutoCommit,
}

impl NotebookDoc {
    pub fn new(notebook_id: &str) -> Self {
        let mut doc = AutoCommit::new();
        let _ = doc.put(automerge::ROOT, "notebook_id", notebook_id);
        let _ = doc.put_object(automerge::ROOT, "cells", ObjType::List);
        let _ = doc.commit();
        Self { doc }
    }

    /// Reopen a document written by [`NotebookDoc::save_to_file`].
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let doc = AutoCommit::load(&bytes)
            .with_context(|| format!("{} is not a notebook document", path.display()))?;
        info!("[notebook-doc] Reopened {:?}", path);
        Ok(Self { doc })
    }

    /// Import a parsed `.ipynb` notebook, outputs and counters included.
    pub fn from_notebook(
        notebook: &nbformat::v4::Notebook,
        notebook_id: &str,
    ) -> Result<Self, AutomergeError> {
        use nbformat::v4::Cell;

        let mut doc = Self::new(notebook_id);
        for (index, cell) in notebook.cells.iter().enumerate() {
            match cell {
                Cell::Code {
                    id,
                    source,
                    execution_count,
                    outputs,
                    ..
                } => {
                    doc.insert_cell(index, &id.to_string(), CellType::Code, &source.join(""))?;
                    doc.set_execution_count(index, execution_count.map(i64::from))?;
                    let outputs: Vec<String> = outputs
                        .iter()
                        .filter_map(|output| serde_json::to_string(output).ok())
                        .collect();
                    doc.set_outputs(index, &outputs)?;
                }
                Cell::Markdown { id, source, .. } => {
                    doc.insert_cell(index, &id.to_string(), CellType::Markdown, &source.join(""))?;
                }
                Cell::Raw { id, source, .. } => {
                    doc.insert_cell(index, &id.to_string(), CellType::Raw, &source.join(""))?;
                }
            }
        }
        doc.commit();
        Ok(doc)
    }

    /// Read and import an `.ipynb` file. The file stem becomes the notebook id.
    pub fn load_ipynb(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let notebook = match nbformat::parse_notebook(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?
        {
            nbformat::Notebook::V4(nb) => nb,
            nbformat::Notebook::Legacy(legacy) => nbformat::upgrade_legacy_notebook(legacy)?,
        };
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "notebook".to_string());
        Ok(Self::from_notebook(&notebook, &id)?)
    }

    pub fn save_to_file(&mut self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.doc.save())
    }

    pub fn commit(&mut self) {
        let _ = self.doc.commit();
    }

    /// Drop every edit since the last commit.
    pub fn rollback(&mut self) {
        self.doc.rollback();
    }

    pub fn cell_count(&self) -> usize {
        self.cells().map_or(0, |cells| self.doc.length(&cells))
    }

    pub fn get_cells(&self) -> Vec<CellSnapshot> {
        (0..self.cell_count())
            .filter_map(|i| self.get_cell(i))
            .collect()
    }

    pub fn get_cell(&self, index: usize) -> Option<CellSnapshot> {
        let cell = self.cell(index)?;
        let outputs = self.child(&cell, "outputs", ObjType::List).map_or_else(Vec::new, |list| {
            (0..self.doc.length(&list))
                .filter_map(|i| self.scalar(&list, i))
                .collect()
        });
        Some(CellSnapshot {
            id: self.scalar(&cell, "id")?,
            cell_type: self.scalar(&cell, "cell_type")?.parse().ok()?,
            source: self
                .child(&cell, "source", ObjType::Text)
                .and_then(|text| self.doc.text(&text).ok())
                .unwrap_or_default(),
            execution_count: self
                .scalar(&cell, "execution_count")
                .and_then(|count| count.parse().ok()),
            outputs,
        })
    }

    pub fn find_cell_index(&self, cell_id: &str) -> Option<usize> {
        (0..self.cell_count()).find(|&i| {
            self.cell(i)
                .and_then(|cell| self.scalar(&cell, "id"))
                .is_some_and(|id| id == cell_id)
        })
    }

    /// Insert a cell at `index`; past the end it is appended.
    pub fn insert_cell(
        &mut self,
        index: usize,
        cell_id: &str,
        cell_type: CellType,
        source: &str,
    ) -> Result<(), AutomergeError> {
        let cells = self
            .cells()
            .ok_or_else(|| AutomergeError::InvalidObjId("cells".into()))?;
        let index = index.min(self.doc.length(&cells));

        let cell = self.doc.insert_object(&cells, index, ObjType::Map)?;
        self.doc.put(&cell, "id", cell_id)?;
        self.doc.put(&cell, "cell_type", cell_type.as_str())?;
        let text = self.doc.put_object(&cell, "source", ObjType::Text)?;
        self.doc.splice_text(&text, 0, 0, source)?;
        self.doc.put(&cell, "execution_count", "null")?;
        self.doc.put_object(&cell, "outputs", ObjType::List)?;
        Ok(())
    }

    /// `false` when `index` is out of range.
    pub fn delete_cell(&mut self, index: usize) -> Result<bool, AutomergeError> {
        match self.cells() {
            Some(cells) if index < self.doc.length(&cells) => {
                self.doc.delete(&cells, index)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn set_outputs(&mut self, index: usize, outputs: &[String]) -> Result<bool, AutomergeError> {
        let Some(cell) = self.cell(index) else {
            return Ok(false);
        };
        let list = self.doc.put_object(&cell, "outputs", ObjType::List)?;
        for (i, output) in outputs.iter().enumerate() {
            self.doc.insert(&list, i, output.as_str())?;
        }
        Ok(true)
    }

    /// Swap one output in place, as a display update does.
    pub fn replace_output(
        &mut self,
        index: usize,
        position: usize,
        output: &str,
    ) -> Result<bool, AutomergeError> {
        let list = self
            .cell(index)
            .and_then(|cell| self.child(&cell, "outputs", ObjType::List));
        match list {
            Some(list) if position < self.doc.length(&list) => {
                self.doc.put(&list, position, output)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn clear_outputs(&mut self, index: usize) -> Result<bool, AutomergeError> {
        self.set_outputs(index, &[])
    }

    pub fn set_execution_count(
        &mut self,
        index: usize,
        count: Option<i64>,
    ) -> Result<bool, AutomergeError> {
        let Some(cell) = self.cell(index) else {
            return Ok(false);
        };
        let encoded = count.map_or_else(|| "null".to_string(), |n| n.to_string());
        self.doc.put(&cell, "execution_count", encoded)?;
        Ok(true)
    }

    pub fn execution_count(&self, index: usize) -> Option<i64> {
        let cell = self.cell(index)?;
        self.scalar(&cell, "execution_count")?.parse().ok()
    }

    fn cells(&self) -> Option<ObjId> {
        self.child(&automerge::ROOT, "cells", ObjType::List)
    }

    fn cell(&self, index: usize) -> Option<ObjId> {
        self.child(&self.cells()?, index, ObjType::Map)
    }

    /// Child object of `parent` at `prop`, if it has the expected type.
    fn child(&self, parent: &ObjId, prop: impl Into<Prop>, expected: ObjType) -> Option<ObjId> {
        match self.doc.get(parent, prop).ok()?? {
            (Value::Object(ty), id) if ty == expected => Some(id),
            _ => None,
        }
    }

    fn scalar(&self, parent: &ObjId, prop: impl Into<Prop>) -> Option<String> {
        match self.doc.get(parent, prop).ok()?? {
            (Value::Scalar(value), _) => match value.as_ref() {
                ScalarValue::Str(s) => Some(s.to_string()),
                _ => None,
            },
            _ => None,
        }
    }
}
