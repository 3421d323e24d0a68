//! Trait seams into the host notebook application.
//!
//! The agent never owns any of these objects. Everything it needs is
//! borrowed through [`Host`], and the active notebook is re-read at the start
//! of every agent call because focus can move between awaits.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::HostError;

/// Future returned by asynchronous host calls.
pub type HostFuture<'a, T> = BoxFuture<'a, Result<T, HostError>>;

/// Service object provided by an activated plugin.
pub type Service = Arc<dyn Any + Send + Sync>;

/// Handle to a DOM element owned by the host.
pub type ElementRef = Arc<dyn DomElement>;

/// Command ids dispatched through [`CommandRegistry::execute`].
pub mod commands {
    pub const INSERT_CELL_BELOW: &str = "notebook:insert-cell-below";
    pub const RUN_CELL: &str = "notebook:run-cell";
    pub const DELETE_CELL: &str = "notebook:delete-cell";
    pub const DESELECT_ALL: &str = "notebook:deselect-all";
    pub const CHANGE_THEME: &str = "apputils:change-theme";
    pub const SAVE: &str = "docmanager:save";
}

/// Notebook cell kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Code,
    Markdown,
    Raw,
}

impl CellType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellType::Code => "code",
            CellType::Markdown => "markdown",
            CellType::Raw => "raw",
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CellType {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(CellType::Code),
            "markdown" => Ok(CellType::Markdown),
            "raw" => Ok(CellType::Raw),
            other => Err(HostError::Document(format!("unknown cell type: {other}"))),
        }
    }
}

/// Content of a cell to be inserted into the shared document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCell {
    pub cell_type: CellType,
    pub source: String,
}

impl NewCell {
    pub fn new(cell_type: CellType, source: impl Into<String>) -> Self {
        Self {
            cell_type,
            source: source.into(),
        }
    }
}

/// Registry lookup result for a plugin.
#[derive(Clone)]
pub struct PluginEntry {
    pub activated: bool,
    pub service: Option<Service>,
}

/// Where to align an item when scrolling it into view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAlign {
    Start,
    End,
}

/// Layout box of an element, in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

pub trait PluginRegistry: Send + Sync {
    fn has_plugin(&self, id: &str) -> bool;

    fn plugin(&self, id: &str) -> Option<PluginEntry>;

    /// Activate a registered plugin. Resolves once activation settles.
    fn activate_plugin(&self, id: &str) -> HostFuture<'_, ()>;
}

pub trait CommandRegistry: Send + Sync {
    fn execute(&self, command: &str, args: Option<serde_json::Value>)
        -> HostFuture<'_, serde_json::Value>;
}

/// Edits applied inside a [`SharedNotebook::transact`] call.
pub trait NotebookEdit {
    fn insert_cell(&mut self, index: usize, cell: NewCell) -> Result<(), HostError>;

    fn delete_cell(&mut self, index: usize) -> Result<(), HostError>;
}

/// The collaborative, transactable backing store of a notebook.
pub trait SharedNotebook: Send + Sync {
    fn cell_count(&self) -> usize;

    fn cell_type(&self, index: usize) -> Option<CellType>;

    fn cell_source(&self, index: usize) -> Option<String>;

    fn execution_count(&self, index: usize) -> Option<i64>;

    fn set_execution_count(&self, index: usize, count: Option<i64>) -> Result<(), HostError>;

    /// Apply every edit made by `edit` as one atomic change. Readers never
    /// observe a state between two edits of the same transaction.
    fn transact(
        &self,
        edit: &mut dyn FnMut(&mut dyn NotebookEdit) -> Result<(), HostError>,
    ) -> Result<(), HostError>;
}

/// A rendered cell widget.
pub trait CellView: Send + Sync {
    fn cell_type(&self) -> CellType;

    fn source(&self) -> String;

    fn execution_count(&self) -> Option<i64>;

    fn output_count(&self) -> usize;

    fn node(&self) -> ElementRef;

    /// Whether the cell is currently scrolled into the notebook viewport.
    fn in_viewport(&self) -> bool;

    /// Resolves once the cell content is ready.
    fn ready(&self) -> HostFuture<'_, ()>;

    /// Markdown cells only: whether the rendered view is shown.
    fn is_rendered(&self) -> bool;

    /// One-shot notification fired on the next rendered-state change.
    /// Dropping the future unsubscribes.
    fn rendered_changed(&self) -> BoxFuture<'static, ()>;
}

/// The active notebook widget.
pub trait NotebookPanel: Send + Sync {
    fn model(&self) -> &dyn SharedNotebook;

    fn active_cell_index(&self) -> usize;

    fn set_active_cell_index(&self, index: usize);

    fn is_selected(&self, index: usize) -> bool;

    fn select(&self, index: usize);

    fn deselect_all(&self);

    fn cell(&self, index: usize) -> Option<Arc<dyn CellView>>;

    fn widget_count(&self) -> usize;

    fn scroll_to_item(&self, index: usize, align: ScrollAlign) -> HostFuture<'_, ()>;

    fn toolbar_names(&self) -> Vec<String>;

    fn toolbar_item(&self, name: &str) -> Option<ElementRef>;
}

pub trait DomElement: Send + Sync {
    fn tag_name(&self) -> String;

    fn text_content(&self) -> String;

    fn attribute(&self, name: &str) -> Option<String>;

    fn bounding_box(&self) -> Rect;

    fn client_rect_count(&self) -> usize;

    /// Lets a [`Dom`] recover its own element type from an [`ElementRef`].
    fn as_any(&self) -> &dyn Any;
}

pub trait Dom: Send + Sync {
    fn body(&self) -> ElementRef;

    /// First element under `root` (whole document if `None`) matching a CSS selector.
    /// A selector that does not parse is an [`HostError::InvalidQuery`].
    fn query_selector(
        &self,
        root: Option<&ElementRef>,
        selector: &str,
    ) -> Result<Option<ElementRef>, HostError>;

    /// First element under `root` (whole document if `None`) matching an XPath expression.
    fn query_xpath(
        &self,
        root: Option<&ElementRef>,
        xpath: &str,
    ) -> Result<Option<ElementRef>, HostError>;
}

/// Handle to the host application.
pub trait Host: Send + Sync {
    fn plugins(&self) -> &dyn PluginRegistry;

    fn commands(&self) -> &dyn CommandRegistry;

    fn dom(&self) -> &dyn Dom;

    fn active_notebook(&self) -> Option<Arc<dyn NotebookPanel>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_type_round_trips_through_str() {
        for ty in [CellType::Code, CellType::Markdown, CellType::Raw] {
            assert_eq!(ty.as_str().parse::<CellType>().unwrap(), ty);
        }
        assert!("heading".parse::<CellType>().is_err());
    }

    #[test]
    fn test_cell_type_serialization() {
        assert_eq!(serde_json::to_string(&CellType::Markdown).unwrap(), "\"markdown\"");
        let ty: CellType = serde_json::from_str("\"raw\"").unwrap();
        assert_eq!(ty, CellType::Raw);
    }
}
