//! Simulated notebook panel.
//!
//! The Automerge [`NotebookDoc`] is the source of truth. Cell views are
//! keyed by cell id and re-synced after every document change, so a cell
//! keeps its view (and DOM node) across inserts and deletes around it.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use automerge::AutomergeError;
use futures::future::BoxFuture;
use inpage::host::{
    CellView, ElementRef, HostFuture, NewCell, NotebookEdit, NotebookPanel, Rect, ScrollAlign,
    SharedNotebook,
};
use inpage::{CellType, HostError};
use log::{debug, warn};
use serde_json::Value;
use tokio::sync::watch;

use crate::dom::SimElement;
use crate::notebook_doc::NotebookDoc;

/// Mime type of a widget view output.
pub const WIDGET_VIEW_MIME: &str = "application/vnd.jupyter.widget-view+json";

/// Height of one laid-out cell, in pixels.
const CELL_HEIGHT: f64 = 100.0;

/// Items of a fresh notebook toolbar, in order.
pub const DEFAULT_TOOLBAR: &[&str] = &[
    "save",
    "insert",
    "cut",
    "copy",
    "paste",
    "run",
    "interrupt",
    "restart",
    "restart-and-run",
    "cellType",
    "spacer",
    "kernelName",
    "kernelStatus",
];

type SharedDoc = Arc<Mutex<NotebookDoc>>;

fn lock(doc: &SharedDoc) -> MutexGuard<'_, NotebookDoc> {
    doc.lock().unwrap_or_else(|e| e.into_inner())
}

fn doc_error(e: AutomergeError) -> HostError {
    HostError::Document(e.to_string())
}

/// Visible text of one JSON-encoded output.
pub fn output_text(output: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(output) else {
        return String::new();
    };
    match value["output_type"].as_str() {
        Some("stream") => multiline(&value["text"]),
        Some("error") => format!(
            "{}: {}",
            value["ename"].as_str().unwrap_or_default(),
            value["evalue"].as_str().unwrap_or_default()
        ),
        _ => {
            let data = &value["data"];
            if data.get(WIDGET_VIEW_MIME).is_some() {
                inpage::WIDGET_PLACEHOLDER.to_string()
            } else {
                multiline(&data["text/plain"])
            }
        }
    }
}

/// nbformat text fields are either a string or a list of lines.
fn multiline(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(lines) => lines.iter().filter_map(Value::as_str).collect(),
        _ => String::new(),
    }
}

/// View of one cell.
pub struct SimCellView {
    cell_id: String,
    cell_type: CellType,
    doc: SharedDoc,
    node: Arc<SimElement>,
    prompt: Arc<SimElement>,
    input: Arc<SimElement>,
    output_area: Arc<SimElement>,
    selected: AtomicBool,
    in_viewport: AtomicBool,
    rendered: watch::Sender<bool>,
}

impl SimCellView {
    fn new(cell_id: String, cell_type: CellType, doc: SharedDoc, rendered: bool) -> Arc<Self> {
        let kind = match cell_type {
            CellType::Code => "jp-CodeCell",
            CellType::Markdown => "jp-MarkdownCell",
            CellType::Raw => "jp-RawCell",
        };
        let node = SimElement::with_classes("div", &["jp-Cell", kind]);
        node.set_attribute("data-cell-id", &cell_id);
        let prompt = SimElement::with_classes("div", &["jp-InputPrompt"]);
        let input = SimElement::with_classes("div", &["jp-Cell-inputArea"]);
        let output_area = SimElement::with_classes("div", &["jp-Cell-outputArea"]);
        node.append_child(prompt.clone());
        node.append_child(input.clone());
        node.append_child(output_area.clone());

        let (rendered_tx, _) = watch::channel(rendered);
        let view = Arc::new(Self {
            cell_id,
            cell_type,
            doc,
            node,
            prompt,
            input,
            output_area,
            selected: AtomicBool::new(false),
            in_viewport: AtomicBool::new(true),
            rendered: rendered_tx,
        });
        view.node
            .toggle_class("jp-mod-rendered", cell_type == CellType::Markdown && rendered);
        view
    }

    pub fn cell_id(&self) -> &str {
        &self.cell_id
    }

    pub fn element(&self) -> &Arc<SimElement> {
        &self.node
    }

    fn index(&self) -> Option<usize> {
        lock(&self.doc).find_cell_index(&self.cell_id)
    }

    /// Apply `edit` to this cell's entry in the document, commit, and
    /// re-render. Returns `false` once the cell is gone.
    pub fn edit<F>(&self, edit: F) -> bool
    where
        F: FnOnce(&mut NotebookDoc, usize) -> Result<bool, AutomergeError>,
    {
        let applied = {
            let mut doc = lock(&self.doc);
            let Some(index) = doc.find_cell_index(&self.cell_id) else {
                return false;
            };
            match edit(&mut *doc, index) {
                Ok(applied) => {
                    doc.commit();
                    applied
                }
                Err(e) => {
                    warn!("[notebook] Edit of cell {} failed: {}", self.cell_id, e);
                    doc.rollback();
                    false
                }
            }
        };
        self.refresh();
        applied
    }

    /// Bring the DOM in line with the document.
    pub fn refresh(&self) {
        let Some(cell) = self.index().and_then(|i| lock(&self.doc).get_cell(i)) else {
            return;
        };

        self.input.set_text(&cell.source);
        if self.cell_type == CellType::Code {
            let prompt = match cell.execution_count {
                Some(n) => format!("[{n}]:"),
                None => "[ ]:".to_string(),
            };
            self.prompt.set_text(&prompt);
        }

        self.output_area.clear_children();
        for output in &cell.outputs {
            let child = SimElement::with_classes("div", &["jp-OutputArea-child"]);
            let rendered = SimElement::with_classes("div", &["jp-OutputArea-output"]);
            rendered.set_text(&output_text(output));
            child.append_child(rendered);
            self.output_area.append_child(child);
        }
    }

    pub fn set_rendered(&self, rendered: bool) {
        self.node.toggle_class("jp-mod-rendered", rendered);
        self.rendered.send_replace(rendered);
    }

    fn set_selected(&self, selected: bool) {
        self.selected.store(selected, Ordering::SeqCst);
        self.node.toggle_class("jp-mod-selected", selected);
    }

    fn selected(&self) -> bool {
        self.selected.load(Ordering::SeqCst)
    }

    fn place(&self, slot: Option<usize>) {
        match slot {
            Some(slot) => {
                self.node.set_rect(Rect {
                    x: 0.0,
                    y: slot as f64 * CELL_HEIGHT,
                    width: 800.0,
                    height: CELL_HEIGHT,
                });
                self.in_viewport.store(true, Ordering::SeqCst);
            }
            None => {
                self.node.hide();
                self.in_viewport.store(false, Ordering::SeqCst);
            }
        }
    }
}

impl CellView for SimCellView {
    fn cell_type(&self) -> CellType {
        self.cell_type
    }

    fn source(&self) -> String {
        self.index()
            .and_then(|i| lock(&self.doc).get_cell(i))
            .map(|cell| cell.source)
            .unwrap_or_default()
    }

    fn execution_count(&self) -> Option<i64> {
        let doc = lock(&self.doc);
        doc.find_cell_index(&self.cell_id)
            .and_then(|i| doc.execution_count(i))
    }

    fn output_count(&self) -> usize {
        self.index()
            .and_then(|i| lock(&self.doc).get_cell(i))
            .map_or(0, |cell| cell.outputs.len())
    }

    fn node(&self) -> ElementRef {
        self.node.clone()
    }

    fn in_viewport(&self) -> bool {
        self.in_viewport.load(Ordering::SeqCst)
    }

    fn ready(&self) -> HostFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn is_rendered(&self) -> bool {
        *self.rendered.borrow()
    }

    fn rendered_changed(&self) -> BoxFuture<'static, ()> {
        let mut rx = self.rendered.subscribe();
        Box::pin(async move {
            let _ = rx.changed().await;
        })
    }
}

#[derive(Default)]
struct ViewState {
    active: usize,
    cells: Vec<Arc<SimCellView>>,
    window_start: usize,
}

/// Edits staged inside one [`SharedNotebook::transact`].
struct DocEditor<'a> {
    doc: &'a mut NotebookDoc,
}

impl NotebookEdit for DocEditor<'_> {
    fn insert_cell(&mut self, index: usize, cell: NewCell) -> Result<(), HostError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.doc
            .insert_cell(index, &id, cell.cell_type, &cell.source)
            .map_err(doc_error)
    }

    fn delete_cell(&mut self, index: usize) -> Result<(), HostError> {
        match self.doc.delete_cell(index).map_err(doc_error)? {
            true => Ok(()),
            false => Err(HostError::IndexOutOfRange(index)),
        }
    }
}

/// A notebook panel: toolbar plus cell list.
pub struct SimNotebook {
    doc: SharedDoc,
    node: Arc<SimElement>,
    cells_node: Arc<SimElement>,
    toolbar: Vec<(String, Arc<SimElement>)>,
    view: Mutex<ViewState>,
    /// Number of cells laid out at once; `None` lays out every cell.
    window: Option<usize>,
    fail_scroll: AtomicBool,
    scrolls: Mutex<Vec<(usize, ScrollAlign)>>,
}

impl SimNotebook {
    pub fn new(doc: NotebookDoc) -> Arc<Self> {
        Self::build(doc, None)
    }

    /// A notebook that only lays out `window` cells at a time.
    pub fn windowed(doc: NotebookDoc, window: usize) -> Arc<Self> {
        Self::build(doc, Some(window.max(1)))
    }

    fn build(mut doc: NotebookDoc, window: Option<usize>) -> Arc<Self> {
        doc.commit();
        let node = SimElement::with_classes("div", &["jp-NotebookPanel"]);
        let toolbar_node =
            SimElement::with_classes("div", &["jp-Toolbar", "jp-NotebookPanel-toolbar"]);
        let cells_node = SimElement::with_classes("div", &["jp-Notebook"]);
        node.append_child(toolbar_node.clone());
        node.append_child(cells_node.clone());

        let toolbar = DEFAULT_TOOLBAR
            .iter()
            .map(|name| {
                let item = SimElement::with_classes("div", &["jp-Toolbar-item"]);
                item.set_attribute("data-jp-item-name", name);
                toolbar_node.append_child(item.clone());
                (name.to_string(), item)
            })
            .collect();

        let notebook = Arc::new(Self {
            doc: Arc::new(Mutex::new(doc)),
            node,
            cells_node,
            toolbar,
            view: Mutex::new(ViewState::default()),
            window,
            fail_scroll: AtomicBool::new(false),
            scrolls: Mutex::new(Vec::new()),
        });
        notebook.sync(true);
        notebook
    }

    /// A notebook with the given cells and nothing run yet.
    pub fn with_cells(cells: &[(CellType, &str)]) -> Arc<Self> {
        let mut doc = NotebookDoc::new("untitled");
        for (index, (cell_type, source)) in cells.iter().enumerate() {
            let id = uuid::Uuid::new_v4().to_string();
            if let Err(e) = doc.insert_cell(index, &id, *cell_type, source) {
                warn!("[notebook] Failed to seed cell {}: {}", index, e);
            }
        }
        doc.commit();
        Self::new(doc)
    }

    pub fn element(&self) -> &Arc<SimElement> {
        &self.node
    }

    fn lock_view(&self) -> MutexGuard<'_, ViewState> {
        self.view.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Rebuild cell views from the document.
    fn sync(&self, loaded: bool) {
        let cells = lock(&self.doc).get_cells();
        let mut view = self.lock_view();

        let views: Vec<Arc<SimCellView>> = cells
            .into_iter()
            .map(|cell| {
                view.cells
                    .iter()
                    .find(|v| v.cell_id == cell.id)
                    .cloned()
                    .unwrap_or_else(|| {
                        // Inserted markdown cells start in edit mode
                        SimCellView::new(cell.id, cell.cell_type, self.doc.clone(), loaded)
                    })
            })
            .collect();
        view.cells = views;
        if view.active >= view.cells.len() {
            view.active = view.cells.len().saturating_sub(1);
        }

        self.cells_node
            .set_children(view.cells.iter().map(|c| c.node.clone()).collect());
        for cell in &view.cells {
            cell.refresh();
        }
        self.layout(&mut view);
    }

    fn layout(&self, view: &mut ViewState) {
        let len = view.cells.len();
        if let Some(size) = self.window {
            view.window_start = view.window_start.min(len.saturating_sub(size));
        }
        for (i, cell) in view.cells.iter().enumerate() {
            let slot = match self.window {
                Some(size) if i < view.window_start || i >= view.window_start + size => None,
                Some(_) => Some(i - view.window_start),
                None => Some(i),
            };
            cell.place(slot);
            cell.node.toggle_class("jp-mod-active", i == view.active);
        }
    }

    /// Move the window so that `index` is laid out.
    fn reveal(&self, view: &mut ViewState, index: usize) {
        if let Some(size) = self.window {
            if index < view.window_start {
                view.window_start = index;
            } else if index >= view.window_start + size {
                view.window_start = index + 1 - size;
            }
        }
    }

    pub fn active_cell(&self) -> Option<Arc<SimCellView>> {
        let view = self.lock_view();
        view.cells.get(view.active).cloned()
    }

    pub fn cell_view(&self, index: usize) -> Option<Arc<SimCellView>> {
        self.lock_view().cells.get(index).cloned()
    }

    /// Insert an empty code cell below the active one and activate it.
    pub fn insert_below(&self) -> Result<(), HostError> {
        let index = (self.active_cell_index() + 1).min(self.cell_count());
        self.transact(&mut |edit| edit.insert_cell(index, NewCell::new(CellType::Code, "")))?;
        self.deselect_all();
        self.set_active_cell_index(index);
        Ok(())
    }

    /// Delete the selected cells and the active cell.
    ///
    /// The cell now at the first deleted position becomes active. An
    /// emptied notebook gets a fresh code cell.
    pub fn delete_selected(&self) -> Result<usize, HostError> {
        let doomed: Vec<usize> = {
            let view = self.lock_view();
            view.cells
                .iter()
                .enumerate()
                .filter(|(i, cell)| cell.selected() || *i == view.active)
                .map(|(i, _)| i)
                .collect()
        };
        let Some(&first) = doomed.first() else {
            return Ok(0);
        };
        let total = self.cell_count();

        self.transact(&mut |edit| {
            for &index in doomed.iter().rev() {
                edit.delete_cell(index)?;
            }
            if doomed.len() == total {
                edit.insert_cell(0, NewCell::new(CellType::Code, ""))?;
            }
            Ok(())
        })?;

        self.deselect_all();
        self.set_active_cell_index(first.min(self.cell_count().saturating_sub(1)));
        debug!("[notebook] Deleted {} cells", doomed.len());
        Ok(doomed.len())
    }

    /// Make the next `scroll_to_item` calls fail.
    pub fn set_fail_scroll(&self, fail: bool) {
        self.fail_scroll.store(fail, Ordering::SeqCst);
    }

    /// Successful scroll requests, in order.
    pub fn scrolls(&self) -> Vec<(usize, ScrollAlign)> {
        self.scrolls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn snapshot(&self) -> Vec<crate::notebook_doc::CellSnapshot> {
        lock(&self.doc).get_cells()
    }

    pub fn save_to_file(&self, path: &Path) -> std::io::Result<()> {
        lock(&self.doc).save_to_file(path)
    }
}

impl SharedNotebook for SimNotebook {
    fn cell_count(&self) -> usize {
        lock(&self.doc).cell_count()
    }

    fn cell_type(&self, index: usize) -> Option<CellType> {
        lock(&self.doc).get_cell(index).map(|cell| cell.cell_type)
    }

    fn cell_source(&self, index: usize) -> Option<String> {
        lock(&self.doc).get_cell(index).map(|cell| cell.source)
    }

    fn execution_count(&self, index: usize) -> Option<i64> {
        lock(&self.doc).execution_count(index)
    }

    fn set_execution_count(&self, index: usize, count: Option<i64>) -> Result<(), HostError> {
        let applied = {
            let mut doc = lock(&self.doc);
            let applied = doc.set_execution_count(index, count).map_err(doc_error)?;
            doc.commit();
            applied
        };
        if !applied {
            return Err(HostError::IndexOutOfRange(index));
        }
        if let Some(cell) = self.cell_view(index) {
            cell.refresh();
        }
        Ok(())
    }

    fn transact(
        &self,
        edit: &mut dyn FnMut(&mut dyn NotebookEdit) -> Result<(), HostError>,
    ) -> Result<(), HostError> {
        let result = {
            let mut doc = lock(&self.doc);
            let outcome = edit(&mut DocEditor { doc: &mut *doc });
            match &outcome {
                Ok(()) => doc.commit(),
                Err(_) => {
                    doc.rollback();
                }
            }
            outcome
        };
        self.sync(false);
        result
    }
}

impl NotebookPanel for SimNotebook {
    fn model(&self) -> &dyn SharedNotebook {
        self
    }

    fn active_cell_index(&self) -> usize {
        self.lock_view().active
    }

    fn set_active_cell_index(&self, index: usize) {
        let mut view = self.lock_view();
        if index >= view.cells.len() {
            return;
        }
        view.active = index;
        self.reveal(&mut view, index);
        self.layout(&mut view);
    }

    fn is_selected(&self, index: usize) -> bool {
        self.lock_view()
            .cells
            .get(index)
            .is_some_and(|cell| cell.selected())
    }

    fn select(&self, index: usize) {
        if let Some(cell) = self.cell_view(index) {
            cell.set_selected(true);
        }
    }

    fn deselect_all(&self) {
        for cell in &self.lock_view().cells {
            cell.set_selected(false);
        }
    }

    fn cell(&self, index: usize) -> Option<Arc<dyn CellView>> {
        self.cell_view(index).map(|cell| cell as Arc<dyn CellView>)
    }

    fn widget_count(&self) -> usize {
        self.lock_view().cells.len()
    }

    fn scroll_to_item(&self, index: usize, align: ScrollAlign) -> HostFuture<'_, ()> {
        Box::pin(async move {
            if self.fail_scroll.load(Ordering::SeqCst) {
                return Err(HostError::Scroll {
                    index,
                    message: "scroller is detached".to_string(),
                });
            }
            {
                let mut view = self.lock_view();
                if let Some(size) = self.window {
                    view.window_start = match align {
                        ScrollAlign::Start => index,
                        ScrollAlign::End => (index + 1).saturating_sub(size),
                    };
                }
                self.layout(&mut view);
            }
            self.scrolls
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((index, align));
            Ok(())
        })
    }

    fn toolbar_names(&self) -> Vec<String> {
        self.toolbar.iter().map(|(name, _)| name.clone()).collect()
    }

    fn toolbar_item(&self, name: &str) -> Option<ElementRef> {
        self.toolbar
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, item)| item.clone() as ElementRef)
    }
}
