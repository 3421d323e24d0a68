//! Cell mutation and inspection on the active notebook.
//!
//! Every operation re-reads the active notebook. A missing notebook or an
//! out-of-range index is reported as `Ok(false)`, never as an error.

use log::{debug, info, warn};

use crate::agent::InPageAgent;
use crate::error::Result;
use crate::host::{commands, CellType, NewCell, SharedNotebook};

impl InPageAgent {
    /// Insert a cell right after the active cell and make it active.
    pub async fn add_notebook_cell(&self, cell_type: CellType, source: &str) -> Result<bool> {
        let Some(notebook) = self.active_notebook() else {
            warn!("[cells] No active notebook, cannot add cell");
            return Ok(false);
        };

        let model = notebook.model();
        let index = (notebook.active_cell_index() + 1).min(model.cell_count());
        let cell = NewCell::new(cell_type, source);
        model.transact(&mut |edit| edit.insert_cell(index, cell.clone()))?;
        notebook.set_active_cell_index(index);

        debug!("[cells] Inserted {} cell at {}", cell_type, index);
        Ok(true)
    }

    /// Replace the cell at `index` with a new one in a single transaction.
    pub async fn set_notebook_cell(
        &self,
        index: usize,
        cell_type: CellType,
        source: &str,
    ) -> Result<bool> {
        let Some(notebook) = self.active_notebook() else {
            warn!("[cells] No active notebook, cannot set cell {}", index);
            return Ok(false);
        };

        let model = notebook.model();
        if index >= model.cell_count() {
            debug!(
                "[cells] Cell index {} out of range (count {})",
                index,
                model.cell_count()
            );
            return Ok(false);
        }

        let cell = NewCell::new(cell_type, source);
        model.transact(&mut |edit| {
            edit.delete_cell(index)?;
            edit.insert_cell(index, cell.clone())
        })?;

        debug!("[cells] Replaced cell {} with {} cell", index, cell_type);
        Ok(true)
    }

    /// Delete the selected cells through the host's delete command.
    ///
    /// This only removes what the notebook currently has selected (usually
    /// just the active cell). Use [`InPageAgent::clear_notebook_cells`] to
    /// empty the notebook.
    pub async fn delete_notebook_cells(&self) -> Result<bool> {
        if self.active_notebook().is_none() {
            warn!("[cells] No active notebook, cannot delete cells");
            return Ok(false);
        }
        self.host()
            .commands()
            .execute(commands::DELETE_CELL, None)
            .await?;
        Ok(true)
    }

    /// Delete every cell of the active notebook in one transaction.
    pub async fn clear_notebook_cells(&self) -> Result<bool> {
        let Some(notebook) = self.active_notebook() else {
            warn!("[cells] No active notebook, cannot clear cells");
            return Ok(false);
        };

        let model = notebook.model();
        let count = model.cell_count();
        model.transact(&mut |edit| {
            for index in (0..count).rev() {
                edit.delete_cell(index)?;
            }
            Ok(())
        })?;

        info!("[cells] Cleared {} cells", count);
        Ok(true)
    }

    /// Whether the cell at `index` is part of the current selection.
    pub fn is_notebook_cell_selected(&self, index: usize) -> bool {
        match self.active_notebook() {
            Some(notebook) if index < notebook.widget_count() => notebook.is_selected(index),
            _ => false,
        }
    }

    /// Reset the execution counter of one code cell, or of every code cell.
    pub fn reset_execution_count(&self, index: Option<usize>) -> Result<bool> {
        let Some(notebook) = self.active_notebook() else {
            return Ok(false);
        };
        let model = notebook.model();

        for i in examined_indices(model, index) {
            if model.cell_type(i) == Some(CellType::Code) {
                model.set_execution_count(i, None)?;
            }
        }
        Ok(true)
    }

    /// True when every examined code cell with non-blank source has run.
    ///
    /// Cells that were never executed are counted; the answer is "all ran"
    /// exactly when that count is zero. Vacuously true without code cells.
    pub fn have_been_executed(&self, index: Option<usize>) -> bool {
        let Some(notebook) = self.active_notebook() else {
            return true;
        };
        let model = notebook.model();

        let not_run = examined_indices(model, index)
            .filter(|&i| {
                model.cell_type(i) == Some(CellType::Code)
                    && model
                        .cell_source(i)
                        .is_some_and(|src| !src.trim().is_empty())
                    && model.execution_count(i).is_none()
            })
            .count();
        not_run == 0
    }
}

fn examined_indices(
    model: &dyn SharedNotebook,
    index: Option<usize>,
) -> Box<dyn Iterator<Item = usize>> {
    let count = model.cell_count();
    match index {
        Some(i) if i < count => Box::new(std::iter::once(i)),
        Some(_) => Box::new(std::iter::empty()),
        None => Box::new(0..count),
    }
}
