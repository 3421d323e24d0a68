//! Cell-by-cell run of the active notebook.

use std::collections::VecDeque;

use futures::future::BoxFuture;
use log::{debug, info, warn};
use serde::Serialize;
use ts_rs::TS;

use crate::agent::InPageAgent;
use crate::error::{AgentError, HostError, Result};
use crate::host::{commands, ScrollAlign};

/// Hooks invoked between the steps of a cell-by-cell run.
///
/// Both hooks default to no-ops. An error aborts the run.
pub trait RunCallbacks: Send + Sync {
    fn on_after_cell_run(&self, _index: usize) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn on_after_scroll(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Progress of one run: pending indices (ascending), the current one, and
/// the ones already settled.
#[derive(Debug, Default)]
pub struct RunSession {
    pending: VecDeque<usize>,
    current: Option<usize>,
    completed: Vec<usize>,
}

impl RunSession {
    pub fn new(cell_count: usize) -> Self {
        Self {
            pending: (0..cell_count).collect(),
            current: None,
            completed: Vec::new(),
        }
    }

    /// Next index to run, if the previous one has been completed.
    pub fn next_index(&mut self) -> Option<usize> {
        if self.current.is_some() {
            return None;
        }
        let index = self.pending.pop_front()?;
        self.current = Some(index);
        Some(index)
    }

    pub fn complete(&mut self, index: usize) {
        if self.current == Some(index) {
            self.current = None;
            self.completed.push(index);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.pending.is_empty() && self.current.is_none()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            cells_run: self.completed.len(),
            completed: self.completed.clone(),
        }
    }
}

/// Result of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct RunSummary {
    pub cells_run: usize,
    pub completed: Vec<usize>,
}

impl InPageAgent {
    /// Run every cell of the active notebook in order.
    ///
    /// Each cell is made active and selected, run, waited on, and scrolled to
    /// before the next one starts. Scroll failures are ignored; any other
    /// failure aborts the remaining cells.
    pub async fn run_active_notebook_cell_by_cell(
        &self,
        callbacks: Option<&dyn RunCallbacks>,
    ) -> Result<RunSummary> {
        let Some(notebook) = self.active_notebook() else {
            debug!("[runner] No active notebook, nothing to run");
            return Ok(RunSummary::default());
        };

        let cell_count = notebook.widget_count();
        if cell_count == 0 {
            return Ok(RunSummary::default());
        }

        info!("[runner] Running {} cells one by one", cell_count);
        self.host()
            .commands()
            .execute(commands::DESELECT_ALL, None)
            .await?;

        let mut session = RunSession::new(cell_count);
        while let Some(index) = session.next_index() {
            notebook.set_active_cell_index(index);
            let Some(cell) = notebook.cell(index) else {
                warn!("[runner] Cell {} disappeared mid-run", index);
                return Err(HostError::IndexOutOfRange(index).into());
            };
            notebook.select(index);

            self.host()
                .commands()
                .execute(commands::RUN_CELL, None)
                .await?;
            self.wait_for_cell_run(cell.as_ref(), None).await;

            if let Some(callbacks) = callbacks {
                callbacks
                    .on_after_cell_run(index)
                    .await
                    .map_err(AgentError::Callback)?;
            }

            let align = if cell.output_count() > 0 {
                ScrollAlign::End
            } else {
                ScrollAlign::Start
            };
            if let Err(e) = notebook.scroll_to_item(index, align).await {
                debug!("[runner] Ignoring scroll failure: {}", e);
            }

            if let Some(callbacks) = callbacks {
                callbacks
                    .on_after_scroll()
                    .await
                    .map_err(AgentError::Callback)?;
            }

            session.complete(index);
            debug!("[runner] Cell {} settled", index);
        }

        let summary = session.summary();
        info!("[runner] Finished, {} cells run", summary.cells_run);
        Ok(summary)
    }
}
