//! Detecting when a single cell finished running.
//!
//! The host has no single "execution finished" event that also covers
//! widgets attaching after the counter updates, so completion is rebuilt
//! from the execution counter plus DOM inspection:
//!
//! ```text
//! WaitingForCounter ──counter set──▶ viewport check ──hidden──▶ Done
//!        │                                  │
//!   arm timeout                             ▼
//!        │                     WaitingForOutputOrTimeout
//!        │                      │ placeholder → arm timeout
//!        │                      │ real output → Done
//!        │                      │ no output after first poll → Done
//!        └──────── timeout fires ─────────────────────────▶ Done
//! ```
//!
//! This is a heuristic. A timeout resolves the wait instead of failing it.

use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::{sleep, sleep_until, Instant};

use crate::agent::InPageAgent;
use crate::host::{CellType, CellView};
use crate::POLL_INTERVAL;

/// What one poll of a code cell saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellObservation {
    pub has_counter: bool,
    pub visible: bool,
    /// Text of the first output node; `None` when there is no output node.
    pub output_text: Option<String>,
}

/// Decision taken after one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollVerdict {
    Done,
    /// Still busy; make sure the soft deadline is running.
    ArmTimeout,
    /// Still busy; keep polling without a deadline.
    Continue,
}

/// Classify one observation of a code cell.
pub fn assess(observation: &CellObservation, first_poll: bool, placeholder: &str) -> PollVerdict {
    if !observation.has_counter {
        return PollVerdict::ArmTimeout;
    }
    if !observation.visible {
        return PollVerdict::Done;
    }
    match observation.output_text.as_deref() {
        Some(text) if text == placeholder => PollVerdict::ArmTimeout,
        Some(_) => PollVerdict::Done,
        None if first_poll => PollVerdict::Continue,
        None => PollVerdict::Done,
    }
}

impl InPageAgent {
    /// Wait until `cell` looks done running.
    ///
    /// Blank and raw cells return at once, markdown cells wait for their
    /// rendering. Code cells are polled until [`assess`] says done or the soft
    /// `timeout` (default from [`AgentConfig`](crate::AgentConfig)) runs out;
    /// either way this returns normally.
    pub async fn wait_for_cell_run(&self, cell: &dyn CellView, timeout: Option<Duration>) {
        if cell.source().trim().is_empty() {
            return;
        }
        match cell.cell_type() {
            CellType::Raw => {}
            CellType::Markdown => self.wait_for_markdown_cell_rendered(cell).await,
            CellType::Code => {
                let timeout = timeout.unwrap_or_else(|| self.config().cell_run_timeout());
                self.wait_for_code_cell(cell, timeout).await;
            }
        }
    }

    /// [`InPageAgent::wait_for_cell_run`] for a cell of the active notebook.
    /// Returns `false` if there is no such cell.
    pub async fn wait_for_cell_run_at(&self, index: usize, timeout: Option<Duration>) -> bool {
        let Some(cell) = self.active_notebook().and_then(|nb| nb.cell(index)) else {
            return false;
        };
        self.wait_for_cell_run(cell.as_ref(), timeout).await;
        true
    }

    /// Wait for a markdown cell in view to be rendered.
    pub async fn wait_for_markdown_cell_rendered(&self, cell: &dyn CellView) {
        if !cell.in_viewport() {
            return;
        }
        if let Err(e) = cell.ready().await {
            debug!("[execution] Cell ready settled with error: {}", e);
        }
        loop {
            // Subscribe before checking so a change in between is not lost.
            let changed = cell.rendered_changed();
            if cell.is_rendered() {
                return;
            }
            changed.await;
        }
    }

    async fn wait_for_code_cell(&self, cell: &dyn CellView, timeout: Duration) {
        let placeholder = self.config().widget_placeholder.as_str();
        let mut deadline: Option<Instant> = None;
        let mut first_poll = true;

        loop {
            let observation = self.observe_cell(cell);
            match assess(&observation, first_poll, placeholder) {
                PollVerdict::Done => return,
                PollVerdict::ArmTimeout => {
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + timeout);
                    }
                }
                PollVerdict::Continue => {}
            }
            first_poll = false;

            match deadline {
                Some(at) => tokio::select! {
                    _ = sleep_until(at) => {
                        info!("[execution] Cell not settled after {:?}, giving up waiting", timeout);
                        return;
                    }
                    _ = sleep(POLL_INTERVAL) => {}
                },
                None => sleep(POLL_INTERVAL).await,
            }
        }
    }

    fn observe_cell(&self, cell: &dyn CellView) -> CellObservation {
        let node = cell.node();
        let output_text = match self
            .host()
            .dom()
            .query_selector(Some(&node), &self.config().output_selector)
        {
            Ok(output) => output.map(|output| output.text_content()),
            Err(e) => {
                warn!("[execution] Output lookup failed: {}", e);
                None
            }
        };
        CellObservation {
            has_counter: cell.execution_count().is_some(),
            visible: self.is_element_visible(node.as_ref()),
            output_text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WIDGET_PLACEHOLDER;

    fn observation(has_counter: bool, visible: bool, output: Option<&str>) -> CellObservation {
        CellObservation {
            has_counter,
            visible,
            output_text: output.map(str::to_string),
        }
    }

    #[test]
    fn test_no_counter_arms_timeout() {
        let obs = observation(false, true, Some("42"));
        assert_eq!(assess(&obs, true, WIDGET_PLACEHOLDER), PollVerdict::ArmTimeout);
        assert_eq!(assess(&obs, false, WIDGET_PLACEHOLDER), PollVerdict::ArmTimeout);
    }

    #[test]
    fn test_hidden_cell_with_counter_is_done() {
        let obs = observation(true, false, Some(WIDGET_PLACEHOLDER));
        assert_eq!(assess(&obs, true, WIDGET_PLACEHOLDER), PollVerdict::Done);
    }

    #[test]
    fn test_placeholder_output_arms_timeout() {
        let obs = observation(true, true, Some(WIDGET_PLACEHOLDER));
        assert_eq!(assess(&obs, false, WIDGET_PLACEHOLDER), PollVerdict::ArmTimeout);
    }

    #[test]
    fn test_real_output_is_done() {
        let obs = observation(true, true, Some("hello"));
        assert_eq!(assess(&obs, true, WIDGET_PLACEHOLDER), PollVerdict::Done);
    }

    #[test]
    fn test_empty_text_output_is_done() {
        let obs = observation(true, true, Some(""));
        assert_eq!(assess(&obs, true, WIDGET_PLACEHOLDER), PollVerdict::Done);
    }

    #[test]
    fn test_missing_output_waits_one_poll() {
        let obs = observation(true, true, None);
        assert_eq!(assess(&obs, true, WIDGET_PLACEHOLDER), PollVerdict::Continue);
        assert_eq!(assess(&obs, false, WIDGET_PLACEHOLDER), PollVerdict::Done);
    }

    #[test]
    fn test_custom_placeholder() {
        let obs = observation(true, true, Some("Loading..."));
        assert_eq!(assess(&obs, false, "Loading..."), PollVerdict::ArmTimeout);
        assert_eq!(assess(&obs, false, WIDGET_PLACEHOLDER), PollVerdict::Done);
    }
}
