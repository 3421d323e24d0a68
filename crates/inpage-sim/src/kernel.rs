//! Scripted kernel.
//!
//! Executions are driven by per-source scripts: how long the run takes,
//! which outputs it produces, and whether a widget output attaches later.
//! Sources without a script finish after [`DEFAULT_RUN_DELAY`] with no
//! output.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use inpage::host::CellView;
use inpage::CellType;
use log::{debug, info};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::notebook::{SimCellView, WIDGET_VIEW_MIME};

pub const DEFAULT_RUN_DELAY: Duration = Duration::from_millis(50);

/// Delay before a markdown cell shows its rendered view after a run.
pub const MARKDOWN_RENDER_DELAY: Duration = Duration::from_millis(300);

/// One output produced by a scripted execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOutput {
    Stream(String),
    Result(String),
    Error { ename: String, evalue: String },
    /// A widget view. It shows the loading placeholder until it attaches,
    /// then `text`. `attach_after: None` never attaches.
    Widget {
        text: String,
        attach_after: Option<Duration>,
    },
}

impl ScriptedOutput {
    fn to_json(&self, execution_count: i64) -> serde_json::Value {
        match self {
            ScriptedOutput::Stream(text) => json!({
                "output_type": "stream",
                "name": "stdout",
                "text": text,
            }),
            ScriptedOutput::Result(text) => json!({
                "output_type": "execute_result",
                "execution_count": execution_count,
                "data": { "text/plain": text },
                "metadata": {},
            }),
            ScriptedOutput::Error { ename, evalue } => json!({
                "output_type": "error",
                "ename": ename,
                "evalue": evalue,
                "traceback": [],
            }),
            ScriptedOutput::Widget { text, .. } => json!({
                "output_type": "display_data",
                "data": {
                    WIDGET_VIEW_MIME: { "model_id": uuid::Uuid::new_v4().to_string() },
                    "text/plain": text,
                },
                "metadata": {},
            }),
        }
    }
}

/// How one source runs.
#[derive(Debug, Clone, PartialEq)]
pub struct CellScript {
    pub delay: Duration,
    pub outputs: Vec<ScriptedOutput>,
    /// The execution never finishes: no counter, no outputs.
    pub hangs: bool,
}

impl Default for CellScript {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RUN_DELAY,
            outputs: Vec::new(),
            hangs: false,
        }
    }
}

impl CellScript {
    pub fn after(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hangs: true,
            ..Self::default()
        }
    }

    pub fn output(mut self, output: ScriptedOutput) -> Self {
        self.outputs.push(output);
        self
    }
}

pub struct SimKernel {
    scripts: Mutex<HashMap<String, CellScript>>,
    execution_count: AtomicI64,
}

impl Default for SimKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl SimKernel {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            execution_count: AtomicI64::new(0),
        }
    }

    /// Script the execution of cells whose source is exactly `source`.
    pub fn script(&self, source: &str, script: CellScript) {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(source.to_string(), script);
    }

    fn script_for(&self, source: &str) -> CellScript {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    /// Executions finished so far.
    pub fn execution_count(&self) -> i64 {
        self.execution_count.load(Ordering::SeqCst)
    }

    /// Start running `cell`. Returns the task that completes the run.
    pub fn execute(self: &Arc<Self>, cell: Arc<SimCellView>) -> Option<JoinHandle<()>> {
        match cell.cell_type() {
            CellType::Raw => None,
            CellType::Markdown => {
                if cell.is_rendered() {
                    return None;
                }
                Some(tokio::spawn(async move {
                    sleep(MARKDOWN_RENDER_DELAY).await;
                    cell.set_rendered(true);
                }))
            }
            CellType::Code => {
                let source = cell.source();
                if source.trim().is_empty() {
                    return None;
                }
                let script = self.script_for(&source);

                cell.edit(|doc, index| {
                    doc.clear_outputs(index)?;
                    doc.set_execution_count(index, None)
                });
                if script.hangs {
                    info!("[kernel] Cell {} will never finish", cell.cell_id());
                    return None;
                }

                let kernel = self.clone();
                Some(tokio::spawn(async move {
                    kernel.complete(cell, script).await;
                }))
            }
        }
    }

    async fn complete(&self, cell: Arc<SimCellView>, script: CellScript) {
        sleep(script.delay).await;

        let count = self.execution_count.fetch_add(1, Ordering::SeqCst) + 1;
        let outputs: Vec<String> = script
            .outputs
            .iter()
            .map(|output| output.to_json(count).to_string())
            .collect();
        let finished = cell.edit(|doc, index| {
            doc.set_execution_count(index, Some(count))?;
            doc.set_outputs(index, &outputs)
        });
        if !finished {
            debug!("[kernel] Cell {} is gone, dropping results", cell.cell_id());
            return;
        }
        debug!("[kernel] Cell {} finished as [{}]", cell.cell_id(), count);

        for (position, output) in script.outputs.iter().enumerate() {
            if let ScriptedOutput::Widget {
                text,
                attach_after: Some(after),
            } = output
            {
                sleep(*after).await;
                let attached = json!({
                    "output_type": "display_data",
                    "data": { "text/plain": text },
                    "metadata": {},
                })
                .to_string();
                cell.edit(|doc, index| doc.replace_output(index, position, &attached));
                debug!("[kernel] Widget view attached in cell {}", cell.cell_id());
            }
        }
    }
}
