//! Driver protocol: one JSON request per agent call.
//!
//! Requests are tagged by `method` (camelCase agent method name) with
//! snake_case parameters, e.g.
//!
//! ```json
//! { "method": "setNotebookCell", "index": 0, "cell_type": "code", "source": "x = 1" }
//! ```
//!
//! Waits that can stay pending forever accept an optional `timeout_ms`,
//! enforced here with [`with_deadline`].

use std::future::Future;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use ts_rs::TS;

use crate::agent::InPageAgent;
use crate::error::Result;
use crate::host::{CellType, ElementRef};
use crate::waiter::{wait_for_timeout, with_deadline, SelectorWaitOptions};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum AgentRequest {
    GetPlugin {
        id: String,
        #[serde(default)]
        timeout_ms: Option<u32>,
    },
    WaitForTimeout {
        ms: u32,
    },
    WaitForSelector {
        selector: String,
        #[serde(default)]
        hidden: bool,
        #[serde(default)]
        timeout_ms: Option<u32>,
    },
    #[serde(rename = "waitForXPath")]
    WaitForXPath {
        xpath: String,
        #[serde(default)]
        hidden: bool,
        #[serde(default)]
        timeout_ms: Option<u32>,
    },
    AddNotebookCell {
        cell_type: CellType,
        source: String,
    },
    SetNotebookCell {
        index: i32,
        cell_type: CellType,
        source: String,
    },
    DeleteNotebookCells,
    ClearNotebookCells,
    ResetExecutionCount {
        #[serde(default)]
        index: Option<usize>,
    },
    IsNotebookCellSelected {
        index: i32,
    },
    HaveBeenExecuted {
        #[serde(default)]
        index: Option<usize>,
    },
    WaitForCellRun {
        index: usize,
        #[serde(default)]
        timeout_ms: Option<u32>,
    },
    RunActiveNotebookCellByCell,
    SetTheme {
        theme: String,
        #[serde(default)]
        timeout_ms: Option<u32>,
    },
    SaveActiveNotebook,
    GetNotebookToolbarItemIndex {
        name: String,
    },
    IsElementVisible {
        selector: String,
    },
}

impl AgentRequest {
    pub fn method(&self) -> &'static str {
        match self {
            AgentRequest::GetPlugin { .. } => "getPlugin",
            AgentRequest::WaitForTimeout { .. } => "waitForTimeout",
            AgentRequest::WaitForSelector { .. } => "waitForSelector",
            AgentRequest::WaitForXPath { .. } => "waitForXPath",
            AgentRequest::AddNotebookCell { .. } => "addNotebookCell",
            AgentRequest::SetNotebookCell { .. } => "setNotebookCell",
            AgentRequest::DeleteNotebookCells => "deleteNotebookCells",
            AgentRequest::ClearNotebookCells => "clearNotebookCells",
            AgentRequest::ResetExecutionCount { .. } => "resetExecutionCount",
            AgentRequest::IsNotebookCellSelected { .. } => "isNotebookCellSelected",
            AgentRequest::HaveBeenExecuted { .. } => "haveBeenExecuted",
            AgentRequest::WaitForCellRun { .. } => "waitForCellRun",
            AgentRequest::RunActiveNotebookCellByCell => "runActiveNotebookCellByCell",
            AgentRequest::SetTheme { .. } => "setTheme",
            AgentRequest::SaveActiveNotebook => "saveActiveNotebook",
            AgentRequest::GetNotebookToolbarItemIndex { .. } => "getNotebookToolbarItemIndex",
            AgentRequest::IsElementVisible { .. } => "isElementVisible",
        }
    }
}

fn millis(ms: u32) -> Duration {
    Duration::from_millis(u64::from(ms))
}

async fn bounded<F: Future>(timeout_ms: Option<u32>, future: F) -> Result<F::Output> {
    match timeout_ms {
        Some(ms) => with_deadline(millis(ms), future).await,
        None => Ok(future.await),
    }
}

fn element_json(element: Option<ElementRef>) -> Value {
    match element {
        Some(el) => json!({
            "tag_name": el.tag_name(),
            "text": el.text_content(),
        }),
        None => Value::Null,
    }
}

/// Run one driver request against the agent.
pub async fn dispatch(agent: &InPageAgent, request: AgentRequest) -> Result<Value> {
    debug!("[protocol] Dispatching {}", request.method());

    let value = match request {
        AgentRequest::GetPlugin { id, timeout_ms } => {
            let service = bounded(timeout_ms, agent.get_plugin(&id)).await?;
            Value::Bool(service.is_some())
        }
        AgentRequest::WaitForTimeout { ms } => {
            wait_for_timeout(millis(ms)).await;
            Value::Null
        }
        AgentRequest::WaitForSelector {
            selector,
            hidden,
            timeout_ms,
        } => {
            let wait = agent.wait_for_selector(&selector, None, SelectorWaitOptions { hidden });
            element_json(bounded(timeout_ms, wait).await??)
        }
        AgentRequest::WaitForXPath {
            xpath,
            hidden,
            timeout_ms,
        } => {
            let wait = agent.wait_for_xpath(&xpath, None, SelectorWaitOptions { hidden });
            element_json(bounded(timeout_ms, wait).await??)
        }
        AgentRequest::AddNotebookCell { cell_type, source } => {
            Value::Bool(agent.add_notebook_cell(cell_type, &source).await?)
        }
        AgentRequest::SetNotebookCell {
            index,
            cell_type,
            source,
        } => match usize::try_from(index) {
            Ok(index) => Value::Bool(agent.set_notebook_cell(index, cell_type, &source).await?),
            Err(_) => Value::Bool(false),
        },
        AgentRequest::DeleteNotebookCells => Value::Bool(agent.delete_notebook_cells().await?),
        AgentRequest::ClearNotebookCells => Value::Bool(agent.clear_notebook_cells().await?),
        AgentRequest::ResetExecutionCount { index } => {
            Value::Bool(agent.reset_execution_count(index)?)
        }
        AgentRequest::IsNotebookCellSelected { index } => Value::Bool(
            usize::try_from(index).is_ok_and(|i| agent.is_notebook_cell_selected(i)),
        ),
        AgentRequest::HaveBeenExecuted { index } => Value::Bool(agent.have_been_executed(index)),
        AgentRequest::WaitForCellRun { index, timeout_ms } => {
            let found = agent
                .wait_for_cell_run_at(index, timeout_ms.map(millis))
                .await;
            Value::Bool(found)
        }
        AgentRequest::RunActiveNotebookCellByCell => {
            let summary = agent.run_active_notebook_cell_by_cell(None).await?;
            serde_json::to_value(&summary)?
        }
        AgentRequest::SetTheme { theme, timeout_ms } => {
            bounded(timeout_ms, agent.set_theme(&theme)).await??;
            Value::Null
        }
        AgentRequest::SaveActiveNotebook => Value::Bool(agent.save_active_notebook().await?),
        AgentRequest::GetNotebookToolbarItemIndex { name } => {
            // -1 when absent, like Array.prototype.indexOf
            match agent.get_notebook_toolbar_item_index(&name) {
                Some(index) => json!(index),
                None => json!(-1),
            }
        }
        AgentRequest::IsElementVisible { selector } => {
            let visible = agent
                .host()
                .dom()
                .query_selector(None, &selector)?
                .is_some_and(|el| agent.is_element_visible(el.as_ref()));
            Value::Bool(visible)
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_with_params() {
        let request: AgentRequest = serde_json::from_str(
            r##"{"method":"setNotebookCell","index":2,"cell_type":"markdown","source":"# hi"}"##,
        )
        .unwrap();
        assert_eq!(
            request,
            AgentRequest::SetNotebookCell {
                index: 2,
                cell_type: CellType::Markdown,
                source: "# hi".to_string(),
            }
        );
        assert_eq!(request.method(), "setNotebookCell");
    }

    #[test]
    fn test_parse_unit_request() {
        let request: AgentRequest =
            serde_json::from_str(r#"{"method":"runActiveNotebookCellByCell"}"#).unwrap();
        assert_eq!(request, AgentRequest::RunActiveNotebookCellByCell);
    }

    #[test]
    fn test_optional_params_default() {
        let request: AgentRequest =
            serde_json::from_str(r#"{"method":"waitForSelector","selector":".jp-Notebook"}"#)
                .unwrap();
        assert_eq!(
            request,
            AgentRequest::WaitForSelector {
                selector: ".jp-Notebook".to_string(),
                hidden: false,
                timeout_ms: None,
            }
        );
    }

    #[test]
    fn test_xpath_method_name() {
        let request: AgentRequest =
            serde_json::from_str(r#"{"method":"waitForXPath","xpath":"//div","hidden":true}"#)
                .unwrap();
        assert_eq!(request.method(), "waitForXPath");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["method"], "waitForXPath");
    }

    #[test]
    fn test_unknown_method_rejected() {
        let result = serde_json::from_str::<AgentRequest>(r#"{"method":"evaluate"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_method_matches_serialized_tag() {
        let requests = vec![
            AgentRequest::GetPlugin {
                id: "@jupyterlab/apputils-extension:themes".to_string(),
                timeout_ms: Some(100),
            },
            AgentRequest::DeleteNotebookCells,
            AgentRequest::HaveBeenExecuted { index: None },
            AgentRequest::GetNotebookToolbarItemIndex {
                name: "save".to_string(),
            },
        ];
        for request in requests {
            let json = serde_json::to_value(&request).unwrap();
            assert_eq!(json["method"], request.method());
        }
    }
}
