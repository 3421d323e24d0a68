//! The agent handle and the small helpers that do not belong to a
//! building block: visibility, theme switching, toolbar lookup, saving.

use std::sync::Arc;

use log::{info, warn};
use serde_json::json;

use crate::config::AgentConfig;
use crate::error::Result;
use crate::host::{commands, DomElement, ElementRef, Host, NotebookPanel};
use crate::waiter::wait_for_function;

/// In-page agent driving one host application.
///
/// Cheap to clone; clones share the host handle.
#[derive(Clone)]
pub struct InPageAgent {
    host: Arc<dyn Host>,
    config: AgentConfig,
}

impl InPageAgent {
    pub fn new(host: Arc<dyn Host>, config: AgentConfig) -> Self {
        Self { host, config }
    }

    pub fn with_defaults(host: Arc<dyn Host>) -> Self {
        Self::new(host, AgentConfig::default())
    }

    pub fn host(&self) -> &dyn Host {
        self.host.as_ref()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The notebook that currently has focus, re-read on every call.
    pub(crate) fn active_notebook(&self) -> Option<Arc<dyn NotebookPanel>> {
        self.host.active_notebook()
    }

    /// An element counts as visible if it has a layout box or any client rect.
    pub fn is_element_visible(&self, element: &dyn DomElement) -> bool {
        let rect = element.bounding_box();
        rect.width > 0.0 || rect.height > 0.0 || element.client_rect_count() > 0
    }

    /// Apply a theme and wait until the page reports it.
    pub async fn set_theme(&self, theme: &str) -> Result<()> {
        info!("[agent] Switching theme to {:?}", theme);
        self.host
            .commands()
            .execute(commands::CHANGE_THEME, Some(json!({ "theme": theme })))
            .await?;

        let host = self.host.clone();
        let attribute = self.config.theme_attribute.clone();
        let theme = theme.to_string();
        wait_for_function(
            move || {
                let applied = host.dom().body().attribute(&attribute);
                let done = applied.as_deref() == Some(theme.as_str());
                async move { Ok(done) }
            },
            None,
        )
        .await
    }

    /// Save the active notebook through the document manager.
    pub async fn save_active_notebook(&self) -> Result<bool> {
        if self.active_notebook().is_none() {
            warn!("[agent] No active notebook to save");
            return Ok(false);
        }
        self.host.commands().execute(commands::SAVE, None).await?;
        Ok(true)
    }

    /// Position of a named item in the active notebook's toolbar.
    pub fn get_notebook_toolbar_item_index(&self, name: &str) -> Option<usize> {
        self.active_notebook()?
            .toolbar_names()
            .iter()
            .position(|n| n == name)
    }

    pub fn get_notebook_toolbar_item(&self, name: &str) -> Option<ElementRef> {
        self.active_notebook()?.toolbar_item(name)
    }
}
