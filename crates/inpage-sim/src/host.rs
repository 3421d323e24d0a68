//! Simulated host application.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use inpage::host::{
    commands, CommandRegistry, Dom, HostFuture, NotebookPanel, PluginEntry, PluginRegistry,
    Service,
};
use inpage::{Host, HostError, THEME_ATTRIBUTE};
use log::{debug, info};
use serde_json::Value;
use tokio::time::sleep;

use crate::dom::SimDom;
use crate::kernel::SimKernel;
use crate::notebook::SimNotebook;

/// Themes `apputils:change-theme` accepts.
pub const THEMES: &[&str] = &["JupyterLab Light", "JupyterLab Dark"];

/// Delay between a theme change request and the body attribute update.
pub const THEME_APPLY_DELAY: Duration = Duration::from_millis(100);

/// A registered plugin.
#[derive(Clone)]
pub struct SimPlugin {
    service: Option<Service>,
    activated: bool,
    activation_delay: Duration,
    fails: bool,
}

impl SimPlugin {
    /// Already activated, like plugins started at application launch.
    pub fn activated(service: Option<Service>) -> Self {
        Self {
            service,
            activated: true,
            activation_delay: Duration::ZERO,
            fails: false,
        }
    }

    /// Activated on first request.
    pub fn deferred(service: Option<Service>) -> Self {
        Self {
            activated: false,
            ..Self::activated(service)
        }
    }

    pub fn activation_delay(mut self, delay: Duration) -> Self {
        self.activation_delay = delay;
        self
    }

    /// Activation rejects and the plugin stays inactive.
    pub fn failing(mut self) -> Self {
        self.fails = true;
        self
    }
}

#[derive(Default)]
pub struct SimPlugins {
    plugins: Mutex<HashMap<String, SimPlugin>>,
    activations: Mutex<Vec<String>>,
}

impl SimPlugins {
    pub fn register(&self, id: &str, plugin: SimPlugin) {
        self.plugins
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), plugin);
    }

    /// Ids passed to `activate_plugin`, in call order.
    pub fn activations(&self) -> Vec<String> {
        self.activations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn get(&self, id: &str) -> Option<SimPlugin> {
        self.plugins
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}

impl PluginRegistry for SimPlugins {
    fn has_plugin(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    fn plugin(&self, id: &str) -> Option<PluginEntry> {
        self.get(id).map(|plugin| PluginEntry {
            activated: plugin.activated,
            service: plugin.service,
        })
    }

    fn activate_plugin(&self, id: &str) -> HostFuture<'_, ()> {
        let id = id.to_string();
        Box::pin(async move {
            self.activations
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(id.clone());
            let plugin = self.get(&id).ok_or_else(|| HostError::Activation {
                id: id.clone(),
                message: "plugin is not registered".to_string(),
            })?;
            if plugin.activated {
                return Ok(());
            }

            sleep(plugin.activation_delay).await;
            if plugin.fails {
                return Err(HostError::Activation {
                    id,
                    message: "activate() threw".to_string(),
                });
            }

            if let Some(entry) = self
                .plugins
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get_mut(&id)
            {
                entry.activated = true;
            }
            debug!("[host] Plugin {} activated", id);
            Ok(())
        })
    }
}

/// The whole application: DOM, plugins, commands and the notebook in focus.
pub struct SimHost {
    dom: SimDom,
    plugins: SimPlugins,
    kernel: Arc<SimKernel>,
    notebook: RwLock<Option<Arc<SimNotebook>>>,
    save_path: Option<PathBuf>,
    dispatched: Mutex<Vec<String>>,
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHost {
    pub fn new() -> Self {
        let dom = SimDom::new();
        dom.body_element().set_attribute(THEME_ATTRIBUTE, THEMES[0]);
        Self {
            dom,
            plugins: SimPlugins::default(),
            kernel: Arc::new(SimKernel::new()),
            notebook: RwLock::new(None),
            save_path: None,
            dispatched: Mutex::new(Vec::new()),
        }
    }

    /// Where `docmanager:save` writes the notebook document.
    pub fn with_save_path(mut self, path: PathBuf) -> Self {
        self.save_path = Some(path);
        self
    }

    pub fn sim_dom(&self) -> &SimDom {
        &self.dom
    }

    pub fn sim_plugins(&self) -> &SimPlugins {
        &self.plugins
    }

    pub fn kernel(&self) -> &Arc<SimKernel> {
        &self.kernel
    }

    /// Focus `notebook`, replacing the panel in the page. `None` closes it.
    pub fn set_active_notebook(&self, notebook: Option<Arc<SimNotebook>>) {
        let mut current = self.notebook.write().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = current.take() {
            self.dom.body_element().remove_child(old.element());
        }
        if let Some(new) = &notebook {
            self.dom.body_element().append_child(new.element().clone());
        }
        *current = notebook;
    }

    pub fn notebook(&self) -> Option<Arc<SimNotebook>> {
        self.notebook
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Command ids executed so far, in order.
    pub fn dispatched_commands(&self) -> Vec<String> {
        self.dispatched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn require_notebook(&self, command: &str) -> Result<Arc<SimNotebook>, HostError> {
        self.notebook().ok_or_else(|| HostError::Command {
            command: command.to_string(),
            message: "no notebook is active".to_string(),
        })
    }

    fn change_theme(&self, args: Option<&Value>) -> Result<Value, HostError> {
        let theme = args
            .and_then(|a| a["theme"].as_str())
            .filter(|t| THEMES.contains(t))
            .ok_or_else(|| HostError::Command {
                command: commands::CHANGE_THEME.to_string(),
                message: format!("unknown theme in {:?}", args),
            })?
            .to_string();

        let body = self.dom.body_element().clone();
        tokio::spawn(async move {
            sleep(THEME_APPLY_DELAY).await;
            body.set_attribute(THEME_ATTRIBUTE, &theme);
            info!("[host] Theme {} applied", theme);
        });
        Ok(Value::Null)
    }

    fn save(&self) -> Result<Value, HostError> {
        let notebook = self.require_notebook(commands::SAVE)?;
        let path = self.save_path.as_ref().ok_or_else(|| HostError::Command {
            command: commands::SAVE.to_string(),
            message: "no save path configured".to_string(),
        })?;
        notebook
            .save_to_file(path)
            .map_err(|e| HostError::Command {
                command: commands::SAVE.to_string(),
                message: e.to_string(),
            })?;
        info!("[host] Saved notebook to {:?}", path);
        Ok(Value::Bool(true))
    }

    fn run_command(&self, command: &str, args: Option<&Value>) -> Result<Value, HostError> {
        match command {
            commands::INSERT_CELL_BELOW => {
                self.require_notebook(command)?.insert_below()?;
                Ok(Value::Null)
            }
            commands::RUN_CELL => {
                let notebook = self.require_notebook(command)?;
                if let Some(cell) = notebook.active_cell() {
                    self.kernel.execute(cell);
                }
                Ok(Value::Null)
            }
            commands::DELETE_CELL => {
                let deleted = self.require_notebook(command)?.delete_selected()?;
                Ok(Value::from(deleted))
            }
            commands::DESELECT_ALL => {
                self.require_notebook(command)?.deselect_all();
                Ok(Value::Null)
            }
            commands::CHANGE_THEME => self.change_theme(args),
            commands::SAVE => self.save(),
            other => Err(HostError::UnknownCommand(other.to_string())),
        }
    }
}

impl CommandRegistry for SimHost {
    fn execute(&self, command: &str, args: Option<Value>) -> HostFuture<'_, Value> {
        let command = command.to_string();
        Box::pin(async move {
            debug!("[host] Executing {}", command);
            self.dispatched
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(command.clone());
            self.run_command(&command, args.as_ref())
        })
    }
}

impl Host for SimHost {
    fn plugins(&self) -> &dyn PluginRegistry {
        &self.plugins
    }

    fn commands(&self) -> &dyn CommandRegistry {
        self
    }

    fn dom(&self) -> &dyn Dom {
        &self.dom
    }

    fn active_notebook(&self) -> Option<Arc<dyn NotebookPanel>> {
        self.notebook()
            .map(|notebook| notebook as Arc<dyn NotebookPanel>)
    }
}
