//! Plugin lookup.

use std::sync::Arc;

use log::{debug, warn};

use crate::agent::InPageAgent;
use crate::host::Service;

impl InPageAgent {
    /// Resolve the service of a plugin, activating it first if needed.
    ///
    /// An unregistered plugin never resolves: the returned future stays
    /// pending, and callers that need a bound wrap it in
    /// [`with_deadline`](crate::with_deadline). Activation failures are
    /// ignored; the plugin's service reference is returned either way.
    pub async fn get_plugin(&self, id: &str) -> Option<Service> {
        let plugins = self.host().plugins();

        if !plugins.has_plugin(id) {
            warn!("[plugins] Plugin {} is not registered, waiting indefinitely", id);
            return futures::future::pending().await;
        }

        match plugins.plugin(id) {
            Some(entry) if entry.activated => entry.service,
            _ => {
                debug!("[plugins] Activating plugin {}", id);
                if let Err(e) = plugins.activate_plugin(id).await {
                    debug!("[plugins] Activation of {} settled with error: {}", id, e);
                }
                plugins.plugin(id).and_then(|entry| entry.service)
            }
        }
    }

    /// [`InPageAgent::get_plugin`], downcast to the concrete service type.
    pub async fn get_plugin_as<T: Send + Sync + 'static>(&self, id: &str) -> Option<Arc<T>> {
        self.get_plugin(id)
            .await
            .and_then(|service| service.downcast::<T>().ok())
    }
}
