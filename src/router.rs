//! Hostname-to-backend lookup table, built once at startup
//! from the loaded configuration. Each endpoint gets its own long-lived
//! `BackendWorker` task; the router just hands frontends a cheap, cloneable
//! handle to the right one.

use crate::backend::{BackendHandle, BackendWorker};
use crate::config::Config;
use log::{error, info};
use std::collections::HashMap;
use tokio::task::JoinHandle;

pub struct Router {
    endpoints: HashMap<String, BackendHandle>,
}

impl Router {
    /// Spawns one worker task per configured endpoint and returns the
    /// router alongside their join handles, so the caller can track/await
    /// them (or let them run for the process lifetime).
    pub fn build(config: &Config) -> (Self, Vec<JoinHandle<()>>) {
        let mut endpoints = HashMap::with_capacity(config.endpoints.len());
        let mut handles = Vec::with_capacity(config.endpoints.len());

        for endpoint in &config.endpoints {
            match BackendWorker::new(endpoint) {
                Ok((worker, handle)) => {
                    info!("routing {} -> {}", endpoint.hostname, endpoint.backend);
                    handles.push(tokio::spawn(worker.run()));
                    endpoints.insert(endpoint.hostname.clone(), handle);
                }
                Err(e) => {
                    error!("skipping endpoint {}: {e}", endpoint.hostname);
                }
            }
        }

        (Router { endpoints }, handles)
    }

    pub fn route(&self, hostname: &str) -> Option<BackendHandle> {
        self.endpoints.get(hostname).cloned()
    }
}
