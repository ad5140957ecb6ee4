//! One provisioned node: its spec, process and SQL client.

use crate::{Error, NodeSpec, ProcessControl, Result};
use decom_client::QueryClient;
use std::sync::Arc;
use tracing::{info, warn};

/// A node owned by a [`ClusterHarness`](crate::ClusterHarness).
pub struct ClusterHandle {
    spec: NodeSpec,
    process: Box<dyn ProcessControl>,
    client: Arc<dyn QueryClient>,
    decommissioned: bool,
}

impl ClusterHandle {
    pub fn new(spec: NodeSpec, process: Box<dyn ProcessControl>, client: Arc<dyn QueryClient>) -> Self {
        Self {
            spec,
            process,
            client,
            decommissioned: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    pub fn client(&self) -> Arc<dyn QueryClient> {
        Arc::clone(&self.client)
    }

    pub fn process_mut(&mut self) -> &mut dyn ProcessControl {
        self.process.as_mut()
    }

    /// True once the node has left the cluster through a graceful stop.
    pub fn is_decommissioned(&self) -> bool {
        self.decommissioned
    }

    pub(crate) fn mark_decommissioned(&mut self) {
        self.decommissioned = true;
    }

    /// Live means running and not decommissioned.
    pub fn is_live(&mut self) -> bool {
        !self.decommissioned && self.process.is_running()
    }

    /// Starts the node, retrying up to `max_attempts` times.
    ///
    /// A failed attempt is stopped before the next one.
    pub async fn start_with_retry(&mut self, max_attempts: u32) -> Result<()> {
        let max_attempts = max_attempts.max(1);
        let mut last = String::new();

        for attempt in 1..=max_attempts {
            match self.process.start().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(node = %self.spec.name, attempt, max_attempts, error = %e, "start attempt failed");
                    last = e.to_string();
                    if let Err(stop_err) = self.process.stop().await {
                        warn!(node = %self.spec.name, error = %stop_err, "cleanup after failed start");
                    }
                }
            }
        }

        Err(Error::StartupFailed {
            node: self.spec.name.clone(),
            attempts: max_attempts,
            last,
        })
    }

    /// Stops the node; a no-op when it already exited.
    pub async fn stop(&mut self) -> Result<()> {
        self.process.stop().await?;
        info!(node = %self.spec.name, "stopped");
        Ok(())
    }
}

impl std::fmt::Debug for ClusterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterHandle")
            .field("name", &self.spec.name)
            .field("http_port", &self.spec.http_port)
            .field("pid", &self.process.pid())
            .field("decommissioned", &self.decommissioned)
            .finish_non_exhaustive()
    }
}
