//! Graceful removal of a single node.

use crate::{ClusterHandle, Error, Result};
use std::time::Duration;
use tracing::{info, warn};

/// Sends the graceful-stop signal to a node and waits for it to exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecommissionController;

impl DecommissionController {
    pub fn new() -> Self {
        Self
    }

    /// Returns the exit code; `0` means a clean decommission and `128 + n`
    /// means the node died from signal `n`.
    ///
    /// The node stays registered with its cluster either way. If it is still
    /// running after `timeout` this fails with [`Error::DecommissionTimeout`]
    /// and the node is left for teardown.
    pub async fn decommission(&self, handle: &mut ClusterHandle, timeout: Duration) -> Result<i32> {
        let node = handle.name().to_string();
        info!(node = %node, ?timeout, "decommissioning");

        handle.process_mut().send_graceful_shutdown()?;
        let exited = handle.process_mut().wait(timeout).await?;

        match exited {
            Some(code) => {
                handle.mark_decommissioned();
                if code == 0 {
                    info!(node = %node, "decommissioned");
                } else {
                    warn!(node = %node, code, "node exited with non-zero code during decommission");
                }
                Ok(code)
            }
            None => Err(Error::DecommissionTimeout { node, timeout }),
        }
    }
}
