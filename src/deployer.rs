//! Node deployer (spec §4.4): owns a set of running nodes and drives
//! insertion-ordered, per-node-timeout shutdown.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::NodeError;
use crate::node::{BaseNode, Node};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Deploys and owns nodes in insertion order, so shutdown always proceeds
/// FIFO regardless of `HashMap` iteration order (spec §4.4).
pub struct NodeDeployer {
    nodes: Vec<(String, Arc<dyn Node>)>,
    shutdown_timeout: Duration,
}

impl NodeDeployer {
    pub fn new() -> Self {
        NodeDeployer {
            nodes: Vec::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Starts `node` and adds it to the deployer if `start` succeeds.
    pub async fn deploy(&mut self, node: Arc<dyn Node>) -> Result<(), NodeError> {
        node.start().await?;
        info!(name = node.name(), node_type = node.node_type(), "node started");
        self.nodes.push((node.name().to_string(), node));
        Ok(())
    }

    /// Stops every node in insertion order, each bounded by the configured
    /// timeout. Collects and returns the first error encountered, but keeps
    /// stopping remaining nodes regardless (spec §4.4: best-effort drain).
    pub async fn shutdown(&mut self) -> Result<(), NodeError> {
        let mut first_err = None;
        for (name, node) in self.nodes.drain(..) {
            let result = tokio::time::timeout(self.shutdown_timeout, node.stop()).await;
            match result {
                Ok(Ok(())) => info!(name = %name, "node stopped"),
                Ok(Err(e)) => {
                    warn!(name = %name, error = %e, "node stop failed");
                    first_err.get_or_insert(e);
                }
                Err(_) => {
                    warn!(name = %name, "node shutdown timed out");
                    first_err.get_or_insert(NodeError::ShutdownTimeout(name));
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for NodeDeployer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingNode {
        base: BaseNode,
        order: Arc<Mutex<Vec<String>>>,
        stop_delay: Duration,
    }

    #[async_trait]
    impl Node for RecordingNode {
        fn base(&self) -> &BaseNode {
            &self.base
        }
        async fn start(&self) -> Result<(), NodeError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), NodeError> {
            tokio::time::sleep(self.stop_delay).await;
            self.order.lock().unwrap().push(self.base.name.clone());
            Ok(())
        }
    }

    fn base_node(name: &str) -> BaseNode {
        BaseNode::new(name, "recording", HashMap::new(), HashMap::new(), HashMap::new())
    }

    #[tokio::test]
    async fn shutdown_stops_nodes_in_insertion_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut deployer = NodeDeployer::new();
        for name in ["a", "b", "c"] {
            deployer
                .deploy(Arc::new(RecordingNode {
                    base: base_node(name),
                    order: order.clone(),
                    stop_delay: Duration::from_millis(0),
                }))
                .await
                .unwrap();
        }
        deployer.shutdown().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    struct HangingNode {
        base: BaseNode,
        started: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Node for HangingNode {
        fn base(&self) -> &BaseNode {
            &self.base
        }
        async fn start(&self) -> Result<(), NodeError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn stop(&self) -> Result<(), NodeError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_times_out_a_stuck_node() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut deployer = NodeDeployer::new().with_shutdown_timeout(Duration::from_millis(100));
        deployer
            .deploy(Arc::new(HangingNode { base: base_node("hanging"), started: started.clone() }))
            .await
            .unwrap();

        let err = deployer.shutdown().await.unwrap_err();
        assert!(matches!(err, NodeError::ShutdownTimeout(_)));
        assert!(deployer.is_empty());
    }
}
