//! Process-wide node-type registry (spec §4.3).
//!
//! Populated by an explicit `register` call from a bootstrap function
//! (spec §9), never by static-initializer side effects.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::bus::EventBus;
use crate::error::NodeError;
use crate::node::{BaseNode, Node, NodeConfig};

type Constructor = Box<dyn Fn(NodeConfig, Arc<EventBus>) -> Result<Arc<dyn Node>, NodeError> + Send + Sync>;

/// Maps node-type names to constructors.
pub struct NodeRegistry {
    constructors: Mutex<HashMap<String, Constructor>>,
}

impl NodeRegistry {
    fn new() -> Self {
        NodeRegistry {
            constructors: Mutex::new(HashMap::new()),
        }
    }

    pub fn global() -> &'static NodeRegistry {
        static REGISTRY: OnceLock<NodeRegistry> = OnceLock::new();
        REGISTRY.get_or_init(NodeRegistry::new)
    }

    /// Registers a constructor for `node_type`. Re-registering the same
    /// type is an error (spec §4.3).
    pub fn register<F>(&self, node_type: &str, constructor: F) -> Result<(), NodeError>
    where
        F: Fn(NodeConfig, Arc<EventBus>) -> Result<Arc<dyn Node>, NodeError> + Send + Sync + 'static,
    {
        let mut constructors = self.constructors.lock().unwrap();
        if constructors.contains_key(node_type) {
            return Err(NodeError::AlreadyRegistered(node_type.to_string()));
        }
        constructors.insert(node_type.to_string(), Box::new(constructor));
        Ok(())
    }

    /// Builds a node from its configuration via the registered constructor.
    pub fn build(&self, config: NodeConfig, bus: Arc<EventBus>) -> Result<Arc<dyn Node>, NodeError> {
        let constructors = self.constructors.lock().unwrap();
        let ctor = constructors
            .get(&config.node_type)
            .ok_or_else(|| NodeError::UnknownType(config.node_type.clone()))?;
        ctor(config, bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::InProcessPubSub;
    use async_trait::async_trait;

    struct NoopNode {
        base: BaseNode,
    }

    #[async_trait]
    impl Node for NoopNode {
        fn base(&self) -> &BaseNode {
            &self.base
        }
        async fn start(&self) -> Result<(), NodeError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), NodeError> {
            Ok(())
        }
    }

    #[test]
    fn register_then_build_constructs_node() {
        let registry = NodeRegistry::new();
        registry
            .register("noop", |cfg, _bus| {
                Ok(Arc::new(NoopNode { base: BaseNode::from_config(&cfg) }) as Arc<dyn Node>)
            })
            .unwrap();

        let bus = Arc::new(EventBus::new(Arc::new(InProcessPubSub::new())));
        let cfg = NodeConfig::parse("node_type: noop\nname: n1\n").unwrap();
        let node = registry.build(cfg, bus).unwrap();
        assert_eq!(node.name(), "n1");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = NodeRegistry::new();
        registry
            .register("noop", |cfg, _bus| {
                Ok(Arc::new(NoopNode { base: BaseNode::from_config(&cfg) }) as Arc<dyn Node>)
            })
            .unwrap();
        let err = registry
            .register("noop", |cfg, _bus| {
                Ok(Arc::new(NoopNode { base: BaseNode::from_config(&cfg) }) as Arc<dyn Node>)
            })
            .unwrap_err();
        assert!(matches!(err, NodeError::AlreadyRegistered(_)));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let registry = NodeRegistry::new();
        let bus = Arc::new(EventBus::new(Arc::new(InProcessPubSub::new())));
        let cfg = NodeConfig::parse("node_type: mystery\nname: n1\n").unwrap();
        let result = registry.build(cfg, bus);
        assert!(matches!(result, Err(NodeError::UnknownType(_))));
    }
}
