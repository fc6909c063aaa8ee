use super::{NodeAddr, NodeClient, RedisNodeClient, Topology};
use crate::config::ConnectionConfig;
use crate::error::{KeyscopeError, Result};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Connected clients for every node of a topology
pub struct NodeRegistry {
    topology: Topology,
    clients: HashMap<NodeAddr, Arc<dyn NodeClient>>,
}

impl NodeRegistry {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            clients: HashMap::new(),
        }
    }

    /// Build a registry from already-connected clients.
    ///
    /// The client order becomes the node enumeration order; a single client
    /// gives a standalone topology.
    pub fn with_clients(clients: Vec<Arc<dyn NodeClient>>) -> Self {
        let topology = match clients.as_slice() {
            [single] => Topology::Standalone(single.addr().clone()),
            _ => Topology::Cluster(
                clients
                    .iter()
                    .map(|c| super::ShardInfo::new(c.addr().clone(), Vec::new()))
                    .collect(),
            ),
        };

        let mut registry = Self::new(topology);
        for client in clients {
            registry.insert(client);
        }
        registry
    }

    pub fn insert(&mut self, client: Arc<dyn NodeClient>) {
        self.clients.insert(client.addr().clone(), client);
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Nodes in topology order
    pub fn nodes(&self) -> Vec<NodeAddr> {
        self.topology.nodes()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn client(&self, addr: &NodeAddr) -> Result<Arc<dyn NodeClient>> {
        self.clients
            .get(addr)
            .cloned()
            .ok_or_else(|| KeyscopeError::UnknownNode(addr.clone()))
    }

    /// Connect to `seed`, discover the topology and open one connection per
    /// master. The seed connection is reused when it is one of the masters.
    pub async fn connect(seed: NodeAddr, config: &ConnectionConfig) -> Result<Self> {
        let seed_client: Arc<dyn NodeClient> =
            Arc::new(RedisNodeClient::connect(seed.clone(), config).await?);
        let topology = Topology::discover(seed_client.as_ref()).await?;

        let mut registry = Self::new(topology);
        let others: Vec<NodeAddr> = registry
            .nodes()
            .into_iter()
            .filter(|addr| *addr != seed)
            .collect();

        if registry.nodes().contains(&seed) {
            registry.insert(seed_client);
        }

        let connections = join_all(
            others
                .into_iter()
                .map(|addr| RedisNodeClient::connect(addr, config)),
        )
        .await;
        for client in connections {
            registry.insert(Arc::new(client?));
        }

        info!(
            "Connected to {} node(s) ({})",
            registry.len(),
            if registry.topology.is_cluster() {
                "cluster"
            } else {
                "standalone"
            }
        );

        Ok(registry)
    }
}
