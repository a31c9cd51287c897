use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use keystone_consensus::{
    ConsensusConfig, ConsensusEvent, ConsensusMessage, Controller, MessageFactory, TokioRoundTimer,
    Transport,
};
use keystone_core::{GenesisConfig, NodeKey};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::chain::ChainStore;

/// In-process broadcast fabric for a local validator network. Messages go
/// through the wire codec on the way out, so a node sees exactly the bytes a
/// remote peer would.
#[derive(Default)]
pub struct LoopbackTransport {
    peers: Mutex<Vec<mpsc::UnboundedSender<ConsensusEvent>>>,
}

impl LoopbackTransport {
    pub fn register_peer(&self, peer: mpsc::UnboundedSender<ConsensusEvent>) {
        self.peers.lock().unwrap_or_else(|e| e.into_inner()).push(peer);
    }
}

impl Transport for LoopbackTransport {
    fn broadcast(&self, message: &ConsensusMessage) {
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode outbound message");
                return;
            }
        };
        let peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        for peer in peers.iter() {
            match ConsensusMessage::decode(&bytes) {
                // Closed receiver means that peer already shut down
                Ok(decoded) => {
                    let _ = peer.send(ConsensusEvent::Message(decoded));
                }
                Err(e) => warn!(error = %e, "outbound message failed decode"),
            }
        }
    }
}

/// One validator: a signing key, its chain store, and the event loop driving
/// one consensus instance per sequence.
pub struct Node {
    key: NodeKey,
    chain: Arc<ChainStore>,
    transport: Arc<LoopbackTransport>,
    config: ConsensusConfig,
    events_tx: mpsc::UnboundedSender<ConsensusEvent>,
    events_rx: mpsc::UnboundedReceiver<ConsensusEvent>,
}

impl Node {
    pub fn new(key: NodeKey, genesis: &GenesisConfig, config: ConsensusConfig) -> Self {
        let chain = Arc::new(ChainStore::new(genesis, key.validator_id()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Node {
            key,
            chain,
            transport: Arc::new(LoopbackTransport::default()),
            config,
            events_tx,
            events_rx,
        }
    }

    pub fn chain(&self) -> Arc<ChainStore> {
        self.chain.clone()
    }

    /// Inbound queue endpoint, for peers to register with their transports
    pub fn inbox(&self) -> mpsc::UnboundedSender<ConsensusEvent> {
        self.events_tx.clone()
    }

    pub fn register_peer(&self, peer: mpsc::UnboundedSender<ConsensusEvent>) {
        self.transport.register_peer(peer);
    }

    /// Drive consensus until the chain reaches `target_height`
    /// (0 = run forever).
    pub async fn run(mut self, target_height: u64) -> Result<()> {
        let factory = Arc::new(MessageFactory::new(self.key.clone()));
        let timer = Arc::new(TokioRoundTimer::new(self.events_tx.clone()));
        // Messages for sequences beyond the active one, keyed by sequence
        let mut future: BTreeMap<u64, Vec<ConsensusMessage>> = BTreeMap::new();

        while target_height == 0 || self.chain.height() < target_height {
            let sequence = self.chain.height() + 1;
            let mut controller = Controller::new(
                sequence,
                self.chain.as_ref(),
                self.config.clone(),
                factory.clone(),
                self.transport.clone(),
                self.chain.clone(),
                self.chain.clone(),
                self.chain.clone(),
                timer.clone(),
            )?;
            controller.start();

            for message in future.remove(&sequence).unwrap_or_default() {
                controller.handle_message(message);
            }

            while !controller.is_complete() {
                let event = self
                    .events_rx
                    .recv()
                    .await
                    .context("event channel closed")?;
                match event {
                    ConsensusEvent::Message(message) => {
                        let message_sequence = message.round_id().sequence;
                        if message_sequence > sequence {
                            future.entry(message_sequence).or_default().push(message);
                        } else {
                            controller.handle_message(message);
                        }
                    }
                    ConsensusEvent::RoundExpired(round_id) => {
                        controller.handle_round_expiry(round_id);
                    }
                }
            }
            future.retain(|&s, _| s > sequence);
        }

        info!(
            validator = %self.key.validator_id(),
            height = self.chain.height(),
            "target height reached"
        );
        Ok(())
    }
}

/// Run every validator of the network in-process, fully connected over the
/// loopback transport, until each one reaches `blocks`.
pub async fn run_network(
    keys: Vec<NodeKey>,
    genesis: GenesisConfig,
    config: ConsensusConfig,
    blocks: u64,
) -> Result<()> {
    if keys.len() < 2 {
        bail!("at least two validators are required");
    }
    info!(validators = keys.len(), blocks, "starting local network");

    let nodes: Vec<Node> = keys
        .into_iter()
        .map(|key| Node::new(key, &genesis, config.clone()))
        .collect();

    let inboxes: Vec<_> = nodes.iter().map(Node::inbox).collect();
    for (i, node) in nodes.iter().enumerate() {
        for (j, inbox) in inboxes.iter().enumerate() {
            if i != j {
                node.register_peer(inbox.clone());
            }
        }
    }

    let chains: Vec<Arc<ChainStore>> = nodes.iter().map(Node::chain).collect();
    let handles: Vec<_> = nodes
        .into_iter()
        .map(|node| tokio::spawn(node.run(blocks)))
        .collect();
    for handle in handles {
        handle.await??;
    }

    // Every honest node must have finalized the same chain
    let head = chains[0].head_hash()?;
    for chain in &chains[1..] {
        if chain.head_hash()? != head {
            bail!("validators disagree on the chain head");
        }
    }
    info!(height = chains[0].height(), head = %head, "network halted in agreement");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn network_fixture(n: usize) -> (Vec<NodeKey>, GenesisConfig) {
        let keys: Vec<NodeKey> = (0..n).map(|_| NodeKey::generate()).collect();
        let genesis = GenesisConfig {
            chain_id: 1,
            timestamp: 0,
            validators: keys.iter().map(|k| k.validator_id()).collect(),
        };
        (keys, genesis)
    }

    fn fast_config() -> ConsensusConfig {
        ConsensusConfig {
            base_round_timeout: Duration::from_millis(500),
            max_round_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_four_validators_finalize_blocks() {
        let (keys, genesis) = network_fixture(4);
        run_network(keys, genesis, fast_config(), 3).await.unwrap();
    }

    #[tokio::test]
    async fn test_five_validators_finalize_blocks() {
        let (keys, genesis) = network_fixture(5);
        run_network(keys, genesis, fast_config(), 2).await.unwrap();
    }

    #[tokio::test]
    async fn test_single_validator_rejected() {
        let (keys, genesis) = network_fixture(1);
        assert!(run_network(keys, genesis, fast_config(), 1).await.is_err());
    }
}
