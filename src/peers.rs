//! Provides the abstractions used to reach the other nodes of a cluster.
//!
//! A [Group](crate::group::Group) only ever talks to other nodes via a [PeerPicker]. Given a key,
//! the picker either returns the [PeerGetter] of the node which owns the key, or **None** if the
//! key is owned by the local node (or no peers are known at all).
//!
//! The [RingPeerPicker] maps keys to nodes using a [HashRing](crate::consistenthash::HashRing).
//! As shardcache doesn't ship a wire protocol, the actual [PeerGetter] for each node is created
//! by a [PeerConnector] which has to be provided by the transport layer.
//!
//! # Examples
//! ```
//! # use shardcache::peers::{PeerConnector, PeerGetter, PeerPicker, RingPeerPicker};
//! # use std::sync::Arc;
//! struct Remote(String);
//!
//! #[async_trait::async_trait]
//! impl PeerGetter for Remote {
//!     async fn get(&self, group: &str, key: &str) -> anyhow::Result<Vec<u8>> {
//!         Ok(format!("{}/{}/{}", self.0, group, key).into_bytes())
//!     }
//! }
//!
//! struct Connector;
//!
//! impl PeerConnector for Connector {
//!     fn connect(&self, address: &str) -> Arc<dyn PeerGetter> {
//!         Arc::new(Remote(address.to_owned()))
//!     }
//! }
//!
//! let picker = RingPeerPicker::new("10.0.0.1:8080", 50, Arc::new(Connector));
//!
//! // Without peers, everything is handled locally...
//! assert_eq!(picker.pick_peer("Tom").is_none(), true);
//!
//! // With this node being the only member, still everything is handled locally...
//! picker.set_peers(&["10.0.0.1:8080"]);
//! assert_eq!(picker.pick_peer("Tom").is_none(), true);
//! ```
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use yaml_rust::Yaml;

use crate::config::Config;
use crate::consistenthash::{HashRing, DEFAULT_REPLICAS};
use crate::platform::Platform;

/// Fetches values from a remote node.
#[async_trait]
pub trait PeerGetter: Send + Sync {
    /// Asks the remote node for the value of the given key in the given group.
    async fn get(&self, group: &str, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Determines which remote node (if any) is responsible for a key.
pub trait PeerPicker: Send + Sync {
    /// Returns the getter of the node which owns the given key.
    ///
    /// Returns **None** if the key is owned by the local node or if no peers are known.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}

/// Creates a [PeerGetter] for a given address.
///
/// This is the seam to the transport layer which knows how to actually talk to other nodes.
pub trait PeerConnector: Send + Sync {
    /// Creates a getter which talks to the node at the given address.
    fn connect(&self, address: &str) -> Arc<dyn PeerGetter>;
}

/// Picks peers by placing all known nodes on a consistent hash ring.
pub struct RingPeerPicker {
    self_address: String,
    replicas: usize,
    connector: Arc<dyn PeerConnector>,
    state: RwLock<PickerState>,
}

struct PickerState {
    ring: HashRing,
    getters: HashMap<String, Arc<dyn PeerGetter>>,
}

impl RingPeerPicker {
    /// Creates a new picker for the node with the given address.
    ///
    /// Keys which are mapped onto **self_address** are always handled locally.
    pub fn new(self_address: &str, replicas: usize, connector: Arc<dyn PeerConnector>) -> Self {
        RingPeerPicker {
            self_address: self_address.to_owned(),
            replicas,
            connector,
            state: RwLock::new(PickerState {
                ring: HashRing::new(replicas),
                getters: HashMap::new(),
            }),
        }
    }

    /// Replaces the set of known nodes.
    ///
    /// A fresh ring is built for the given addresses. Getters of nodes which remain members are
    /// kept, all others are dropped.
    pub fn set_peers<I, S>(&self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let peers: Vec<String> = peers
            .into_iter()
            .map(|peer| peer.as_ref().to_owned())
            .collect();

        let ring = HashRing::new(self.replicas);
        ring.add(&peers);

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut getters = HashMap::with_capacity(peers.len());
        for peer in &peers {
            let getter = match state.getters.get(peer) {
                Some(getter) => getter.clone(),
                None => self.connector.connect(peer),
            };
            let _ = getters.insert(peer.clone(), getter);
        }

        state.ring = ring;
        state.getters = getters;

        log::info!("Cluster membership has been updated: {}", peers.join(", "));
    }

    /// Adds the given nodes to the set of known nodes.
    pub fn add_peers<I, S>(&self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        for peer in peers {
            let peer = peer.as_ref();
            if !state.getters.contains_key(peer) {
                let getter = self.connector.connect(peer);
                let _ = state.getters.insert(peer.to_owned(), getter);
                state.ring.add([peer]);
                log::info!("Added {} to the cluster.", peer);
            }
        }
    }

    /// Returns the addresses of all known nodes in alphabetical order.
    pub fn peers(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ring
            .nodes()
    }

    /// Returns the address of this node.
    pub fn self_address(&self) -> &str {
        &self.self_address
    }
}

impl PeerPicker for RingPeerPicker {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let owner = state.ring.get(key)?;
        if owner == self.self_address {
            return None;
        }

        log::debug!("Picked peer {} for '{}'.", owner, key);
        state.getters.get(&owner).cloned()
    }
}

fn read_peers(config: &Config) -> Vec<String> {
    match config.current().query("cluster.peers") {
        Yaml::Array(peers) => peers
            .iter()
            .filter_map(|peer| peer.as_str().map(str::to_owned))
            .collect(),
        Yaml::String(peers) => peers
            .split(',')
            .map(|peer| peer.trim().to_owned())
            .filter(|peer| !peer.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Creates and installs a [RingPeerPicker] for the given platform.
///
/// The picker is set up using **cluster.self**, **cluster.peers** and **cluster.replicas** of
/// the system config (the number of replicas defaults to 50). Once the config changes, the set of
/// peers is re-applied.
///
/// Note that this method is also called by the [Builder](crate::builder::Builder) if a
/// connector has been provided via **enable_peers**.
pub fn install(platform: Arc<Platform>, connector: Arc<dyn PeerConnector>) -> Arc<RingPeerPicker> {
    let config = platform.find::<Config>();

    let (self_address, replicas) = match &config {
        Some(config) => {
            let handle = config.current();
            (
                handle
                    .query("cluster.self")
                    .as_str()
                    .unwrap_or_default()
                    .to_owned(),
                handle
                    .query("cluster.replicas")
                    .as_i64()
                    .filter(|replicas| *replicas > 0)
                    .map(|replicas| replicas as usize)
                    .unwrap_or(DEFAULT_REPLICAS),
            )
        }
        None => (String::new(), DEFAULT_REPLICAS),
    };

    if self_address.is_empty() {
        log::warn!("No cluster.self is configured. Keys will never be considered as owned locally.");
    }

    let picker = Arc::new(RingPeerPicker::new(&self_address, replicas, connector));
    platform.register::<RingPeerPicker>(picker.clone());

    if let Some(config) = config {
        picker.set_peers(read_peers(&config));

        let picker = picker.clone();
        let mut notifier = config.notifier();
        crate::spawn!(async move {
            while platform.is_running() {
                match notifier.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => picker.set_peers(read_peers(&config)),
                    Err(RecvError::Closed) => return,
                }
            }
        });
    }

    picker
}
