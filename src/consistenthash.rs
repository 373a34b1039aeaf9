//! Provides a consistent hash ring which maps keys to the nodes of a cluster.
//!
//! Each node is placed on the ring multiple times (as virtual nodes or replicas) at the
//! positions **hash("{i}{node}")** for **i** in **0..replicas**. A key is owned by the node at the
//! first position which is greater than or equal to the hash of the key (wrapping around at
//! the end of the ring).
//!
//! As a node only ever claims positions for itself, adding or removing a node only moves the
//! keys which fall into the ranges claimed (or released) by this very node. All other keys
//! remain with their owners.
//!
//! # Examples
//! ```
//! # use shardcache::consistenthash::HashRing;
//! let ring = HashRing::new(50);
//! ring.add(&["node1", "node2", "node3"]);
//!
//! let owner = ring.get("Tom").unwrap();
//! assert_eq!(ring.nodes().contains(&owner), true);
//!
//! // The same key is always routed to the same node...
//! assert_eq!(ring.get("Tom").unwrap(), owner);
//! ```
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use fnv::{FnvHashMap, FnvHashSet};

/// Describes the hash function used to place nodes and keys on the ring.
pub type HashFn = fn(&[u8]) -> u32;

/// Contains the number of positions per node used if nothing else is configured.
pub const DEFAULT_REPLICAS: usize = 50;

/// Maps keys to nodes using consistent hashing.
///
/// The ring is guarded by a read/write lock so that it can be shared among all tasks and updated
/// while the cluster topology changes.
pub struct HashRing {
    hash: HashFn,
    replicas: usize,
    state: RwLock<RingState>,
}

#[derive(Default)]
struct RingState {
    positions: Vec<u32>,
    owners: FnvHashMap<u32, String>,
    nodes: FnvHashSet<String>,
}

impl HashRing {
    /// Creates a new ring which places each node at the given number of positions.
    ///
    /// The positions are computed using CRC32 (IEEE).
    pub fn new(replicas: usize) -> Self {
        HashRing::with_hash(replicas, crc32fast::hash)
    }

    /// Creates a new ring which uses a custom hash function.
    pub fn with_hash(replicas: usize, hash: HashFn) -> Self {
        HashRing {
            hash,
            replicas,
            state: RwLock::new(RingState::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RingState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RingState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn position(&self, replica: usize, node: &str) -> u32 {
        (self.hash)(format!("{}{}", replica, node).as_bytes())
    }

    /// Places the given nodes on the ring.
    ///
    /// Nodes which are already present are skipped. If a position is already claimed by another
    /// node (a hash collision), the position stays with its current owner.
    pub fn add<I, S>(&self, nodes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.write();
        for node in nodes {
            let node = node.as_ref();
            if state.nodes.contains(node) {
                log::debug!("Node {} is already part of the hash ring.", node);
                continue;
            }

            for replica in 0..self.replicas {
                let position = self.position(replica, node);
                if state.owners.contains_key(&position) {
                    log::warn!(
                        "Position {} of node {} collides with another node and will be skipped.",
                        position,
                        node
                    );
                    continue;
                }

                state.positions.push(position);
                let _ = state.owners.insert(position, node.to_owned());
            }

            let _ = state.nodes.insert(node.to_owned());
            log::debug!("Added node {} to the hash ring.", node);
        }

        state.positions.sort_unstable();
    }

    /// Removes the given nodes from the ring.
    ///
    /// Only positions actually owned by the removed nodes are released. Unknown nodes are
    /// ignored.
    pub fn remove<I, S>(&self, nodes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut guard = self.write();
        let state = &mut *guard;
        for node in nodes {
            let node = node.as_ref();
            if !state.nodes.remove(node) {
                log::debug!("Node {} is not part of the hash ring.", node);
                continue;
            }

            for replica in 0..self.replicas {
                let position = self.position(replica, node);
                if state.owners.get(&position).map(String::as_str) == Some(node) {
                    let _ = state.owners.remove(&position);
                    state.positions.retain(|p| *p != position);
                }
            }

            log::debug!("Removed node {} from the hash ring.", node);
        }
    }

    /// Returns the node which owns the given key or **None** if the ring is empty.
    pub fn get(&self, key: &str) -> Option<String> {
        let state = self.read();
        if state.positions.is_empty() {
            return None;
        }

        let hash = (self.hash)(key.as_bytes());
        let index = state.positions.partition_point(|position| *position < hash);
        let position = state.positions[index % state.positions.len()];

        state.owners.get(&position).cloned()
    }

    /// Determines if there are no nodes on the ring.
    pub fn is_empty(&self) -> bool {
        self.read().positions.is_empty()
    }

    /// Returns the number of positions on the ring.
    pub fn len(&self) -> usize {
        self.read().positions.len()
    }

    /// Returns all nodes on the ring in alphabetical order.
    pub fn nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.read().nodes.iter().cloned().collect();
        nodes.sort();

        nodes
    }

    /// Returns the number of positions per node.
    pub fn replicas(&self) -> usize {
        self.replicas
    }
}
