//! Provides a builder which can be used to setup and initialize a node.
//!
//! As shardcache provides some optional components, a builder permits to selectively enable or
//! disable them. Note that peers are only set up if a [PeerConnector] is provided, as the
//! transport to reach other nodes isn't part of this crate.
//!
//! # Example
//! Setting up a node with all features enabled:
//! ```no_run
//! # use shardcache::builder::Builder;
//! # use shardcache::group::GetterFn;
//! # use shardcache::registry::Groups;
//! # use std::sync::Arc;
//! #[tokio::main]
//! async fn main() {
//!     // Enable all features and build the platform...
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     // Define the groups of this node...
//!     platform
//!         .require::<Groups>()
//!         .define("scores", Arc::new(GetterFn::new(|key: &str| Ok(key.as_bytes().to_vec()))))
//!         .unwrap();
//! }
//! ```
use std::sync::Arc;

use crate::peers::PeerConnector;
use crate::platform::Platform;
use crate::{init_logging, SHARDCACHE_REVISION, SHARDCACHE_VERSION};

/// Initializes a node by creating and installing all enabled components.
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    setup_config: bool,
    setup_groups: bool,
    connector: Option<Arc<dyn PeerConnector>>,
}

impl Builder {
    /// Creates a new builder with all components disabled.
    pub fn new() -> Self {
        Builder::default()
    }

    /// Enables logging, config and groups.
    ///
    /// Note that peers still have to be enabled via [enable_peers](Builder::enable_peers) as
    /// this requires a connector.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.setup_config = true;
        self.setup_groups = true;

        self
    }

    /// Enables the automatic setup of the logging system.
    ///
    /// Using this, we properly initialize **simplelog** to log to stdout. As we intend nodes to
    /// be run in docker containers, this is all that is needed for proper logging.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the automatic setup of the logging system after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Installs [config::Config](crate::config::Config) and loads the **settings.yml**.
    ///
    /// For more details see: [config](crate::config)
    pub fn enable_config(mut self) -> Self {
        self.setup_config = true;
        self
    }

    /// Disables setting up a **Config** instance after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_config(mut self) -> Self {
        self.setup_config = false;
        self
    }

    /// Creates and installs a [Groups](crate::registry::Groups) registry.
    ///
    /// For more details see: [registry](crate::registry)
    pub fn enable_groups(mut self) -> Self {
        self.setup_groups = true;
        self
    }

    /// Disables setting up the **Groups** registry after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_groups(mut self) -> Self {
        self.setup_groups = false;
        self
    }

    /// Installs a [RingPeerPicker](crate::peers::RingPeerPicker) which uses the given connector
    /// to reach other nodes.
    ///
    /// For more details see: [peers](crate::peers)
    pub fn enable_peers(mut self, connector: Arc<dyn PeerConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Disables setting up peers after [enable_peers()](Builder::enable_peers) has been used.
    pub fn disable_peers(mut self) -> Self {
        self.connector = None;
        self
    }

    /// Builds the [Platform](crate::platform::Platform) registry with all the enabled components
    /// being registered.
    pub async fn build(self) -> Arc<Platform> {
        let platform = Platform::new();

        if self.setup_logging {
            init_logging();
        }

        log::info!(
            "||. SHARDCACHE (v {} - rev {}) running on {} core(s) in {} CPU(s)",
            SHARDCACHE_VERSION,
            SHARDCACHE_REVISION,
            num_cpus::get(),
            num_cpus::get_physical()
        );

        if self.setup_config {
            let _ = crate::config::install(platform.clone()).await;
        }

        if let Some(connector) = self.connector {
            let _ = crate::peers::install(platform.clone(), connector);
        }

        if self.setup_groups {
            let _ = crate::registry::install(&platform);
        }

        platform
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::config::Config;
    use crate::peers::{PeerConnector, PeerGetter, RingPeerPicker};
    use crate::registry::Groups;
    use std::sync::Arc;

    struct Unreachable;

    #[async_trait::async_trait]
    impl PeerGetter for Unreachable {
        async fn get(&self, _group: &str, key: &str) -> anyhow::Result<Vec<u8>> {
            Err(anyhow::anyhow!("Cannot reach the owner of '{}'.", key))
        }
    }

    impl PeerConnector for Unreachable {
        fn connect(&self, _address: &str) -> Arc<dyn PeerGetter> {
            Arc::new(Unreachable)
        }
    }

    #[test]
    fn only_enabled_components_are_installed() {
        crate::testing::test_async(async {
            let platform = Builder::new().enable_all().disable_config().build().await;

            assert_eq!(platform.find::<Groups>().is_some(), true);
            assert_eq!(platform.find::<Config>().is_none(), true);
            assert_eq!(platform.find::<RingPeerPicker>().is_none(), true);
        });
    }

    #[test]
    fn groups_fall_back_to_local_loads_if_peers_fail() {
        crate::testing::test_async(async {
            let platform = Builder::new()
                .enable_all()
                .enable_peers(Arc::new(Unreachable))
                .build()
                .await;
            platform
                .require::<RingPeerPicker>()
                .set_peers(["remote:1", "remote:2"]);

            let groups = platform.require::<Groups>();
            let scores = groups
                .define(
                    "scores",
                    Arc::new(crate::group::GetterFn::new(|key: &str| {
                        Ok(key.as_bytes().to_vec())
                    })),
                )
                .unwrap();

            assert_eq!(scores.get("Tom").await.unwrap().as_str(), "Tom");
            assert_eq!(scores.stats().peer_errors, 1);
            assert_eq!(scores.stats().local_loads, 1);
        });
    }
}
