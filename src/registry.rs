//! Keeps all groups of a node so that they can be looked up by their name.
//!
//! A transport layer which receives a request for a group and key uses [Groups::find] to resolve
//! the group. The registry is installed by the [Builder](crate::builder::Builder) and can be
//! obtained via `platform.require::<Groups>()`.
//!
//! Groups can either be created with an explicit capacity and TTL via [Groups::create] or be
//! defined via [Groups::define], which reads these settings from the system config:
//! ```yaml
//! groups:
//!     scores:
//!         capacity: 2k
//!         ttl: 10m
//! ```
//!
//! # Examples
//! ```
//! # use shardcache::builder::Builder;
//! # use shardcache::group::GetterFn;
//! # use shardcache::registry::Groups;
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! # #[tokio::main]
//! # async fn main() {
//! let platform = Builder::new().enable_groups().build().await;
//! let groups = platform.require::<Groups>();
//!
//! let getter = Arc::new(GetterFn::new(|key: &str| Ok(key.as_bytes().to_vec())));
//! groups.create("scores", 2048, Duration::from_secs(600), getter.clone()).unwrap();
//!
//! // Group names are unique...
//! assert_eq!(groups.create("scores", 2048, Duration::from_secs(600), getter).is_err(), true);
//!
//! assert_eq!(groups.find("scores").unwrap().get("Tom").await.unwrap().as_str(), "Tom");
//! assert_eq!(groups.find("unknown").is_none(), true);
//! # }
//! ```
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use yaml_rust::Yaml;

use crate::config::Config;
use crate::fmt::{format_duration, format_size, parse_duration, parse_size};
use crate::group::{Getter, Group};
use crate::peers::{PeerPicker, RingPeerPicker};
use crate::platform::Platform;

/// Contains the capacity of a group (in bytes) if none is configured.
pub const DEFAULT_CAPACITY: usize = 2 << 10;

/// Contains the time to live of the entries of a group if none is configured.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

/// Keeps all groups of a node by their name.
#[derive(Default)]
pub struct Groups {
    groups: RwLock<HashMap<String, Arc<Group>>>,
    config: Option<Arc<Config>>,
    picker: Option<Arc<dyn PeerPicker>>,
}

impl Groups {
    /// Creates a new and empty registry which doesn't know any config or peers.
    pub fn new() -> Self {
        Groups::default()
    }

    /// Creates a registry which uses the given config and peer picker.
    ///
    /// Each group created by this registry is connected to the given picker.
    pub fn with(config: Option<Arc<Config>>, picker: Option<Arc<dyn PeerPicker>>) -> Self {
        Groups {
            groups: RwLock::new(HashMap::new()),
            config,
            picker,
        }
    }

    /// Creates a registry and registers it in the given platform.
    ///
    /// The registry picks up the **Config** and the [RingPeerPicker] of the platform (if present).
    /// Therefore both have to be installed beforehand.
    pub fn install(platform: &Arc<Platform>) -> Arc<Groups> {
        let picker = platform
            .find::<RingPeerPicker>()
            .map(|picker| -> Arc<dyn PeerPicker> { picker });
        let groups = Arc::new(Groups::with(platform.find::<Config>(), picker));
        platform.register::<Groups>(groups.clone());

        groups
    }

    /// Creates a new group with the given name.
    ///
    /// # Errors
    /// Fails if a group with the same name already exists.
    pub fn create(
        &self,
        name: &str,
        capacity: usize,
        ttl: Duration,
        getter: Arc<dyn Getter>,
    ) -> anyhow::Result<Arc<Group>> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        if groups.contains_key(name) {
            return Err(anyhow::anyhow!("A group named '{}' already exists.", name));
        }

        let group = Group::new(name, capacity, ttl, getter);
        if let Some(picker) = &self.picker {
            group.register_peers(picker.clone());
        }
        let _ = groups.insert(name.to_owned(), group.clone());

        log::info!(
            "Created group {} (capacity: {}, ttl: {}).",
            name,
            format_size(capacity),
            format_duration(ttl)
        );

        Ok(group)
    }

    /// Creates a new group using the capacity and TTL given in the system config.
    ///
    /// These are read from **groups.NAME.capacity** (which defaults to 2k) and
    /// **groups.NAME.ttl** (which defaults to 10m).
    ///
    /// # Errors
    /// Fails if a group with the same name already exists or if the config contains an invalid
    /// setting for this group.
    pub fn define(&self, name: &str, getter: Arc<dyn Getter>) -> anyhow::Result<Arc<Group>> {
        let (capacity, ttl) = match &self.config {
            Some(config) => {
                let handle = config.current();
                let settings = &handle.query("groups")[name];
                (
                    setting(&settings["capacity"], DEFAULT_CAPACITY, |value| {
                        parse_size(value)
                    })?,
                    setting(&settings["ttl"], DEFAULT_TTL, |value| parse_duration(value))?,
                )
            }
            None => (DEFAULT_CAPACITY, DEFAULT_TTL),
        };

        self.create(name, capacity, ttl, getter)
    }

    /// Returns the group with the given name.
    pub fn find(&self, name: &str) -> Option<Arc<Group>> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Returns the names of all groups in alphabetical order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();

        names
    }
}

/// Reads a setting which is either given as number or as expression (like "2k" or "10m").
fn setting<T>(
    value: &Yaml,
    default: T,
    parser: impl Fn(&str) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    match value {
        Yaml::BadValue | Yaml::Null => Ok(default),
        Yaml::Integer(number) => parser(&number.to_string()),
        Yaml::String(expression) => parser(expression),
        other => Err(anyhow::anyhow!("Invalid setting: {:?}", other)),
    }
}

/// Creates and installs a [Groups] registry for the given platform.
///
/// See [Groups::install]. Note that this method is also called by the
/// [Builder](crate::builder::Builder) unless the groups are disabled.
pub fn install(platform: &Arc<Platform>) -> Arc<Groups> {
    Groups::install(platform)
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::config::Config;
    use crate::group::{Getter, GetterFn};
    use crate::peers::{PeerConnector, PeerGetter, RingPeerPicker};
    use crate::platform::Platform;
    use crate::registry::{Groups, DEFAULT_CAPACITY, DEFAULT_TTL};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    fn echo() -> Arc<dyn Getter> {
        Arc::new(GetterFn::new(|key: &str| Ok(key.as_bytes().to_vec())))
    }

    #[test]
    fn names_are_unique() {
        crate::testing::test_async(async {
            let groups = Groups::new();
            let _ = groups
                .create("b", 1024, Duration::from_secs(60), echo())
                .unwrap();
            let _ = groups
                .create("a", 1024, Duration::from_secs(60), echo())
                .unwrap();

            assert_eq!(
                groups
                    .create("a", 2048, Duration::from_secs(60), echo())
                    .is_err(),
                true
            );
            assert_eq!(groups.names(), vec!["a", "b"]);
            assert_eq!(groups.find("a").unwrap().cache().capacity(), 1024);
            assert_eq!(groups.find("c").is_none(), true);
        });
    }

    struct Remote;

    #[async_trait::async_trait]
    impl PeerGetter for Remote {
        async fn get(&self, _group: &str, key: &str) -> anyhow::Result<Vec<u8>> {
            Ok(format!("remote {}", key).into_bytes())
        }
    }

    impl PeerConnector for Remote {
        fn connect(&self, _address: &str) -> Arc<dyn PeerGetter> {
            Arc::new(Remote)
        }
    }

    #[test]
    fn installed_registries_use_the_peers_of_the_platform() {
        crate::testing::test_async(async {
            let platform = Platform::new();
            let picker = Arc::new(RingPeerPicker::new("self:1", 50, Arc::new(Remote)));
            picker.set_peers(["other:1"]);
            platform.register::<RingPeerPicker>(picker);

            let groups = Groups::install(&platform);
            assert_eq!(Arc::ptr_eq(&groups, &platform.require::<Groups>()), true);

            let scores = groups
                .create("scores", 1024, Duration::from_secs(60), echo())
                .unwrap();
            assert_eq!(scores.get("Tom").await.unwrap().as_str(), "remote Tom");
            assert_eq!(scores.stats().peer_loads, 1);
        });
    }

    #[test]
    fn settings_are_read_from_the_config() {
        crate::testing::test_async(async {
            let platform = Builder::new().enable_config().enable_groups().build().await;
            platform
                .require::<Config>()
                .load_from_string(
                    "groups:\n  scores:\n    capacity: 8k\n    ttl: 90\n  broken:\n    ttl: soon",
                    Some(SystemTime::now()),
                )
                .unwrap();
            let groups = platform.require::<Groups>();

            let scores = groups.define("scores", echo()).unwrap();
            assert_eq!(scores.cache().capacity(), 8192);
            assert_eq!(scores.cache().ttl(), Duration::from_secs(90));

            let defaults = groups.define("defaults", echo()).unwrap();
            assert_eq!(defaults.cache().capacity(), DEFAULT_CAPACITY);
            assert_eq!(defaults.cache().ttl(), DEFAULT_TTL);

            assert_eq!(groups.define("broken", echo()).is_err(), true);
            assert_eq!(groups.find("broken").is_none(), true);
        });
    }
}
