//! Contains the system configuration.
//!
//! The config of a node is read from **config/settings.yml**. The file is checked for changes
//! every two seconds and reloaded once it has been modified. Components which derive state from
//! the config (like the set of peers) subscribe to [Config::notifier] and re-apply their settings
//! whenever a change is announced. A node therefore picks up a new set of peers without a
//! restart.
//!
//! The following settings are known:
//! ```yaml
//! cluster:
//!     # The address of this node as it is known to its peers.
//!     self: "10.0.0.1:8080"
//!     # The addresses of all nodes (including this one).
//!     peers: [ "10.0.0.1:8080", "10.0.0.2:8080" ]
//!     # The number of positions per node on the hash ring.
//!     replicas: 50
//! groups:
//!     scores:
//!         # The capacity of the heat tier. The cold tier is half its size.
//!         capacity: 2k
//!         # The time to live of each entry.
//!         ttl: 10m
//! ```
//!
//! A [Handle] obtained via [Config::current] is a snapshot. It is not updated by a reload and
//! should therefore only be kept while processing a change.
//!
//! # Examples
//! ```
//! # use shardcache::config::Config;
//! let config = Config::new("settings.yml");
//! config.load_from_string("cluster:\n    replicas: 25", None).unwrap();
//!
//! let mut changes = config.notifier();
//! config.load_from_string("cluster:\n    replicas: 30", None).unwrap();
//!
//! assert_eq!(changes.try_recv().is_ok(), true);
//! assert_eq!(config.current().query("cluster.replicas").as_i64(), Some(30));
//! assert_eq!(config.current().query("cluster.peers").is_badvalue(), true);
//! ```
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use arc_swap::ArcSwap;
use tokio::sync::broadcast;
use yaml_rust::{Yaml, YamlLoader};

use crate::platform::Platform;

/// Contains the location of the config file which is loaded by [install].
pub const SETTINGS_FILE: &str = "config/settings.yml";

/// Determines how often the config file is checked for modifications.
const RELOAD_INTERVAL: Duration = Duration::from_secs(2);

struct Snapshot {
    doc: Yaml,
    loaded_from: Option<SystemTime>,
}

/// Provides access to the system configuration.
///
/// Most probably a config instance is installed by the [Builder](crate::builder::Builder) and
/// can be obtained via `platform.require::<Config>()`.
pub struct Config {
    filename: String,
    changes: broadcast::Sender<()>,
    snapshot: ArcSwap<Snapshot>,
}

/// Represents a snapshot of the configuration.
pub struct Handle {
    snapshot: Arc<Snapshot>,
}

impl Config {
    /// Creates an empty config which reads the given file once [load](Config::load) is called.
    pub fn new(filename: &str) -> Self {
        let (changes, _) = broadcast::channel(1);
        Config {
            filename: filename.to_owned(),
            changes,
            snapshot: ArcSwap::from_pointee(Snapshot {
                doc: Yaml::Null,
                loaded_from: None,
            }),
        }
    }

    /// Subscribes to config changes.
    ///
    /// A message is received each time a new config has been loaded. The message itself carries
    /// no information, the new config has to be fetched via [current](Config::current).
    pub fn notifier(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }

    /// Returns a snapshot of the currently loaded config.
    pub fn current(&self) -> Handle {
        Handle {
            snapshot: self.snapshot.load_full(),
        }
    }

    /// Reads the config file.
    ///
    /// A missing file (or a directory in its place, as created for an unmounted docker volume)
    /// is not an error, the current config is simply kept.
    ///
    /// # Errors
    /// Fails if the file cannot be read or doesn't contain valid YAML.
    pub async fn load(&self) -> anyhow::Result<()> {
        let metadata = match tokio::fs::metadata(&self.filename).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => {
                log::info!("No config file present at {}.", self.filename);
                return Ok(());
            }
        };

        log::info!("Loading config file {}...", self.filename);
        let data = tokio::fs::read_to_string(&self.filename)
            .await
            .with_context(|| format!("Cannot read config file {}", self.filename))?;

        self.load_from_string(&data, metadata.modified().ok())
    }

    /// Replaces the config by the given YAML document and notifies all subscribers.
    ///
    /// The timestamp is the modification time of the file the data was read from (if any). It is
    /// used to detect further modifications.
    ///
    /// # Errors
    /// Fails if the data isn't valid YAML. The current config is kept in this case.
    pub fn load_from_string(
        &self,
        data: &str,
        modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let doc = YamlLoader::load_from_str(data)
            .map_err(|error| {
                anyhow::anyhow!("Cannot parse config {}: {}", self.filename, error)
            })?
            .into_iter()
            .next()
            .unwrap_or(Yaml::Null);

        self.snapshot.store(Arc::new(Snapshot {
            doc,
            loaded_from: modified,
        }));
        let _ = self.changes.send(());

        Ok(())
    }

    /// Determines if a file with the given modification time is newer than the loaded config.
    fn is_outdated(&self, modified: Option<SystemTime>) -> bool {
        match (modified, self.snapshot.load().loaded_from) {
            (Some(modified), Some(loaded_from)) => modified > loaded_from,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    async fn modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .filter(|metadata| metadata.is_file())
            .and_then(|metadata| metadata.modified().ok())
    }
}

impl Handle {
    /// Returns the root of the config document.
    pub fn root(&self) -> &Yaml {
        &self.snapshot.doc
    }

    /// Resolves a dot separated path like **cluster.peers**.
    ///
    /// Returns **Yaml::BadValue** if any part of the path is missing.
    pub fn query(&self, path: impl AsRef<str>) -> &Yaml {
        path.as_ref()
            .split('.')
            .fold(self.root(), |node, segment| &node[segment])
    }
}

/// Creates a **Config** for [SETTINGS_FILE], loads it and registers it in the given platform.
///
/// Also starts a task which reloads the file once its modification time changes. This task
/// stops once the platform is terminated.
///
/// Note that this method is also called by the [Builder](crate::builder::Builder) unless the
/// **Config** part is disabled.
pub async fn install(platform: Arc<Platform>) -> Arc<Config> {
    let config = Arc::new(Config::new(SETTINGS_FILE));
    platform.register::<Config>(config.clone());

    if let Err(error) = config.load().await {
        log::error!("{:#}", error);
    }

    let monitored = config.clone();
    crate::spawn!(async move {
        let mut timer = tokio::time::interval(RELOAD_INTERVAL);
        while platform.is_running() {
            let _ = timer.tick().await;
            if monitored.is_outdated(monitored.modified().await) {
                match monitored.load().await {
                    Ok(_) => log::info!("System configuration was re-loaded."),
                    Err(error) => log::error!("Failed to re-load system config: {:#}", error),
                }
            }
        }
    });

    config
}
