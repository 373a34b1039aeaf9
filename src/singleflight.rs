//! Coalesces concurrent loads of the same key.
//!
//! If a popular key is missing in the cache, many callers will attempt to load it at once. A
//! [SingleFlight] ensures that only the first caller (the leader) actually performs the load,
//! while all other callers for the same key wait for its outcome and then share it.
//!
//! Once a load has completed, its key is forgotten, so that the next call performs a fresh load.
//!
//! # Examples
//! ```
//! # use shardcache::singleflight::SingleFlight;
//! # #[tokio::main]
//! # async fn main() {
//! let flight = SingleFlight::new();
//! let (first, second) = tokio::join!(
//!     flight.run("key", || async { Ok(1) }),
//!     flight.run("key", || async { Ok(2) })
//! );
//!
//! // The second loader has never been invoked...
//! assert_eq!(first.unwrap(), 1);
//! assert_eq!(second.unwrap(), 1);
//! # }
//! ```
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

/// Represents the outcome of a load which is handed to all waiting callers.
///
/// An error is shared among all callers and therefore wrapped in an **Arc**.
pub type SharedResult<T> = Result<T, Arc<anyhow::Error>>;

/// Turns a shared error back into a standalone error without losing its chain of causes.
///
/// The message is the one of the shared error and [source](Error::source) continues with its
/// causes, so that **{:#}** renders the full chain. The shared error itself can be obtained via
/// [shared](SharedError::shared), e.g. to downcast it.
#[derive(Debug, Clone)]
pub struct SharedError(Arc<anyhow::Error>);

impl SharedError {
    /// Returns the error which is shared among all callers of a load.
    pub fn shared(&self) -> &Arc<anyhow::Error> {
        &self.0
    }
}

impl From<Arc<anyhow::Error>> for SharedError {
    fn from(error: Arc<anyhow::Error>) -> Self {
        SharedError(error)
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self.0, f)
    }
}

impl Error for SharedError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}

type Call<T> = watch::Receiver<Option<SharedResult<T>>>;

/// Keeps track of all loads which are currently in flight.
pub struct SingleFlight<T> {
    calls: Mutex<HashMap<String, Call<T>>>,
}

enum Role<T> {
    Leader(watch::Sender<Option<SharedResult<T>>>),
    Follower(Call<T>),
}

/// Removes the call of the leader once it is completed or abandoned.
struct Completion<'a, T> {
    calls: &'a Mutex<HashMap<String, Call<T>>>,
    key: &'a str,
}

impl<T> Drop for Completion<'_, T> {
    fn drop(&mut self) {
        let _ = self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.key);
    }
}

impl<T: Clone + Send + Sync> Default for SingleFlight<T> {
    fn default() -> Self {
        SingleFlight {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone + Send + Sync> SingleFlight<T> {
    /// Creates a new instance without any calls in flight.
    pub fn new() -> Self {
        SingleFlight::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Call<T>>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Executes the given loader unless a load for the same key is already in flight.
    ///
    /// In the latter case, the loader is dropped without being invoked and the outcome of the
    /// ongoing load is returned instead. Therefore all concurrent callers for a key observe the
    /// very same value or the very same error.
    ///
    /// If the leader is cancelled before its load completes, all waiting callers receive an
    /// error.
    pub async fn run<F, Fut>(&self, key: &str, loader: F) -> SharedResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let role = {
            let mut calls = self.lock();
            match calls.get(key) {
                Some(call) => Role::Follower(call.clone()),
                None => {
                    let (sender, receiver) = watch::channel(None);
                    let _ = calls.insert(key.to_owned(), receiver);
                    Role::Leader(sender)
                }
            }
        };

        match role {
            Role::Leader(sender) => self.lead(key, sender, loader).await,
            Role::Follower(call) => SingleFlight::follow(key, call).await,
        }
    }

    async fn lead<F, Fut>(
        &self,
        key: &str,
        sender: watch::Sender<Option<SharedResult<T>>>,
        loader: F,
    ) -> SharedResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let _completion = Completion {
            calls: &self.calls,
            key,
        };

        let result = loader().await.map_err(Arc::new);
        let _ = sender.send_replace(Some(result.clone()));

        result
    }

    async fn follow(key: &str, mut call: Call<T>) -> SharedResult<T> {
        let outcome = call
            .wait_for(Option::is_some)
            .await
            .map(|outcome| outcome.clone());

        match outcome {
            Ok(Some(result)) => result,
            _ => Err(Arc::new(anyhow::anyhow!(
                "The load of '{}' has been abandoned.",
                key
            ))),
        }
    }

    /// Returns the number of keys which are currently being loaded.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use crate::singleflight::SingleFlight;
    use crate::testing::test_async;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn concurrent_calls_are_coalesced() {
        test_async(async {
            let flight = SingleFlight::new();
            let counter = AtomicUsize::new(0);
            let loads = &counter;

            let results = join_all((0..10).map(|_| {
                flight.run("key", move || async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let _ = loads.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
            }))
            .await;

            assert_eq!(counter.load(Ordering::SeqCst), 1);
            for result in results {
                assert_eq!(result.unwrap(), 42);
            }
            assert_eq!(flight.in_flight(), 0);
        });
    }

    #[test]
    fn errors_are_shared_among_all_callers() {
        test_async(async {
            let flight = SingleFlight::<i32>::new();

            let results = join_all((0..3).map(|_| {
                flight.run("key", || async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Err(anyhow::anyhow!("Source unavailable"))
                })
            }))
            .await;

            let errors: Vec<_> = results.into_iter().map(|r| r.unwrap_err()).collect();
            assert_eq!(errors[0].to_string(), "Source unavailable");
            assert_eq!(Arc::ptr_eq(&errors[0], &errors[1]), true);
            assert_eq!(Arc::ptr_eq(&errors[0], &errors[2]), true);
        });
    }

    #[test]
    fn completed_calls_are_forgotten() {
        test_async(async {
            let flight = SingleFlight::new();
            let counter = AtomicUsize::new(0);
            let loads = &counter;

            for _ in 0..3 {
                let result = flight
                    .run("key", move || async move {
                        let _ = loads.fetch_add(1, Ordering::SeqCst);
                        Ok("value")
                    })
                    .await;
                assert_eq!(result.unwrap(), "value");
            }

            assert_eq!(counter.load(Ordering::SeqCst), 3);
            assert_eq!(flight.in_flight(), 0);
        });
    }

    #[test]
    fn different_keys_are_loaded_independently() {
        test_async(async {
            let flight = SingleFlight::new();
            let counter = AtomicUsize::new(0);
            let loads = &counter;

            let (a, b) = tokio::join!(
                flight.run("a", move || async move {
                    let _ = loads.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }),
                flight.run("b", move || async move {
                    let _ = loads.fetch_add(1, Ordering::SeqCst);
                    Ok(2)
                })
            );

            assert_eq!(a.unwrap(), 1);
            assert_eq!(b.unwrap(), 2);
            assert_eq!(counter.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn an_abandoned_leader_releases_its_followers() {
        test_async(async {
            let flight = SingleFlight::new();

            let (leader, follower) = tokio::join!(
                tokio::time::timeout(
                    Duration::from_millis(20),
                    flight.run("key", || async {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok(1)
                    })
                ),
                flight.run("key", || async { Ok(2) })
            );

            assert_eq!(leader.is_err(), true);
            assert_eq!(follower.is_err(), true);
            assert_eq!(flight.in_flight(), 0);

            // The key can be loaded again afterwards...
            assert_eq!(flight.run("key", || async { Ok(3) }).await.unwrap(), 3);
        });
    }
}
