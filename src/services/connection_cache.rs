use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Result;
use crate::models::Backend;
use crate::services::database::{mask_credentials, ConnectionHandle, Connector};

type PendingConnect = Shared<BoxFuture<'static, Result<ConnectionHandle>>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub backend: Backend,
    pub uri: String,
}

impl ConnectionKey {
    pub fn new(backend: Backend, uri: &str) -> Self {
        Self {
            backend,
            uri: uri.trim().to_string(),
        }
    }
}

enum Slot {
    Ready(ConnectionHandle),
    Pending { generation: u64, future: PendingConnect },
}

/// Process-wide cache of backend clients, one per (backend, uri).
///
/// Concurrent callers asking for a key that is still connecting all await
/// the same in-flight attempt, so each key is constructed at most once per
/// successful connect. Failed attempts are dropped from the cache and the
/// next call starts a fresh one.
pub struct ConnectionCache {
    connector: Arc<dyn Connector>,
    slots: Mutex<HashMap<ConnectionKey, Slot>>,
    generation: AtomicU64,
}

impl ConnectionCache {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            slots: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Get or create the handle for `(backend, uri)`.
    pub async fn get(&self, backend: Backend, uri: &str) -> Result<ConnectionHandle> {
        let key = ConnectionKey::new(backend, uri);

        // Never hold the lock across an await.
        let (generation, future) = {
            let mut slots = self.lock();
            match slots.get(&key) {
                Some(Slot::Ready(handle)) => {
                    tracing::debug!("Using cached {} connection", backend.as_str());
                    return Ok(handle.clone());
                }
                Some(Slot::Pending { generation, future }) => {
                    tracing::debug!(
                        "Joining in-flight {} connect for: {}",
                        backend.as_str(),
                        mask_credentials(&key.uri)
                    );
                    (*generation, future.clone())
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let future = self.start_connect(&key);
                    slots.insert(
                        key.clone(),
                        Slot::Pending {
                            generation,
                            future: future.clone(),
                        },
                    );
                    (generation, future)
                }
            }
        };

        let outcome = future.await;

        let mut slots = self.lock();
        let still_ours = matches!(
            slots.get(&key),
            Some(Slot::Pending { generation: g, .. }) if *g == generation
        );
        match &outcome {
            Ok(handle) if still_ours => {
                slots.insert(key, Slot::Ready(handle.clone()));
            }
            Err(e) if still_ours => {
                tracing::warn!(
                    "{} connect failed for {}: {}",
                    backend.as_str(),
                    mask_credentials(&key.uri),
                    e
                );
                slots.remove(&key);
            }
            _ => {}
        }

        outcome
    }

    fn start_connect(&self, key: &ConnectionKey) -> PendingConnect {
        tracing::info!(
            "Creating new {} connection for: {}",
            key.backend.as_str(),
            mask_credentials(&key.uri)
        );
        let connector = Arc::clone(&self.connector);
        let backend = key.backend;
        let uri = key.uri.clone();
        async move { connector.connect(backend, &uri).await }
            .boxed()
            .shared()
    }

    /// Drop a cached handle so the next `get` reconnects.
    pub fn invalidate(&self, backend: Backend, uri: &str) -> bool {
        let removed = self.lock().remove(&ConnectionKey::new(backend, uri)).is_some();
        if removed {
            tracing::info!("Removed {} connection for: {}", backend.as_str(), mask_credentials(uri));
        }
        removed
    }

    /// Number of keys with a ready handle.
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, backend: Backend, uri: &str) -> bool {
        matches!(
            self.lock().get(&ConnectionKey::new(backend, uri)),
            Some(Slot::Ready(_))
        )
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionKey, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::models::{ParamValue, ResultFrame};
    use crate::services::database::RelationalSession;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct NullSession;

    #[async_trait::async_trait]
    impl RelationalSession for NullSession {
        async fn query(&self, _sql: &str, _params: &[ParamValue]) -> Result<ResultFrame> {
            Ok(ResultFrame::empty())
        }
    }

    /// Counts constructions; fails the first `failures` attempts.
    struct CountingConnector {
        attempts: AtomicUsize,
        failures: usize,
        delay: Duration,
    }

    impl CountingConnector {
        fn new(failures: usize, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                attempts: AtomicUsize::new(0),
                failures,
                delay,
            })
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, _backend: Backend, _uri: &str) -> Result<ConnectionHandle> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if attempt < self.failures {
                return Err(EngineError::connection("connection refused"));
            }
            Ok(ConnectionHandle::Relational(Arc::new(NullSession)))
        }
    }

    const URI: &str = "postgresql://app:pw@localhost:5432/care";

    #[tokio::test]
    async fn test_concurrent_gets_construct_once() {
        let connector = CountingConnector::new(0, Duration::from_millis(50));
        let cache = Arc::new(ConnectionCache::new(connector.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get(Backend::Relational, URI).await })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert_eq!(connector.attempts(), 1);
        assert!(handles.windows(2).all(|w| w[0].same_as(&w[1])));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(Backend::Relational, URI));
    }

    #[tokio::test]
    async fn test_ready_handle_is_reused() {
        let connector = CountingConnector::new(0, Duration::ZERO);
        let cache = ConnectionCache::new(connector.clone());

        let first = cache.get(Backend::Relational, URI).await.unwrap();
        let second = cache.get(Backend::Relational, &format!(" {} ", URI)).await.unwrap();

        assert!(first.same_as(&second));
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_get_distinct_handles() {
        let connector = CountingConnector::new(0, Duration::ZERO);
        let cache = ConnectionCache::new(connector.clone());

        let a = cache.get(Backend::Relational, URI).await.unwrap();
        let b = cache
            .get(Backend::Relational, "postgresql://app:pw@localhost:5432/other")
            .await
            .unwrap();

        assert!(!a.same_as(&b));
        assert_eq!(connector.attempts(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let connector = CountingConnector::new(1, Duration::ZERO);
        let cache = ConnectionCache::new(connector.clone());

        let err = cache.get(Backend::Relational, URI).await.unwrap_err();
        assert!(matches!(err, EngineError::Connection(_)));
        assert!(cache.is_empty());

        let handle = cache.get(Backend::Relational, URI).await;
        assert!(handle.is_ok());
        assert_eq!(connector.attempts(), 2);
        assert!(cache.contains(Backend::Relational, URI));
    }

    #[tokio::test]
    async fn test_concurrent_failure_is_shared() {
        let connector = CountingConnector::new(1, Duration::from_millis(50));
        let cache = Arc::new(ConnectionCache::new(connector.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get(Backend::Relational, URI).await })
            })
            .collect();

        for task in tasks {
            assert!(matches!(task.await.unwrap(), Err(EngineError::Connection(_))));
        }
        assert_eq!(connector.attempts(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_forces_reconnect() {
        let connector = CountingConnector::new(0, Duration::ZERO);
        let cache = ConnectionCache::new(connector.clone());

        cache.get(Backend::Relational, URI).await.unwrap();
        assert!(cache.invalidate(Backend::Relational, URI));
        assert!(!cache.invalidate(Backend::Relational, URI));

        cache.get(Backend::Relational, URI).await.unwrap();
        assert_eq!(connector.attempts(), 2);
    }
}
