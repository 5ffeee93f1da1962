use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::join_all;
use itertools::Itertools;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::ResolveError;
use crate::model::{document_id, FlatProjection, ID_FIELD};
use crate::store::Storage;

type LoadResult = Result<Option<Value>, ResolveError>;

/// Deferred result of a registered point-lookup. Resolves once the wave it
/// was registered in flushes: `Ok(Some(_))` for a matched document,
/// `Ok(None)` when storage returned nothing for the key.
pub struct LoadHandle {
    collection: String,
    rx: oneshot::Receiver<LoadResult>,
}

impl Future for LoadHandle {
    type Output = LoadResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ResolveError::Dropped {
                collection: this.collection.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct Bucket {
    selection: FlatProjection,
    waiters: HashMap<String, Vec<oneshot::Sender<LoadResult>>>,
}

#[derive(Default)]
struct WaveState {
    /// collection -> selection id -> bucket
    buckets: HashMap<String, HashMap<String, Bucket>>,
    /// One-shot token per wave: set by the first registration after idle,
    /// cleared when the flush takes the wave.
    armed: bool,
}

/// Wave-scoped coalescing scheduler for point-lookups.
///
/// Registration is synchronous and returns a [`LoadHandle`] immediately; the
/// first registration after idle hands a token to a driver task, which
/// flushes everything accumulated by then as one batch fetch per
/// (collection, selection id) bucket. Construct one instance per logical
/// request so waves stay isolated across concurrent requests; construction
/// spawns the driver and therefore needs a tokio runtime.
///
/// A key registered under two different selection ids in the same wave only
/// observes its own bucket's fetch: callers must not assume cross-bucket
/// freshness ordering, only that every registration resolves by flush
/// completion.
///
/// Wave extent is cooperative, not guaranteed: on a multi-threaded runtime
/// the driver may flush while a burst of registrations is still in flight,
/// splitting it across two waves. Every handle still resolves; only batching
/// degrades. A current-thread runtime flushes only once the registering task
/// yields, so a synchronous burst always lands in one wave.
pub struct BatchedLoader {
    storage: Arc<dyn Storage>,
    state: Mutex<WaveState>,
    flush_tx: mpsc::UnboundedSender<()>,
}

impl BatchedLoader {
    pub fn new(storage: Arc<dyn Storage>) -> Arc<Self> {
        let (flush_tx, mut flush_rx) = mpsc::unbounded_channel();
        let loader = Arc::new(Self {
            storage,
            state: Mutex::new(WaveState::default()),
            flush_tx,
        });
        let driver = Arc::downgrade(&loader);
        tokio::spawn(async move {
            // runs once per armed wave; ends when the loader is dropped and
            // the sender closes
            while flush_rx.recv().await.is_some() {
                let Some(loader) = driver.upgrade() else { break };
                loader.flush().await;
            }
        });
        loader
    }

    /// Register a lookup for `key` in `collection`, restricted to
    /// `selection`. Lookups sharing `(collection, selection_id)` within one
    /// wave are answered by a single batch fetch.
    pub fn load(
        &self,
        key: impl Into<String>,
        collection: impl Into<String>,
        selection_id: impl Into<String>,
        selection: FlatProjection,
    ) -> LoadHandle {
        let key = key.into();
        let collection = collection.into();
        let (tx, rx) = oneshot::channel();

        let mut state = self.state.lock();
        if !state.armed {
            state.armed = true;
            let _ = self.flush_tx.send(());
        }
        let bucket = state
            .buckets
            .entry(collection.clone())
            .or_default()
            .entry(selection_id.into())
            // an existing bucket keeps the selection it was created with
            .or_insert_with(|| Bucket {
                selection,
                waiters: HashMap::new(),
            });
        bucket.waiters.entry(key).or_default().push(tx);
        drop(state);

        LoadHandle { collection, rx }
    }

    /// Take the current wave and answer every bucket with one batch fetch.
    /// Registrations made while results are being handled land in a fresh
    /// wave and arm their own flush.
    async fn flush(&self) {
        let wave = {
            let mut state = self.state.lock();
            state.armed = false;
            std::mem::take(&mut state.buckets)
        };

        let runs: Vec<(String, Bucket)> = wave
            .into_iter()
            .flat_map(|(collection, buckets)| {
                buckets
                    .into_values()
                    .map(move |bucket| (collection.clone(), bucket))
            })
            .collect();

        join_all(
            runs.into_iter()
                .map(|(collection, bucket)| self.run_bucket(collection, bucket)),
        )
        .await;
    }

    async fn run_bucket(&self, collection: String, bucket: Bucket) {
        let Bucket {
            mut selection,
            mut waiters,
        } = bucket;

        // correlation needs the identifier even when the caller never asked
        // for it; remember whether to strip it from fanned-out values
        let caller_wants_id =
            matches!(selection.get(ID_FIELD), Some(selector) if selector.selects());
        if !caller_wants_id {
            selection.remove(ID_FIELD);
            if !selection.is_empty() && selection.is_inclusion() {
                selection.include(ID_FIELD);
            }
        }

        let keys: Vec<String> = waiters.keys().cloned().sorted().collect();
        log::debug!("flushing {} key(s) against '{collection}'", keys.len());

        match self.storage.batch_fetch(&collection, &keys, &selection).await {
            Ok(documents) => {
                for mut document in documents {
                    let Some(id) = document_id(&document).map(str::to_string) else {
                        continue;
                    };
                    if !caller_wants_id {
                        document.remove(ID_FIELD);
                    }
                    if let Some(senders) = waiters.remove(&id) {
                        // every waiter gets its own value, in registration order
                        for tx in senders {
                            let _ = tx.send(Ok(Some(Value::Object(document.clone()))));
                        }
                    }
                }
                // keys storage did not return resolve empty, not as errors
                for (key, senders) in waiters {
                    log::debug!("'{collection}' returned nothing for key '{key}'");
                    for tx in senders {
                        let _ = tx.send(Ok(None));
                    }
                }
            }
            Err(err) => {
                let err = ResolveError::Storage {
                    collection: collection.clone(),
                    message: err.to_string(),
                };
                log::warn!("{err}");
                for senders in waiters.into_values() {
                    for tx in senders {
                        let _ = tx.send(Err(err.clone()));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Document;
    use crate::store::MemoryStore;
    use anyhow::Result;
    use serde_json::json;

    /// Storage wrapper recording every batch fetch it sees.
    struct RecordingStore {
        inner: MemoryStore,
        calls: Mutex<Vec<(String, Vec<String>, FlatProjection)>>,
    }

    impl RecordingStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, Vec<String>, FlatProjection)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl Storage for RecordingStore {
        async fn batch_fetch(
            &self,
            collection: &str,
            keys: &[String],
            selection: &FlatProjection,
        ) -> Result<Vec<Document>> {
            self.calls.lock().push((
                collection.to_string(),
                keys.to_vec(),
                selection.clone(),
            ));
            self.inner.batch_fetch(collection, keys, selection).await
        }
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl Storage for FailingStore {
        async fn batch_fetch(
            &self,
            _collection: &str,
            _keys: &[String],
            _selection: &FlatProjection,
        ) -> Result<Vec<Document>> {
            anyhow::bail!("connection reset")
        }
    }

    fn seeded_store() -> RecordingStore {
        let store = MemoryStore::new();
        store.insert_json("User", json!({"_id": "u1", "name": "Ada", "role": "admin"}));
        store.insert_json("User", json!({"_id": "u2", "name": "Grace", "role": "editor"}));
        RecordingStore::new(store)
    }

    fn name_selection() -> FlatProjection {
        let mut selection = FlatProjection::new();
        selection.include("name");
        selection
    }

    #[tokio::test]
    async fn distinct_keys_in_one_burst_coalesce_into_one_fetch() {
        let store = Arc::new(seeded_store());
        let loader = BatchedLoader::new(store.clone());

        let a = loader.load("u1", "User", "author", name_selection());
        let b = loader.load("u2", "User", "author", name_selection());

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(a, json!({"name": "Ada"}));
        assert_eq!(b, json!({"name": "Grace"}));

        let calls = store.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "User");
        assert_eq!(calls[0].1, vec!["u1".to_string(), "u2".to_string()]);
    }

    #[tokio::test]
    async fn different_selection_ids_fetch_in_separate_buckets() {
        let store = Arc::new(seeded_store());
        let loader = BatchedLoader::new(store.clone());

        let mut role_selection = FlatProjection::new();
        role_selection.include("role");

        let by_name = loader.load("u1", "User", "author", name_selection());
        let by_role = loader.load("u1", "User", "assignee", role_selection);

        assert_eq!(by_name.await.unwrap().unwrap(), json!({"name": "Ada"}));
        assert_eq!(by_role.await.unwrap().unwrap(), json!({"role": "admin"}));
        assert_eq!(store.calls().len(), 2);
    }

    #[tokio::test]
    async fn unmatched_keys_resolve_empty_not_as_errors() {
        let store = Arc::new(seeded_store());
        let loader = BatchedLoader::new(store.clone());

        let a = loader.load("u1", "User", "author", name_selection());
        let missing = loader.load("ghost", "User", "author", name_selection());
        let c = loader.load("u2", "User", "author", name_selection());

        assert!(a.await.unwrap().is_some());
        assert_eq!(missing.await.unwrap(), None);
        assert!(c.await.unwrap().is_some());
        assert_eq!(store.calls().len(), 1);
    }

    #[tokio::test]
    async fn every_waiter_for_a_key_gets_its_own_value() {
        let store = Arc::new(seeded_store());
        let loader = BatchedLoader::new(store.clone());

        let first = loader.load("u1", "User", "author", name_selection());
        let second = loader.load("u1", "User", "author", name_selection());

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(store.calls().len(), 1);
        assert_eq!(store.calls()[0].1, vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn failed_batch_rejects_every_waiter_in_the_bucket() {
        let loader = BatchedLoader::new(Arc::new(FailingStore));

        let a = loader.load("u1", "User", "author", name_selection());
        let b = loader.load("u2", "User", "author", name_selection());

        let err_a = a.await.unwrap_err();
        let err_b = b.await.unwrap_err();
        assert_eq!(err_a, err_b);
        match err_a {
            ResolveError::Storage { collection, .. } => assert_eq!(collection, "User"),
            other => panic!("expected storage error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn registrations_after_a_flush_start_a_new_wave() {
        let store = Arc::new(seeded_store());
        let loader = BatchedLoader::new(store.clone());

        let first = loader.load("u1", "User", "author", name_selection());
        assert!(first.await.unwrap().is_some());

        let second = loader.load("u2", "User", "author", name_selection());
        assert!(second.await.unwrap().is_some());

        assert_eq!(store.calls().len(), 2);
    }

    #[tokio::test]
    async fn identifier_is_forced_for_correlation_and_stripped_after() {
        let store = Arc::new(seeded_store());
        let loader = BatchedLoader::new(store.clone());

        let doc = loader
            .load("u1", "User", "author", name_selection())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc, json!({"name": "Ada"}));

        // the physical fetch still carried the identifier
        let calls = store.calls();
        assert!(calls[0].2.contains(ID_FIELD));
    }

    #[tokio::test]
    async fn identifier_is_kept_when_requested() {
        let store = Arc::new(seeded_store());
        let loader = BatchedLoader::new(store.clone());

        let mut selection = name_selection();
        selection.include(ID_FIELD);
        let doc = loader
            .load("u1", "User", "author", selection)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc, json!({"_id": "u1", "name": "Ada"}));
    }

    #[tokio::test]
    async fn empty_selection_fetches_whole_documents_without_identifier() {
        let store = Arc::new(seeded_store());
        let loader = BatchedLoader::new(store.clone());

        let doc = loader
            .load("u1", "User", "author", FlatProjection::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc, json!({"name": "Ada", "role": "admin"}));
    }

    #[tokio::test]
    async fn exclusion_selection_with_identifier_excluded_still_correlates() {
        let store = Arc::new(seeded_store());
        let loader = BatchedLoader::new(store.clone());

        let mut selection = FlatProjection::new();
        selection.exclude("role");
        selection.exclude(ID_FIELD);
        let doc = loader
            .load("u2", "User", "author", selection)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc, json!({"name": "Grace"}));
    }
}
