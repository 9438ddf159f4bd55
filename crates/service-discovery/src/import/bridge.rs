//! Import bridge: keeps registry records in step with a watchable source

use super::{
    BridgeConfig, ImportableItem, ImportedKey, Outcome, PendingBatch, ResumeToken,
    ServiceImporter, WatchEvent, WatchableSource,
};
use crate::{
    error::{Error, Result},
    publisher::ServicePublisher,
    record::{JsonObject, Record, Status},
    runtime::{Spawner, sleep},
};
use async_channel::{Receiver, Sender};
use async_io::Timer;
use async_trait::async_trait;
use futures::lock::Mutex;
use futures::{FutureExt, StreamExt};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A record this bridge published
#[derive(Debug, Clone)]
struct Imported {
    identity: String,
    record: Record,
}

type ImportedMap = Arc<Mutex<IndexMap<ImportedKey, Imported>>>;

/// Handles of a running worker
struct Running {
    /// Closed to stop the worker
    shutdown: Sender<()>,
    /// Closes when the worker has finished
    done: Receiver<()>,
}

/// Mirrors a [`WatchableSource`] into a discovery instance.
///
/// On start the source is listed and every item published; a background
/// task then follows the watch stream, compacting changes over a debounce
/// window, and falls back to a full resync whenever the stream ends.
pub struct ImportBridge<S: WatchableSource> {
    name: String,
    source: Arc<S>,
    spawner: Arc<dyn Spawner>,
    imported: ImportedMap,
    lifecycle: Mutex<Option<Running>>,
}

impl<S: WatchableSource> ImportBridge<S> {
    /// Create a stopped bridge
    pub fn new(name: impl Into<String>, source: Arc<S>, spawner: Arc<dyn Spawner>) -> Self {
        Self {
            name: name.into(),
            source,
            spawner,
            imported: Arc::new(Mutex::new(IndexMap::new())),
            lifecycle: Mutex::new(None),
        }
    }

    /// Bridge name, used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The mirrored source
    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Whether the background task is running
    pub async fn is_running(&self) -> bool {
        self.lifecycle.lock().await.is_some()
    }

    /// Keys currently tracked, in import order
    pub async fn imported_keys(&self) -> Vec<ImportedKey> {
        self.imported.lock().await.keys().cloned().collect()
    }

    /// Published records currently tracked, in import order
    pub async fn imported_records(&self) -> Vec<Record> {
        self.imported
            .lock()
            .await
            .values()
            .map(|entry| entry.record.clone())
            .collect()
    }
}

#[async_trait]
impl<S: WatchableSource> ServiceImporter for ImportBridge<S> {
    async fn start(&self, publisher: Arc<dyn ServicePublisher>, config: JsonObject) -> Result<()> {
        let config = BridgeConfig::from_json(&config)?;

        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Err(Error::InvalidConfiguration(format!(
                "import bridge {} is already running",
                self.name
            )));
        }

        let (items, token) = self.source.list_all().await.map_err(|e| match e {
            Error::SourceUnavailable(_) => e,
            other => Error::SourceUnavailable(other.to_string()),
        })?;

        let (shutdown_tx, shutdown_rx) = async_channel::bounded(1);
        let (done_tx, done_rx) = async_channel::bounded::<()>(1);
        let worker = Worker {
            name: self.name.clone(),
            source: self.source.clone(),
            publisher,
            imported: self.imported.clone(),
            config,
            shutdown: shutdown_rx,
        };

        worker.reconcile(items).await;
        info!(
            "Import bridge {} started with {} records",
            self.name,
            self.imported.lock().await.len()
        );

        self.spawner.spawn(
            async move {
                worker.run(token).await;
                drop(done_tx);
            }
            .boxed(),
        );

        *lifecycle = Some(Running {
            shutdown: shutdown_tx,
            done: done_rx,
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let running = self.lifecycle.lock().await.take();
        if let Some(running) = running {
            running.shutdown.close();
            // Errors once the worker dropped its end
            let _ = running.done.recv().await;
            info!("Import bridge {} stopped", self.name);
        }
        Ok(())
    }
}

/// Why the watch loop stopped
enum Flow {
    Shutdown,
    Resync,
}

enum Step<T> {
    Shutdown,
    Event(Option<Result<WatchEvent<T>>>),
    Flush,
}

/// Background side of a bridge; the only writer of the imported map
struct Worker<S: WatchableSource> {
    name: String,
    source: Arc<S>,
    publisher: Arc<dyn ServicePublisher>,
    imported: ImportedMap,
    config: BridgeConfig,
    shutdown: Receiver<()>,
}

impl<S: WatchableSource> Worker<S> {
    async fn run(self, mut token: ResumeToken) {
        loop {
            match self.follow(&mut token).await {
                Flow::Shutdown => break,
                Flow::Resync => match self.resync().await {
                    Some(fresh) => token = fresh,
                    None => break,
                },
            }
        }

        if self.config.unpublish_on_close {
            self.unpublish_all().await;
        }
    }

    /// Watch from `token` until the stream ends or shutdown is requested
    async fn follow(&self, token: &mut ResumeToken) -> Flow {
        let opened = futures::select! {
            _ = self.shutdown.recv().fuse() => return Flow::Shutdown,
            opened = self.source.watch(token).fuse() => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Import bridge {} could not open watch: {}", self.name, e);
                return Flow::Resync;
            }
        };
        debug!("Import bridge {} watching from {}", self.name, token);

        let mut batch = PendingBatch::new();
        let mut window: Option<Timer> = None;

        loop {
            let step = {
                let flush = async {
                    match window.as_mut() {
                        Some(timer) => {
                            timer.await;
                        }
                        None => futures::future::pending::<()>().await,
                    }
                };

                futures::select! {
                    _ = self.shutdown.recv().fuse() => Step::Shutdown,
                    event = stream.next().fuse() => Step::Event(event),
                    _ = flush.fuse() => Step::Flush,
                }
            };

            match step {
                Step::Shutdown => return Flow::Shutdown,
                Step::Event(Some(Ok(event))) => {
                    if window.is_none() {
                        window = Some(Timer::after(self.config.debounce()));
                    }
                    batch.push(event);
                }
                Step::Event(Some(Err(e))) => {
                    warn!("Import bridge {} watch failed: {}", self.name, e);
                    return Flow::Resync;
                }
                Step::Event(None) => {
                    info!("Import bridge {} watch ended", self.name);
                    return Flow::Resync;
                }
                Step::Flush => {
                    window = None;
                    let (outcomes, bookmark) = std::mem::take(&mut batch).compact();
                    if let Some(bookmark) = bookmark {
                        *token = bookmark;
                    }
                    self.apply(outcomes).await;
                }
            }
        }
    }

    /// Relist after the retry delay until it works; `None` on shutdown
    async fn resync(&self) -> Option<ResumeToken> {
        loop {
            futures::select! {
                _ = self.shutdown.recv().fuse() => return None,
                _ = sleep(self.config.retry_delay()).fuse() => {}
            }

            let listed = futures::select! {
                _ = self.shutdown.recv().fuse() => return None,
                listed = self.source.list_all().fuse() => listed,
            };
            match listed {
                Ok((items, token)) => {
                    info!("Import bridge {} resyncing {} items", self.name, items.len());
                    self.reconcile(items).await;
                    return Some(token);
                }
                Err(e) => warn!("Import bridge {} resync failed: {}", self.name, e),
            }
        }
    }

    /// Make the imported set equal to a full listing
    async fn reconcile(&self, items: Vec<S::Item>) {
        let mut listed: IndexMap<ImportedKey, (String, Record)> = IndexMap::new();
        for item in items {
            let identity = item.identity();
            let record = item.to_record();
            let key = ImportedKey::from_record(&identity, &record);
            listed.entry(key).or_insert((identity, record));
        }

        let stale: Vec<Imported> = {
            let mut imported = self.imported.lock().await;
            let keys: Vec<ImportedKey> = imported
                .keys()
                .filter(|key| !listed.contains_key(*key))
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|key| imported.shift_remove(key))
                .collect()
        };
        for entry in &stale {
            self.unpublish(entry).await;
        }

        let mut changed = 0;
        for (key, (identity, record)) in listed {
            if self.upsert(key, identity, record).await {
                changed += 1;
            }
        }
        debug!(
            "Import bridge {} reconciled: {} removed, {} published or replaced",
            self.name,
            stale.len(),
            changed
        );
    }

    async fn apply(&self, outcomes: Vec<(ImportedKey, Outcome<S::Item>)>) {
        debug!("Import bridge {} applying {} changes", self.name, outcomes.len());

        for (key, outcome) in outcomes {
            let identity = outcome.item().identity();
            let previous = {
                let mut imported = self.imported.lock().await;
                match outcome {
                    Outcome::Upsert(_) if imported.contains_key(&key) => Vec::new(),
                    _ => take_entries(&mut imported, &key, &identity),
                }
            };
            for entry in &previous {
                self.unpublish(entry).await;
            }

            if let Outcome::Upsert(item) = outcome {
                self.upsert(key, identity, item.to_record()).await;
            }
        }
    }

    /// Publish `record` under `key`, replacing a changed entry.
    ///
    /// Returns whether anything was published.
    async fn upsert(&self, key: ImportedKey, identity: String, record: Record) -> bool {
        let previous = {
            let mut imported = self.imported.lock().await;
            match imported.get(&key) {
                Some(existing) if same_content(&existing.record, &record) => return false,
                Some(_) => imported.shift_remove(&key),
                None => None,
            }
        };
        if let Some(previous) = previous {
            self.unpublish(&previous).await;
        }

        match self.publisher.publish(record).await {
            Ok(published) => {
                debug!("Import bridge {} published {}", self.name, key);
                self.imported.lock().await.insert(
                    key,
                    Imported {
                        identity,
                        record: published,
                    },
                );
                true
            }
            Err(e) => {
                warn!("Import bridge {} failed to publish {}: {}", self.name, key, e);
                false
            }
        }
    }

    async fn unpublish(&self, entry: &Imported) {
        let Some(registration) = entry.record.registration.as_deref() else {
            return;
        };
        if let Err(e) = self.publisher.unpublish(registration).await {
            warn!(
                "Import bridge {} failed to unpublish {} ({}): {}",
                self.name, entry.identity, registration, e
            );
        }
    }

    async fn unpublish_all(&self) {
        let entries: Vec<Imported> = self
            .imported
            .lock()
            .await
            .drain(..)
            .map(|(_, entry)| entry)
            .collect();
        for entry in &entries {
            self.unpublish(entry).await;
        }
        info!(
            "Import bridge {} unpublished {} records",
            self.name,
            entries.len()
        );
    }
}

/// Remove the entry under `key`, or every entry of `identity` when the key
/// is unknown
fn take_entries(
    imported: &mut IndexMap<ImportedKey, Imported>,
    key: &ImportedKey,
    identity: &str,
) -> Vec<Imported> {
    if let Some(entry) = imported.shift_remove(key) {
        return vec![entry];
    }

    let keys: Vec<ImportedKey> = imported
        .iter()
        .filter(|(_, entry)| entry.identity == identity)
        .map(|(key, _)| key.clone())
        .collect();
    keys.iter()
        .filter_map(|key| imported.shift_remove(key))
        .collect()
}

/// Whether a published record already describes a freshly built one
fn same_content(published: &Record, fresh: &Record) -> bool {
    published.name == fresh.name
        && published.record_type == fresh.record_type
        && published.location == fresh.location
        && published.metadata == fresh.metadata
        && (fresh.status == Status::Unknown || fresh.status == published.status)
}
