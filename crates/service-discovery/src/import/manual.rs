//! In-process watchable source driven by method calls

use super::{ImportableItem, ResumeToken, WatchEvent, WatchStream, WatchableSource};
use crate::error::{Error, Result};
use async_channel::Sender;
use async_trait::async_trait;
use futures::StreamExt;
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Change events a source keeps for resuming watches
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

struct State<T> {
    items: IndexMap<String, T>,
    revision: u64,
    /// Item events after `oldest`, tagged with their revision
    history: VecDeque<(u64, WatchEvent<T>)>,
    history_limit: usize,
    oldest: u64,
    watchers: Vec<Sender<Result<WatchEvent<T>>>>,
    list_failures: usize,
}

/// A source whose catalog is edited from application code.
///
/// Every change bumps the revision, which is also the resume token. Open
/// watch streams receive changes as they happen; `watch` replays whatever
/// happened after the given token, as long as that change is still among the
/// last [`DEFAULT_HISTORY_LIMIT`] retained ones; older tokens fail and the
/// bridge relists.
pub struct ManualSource<T> {
    state: Mutex<State<T>>,
}

impl<T: ImportableItem> Default for ManualSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ImportableItem> ManualSource<T> {
    /// Empty source at revision 0
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: IndexMap::new(),
                revision: 0,
                history: VecDeque::new(),
                history_limit: DEFAULT_HISTORY_LIMIT,
                oldest: 0,
                watchers: Vec::new(),
                list_failures: 0,
            }),
        }
    }

    /// Keep at most `limit` change events for resuming watches
    pub fn with_history_limit(self, limit: usize) -> Self {
        {
            let mut state = self.state();
            state.history_limit = limit;
            state.trim_history();
        }
        self
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an item, or replace one with the same identity
    pub fn insert(&self, item: T) {
        let mut state = self.state();
        state.items.insert(item.identity(), item.clone());
        state.record(WatchEvent::Added(item));
    }

    /// Change an existing item
    pub fn modify(&self, item: T) {
        let mut state = self.state();
        state.items.insert(item.identity(), item.clone());
        state.record(WatchEvent::Modified(item));
    }

    /// Remove an item, returning it if it was present
    pub fn remove(&self, identity: &str) -> Option<T> {
        let mut state = self.state();
        let item = state.items.shift_remove(identity)?;
        state.record(WatchEvent::Deleted(item.clone()));
        Some(item)
    }

    /// Send the current revision to open watches as a bookmark
    pub fn bookmark(&self) {
        let mut state = self.state();
        let token = state.revision.to_string();
        state.broadcast(WatchEvent::Bookmark(token));
    }

    /// Fail every open watch stream
    pub fn fail_watch(&self) {
        let mut state = self.state();
        for tx in state.watchers.drain(..) {
            let _ = tx.try_send(Err(Error::SourceUnavailable("watch failed".to_string())));
        }
    }

    /// End every open watch stream without an error
    pub fn end_watches(&self) {
        self.state().watchers.clear();
    }

    /// Make the next `count` listings fail
    pub fn fail_next_lists(&self, count: usize) {
        self.state().list_failures = count;
    }

    /// Forget change history; watches from older tokens then fail
    pub fn compact_history(&self) {
        let mut state = self.state();
        state.history.clear();
        state.oldest = state.revision;
    }

    /// Current items
    pub fn items(&self) -> Vec<T> {
        self.state().items.values().cloned().collect()
    }

    /// Number of open watch streams
    pub fn watcher_count(&self) -> usize {
        self.state()
            .watchers
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

impl<T: Clone> State<T> {
    fn record(&mut self, event: WatchEvent<T>) {
        self.revision += 1;
        self.history.push_back((self.revision, event.clone()));
        self.trim_history();
        self.broadcast(event);
    }

    fn trim_history(&mut self) {
        while self.history.len() > self.history_limit {
            if let Some((revision, _)) = self.history.pop_front() {
                self.oldest = revision;
            }
        }
    }

    fn broadcast(&mut self, event: WatchEvent<T>) {
        self.watchers.retain(|tx| tx.try_send(Ok(event.clone())).is_ok());
    }
}

fn parse_token(token: &ResumeToken) -> Result<u64> {
    token
        .parse()
        .map_err(|_| Error::SourceUnavailable(format!("invalid resume token: {}", token)))
}

#[async_trait]
impl<T: ImportableItem> WatchableSource for ManualSource<T> {
    type Item = T;

    async fn list_all(&self) -> Result<(Vec<T>, ResumeToken)> {
        let mut state = self.state();
        if state.list_failures > 0 {
            state.list_failures -= 1;
            return Err(Error::SourceUnavailable("listing failed".to_string()));
        }
        let items = state.items.values().cloned().collect();
        Ok((items, state.revision.to_string()))
    }

    async fn watch(&self, token: &ResumeToken) -> Result<WatchStream<T>> {
        let from = parse_token(token)?;
        let mut state = self.state();
        if from < state.oldest {
            return Err(Error::SourceUnavailable(format!(
                "resume token {} is older than retained history ({})",
                from, state.oldest
            )));
        }

        let (tx, rx) = async_channel::unbounded();
        for (_, event) in state.history.iter().filter(|(revision, _)| *revision > from) {
            let _ = tx.try_send(Ok(event.clone()));
        }
        state.watchers.push(tx);
        Ok(rx.boxed())
    }
}
