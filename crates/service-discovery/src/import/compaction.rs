//! Debounce-window batching of watch events

use super::{ImportableItem, ImportedKey, ResumeToken, WatchEvent};
use indexmap::IndexMap;

/// Net effect of a window on one key
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// Publish, or replace, with this payload
    Upsert(T),
    /// Unpublish
    Delete(T),
}

impl<T> Outcome<T> {
    /// Payload carried by the outcome
    pub fn item(&self) -> &T {
        match self {
            Outcome::Upsert(item) | Outcome::Delete(item) => item,
        }
    }
}

/// Events collected during one debounce window.
///
/// A delete anywhere in the window wins for its key; otherwise the last
/// payload wins. Only the most recent bookmark is kept.
#[derive(Debug)]
pub struct PendingBatch<T> {
    entries: IndexMap<ImportedKey, Outcome<T>>,
    bookmark: Option<ResumeToken>,
}

impl<T> Default for PendingBatch<T> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
            bookmark: None,
        }
    }
}

impl<T: ImportableItem> PendingBatch<T> {
    /// Empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one event to the window
    pub fn push(&mut self, event: WatchEvent<T>) {
        match event {
            WatchEvent::Bookmark(token) => self.bookmark = Some(token),
            WatchEvent::Added(item) | WatchEvent::Modified(item) => {
                let key = ImportedKey::of(&item);
                match self.entries.get_mut(&key) {
                    Some(Outcome::Delete(_)) => {}
                    Some(slot) => *slot = Outcome::Upsert(item),
                    None => {
                        self.entries.insert(key, Outcome::Upsert(item));
                    }
                }
            }
            WatchEvent::Deleted(item) => {
                let key = ImportedKey::of(&item);
                self.entries.insert(key, Outcome::Delete(item));
            }
        }
    }

    /// Whether nothing was collected
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.bookmark.is_none()
    }

    /// Per-key outcomes in first-seen order, and the latest bookmark
    pub fn compact(self) -> (Vec<(ImportedKey, Outcome<T>)>, Option<ResumeToken>) {
        (self.entries.into_iter().collect(), self.bookmark)
    }
}
