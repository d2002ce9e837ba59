//! Key → FIFO queue bookkeeping for one recording/replay session.

use crate::errors::RecorderError;
use crate::matcher::RecordMatcher;
use crate::record::InteractionRecord;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Recorded interactions grouped by match key.
///
/// Records under one key come back in the order they were enqueued. Keys are
/// visited in the order they first appeared. A key is dropped as soon as its
/// last record is taken, so the store never holds an empty queue.
pub struct SessionStore {
    matcher: Arc<dyn RecordMatcher>,
    order: VecDeque<String>,
    queues: HashMap<String, VecDeque<InteractionRecord>>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("keys", &self.order)
            .field("len", &self.len())
            .finish()
    }
}

impl SessionStore {
    pub fn new(matcher: Arc<dyn RecordMatcher>) -> Self {
        Self {
            matcher,
            order: VecDeque::new(),
            queues: HashMap::new(),
        }
    }

    /// Seeds a store from already-keyed queues, keeping their order. Keys are
    /// used as given and are not re-derived through `matcher`.
    pub fn with_records<I>(entries: I, matcher: Arc<dyn RecordMatcher>) -> Self
    where
        I: IntoIterator<Item = (String, Vec<InteractionRecord>)>,
    {
        let mut store = Self::new(matcher);
        for (key, records) in entries {
            store.set(key, records.into());
        }
        store
    }

    pub fn matcher(&self) -> Arc<dyn RecordMatcher> {
        Arc::clone(&self.matcher)
    }

    pub fn key_for(&self, record: &InteractionRecord) -> String {
        self.matcher.matching_key(record)
    }

    pub fn enqueue(&mut self, record: InteractionRecord) {
        let key = self.key_for(&record);
        self.push(key, record);
    }

    pub fn enqueue_range<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = InteractionRecord>,
    {
        for record in records {
            self.enqueue(record);
        }
    }

    /// Takes the oldest record for `key`.
    pub fn dequeue(&mut self, key: &str) -> Result<InteractionRecord, RecorderError> {
        let queue = self
            .queues
            .get_mut(key)
            .ok_or_else(|| RecorderError::KeyNotFound(key.to_string()))?;
        let record = queue
            .pop_front()
            .ok_or_else(|| RecorderError::KeyNotFound(key.to_string()))?;
        if queue.is_empty() {
            self.remove_key(key);
        }
        Ok(record)
    }

    /// Takes every record for `key`, oldest first.
    pub fn dequeue_all_by_key(&mut self, key: &str) -> Result<Vec<InteractionRecord>, RecorderError> {
        match self.remove_key(key) {
            Some(queue) if !queue.is_empty() => Ok(queue.into()),
            _ => Err(RecorderError::KeyNotFound(key.to_string())),
        }
    }

    /// Consumes the store lazily, key by key.
    ///
    /// Each yielded record is removed from the store. Records not yet yielded
    /// when the iterator is dropped stay where they were.
    pub fn drain_all(&mut self) -> Drain<'_> {
        Drain { store: self }
    }

    /// Walks every record in drain order without removing anything.
    pub fn peek_all(&self) -> impl Iterator<Item = &InteractionRecord> + '_ {
        self.order
            .iter()
            .filter_map(|key| self.queues.get(key))
            .flat_map(|queue| queue.iter())
    }

    pub fn get(&self, key: &str) -> Option<&VecDeque<InteractionRecord>> {
        self.queues.get(key)
    }

    /// Replaces the queue for `key`. An empty queue removes the key.
    pub fn set(&mut self, key: impl Into<String>, queue: VecDeque<InteractionRecord>) {
        let key = key.into();
        if queue.is_empty() {
            self.remove_key(&key);
            return;
        }
        if !self.queues.contains_key(&key) {
            self.order.push_back(key.clone());
        }
        self.queues.insert(key, queue);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.order.iter().map(String::as_str)
    }

    /// Keys with their queues, in key insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &VecDeque<InteractionRecord>)> + '_ {
        self.order
            .iter()
            .filter_map(|key| self.queues.get(key).map(|queue| (key.as_str(), queue)))
    }

    pub fn remaining(&self, key: &str) -> usize {
        self.queues.get(key).map_or(0, VecDeque::len)
    }

    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    fn push(&mut self, key: String, record: InteractionRecord) {
        match self.queues.get_mut(&key) {
            Some(queue) => queue.push_back(record),
            None => {
                self.order.push_back(key.clone());
                self.queues.insert(key, VecDeque::from([record]));
            }
        }
    }

    fn remove_key(&mut self, key: &str) -> Option<VecDeque<InteractionRecord>> {
        let queue = self.queues.remove(key)?;
        self.order.retain(|k| k != key);
        Some(queue)
    }
}

/// Iterator returned by [`SessionStore::drain_all`].
pub struct Drain<'a> {
    store: &'a mut SessionStore,
}

impl Iterator for Drain<'_> {
    type Item = InteractionRecord;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(key) = self.store.order.front() {
            if let Some(record) = self
                .store
                .queues
                .get_mut(key)
                .and_then(VecDeque::pop_front)
            {
                if self.store.queues.get(key).is_some_and(VecDeque::is_empty) {
                    if let Some(exhausted) = self.store.order.pop_front() {
                        self.store.queues.remove(&exhausted);
                    }
                }
                return Some(record);
            }
            if let Some(exhausted) = self.store.order.pop_front() {
                self.store.queues.remove(&exhausted);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.store.len();
        (len, Some(len))
    }
}
