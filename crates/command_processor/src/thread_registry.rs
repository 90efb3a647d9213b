//! Names for the threads that touch the bridge, used to label log lines.

use std::sync::Mutex;
use std::thread::{self, ThreadId};

use log::warn;

const THREAD_NAME_CAPACITY: usize = 10;

/// Small fixed-capacity map from thread id to a caller-chosen name.
///
/// Locked independently of the bridge state and never while that lock is
/// held the other way around, so the two mutexes cannot deadlock.
pub(crate) struct ThreadNameRegistry {
    entries: Mutex<Vec<(ThreadId, String)>>,
}

impl ThreadNameRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(THREAD_NAME_CAPACITY)),
        }
    }

    /// Name the calling thread, replacing any earlier name it registered.
    /// Once the capacity is reached new threads keep their fallback label.
    pub(crate) fn register_current(&self, name: &str) {
        let id = thread::current().id();
        let mut entries = self.lock_entries();
        if let Some(entry) = entries.iter_mut().find(|(entry_id, _)| *entry_id == id) {
            entry.1 = String::from(name);
            return;
        }
        if entries.len() < THREAD_NAME_CAPACITY {
            entries.push((id, String::from(name)));
        } else {
            warn!("thread name registry full; dropping name '{name}'");
        }
    }

    /// Registered name of the calling thread, or a fallback built from the
    /// OS thread name or id.
    pub(crate) fn label_for_current(&self) -> String {
        let current = thread::current();
        let entries = self.lock_entries();
        if let Some((_, name)) = entries
            .iter()
            .find(|(entry_id, _)| *entry_id == current.id())
        {
            return name.clone();
        }
        match current.name() {
            Some(name) => String::from(name),
            None => format!("{:?}", current.id()),
        }
    }

    pub(crate) fn clear(&self) {
        self.lock_entries().clear();
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, Vec<(ThreadId, String)>> {
        match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => panic!("thread name registry mutex poisoned"),
        }
    }
}
