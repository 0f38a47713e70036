use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use lazy_static::lazy_static;
use parking_lot::Mutex;
use pool_governor_api::ThreadFactory;

lazy_static! {
    /// Next pool number handed out to a [`DefaultThreadFactory`].
    static ref POOL_NUMBER: AtomicUsize = AtomicUsize::new(1);

    /// Next index per `(group, pool name)` handed out to a [`SpaceThreadFactory`].
    static ref SPACE_INDEXES: Mutex<HashMap<(String, String), usize>> = Mutex::new(HashMap::new());
}

/// Names threads `pool-N-thread-M`, with `N` unique per factory in the process.
#[derive(Debug)]
pub struct DefaultThreadFactory {
    pool_number: usize,
    thread_number: AtomicUsize,
}

impl Default for DefaultThreadFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultThreadFactory {
    pub fn new() -> Self {
        Self {
            pool_number: POOL_NUMBER.fetch_add(1, Ordering::Relaxed),
            thread_number: AtomicUsize::new(1),
        }
    }

    pub fn pool_number(&self) -> usize {
        self.pool_number
    }
}

impl ThreadFactory for DefaultThreadFactory {
    fn next_thread_name(&self) -> Option<String> {
        let thread = self.thread_number.fetch_add(1, Ordering::Relaxed);
        Some(format!("pool-{}-thread-{}", self.pool_number, thread))
    }
}

/// Names threads `{group}-{pool}-{index}-thread-{n}`.
///
/// `index` counts pools created with the same group and name, so two such pools never hand
/// out the same thread name. Without a group the factory falls back to
/// [`DefaultThreadFactory`] naming.
#[derive(Debug)]
pub struct SpaceThreadFactory {
    prefix: Option<String>,
    thread_number: AtomicUsize,
    fallback: DefaultThreadFactory,
}

impl SpaceThreadFactory {
    pub fn new(group: &str, pool_name: &str) -> Self {
        let prefix = (!group.is_empty()).then(|| {
            let mut indexes = SPACE_INDEXES.lock();
            let next = indexes
                .entry((group.to_string(), pool_name.to_string()))
                .or_insert(0);
            let index = *next;
            *next += 1;
            format!("{}-{}-{}", group, pool_name, index)
        });
        Self {
            prefix,
            thread_number: AtomicUsize::new(1),
            fallback: DefaultThreadFactory::new(),
        }
    }
}

impl ThreadFactory for SpaceThreadFactory {
    fn next_thread_name(&self) -> Option<String> {
        match &self.prefix {
            Some(prefix) => {
                let thread = self.thread_number.fetch_add(1, Ordering::Relaxed);
                Some(format!("{}-thread-{}", prefix, thread))
            }
            None => self.fallback.next_thread_name(),
        }
    }
}
