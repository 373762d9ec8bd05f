use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

use crate::error::Result;
use crate::models::Category;

/// Identifies one category fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub category: Category,
    pub generation: u64,
}

/// Orders category fetches by completion.
///
/// Every fetch takes a ticket before going to the remote. When it comes
/// back, its result is written only if no newer ticket for the same
/// category has been written already.
#[derive(Debug, Default)]
pub struct GenerationTracker {
    next: AtomicU64,
    applied: tokio::sync::Mutex<HashMap<Category, u64>>,
}

impl GenerationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, category: &Category) -> Ticket {
        Ticket {
            category: category.clone(),
            generation: self.next.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    /// Runs `apply` when the ticket is still the freshest one for its
    /// category. Returns whether it ran.
    pub async fn apply_if_fresh<F, Fut>(&self, ticket: &Ticket, apply: F) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut applied = self.applied.lock().await;
        let last = applied.get(&ticket.category).copied().unwrap_or(0);
        if ticket.generation <= last {
            return Ok(false);
        }

        apply().await?;
        applied.insert(ticket.category.clone(), ticket.generation);
        Ok(true)
    }

    /// Newest generation written for the category, 0 when none.
    pub async fn applied(&self, category: &Category) -> u64 {
        self.applied
            .lock()
            .await
            .get(category)
            .copied()
            .unwrap_or(0)
    }
}

type LockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// One async lock per mail id, so mutations on the same mail run one at
/// a time while different mails proceed in parallel.
#[derive(Debug, Default, Clone)]
pub struct MutationLocks {
    inner: Arc<Mutex<LockMap>>,
}

impl MutationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: &str) -> MutationGuard {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(id.to_string()).or_default().clone()
        };

        let guard = lock.lock_owned().await;
        MutationGuard {
            id: id.to_string(),
            locks: self.inner.clone(),
            _guard: guard,
        }
    }

    /// Ids with a mutation running or queued. A fetch must not overwrite
    /// their cached state with what the remote knew before the mutation.
    pub fn in_flight(&self) -> HashSet<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Number of ids currently locked or waited on.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct MutationGuard {
    id: String,
    locks: Arc<Mutex<LockMap>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this guard hold one reference each; anything above
        // that is a waiter.
        if let Some(lock) = map.get(&self.id) {
            if Arc::strong_count(lock) <= 2 {
                map.remove(&self.id);
            }
        }
    }
}
