//! Process-local hierarchical advisory locks.
//!
//! Keys live in four levels that must be taken in this order:
//! class, then parent-scoped raw, then object, then name. A unit of work
//! may re-enter a key it already holds; any other unit waits.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockLevel {
    Class = 0,
    Raw = 1,
    Object = 2,
    /// Name generation. Leaf level: nothing may be taken while it is held.
    Name = 3,
}

impl fmt::Display for LockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockLevel::Class => "class",
            LockLevel::Raw => "raw",
            LockLevel::Object => "object",
            LockLevel::Name => "name",
        };
        f.write_str(s)
    }
}

static NEXT_UNIT: AtomicU64 = AtomicU64::new(1);

/// A logical unit of work. Locks are re-entrant per unit, not per thread,
/// since one unit may hop threads across await points.
#[derive(Clone)]
pub struct WorkUnit {
    inner: Arc<UnitInner>,
}

struct UnitInner {
    id: u64,
    held: Mutex<Vec<(LockLevel, String)>>,
}

impl WorkUnit {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(UnitInner {
                id: NEXT_UNIT.fetch_add(1, Ordering::Relaxed),
                held: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Locks currently held, outermost first.
    pub fn held(&self) -> Vec<(LockLevel, String)> {
        relock(&self.inner.held).clone()
    }

    fn holds(&self, key: &str) -> bool {
        relock(&self.inner.held).iter().any(|(_, k)| k == key)
    }

    /// Deepest level held under a different key than `key`.
    fn deepest_other(&self, key: &str) -> Option<(LockLevel, String)> {
        relock(&self.inner.held)
            .iter()
            .filter(|(_, k)| k != key)
            .max_by_key(|(level, _)| *level)
            .cloned()
    }

    fn push(&self, level: LockLevel, key: &str) {
        relock(&self.inner.held).push((level, key.to_string()));
    }

    fn pop(&self, key: &str) {
        let mut held = relock(&self.inner.held);
        if let Some(pos) = held.iter().rposition(|(_, k)| k == key) {
            held.remove(pos);
        }
    }
}

impl Default for WorkUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkUnit").field("id", &self.inner.id).finish()
    }
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct EntryState {
    owner: Option<u64>,
    depth: usize,
}

#[derive(Default)]
struct LockEntry {
    state: Mutex<EntryState>,
    notify: Notify,
}

type LockTable = DashMap<String, Arc<LockEntry>>;

/// Table of live lock keys. Entries exist only while held or awaited.
#[derive(Default)]
pub struct LockManager {
    entries: Arc<LockTable>,
    violations: AtomicUsize,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize work on every instance of `class` within `scope`.
    pub async fn lock_class(&self, unit: &WorkUnit, class: &str, scope: &str) -> LockGuard {
        self.acquire(unit, LockLevel::Class, format!("class:{}:{}", class, scope))
            .await
    }

    /// Arbitrary composite scope, e.g. `dns_zone:<id>:dns_records`.
    pub async fn lock_raw(&self, unit: &WorkUnit, namespace: &str, key: &str) -> LockGuard {
        self.acquire(unit, LockLevel::Raw, format!("raw:{}:{}", namespace, key))
            .await
    }

    /// Serialize mutations of one record.
    pub async fn lock_object(&self, unit: &WorkUnit, class: &str, id: &str) -> LockGuard {
        self.acquire(unit, LockLevel::Object, format!("object:{}:{}", class, id))
            .await
    }

    /// Serialize name generation for `class` within one parent or owner.
    pub async fn lock_name(&self, unit: &WorkUnit, class: &str, scope: &str) -> LockGuard {
        self.acquire(unit, LockLevel::Name, format!("name:{}:{}", class, scope))
            .await
    }

    /// Lock-order violations seen so far (debug builds only).
    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::Relaxed)
    }

    /// Number of keys currently held or awaited.
    pub fn active_keys(&self) -> usize {
        self.entries.len()
    }

    async fn acquire(&self, unit: &WorkUnit, level: LockLevel, key: String) -> LockGuard {
        if cfg!(debug_assertions) && !unit.holds(&key) {
            if let Some((held_level, held_key)) = unit.deepest_other(&key) {
                if held_level > level {
                    self.violations.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        unit = unit.id(),
                        requested = %key,
                        requested_level = %level,
                        held = %held_key,
                        held_level = %held_level,
                        "Lock order violation"
                    );
                }
            }
        }

        let entry = loop {
            let entry = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(LockEntry::default()))
                .clone();
            let notified = entry.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = relock(&entry.state);
                match state.owner {
                    None => {
                        state.owner = Some(unit.id());
                        state.depth = 1;
                        break entry.clone();
                    }
                    Some(owner) if owner == unit.id() => {
                        state.depth += 1;
                        break entry.clone();
                    }
                    Some(_) => {}
                }
            }
            tracing::trace!(unit = unit.id(), key = %key, "Waiting for lock");
            notified.await;
        };

        unit.push(level, &key);
        LockGuard {
            entries: self.entries.clone(),
            entry,
            key,
            unit: unit.clone(),
        }
    }
}

/// Held lock; released on drop.
pub struct LockGuard {
    entries: Arc<LockTable>,
    entry: Arc<LockEntry>,
    key: String,
    unit: WorkUnit,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("unit", &self.unit.id())
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.unit.pop(&self.key);
        let released = {
            let mut state = relock(&self.entry.state);
            state.depth = state.depth.saturating_sub(1);
            if state.depth == 0 {
                state.owner = None;
                true
            } else {
                false
            }
        };
        if released {
            self.entry.notify.notify_waiters();
            // The table and this guard are the only references when nobody waits.
            self.entries.remove_if(&self.key, |_, entry| {
                Arc::strong_count(entry) == 2 && relock(&entry.state).owner.is_none()
            });
        }
    }
}
