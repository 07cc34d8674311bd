//! Subscription registry - single choke point for cancellation.
//!
//! Each session owns one registry. Feeds register their head subscription,
//! pollers their timer, and every in-flight block fetch registers itself under
//! a name. [`SubscriptionRegistry::teardown_all`] deactivates everything in one
//! step; anything still running afterwards observes a dead [`Liveness`] and
//! drops its result.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

// =============================================================================
// Liveness
// =============================================================================

/// Shared liveness flag of a feed or poller handle.
///
/// Starts live; once deactivated it never comes back.
#[derive(Debug, Clone)]
pub struct Liveness {
    tx: Arc<watch::Sender<bool>>,
}

impl Liveness {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_live(&self) -> bool {
        *self.tx.borrow()
    }

    /// Mark inert. Returns `true` if this call performed the transition.
    pub fn deactivate(&self) -> bool {
        self.tx.send_if_modified(|live| std::mem::replace(live, false))
    }

    /// Resolves once the handle has been deactivated.
    pub async fn deactivated(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|live| !*live).await;
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// A background task tied to a liveness handle.
struct TaskRegistration {
    liveness: Liveness,
    task: JoinHandle<()>,
}

impl TaskRegistration {
    fn cancel(self) {
        self.liveness.deactivate();
        self.task.abort();
    }

    /// Cancel and wait until the task (and whatever it owns) is dropped.
    async fn shutdown(self) {
        self.liveness.deactivate();
        self.task.abort();
        let _ = self.task.await;
    }
}

struct FetchRegistration {
    name: String,
    liveness: Liveness,
}

#[derive(Default)]
struct RegistryInner {
    head: Option<TaskRegistration>,
    timers: HashMap<String, TaskRegistration>,
    fetches: HashMap<u64, FetchRegistration>,
    closed: bool,
}

/// Tracks the head subscription, timers and in-flight fetches of a session.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<RegistryInner>,
    next_fetch: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the head subscription task, tearing down the previous one.
    ///
    /// Returns `false` (and cancels the new registration) if the registry is
    /// closed.
    pub fn register_head(&self, liveness: Liveness, task: JoinHandle<()>) -> bool {
        let registration = TaskRegistration { liveness, task };
        let mut inner = self.inner.lock();
        if inner.closed {
            drop(inner);
            registration.cancel();
            return false;
        }
        let previous = inner.head.replace(registration);
        drop(inner);

        if let Some(previous) = previous {
            debug!("Replacing previous head subscription");
            previous.cancel();
        }
        true
    }

    /// Tear down the current head subscription, if any, and wait for its
    /// task to be gone. Call before opening a replacement subscription.
    pub async fn teardown_head(&self) {
        let previous = self.inner.lock().head.take();
        if let Some(previous) = previous {
            debug!("Tearing down previous head subscription");
            previous.shutdown().await;
        }
    }

    /// Register a periodic task under `name`, replacing one with the same name.
    pub fn register_timer(&self, name: &str, liveness: Liveness, task: JoinHandle<()>) -> bool {
        let registration = TaskRegistration { liveness, task };
        let mut inner = self.inner.lock();
        if inner.closed {
            drop(inner);
            registration.cancel();
            return false;
        }
        let previous = inner.timers.insert(name.to_string(), registration);
        drop(inner);

        if let Some(previous) = previous {
            debug!(timer = name, "Replacing previous timer");
            previous.cancel();
        }
        true
    }

    /// Register an in-flight fetch owned by `liveness`.
    ///
    /// The returned ticket unregisters the fetch when dropped. `None` means
    /// the registry is closed and the fetch result must be discarded.
    pub fn register_fetch(
        self: &Arc<Self>,
        name: impl Into<String>,
        liveness: Liveness,
    ) -> Option<FetchTicket> {
        let key = self.next_fetch.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        inner.fetches.insert(
            key,
            FetchRegistration {
                name: name.into(),
                liveness,
            },
        );
        Some(FetchTicket {
            registry: Arc::clone(self),
            key,
        })
    }

    fn unregister_fetch(&self, key: u64) {
        if let Some(fetch) = self.inner.lock().fetches.remove(&key) {
            trace!(fetch = %fetch.name, "Fetch unregistered");
        }
    }

    /// Names of the fetches currently in flight, sorted.
    pub fn in_flight(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .lock()
            .fetches
            .values()
            .map(|f| f.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn has_head(&self) -> bool {
        self.inner
            .lock()
            .head
            .as_ref()
            .is_some_and(|h| h.liveness.is_live())
    }

    /// Cancel every registration. Safe to call any number of times.
    pub fn teardown_all(&self) {
        let (head, timers, fetches) = {
            let mut inner = self.inner.lock();
            (
                inner.head.take(),
                std::mem::take(&mut inner.timers),
                std::mem::take(&mut inner.fetches),
            )
        };

        let had_head = head.is_some();
        let timer_count = timers.len();
        let fetch_count = fetches.len();

        if let Some(head) = head {
            head.cancel();
        }
        for (_, timer) in timers {
            timer.cancel();
        }
        for (_, fetch) in fetches {
            fetch.liveness.deactivate();
        }

        if had_head || timer_count > 0 || fetch_count > 0 {
            debug!(
                head = had_head,
                timers = timer_count,
                fetches = fetch_count,
                "🧹 Subscriptions torn down"
            );
        }
    }

    /// Tear everything down and refuse further registrations.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.teardown_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

/// RAII registration of one in-flight fetch.
pub struct FetchTicket {
    registry: Arc<SubscriptionRegistry>,
    key: u64,
}

impl Drop for FetchTicket {
    fn drop(&mut self) {
        self.registry.unregister_fetch(self.key);
    }
}
