use std::any::Any;
use std::fmt::{Display, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use anyhow::Result;
use log::{error, trace, warn};

/// Something that wants to know about every event of type `T`.
///
/// The event is only borrowed for the duration of the call; clone it if you need it later.
/// Returning an error (or panicking) is reported by the [Publisher] and has no effect on
/// other subscribers.
pub trait Subscriber<T>: Send + Sync {
    fn handle(&self, event: &T) -> Result<()>;
}

impl<T, F> Subscriber<T> for F
where
    F: Fn(&T) -> Result<()> + Send + Sync,
{
    fn handle(&self, event: &T) -> Result<()> {
        self(event)
    }
}

/// Identifies one registration with a [Publisher]. Subscribing the same handler twice
/// yields two distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

struct Registration<T> {
    id: SubscriptionId,
    subscriber: Arc<dyn Subscriber<T>>,
    delivery: Mutex<Delivery>,
    idle: Condvar,
}

/// Threads currently inside this registration's handler, plus whether new calls are allowed.
struct Delivery {
    active: bool,
    running_on: Vec<ThreadId>,
}

impl<T> Registration<T> {
    fn new(id: SubscriptionId, subscriber: Arc<dyn Subscriber<T>>) -> Self {
        Registration {
            id,
            subscriber,
            delivery: Mutex::new(Delivery {
                active: true,
                running_on: vec![],
            }),
            idle: Condvar::new(),
        }
    }

    fn delivery(&self) -> MutexGuard<'_, Delivery> {
        // Handlers never run under this lock
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Checks and claims in one step, so a concurrent [Self::deactivate] either sees this
    /// call and waits for it or makes it skip.
    fn enter(&self) -> bool {
        let mut delivery = self.delivery();
        if delivery.active {
            delivery.running_on.push(thread::current().id());
        }
        delivery.active
    }

    fn leave(&self) {
        let me = thread::current().id();
        let mut delivery = self.delivery();
        if let Some(idx) = delivery.running_on.iter().position(|it| *it == me) {
            delivery.running_on.swap_remove(idx);
        }
        drop(delivery);
        self.idle.notify_all();
    }

    /// Blocks further calls and waits for calls running on other threads to return.
    /// A call on the current thread is a handler removing itself and cannot be waited for.
    fn deactivate(&self) {
        let me = thread::current().id();
        let mut delivery = self.delivery();
        delivery.active = false;
        let _idle = self
            .idle
            .wait_while(delivery, |it| it.running_on.iter().any(|thread| *thread != me))
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Synchronous one-to-many event channel.
///
/// Subscribers are invoked in registration order on the publishing thread. All methods
/// take `&self`, so a publisher can be shared via [Arc] and (un-)subscribed from other
/// threads while a publish is running. The registration list is snapshotted per publish,
/// but each registration is re-checked right before it is invoked. [Publisher::unsubscribe]
/// waits for calls of that subscriber still running on other threads; once it returns, the
/// subscriber is neither running elsewhere nor called again.
///
/// Consequently, a handler must not unsubscribe another handler that might at the same
/// time be running on a different thread and be waiting for the first one.
pub struct Publisher<T> {
    next_id: AtomicU64,
    registrations: Mutex<Vec<Arc<Registration<T>>>>,
}

impl<T> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Publisher<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            registrations: Mutex::new(vec![]),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Arc::new(Registration::new(id, subscriber)));
        trace!("Registered subscriber {}", id);
        id
    }

    /// Removes a registration. Unknown ids are ignored; returns whether anything was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = {
            let mut registrations = self.lock();
            let idx = registrations.iter().position(|it| it.id == id);
            idx.map(|idx| registrations.remove(idx))
        };
        match removed {
            Some(registration) => {
                // Not under the list lock, running handlers may need it
                registration.deactivate();
                trace!("Removed subscriber {}", id);
                true
            }
            None => false,
        }
    }

    /// Removes every registration of this exact handler instance, returning how many
    /// there were.
    pub fn unsubscribe_handler<S: Subscriber<T> + ?Sized>(&self, subscriber: &Arc<S>) -> usize {
        let wanted = Arc::as_ptr(subscriber).cast::<()>();
        let removed: Vec<Arc<Registration<T>>> = {
            let mut registrations = self.lock();
            let (removed, kept) = registrations
                .drain(..)
                .partition(|it| Arc::as_ptr(&it.subscriber).cast::<()>() == wanted);
            *registrations = kept;
            removed
        };
        for registration in &removed {
            registration.deactivate();
            trace!("Removed subscriber {}", registration.id);
        }
        removed.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Hands `event` to every current subscriber, in registration order. Failures are
    /// logged and counted, never propagated.
    pub fn publish(&self, event: &T) -> PublishReport {
        // The lock must not be held while handlers run, they may (un-)subscribe
        let snapshot: Vec<Arc<Registration<T>>> = self.lock().clone();
        let mut report = PublishReport::default();
        for registration in snapshot {
            if !registration.enter() {
                continue;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                registration.subscriber.handle(event)
            }));
            registration.leave();
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    warn!("Subscriber {} failed to handle event: {:?}", registration.id, e);
                    report.failed += 1;
                }
                Err(panic) => {
                    error!(
                        "Subscriber {} panicked while handling event: {}",
                        registration.id,
                        panic_message(&*panic)
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Registration<T>>>> {
        // Handlers never run under this lock, so a poisoned list is still consistent
        self.registrations.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "(non-string panic payload)"
    }
}
