//! Listener registration and ordered event dispatch.
//!
//! Each event stream (lifecycle, P2P discovery, geo discovery, messaging)
//! owns one `EventStream`. Events are queued and drained by whichever thread
//! finds the stream idle; listeners run with no lock held, so a listener may
//! call back into the client (send a message, change discovery info,
//! disconnect) from inside a callback. Re-entrant publishes are queued
//! behind the event being dispatched, which keeps per-stream order intact.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Receives events of one stream.
///
/// Implemented for any `Fn(&E) + Send + Sync`, so closures are listeners.
pub trait Listener<E>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F> Listener<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event)
    }
}

/// Opaque handle returned by listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

type ListenerList<E> = Arc<Vec<(ListenerId, Arc<dyn Listener<E>>)>>;

struct StreamInner<E> {
    /// Copy-on-write so a dispatch pass can hold a snapshot without the lock.
    listeners: ListenerList<E>,
    pending: VecDeque<E>,
    draining: bool,
}

pub struct EventStream<E> {
    name: &'static str,
    closed: AtomicBool,
    inner: Mutex<StreamInner<E>>,
}

impl<E> EventStream<E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            closed: AtomicBool::new(false),
            inner: Mutex::new(StreamInner {
                listeners: Arc::new(Vec::new()),
                pending: VecDeque::new(),
                draining: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StreamInner<E>> {
        // Listeners never run under this lock, so poisoning only means a
        // panic inside our own bookkeeping; the data is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, listener: Arc<dyn Listener<E>>) -> ListenerId {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        let mut inner = self.lock();
        let mut next: Vec<_> = inner.listeners.iter().cloned().collect();
        next.push((id, listener));
        inner.listeners = Arc::new(next);
        tracing::trace!(stream = self.name, listener = id.0, "listener added");
        id
    }

    /// Deregister. Takes effect no later than the next dispatched event.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut inner = self.lock();
        let before = inner.listeners.len();
        let next: Vec<_> = inner
            .listeners
            .iter()
            .filter(|(lid, _)| *lid != id)
            .cloned()
            .collect();
        let removed = next.len() != before;
        inner.listeners = Arc::new(next);
        if removed {
            tracing::trace!(stream = self.name, listener = id.0, "listener removed");
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue an event and dispatch everything pending.
    pub fn publish(&self, event: E) {
        self.enqueue(event);
        self.drain();
    }

    /// Queue an event without dispatching. Lets a caller fix the order of
    /// events while holding its own lock, then `drain` after releasing it.
    pub fn enqueue(&self, event: E) {
        if self.is_closed() {
            return;
        }
        self.lock().pending.push_back(event);
    }

    /// Dispatch pending events in order. Returns immediately if another
    /// caller (possibly further up this thread's stack) is already draining.
    pub fn drain(&self) {
        {
            let mut inner = self.lock();
            if inner.draining {
                return;
            }
            inner.draining = true;
        }
        let _guard = DrainGuard(self);

        loop {
            let (event, listeners) = {
                let mut inner = self.lock();
                match inner.pending.pop_front() {
                    Some(event) if !self.is_closed() => (event, inner.listeners.clone()),
                    _ => {
                        inner.draining = false;
                        return;
                    }
                }
            };

            for (_, listener) in listeners.iter() {
                if self.is_closed() {
                    break;
                }
                listener.on_event(&event);
            }
        }
    }

    /// Drop queued events that have not been dispatched yet.
    pub fn clear_pending(&self) {
        self.lock().pending.clear();
    }

    /// Stop the stream for good: no queued or future event reaches a listener.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut inner = self.lock();
        inner.pending.clear();
        inner.listeners = Arc::new(Vec::new());
    }
}

/// Releases the draining flag if a listener panics mid-dispatch, so the
/// stream is not wedged for every later event.
struct DrainGuard<'a, E>(&'a EventStream<E>);

impl<E> Drop for DrainGuard<'_, E> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock().draining = false;
        }
    }
}
