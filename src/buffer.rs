//! # Elastic buffer: a channel whose capacity can grow on demand.
//!
//! A plain bounded channel has a fixed capacity chosen at construction.
//! [`Buffer`] extends it with an unbounded (soft-capped) overflow queue and a
//! background drainer, so producers never block: an item goes straight onto
//! the delivery channel when there is room, and into the overflow queue
//! otherwise. The drainer moves overflow items onto the channel in order.
//!
//! # High-level architecture
//!
//! ```text
//!            submit()
//!               │
//!     ┌─────────┴──────────┐
//!     │ overflow empty &&  │ yes
//!     │ drainer idle &&    ├────────────► delivery channel ──► receiver
//!     │ channel has room?  │                    ▲
//!     └─────────┬──────────┘                    │
//!               │ no                         drainer
//!               ▼                               │
//!        overflow queue (FIFO, soft cap) ───────┘
//! ```
//!
//! Guarantees:
//! - The receiver observes items in exact submit order, across both paths.
//! - When the overflow queue is full, the configured [`OverflowPolicy`]
//!   decides between dropping the new item, evicting the queue head, or
//!   clearing the queue.
//! - The drainer idles out after [`BufferOptions::idle_timeout`] of emptiness
//!   and is respawned by the next submission.
//! - After [`Buffer::dispose`], submissions return [`SubmitResult::Dropped`]
//!   and the delivery channel closes once drained.
//!
//! The ordering argument: an item takes the fast path only when the drainer
//! is idle *and* the overflow queue is empty, so no earlier item can still be
//! behind it. Later items either also take the fast path (the channel is
//! FIFO) or queue behind it in the overflow region, which drains in order
//! through the same channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Notify;

use crate::runner::Runner;

/// What happened to a submitted item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitResult {
    /// Placed directly on the delivery channel.
    DeliveredDirect,
    /// Appended to the overflow queue.
    Enqueued,
    /// Appended to the overflow queue after the policy evicted older items.
    EnqueuedReplacing,
    /// Rejected: the buffer is disposed, or the queue was full under
    /// [`OverflowPolicy::Drop`].
    Dropped,
}

/// Behavior when the overflow queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Reject the new item.
    Drop,
    /// Evict the oldest queued item, keep the new one.
    RemoveHead,
    /// Discard the whole queue, keep only the new item.
    ClearAll,
}

/// Construction-time options for [`Buffer`].
#[derive(Debug, Clone)]
pub struct BufferOptions {
    /// Delivery channel capacity. `0` disables the direct fast path so every
    /// item traverses the overflow queue. Default `128`.
    pub channel_capacity: usize,
    /// Overflow queue soft cap; `0` means unbounded. Default `0`.
    pub queue_capacity: usize,
    /// How long the drainer lingers on an empty queue before exiting;
    /// `Duration::ZERO` means it never idles out. Default 10 s.
    pub idle_timeout: Duration,
    /// Policy applied when the overflow queue is full. Default
    /// [`OverflowPolicy::Drop`].
    pub policy: OverflowPolicy,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            channel_capacity: 128,
            queue_capacity: 0,
            idle_timeout: Duration::from_secs(10),
            policy: OverflowPolicy::Drop,
        }
    }
}

struct Overflow<T> {
    queue: VecDeque<T>,
    capacity: usize,
    draining: bool,
}

struct Shared<T> {
    runner: Runner,
    overflow: Mutex<Overflow<T>>,
    wake: Notify,
    tx: Mutex<Option<mpsc::Sender<T>>>,
    disposed: AtomicBool,
    size: Arc<AtomicUsize>,
    channel_capacity: usize,
    idle_timeout: Duration,
    policy: OverflowPolicy,
}

/// Producer-safe ordered pipe with elastic capacity.
///
/// Call [`dispose`](Buffer::dispose) when the buffer is no longer used, or the
/// drainer task may linger until its idle timeout.
pub struct Buffer<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    rx: Mutex<Option<BufferReceiver<T>>>,
}

/// Consumer side of a [`Buffer`].
pub struct BufferReceiver<T> {
    rx: mpsc::Receiver<T>,
    size: Arc<AtomicUsize>,
}

impl<T> BufferReceiver<T> {
    /// Receives the next item, or `None` once the buffer is disposed and
    /// fully drained.
    pub async fn recv(&mut self) -> Option<T> {
        let item = self.rx.recv().await;
        if item.is_some() {
            self.size.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    /// Non-blocking receive of an already-delivered item.
    pub fn try_recv(&mut self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => {
                self.size.fetch_sub(1, Ordering::SeqCst);
                Some(item)
            }
            Err(_) => None,
        }
    }
}

impl<T: Send + 'static> Buffer<T> {
    pub fn new(options: BufferOptions) -> Self {
        // tokio channels cannot have zero capacity; a zero setting only
        // disables the fast path, the drainer still needs one slot.
        let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
        let size = Arc::new(AtomicUsize::new(0));
        Self {
            shared: Arc::new(Shared {
                runner: Runner::new(),
                overflow: Mutex::new(Overflow {
                    queue: VecDeque::new(),
                    capacity: options.queue_capacity,
                    draining: false,
                }),
                wake: Notify::new(),
                tx: Mutex::new(Some(tx)),
                disposed: AtomicBool::new(false),
                size: size.clone(),
                channel_capacity: options.channel_capacity,
                idle_timeout: options.idle_timeout,
                policy: options.policy,
            }),
            rx: Mutex::new(Some(BufferReceiver { rx, size })),
        }
    }

    /// Submits one item. Thread safe; never blocks.
    ///
    /// Must be called from within a tokio runtime (the drainer is spawned
    /// lazily on the first overflowing submission).
    pub fn submit(&self, item: T) -> SubmitResult {
        let shared = &self.shared;
        if shared.disposed.load(Ordering::SeqCst) {
            return SubmitResult::Dropped;
        }
        let mut overflow = shared.overflow.lock();
        if shared.disposed.load(Ordering::SeqCst) {
            return SubmitResult::Dropped;
        }

        if !overflow.draining && overflow.queue.is_empty() && shared.channel_capacity > 0 {
            // Nothing can be ahead of this item; try the direct path.
            let tx = shared.tx.lock();
            if let Some(tx) = tx.as_ref() {
                if let Ok(permit) = tx.try_reserve() {
                    permit.send(item);
                    shared.size.fetch_add(1, Ordering::SeqCst);
                    return SubmitResult::DeliveredDirect;
                }
            }
        }

        let mut result = SubmitResult::Enqueued;
        if overflow.capacity != 0 && overflow.queue.len() >= overflow.capacity {
            match shared.policy {
                OverflowPolicy::Drop => return SubmitResult::Dropped,
                OverflowPolicy::RemoveHead => {
                    overflow.queue.pop_front();
                    shared.size.fetch_sub(1, Ordering::SeqCst);
                    result = SubmitResult::EnqueuedReplacing;
                }
                OverflowPolicy::ClearAll => {
                    shared.size.fetch_sub(overflow.queue.len(), Ordering::SeqCst);
                    overflow.queue.clear();
                    result = SubmitResult::EnqueuedReplacing;
                }
            }
        }
        overflow.queue.push_back(item);
        shared.size.fetch_add(1, Ordering::SeqCst);

        if !overflow.draining {
            overflow.draining = true;
            shared.runner.mark();
            tokio::spawn(Self::drain(shared.clone()));
        }
        shared.wake.notify_one();
        result
    }

    /// Takes the consumer half. Returns `None` after the first call.
    pub fn take_receiver(&self) -> Option<BufferReceiver<T>> {
        self.rx.lock().take()
    }

    /// Adjusts the overflow queue's soft cap; `0` means unbounded.
    pub fn set_capacity(&self, capacity: usize) {
        self.shared.overflow.lock().capacity = capacity;
    }

    /// Total undelivered items across the channel and the overflow queue.
    pub fn len(&self) -> usize {
        self.shared.size.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shuts the buffer down: further submissions are rejected, the drainer
    /// is stopped and joined, and the delivery channel is closed.
    ///
    /// Returns the items still sitting in the overflow queue, in order. Items
    /// already on the delivery channel stay readable until the receiver
    /// observes the close.
    pub async fn dispose(&self) -> Vec<T> {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }
        self.shared.runner.close_wait().await;
        // Dropping the last sender closes the channel once drained.
        self.shared.tx.lock().take();
        let mut overflow = self.shared.overflow.lock();
        let leftovers: Vec<T> = overflow.queue.drain(..).collect();
        self.shared
            .size
            .fetch_sub(leftovers.len(), Ordering::SeqCst);
        leftovers
    }

    async fn drain(shared: Arc<Shared<T>>) {
        let quit = shared.runner.quit();
        let tx = match shared.tx.lock().as_ref() {
            Some(tx) => tx.clone(),
            None => {
                shared.runner.done();
                return;
            }
        };
        loop {
            let mut item = shared.overflow.lock().queue.pop_front();

            if item.is_none() {
                // Queue exhausted: park until cancelled, signalled, or the
                // idle timeout elapses.
                let idle = shared.idle_timeout;
                tokio::select! {
                    _ = quit.cancelled() => break,
                    _ = shared.wake.notified() => {}
                    _ = tokio::time::sleep(idle), if !idle.is_zero() => {}
                }
                let mut overflow = shared.overflow.lock();
                match overflow.queue.pop_front() {
                    Some(v) => item = Some(v),
                    None => {
                        // Still empty: hand the fast path back to producers
                        // and exit.
                        overflow.draining = false;
                        break;
                    }
                }
            }

            let item = match item {
                Some(v) => v,
                None => break,
            };
            tokio::select! {
                _ = quit.cancelled() => {
                    // Keep the popped item reachable for dispose().
                    shared.overflow.lock().queue.push_front(item);
                    break;
                }
                permit = tx.reserve() => match permit {
                    Ok(permit) => permit.send(item),
                    Err(_) => break,
                },
            }
        }
        shared.runner.done();
    }
}
