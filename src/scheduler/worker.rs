//! Elastic worker pool feeding entities to executors.
//!
//! Entities flow through an internal elastic buffer into the manager loop,
//! which hands them to workers over a capacity-1 dispatch channel shared by
//! the whole pool. The pool grows (up to its cap) whenever a hand-off finds
//! no worker parked on the channel, and a periodic sweep retires every worker
//! that is parked when the reduce timer fires, so the pool tracks load in
//! both directions, down to zero when idle.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::buffer::{Buffer, BufferOptions};
use crate::registry::Registry;
use crate::runner::Runner;
use crate::scheduler::Entity;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type SharedReceiver = Arc<Mutex<mpsc::Receiver<Job>>>;

pub(crate) struct WorkerManager {
    inner: Arc<Inner>,
}

struct Inner {
    runner: Runner,
    /// Execution context shared by every entity's running context; cancelled
    /// at shutdown so in-flight executors wind down.
    ctx: CancellationToken,
    input: Buffer<Arc<Entity>>,
    dispatch_tx: mpsc::Sender<Job>,
    dispatch_rx: SharedReceiver,
    workers: Registry<Arc<Worker>>,
    /// Workers currently parked waiting for a job.
    waiting: Arc<AtomicUsize>,
    max_workers: usize,
    reduce_interval: Duration,
    started: std::sync::Once,
}

impl WorkerManager {
    pub fn new(max_workers: usize, reduce_interval: Duration) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(Inner {
                runner: Runner::new(),
                ctx: CancellationToken::new(),
                input: Buffer::new(BufferOptions::default()),
                dispatch_tx,
                dispatch_rx: Arc::new(Mutex::new(dispatch_rx)),
                workers: Registry::new(),
                waiting: Arc::new(AtomicUsize::new(0)),
                max_workers,
                reduce_interval,
                started: std::sync::Once::new(),
            }),
        }
    }

    /// Queues an entity for execution. Starts the manager loop on first use.
    pub fn push(&self, entity: Arc<Entity>) {
        let inner = &self.inner;
        inner.started.call_once(|| {
            inner.runner.mark();
            tokio::spawn(Inner::run(inner.clone()));
        });
        inner.input.submit(entity);
    }

    /// Cancels in-flight executors, stops the manager loop and joins every
    /// worker.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.ctx.cancel();
        inner.runner.close_wait().await;
        // Entities still in the input queue stay registered; the scheduler
        // cancels them from its registry snapshot.
        inner.input.dispose().await;
        let workers = inner.workers.snapshot();
        join_all(workers.iter().map(|w| w.shutdown(&inner.workers))).await;
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        let quit = self.runner.quit();
        let mut input = match self.input.take_receiver() {
            Some(rx) => rx,
            None => {
                self.runner.done();
                return;
            }
        };
        let mut reduce_tick = tokio::time::interval(self.reduce_interval);
        reduce_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick fires immediately; skip it.
        reduce_tick.tick().await;

        loop {
            tokio::select! {
                _ = quit.cancelled() => break,
                entity = input.recv() => {
                    let entity = match entity {
                        Some(e) => e,
                        None => break,
                    };
                    let ctx = self.ctx.clone();
                    let job: Job = Box::pin(entity.execute(ctx));
                    if !self.handoff(job, &quit).await {
                        break;
                    }
                }
                _ = reduce_tick.tick() => self.reduce().await,
            }
        }
        self.runner.done();
    }

    /// Hands one job to the pool, growing it first when nobody is parked on
    /// the dispatch channel. Returns `false` when quit interrupted the send.
    async fn handoff(&self, job: Job, quit: &CancellationToken) -> bool {
        if self.waiting.load(Ordering::SeqCst) == 0 {
            self.grow();
        }
        tokio::select! {
            _ = quit.cancelled() => false,
            sent = self.dispatch_tx.send(job) => sent.is_ok(),
        }
    }

    fn grow(&self) {
        if self.workers.len() >= self.max_workers {
            return;
        }
        let id = self.workers.next_id();
        let worker = Worker::new(id, self.dispatch_rx.clone(), self.waiting.clone());
        self.workers.insert(id, worker.clone());
        worker.start();
    }

    /// Retires every worker currently parked on the dispatch channel.
    async fn reduce(&self) {
        let idle: Vec<Arc<Worker>> = self
            .workers
            .snapshot()
            .into_iter()
            .filter(|w| w.idle())
            .collect();
        join_all(idle.iter().map(|w| w.shutdown(&self.workers))).await;
    }
}

struct Worker {
    id: u64,
    runner: Runner,
    rx: SharedReceiver,
    parked: AtomicBool,
    pool_waiting: Arc<AtomicUsize>,
}

impl Worker {
    fn new(id: u64, rx: SharedReceiver, pool_waiting: Arc<AtomicUsize>) -> Arc<Self> {
        Arc::new(Self {
            id,
            runner: Runner::new(),
            rx,
            parked: AtomicBool::new(false),
            pool_waiting,
        })
    }

    fn start(self: &Arc<Self>) {
        self.runner.mark();
        let me = self.clone();
        tokio::spawn(async move {
            me.run().await;
            me.runner.done();
        });
    }

    async fn run(&self) {
        let quit = self.runner.quit();
        loop {
            self.park(true);
            let job = tokio::select! {
                biased;
                _ = quit.cancelled() => None,
                job = Self::next(&self.rx) => job,
            };
            self.park(false);
            match job {
                Some(job) => job.await,
                None => break,
            }
        }
    }

    async fn next(rx: &SharedReceiver) -> Option<Job> {
        let mut rx = rx.lock().await;
        rx.recv().await
    }

    fn park(&self, on: bool) {
        let was = self.parked.swap(on, Ordering::SeqCst);
        if was == on {
            return;
        }
        if on {
            self.pool_waiting.fetch_add(1, Ordering::SeqCst);
        } else {
            self.pool_waiting.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// A worker is reducible while it is parked waiting for work.
    fn idle(&self) -> bool {
        self.parked.load(Ordering::SeqCst)
    }

    async fn shutdown(&self, registry: &Registry<Arc<Worker>>) {
        self.runner.close_wait().await;
        registry.remove(self.id);
    }
}
