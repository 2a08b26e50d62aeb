//! # Reactor: serialized execution of submitted handlers.
//!
//! An event loop with a single consumer. Every closure submitted to a
//! [`Reactor`] runs strictly one at a time, in submission order, so code that
//! funnels its mutations through a reactor needs no further locking inside
//! that domain. Two bands exist: a primary queue and a priority queue; while
//! the priority band is non-empty it is always drained first.
//!
//! - [`Reactor::post`] / [`Reactor::post_priority`] enqueue and return.
//! - [`Reactor::send`] / [`Reactor::send_priority`] enqueue and wait for the
//!   handler to finish (or be canceled by shutdown).
//!
//! Handlers receive the reactor's cancellation token and may await; the
//! consumer awaits them inline, which is what serializes them.
//!
//! On [`Reactor::stop`] the consumer is joined and both queues are drained;
//! every handler still waiting completes with [`Error::HandlerCanceled`]. A
//! handler therefore runs exactly once or is canceled exactly once; its
//! completion token always fires.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::{Buffer, BufferOptions, BufferReceiver};
use crate::error::Error;
use crate::runner::Runner;
use crate::status;

type BoxHandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type Handler = Box<dyn FnOnce(CancellationToken) -> BoxHandlerFuture + Send + 'static>;

/// Construction-time options for [`Reactor`].
#[derive(Default)]
pub struct ReactorOptions {
    /// Optional parent context: when it fires, the reactor shuts itself down
    /// and handlers observe a cancelled token.
    pub parent: Option<CancellationToken>,
}

struct ReactorTask {
    handler: Handler,
    completion: oneshot::Sender<Result<(), Error>>,
}

impl ReactorTask {
    fn new(handler: Handler) -> (Self, oneshot::Receiver<Result<(), Error>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                handler,
                completion: tx,
            },
            rx,
        )
    }

    async fn run(self, ctx: CancellationToken) {
        (self.handler)(ctx).await;
        let _ = self.completion.send(Ok(()));
    }

    fn cancel(self) {
        let _ = self.completion.send(Err(Error::HandlerCanceled));
    }
}

type ConsumerHandle = JoinHandle<(BufferReceiver<ReactorTask>, BufferReceiver<ReactorTask>)>;

/// Single-consumer event loop with a primary and a priority band.
pub struct Reactor {
    runner: Runner,
    status: status::Controller,
    ctx: CancellationToken,
    queue: Buffer<ReactorTask>,
    priority: Buffer<ReactorTask>,
    consumer: Mutex<Option<ConsumerHandle>>,
}

impl Reactor {
    /// Creates a reactor. [`start`](Self::start) must be called before
    /// handlers are accepted.
    pub fn new(options: ReactorOptions) -> Arc<Self> {
        let ctx = match options.parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        Arc::new(Self {
            runner: Runner::new(),
            status: status::Controller::new(),
            ctx,
            queue: Buffer::new(BufferOptions::default()),
            priority: Buffer::new(BufferOptions::default()),
            consumer: Mutex::new(None),
        })
    }

    /// Starts the consumer loop. Safe to call concurrently; one caller wins.
    pub fn start(self: &Arc<Self>) {
        if !self.status.begin_start() {
            return;
        }
        let pri_rx = self
            .priority
            .take_receiver()
            .expect("reactor started twice over the same receivers");
        let main_rx = self
            .queue
            .take_receiver()
            .expect("reactor started twice over the same receivers");
        self.runner.mark();
        let me = self.clone();
        let handle = tokio::spawn(async move {
            let runner = me.runner.clone();
            let out = me.consume(pri_rx, main_rx).await;
            runner.done();
            out
        });
        *self.consumer.lock() = Some(handle);
        self.status.end_start();
    }

    /// Stops the reactor: joins the consumer, then drains both bands,
    /// completing every remaining task with [`Error::HandlerCanceled`].
    ///
    /// Idempotent; concurrent callers lose quietly.
    pub async fn stop(&self) {
        if !self.status.begin_stop().await {
            return;
        }
        self.ctx.cancel();
        self.runner.close_wait().await;

        let handle = self.consumer.lock().take();
        let receivers = match handle {
            Some(h) => h.await.ok(),
            None => None,
        };

        // Overflow leftovers first, then whatever already reached the
        // delivery channels.
        for task in self.priority.dispose().await {
            task.cancel();
        }
        for task in self.queue.dispose().await {
            task.cancel();
        }
        if let Some((mut pri_rx, mut main_rx)) = receivers {
            while let Some(task) = pri_rx.try_recv() {
                task.cancel();
            }
            while let Some(task) = main_rx.try_recv() {
                task.cancel();
            }
        }
        self.status.end_stop();
    }

    /// Enqueues a handler on the primary band and returns immediately.
    pub fn post<F, Fut>(&self, handler: F) -> Result<(), Error>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.enqueue(&self.queue, handler, "post").map(|_| ())
    }

    /// Enqueues a handler on the priority band and returns immediately.
    pub fn post_priority<F, Fut>(&self, handler: F) -> Result<(), Error>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.enqueue(&self.priority, handler, "post_priority").map(|_| ())
    }

    /// Enqueues a handler on the primary band and waits for it to run.
    ///
    /// Returns [`Error::HandlerCanceled`] when the reactor stops before the
    /// handler's turn.
    pub async fn send<F, Fut>(&self, handler: F) -> Result<(), Error>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let completion = self.enqueue(&self.queue, handler, "send")?;
        completion.await.unwrap_or(Err(Error::HandlerCanceled))
    }

    /// Enqueues a handler on the priority band and waits for it to run.
    pub async fn send_priority<F, Fut>(&self, handler: F) -> Result<(), Error>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let completion = self.enqueue(&self.priority, handler, "send_priority")?;
        completion.await.unwrap_or(Err(Error::HandlerCanceled))
    }

    /// Count of handlers waiting in both bands.
    pub fn waiting(&self) -> usize {
        self.queue.len() + self.priority.len()
    }

    fn enqueue<F, Fut>(
        &self,
        band: &Buffer<ReactorTask>,
        handler: F,
        op: &'static str,
    ) -> Result<oneshot::Receiver<Result<(), Error>>, Error>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if !self.status.admit() {
            return Err(self.status.status_error(Error::invalid_status(op)));
        }
        let boxed: Handler = Box::new(move |ctx| -> BoxHandlerFuture { Box::pin(handler(ctx)) });
        let (task, completion) = ReactorTask::new(boxed);
        band.submit(task);
        self.status.release();
        Ok(completion)
    }

    async fn consume(
        self: Arc<Self>,
        mut pri_rx: BufferReceiver<ReactorTask>,
        mut main_rx: BufferReceiver<ReactorTask>,
    ) -> (BufferReceiver<ReactorTask>, BufferReceiver<ReactorTask>) {
        let quit = self.runner.quit();
        loop {
            // The primary band is suppressed whenever the priority band still
            // holds work; the biased order makes the tie-break deterministic.
            let allow_primary = self.priority.is_empty();
            tokio::select! {
                biased;
                _ = quit.cancelled() => break,
                _ = self.ctx.cancelled() => {
                    let me = self.clone();
                    tokio::spawn(async move { me.stop().await });
                    break;
                }
                task = pri_rx.recv() => match task {
                    Some(task) => task.run(self.ctx.clone()).await,
                    None => break,
                },
                task = main_rx.recv(), if allow_primary => match task {
                    Some(task) => task.run(self.ctx.clone()).await,
                    None => break,
                },
            }
        }
        (pri_rx, main_rx)
    }
}
