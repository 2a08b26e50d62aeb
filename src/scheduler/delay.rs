//! Delayed dispatch: entities that become eligible after a duration.
//!
//! Each delayed entity gets an absolute deadline; a single background task
//! drives a selector [`Pool`] over the current snapshot of deadlines,
//! re-armed every round. `add` signals refresh so a new deadline joins the
//! wait set immediately.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Notify;

use crate::chanpool::{Pool, Selected};
use crate::registry::Registry;
use crate::runner::Runner;
use crate::scheduler::Entity;

pub(crate) struct DelayManager {
    inner: Arc<Inner>,
}

struct Inner {
    runner: Runner,
    items: Registry<Arc<DelayItem>>,
    refresh: Arc<Notify>,
    started: std::sync::Once,
}

struct DelayItem {
    id: u64,
    entity: Arc<Entity>,
    deadline: Instant,
}

impl DelayManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                runner: Runner::new(),
                items: Registry::new(),
                refresh: Arc::new(Notify::new()),
                started: std::sync::Once::new(),
            }),
        }
    }

    /// Registers an entity to be dispatched after its delay. Starts the
    /// background task on first use.
    pub fn add(&self, entity: Arc<Entity>) {
        let inner = &self.inner;
        inner.started.call_once(|| {
            inner.runner.mark();
            tokio::spawn(Inner::run(inner.clone()));
        });
        let id = inner.items.next_id();
        let deadline = Instant::now() + entity.delay;
        inner.items.insert(
            id,
            Arc::new(DelayItem {
                id,
                entity,
                deadline,
            }),
        );
        inner.refresh.notify_one();
    }

    /// Entities still waiting on their delay, for the scheduler's stop sweep.
    pub fn pending(&self) -> Vec<Arc<Entity>> {
        self.inner
            .items
            .snapshot()
            .into_iter()
            .map(|item| item.entity.clone())
            .collect()
    }

    pub async fn shutdown(&self) {
        self.inner.runner.close_wait().await;
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        let mut pool = Pool::new(self.runner.quit(), self.refresh.clone());
        loop {
            pool.reset();
            for item in self.items.snapshot() {
                let deadline = item.deadline;
                pool.add(
                    item.id,
                    Box::pin(tokio::time::sleep_until(deadline.into())),
                );
            }
            match pool.select_one().await {
                Selected::Quit => break,
                Selected::Refresh => continue,
                Selected::Key(id) => {
                    if let Some(item) = self.items.remove(id) {
                        item.dispatch();
                    }
                }
            }
        }
        pool.dispose().await;
        self.runner.done();
    }
}

impl DelayItem {
    /// Hands the entity to the scheduler proper; the entity handles its own
    /// state (a cancelled entity schedules as a no-op).
    fn dispatch(&self) {
        if let Some(core) = self.entity.scheduler.upgrade() {
            core.schedule(&self.entity);
        }
    }
}
