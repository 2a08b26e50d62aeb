//! External-cancel listeners: one watcher task for all entities.
//!
//! An entity pushed with an external [`CancelSource`](crate::CancelSource)
//! gets a listener; a
//! single background task drives a selector [`Pool`] over every registered
//! source. When a source fires, the listener cancels its entity with the
//! source's error and unregisters. Entities that finish first unregister
//! their listener through their own disposal.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::chanpool::{Pool, Selected};
use crate::error::Error;
use crate::registry::Registry;
use crate::runner::Runner;
use crate::scheduler::Entity;

pub(crate) struct ListenerManager {
    inner: Arc<Inner>,
}

struct Inner {
    runner: Runner,
    listeners: Registry<Arc<Listener>>,
    refresh: Arc<Notify>,
    started: std::sync::Once,
}

struct Listener {
    entity: Arc<Entity>,
}

impl ListenerManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                runner: Runner::new(),
                listeners: Registry::new(),
                refresh: Arc::new(Notify::new()),
                started: std::sync::Once::new(),
            }),
        }
    }

    /// Registers a listener for the entity's external cancel source.
    /// Starts the background task on first use.
    pub fn add(&self, entity: &Arc<Entity>) {
        let inner = &self.inner;
        inner.started.call_once(|| {
            inner.runner.mark();
            tokio::spawn(Inner::run(inner.clone()));
        });
        let id = inner.listeners.next_id();
        inner.listeners.insert(
            id,
            Arc::new(Listener {
                entity: entity.clone(),
            }),
        );
        entity.set_listener(id);
        inner.refresh.notify_one();
    }

    /// Unregisters a listener; called from entity disposal.
    pub fn remove(&self, id: u64) {
        self.inner.listeners.remove(id);
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
            for (id, listener) in self.listeners.snapshot_with_ids() {
                if let Some(external) = listener.entity.external.as_ref() {
                    let token = external.token().clone();
                    pool.add(id, Box::pin(token.cancelled_owned()));
                }
            }
            match pool.select_one().await {
                Selected::Quit => break,
                Selected::Refresh => continue,
                Selected::Key(id) => {
                    if let Some(listener) = self.listeners.remove(id) {
                        listener.fire();
                    }
                }
            }
        }
        pool.dispose().await;
        self.runner.done();
    }
}

impl Listener {
    /// Translates the external source firing into an entity cancel carrying
    /// the source's error.
    fn fire(&self) {
        let err = self
            .entity
            .external
            .as_ref()
            .and_then(|src| src.err())
            .unwrap_or(Error::Canceled);
        self.entity.cancel_with(err);
    }
}
