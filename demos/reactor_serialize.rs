//! # Example: reactor_serialize
//!
//! Demonstrates serializing access to shared state through a reactor instead
//! of a lock: every handler runs strictly one at a time, priority handlers
//! ahead of primary ones.
//!
//! ## Run
//! ```bash
//! cargo run --example reactor_serialize
//! ```

use std::sync::Arc;

use conflux::{Error, Reactor, ReactorOptions};
use parking_lot::Mutex;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    println!("=== reactor_serialize example ===\n");

    let reactor = Reactor::new(ReactorOptions::default());
    reactor.start();

    // The reactor is the only writer, so no further locking discipline is
    // needed inside the handlers; the mutex only satisfies `Send`.
    let journal: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    for i in 0..5 {
        let journal = journal.clone();
        reactor.post(move |_ctx| async move {
            journal.lock().push(format!("primary #{i}"));
        })?;
    }
    for i in 0..2 {
        let journal = journal.clone();
        reactor.post_priority(move |_ctx| async move {
            journal.lock().push(format!("priority #{i}"));
        })?;
    }

    // send() waits for its handler's turn, which also flushes the queues
    // ahead of it in each band.
    reactor
        .send(|_ctx| async move {
            println!("[send] my turn, all earlier handlers have run");
        })
        .await?;

    for line in journal.lock().iter() {
        println!("{line}");
    }

    reactor.stop().await;

    // After stop, submissions are rejected.
    let err = reactor.post(|_ctx| async {}).unwrap_err();
    println!("\npost after stop: {err}");

    println!("\n=== example completed successfully ===");
    Ok(())
}
