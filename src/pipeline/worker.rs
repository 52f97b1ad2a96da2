use super::event::ChangeEvent;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Pluggable per-event processing, invoked by each worker
///
/// A handler error is contained to the event that caused it: the worker logs
/// it and moves on to the next event.
#[async_trait]
pub trait EventHandler<T>: Send + Sync + 'static {
    async fn handle(&self, event: &ChangeEvent<T>) -> Result<()>;
}

/// Default handler that logs each event at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

#[async_trait]
impl<T: Send + Sync + 'static> EventHandler<T> for LogHandler {
    async fn handle(&self, event: &ChangeEvent<T>) -> Result<()> {
        info!(
            kind = ?event.kind,
            key = %event.key,
            observed_at = %event.observed_at,
            "processing event"
        );
        Ok(())
    }
}

enum Dequeued<T> {
    Event(ChangeEvent<T>),
    Closed,
    Cancelled,
}

/// One symmetric member of the worker pool
///
/// Workers share a single receiver behind a mutex; the lock is held only
/// while waiting for the next event, never while the handler runs, so the
/// rest of the pool keeps draining during slow handlers. Each event reaches
/// exactly one worker.
pub(crate) async fn run_worker<T, H>(
    id: usize,
    queue_rx: Arc<Mutex<mpsc::Receiver<ChangeEvent<T>>>>,
    handler: Arc<H>,
    cancel: CancellationToken,
) where
    T: Send + Sync + 'static,
    H: EventHandler<T> + ?Sized,
{
    debug!(worker = id, "event worker started");

    loop {
        let dequeued = {
            let mut rx = queue_rx.lock().await;
            tokio::select! {
                () = cancel.cancelled() => Dequeued::Cancelled,
                event = rx.recv() => match event {
                    Some(event) => Dequeued::Event(event),
                    None => Dequeued::Closed,
                },
            }
        };

        match dequeued {
            Dequeued::Event(event) => {
                if let Err(err) = handler.handle(&event).await {
                    error!(
                        worker = id,
                        key = %event.key,
                        kind = ?event.kind,
                        error = %err,
                        "handler failed, continuing"
                    );
                }
            }
            Dequeued::Closed => {
                debug!(worker = id, "event queue closed, stopping worker");
                break;
            }
            Dequeued::Cancelled => {
                debug!(worker = id, "cancellation received, stopping worker");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::pipeline::event::{EventKind, ObjectKey};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingHandler {
        seen: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl EventHandler<u32> for CountingHandler {
        async fn handle(&self, event: &ChangeEvent<u32>) -> Result<()> {
            if self.fail_on == Some(event.key.name.as_str()) {
                return Err(Error::Custom("injected handler failure".to_string()));
            }
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn event(name: &str) -> ChangeEvent<u32> {
        ChangeEvent::new(EventKind::Add, ObjectKey::new("default", name), Some(1))
    }

    #[tokio::test]
    async fn worker_drains_until_queue_closes() {
        let (tx, rx) = mpsc::channel(8);
        let rx = Arc::new(Mutex::new(rx));
        let handler = Arc::new(CountingHandler {
            seen: AtomicUsize::new(0),
            fail_on: None,
        });

        tx.send(event("a")).await.unwrap();
        tx.send(event("b")).await.unwrap();
        drop(tx);

        run_worker(0, rx, Arc::clone(&handler), CancellationToken::new()).await;
        assert_eq!(handler.seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn handler_failure_does_not_kill_the_loop() {
        let (tx, rx) = mpsc::channel(8);
        let rx = Arc::new(Mutex::new(rx));
        let handler = Arc::new(CountingHandler {
            seen: AtomicUsize::new(0),
            fail_on: Some("poison"),
        });

        tx.send(event("poison")).await.unwrap();
        tx.send(event("after")).await.unwrap();
        drop(tx);

        run_worker(0, rx, Arc::clone(&handler), CancellationToken::new()).await;
        // The failing event is skipped, the one after it is still processed.
        assert_eq!(handler.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_an_idle_worker() {
        let (_tx, rx) = mpsc::channel::<ChangeEvent<u32>>(1);
        let rx = Arc::new(Mutex::new(rx));
        let handler = Arc::new(CountingHandler {
            seen: AtomicUsize::new(0),
            fail_on: None,
        });
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(run_worker(0, rx, handler, cancel.clone()));
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("worker should exit promptly on cancellation")
            .unwrap();
    }

    #[tokio::test]
    async fn each_event_reaches_exactly_one_worker() {
        let (tx, rx) = mpsc::channel(64);
        let rx = Arc::new(Mutex::new(rx));
        let handler = Arc::new(CountingHandler {
            seen: AtomicUsize::new(0),
            fail_on: None,
        });

        for i in 0..50 {
            tx.send(event(&format!("obj-{i}"))).await.unwrap();
        }
        drop(tx);

        let cancel = CancellationToken::new();
        let workers: Vec<_> = (0..4)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&rx),
                    Arc::clone(&handler),
                    cancel.clone(),
                ))
            })
            .collect();
        for worker in workers {
            worker.await.unwrap();
        }

        assert_eq!(handler.seen.load(Ordering::SeqCst), 50);
    }
}
