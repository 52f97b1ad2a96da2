/**
 * Deployment watch source
 *
 * Bridges a namespaced k8s Deployment watch onto the pipeline's
 * `WatchSource` contract. Reconnection and backoff live here, outside the
 * pipeline core: the subscriber channel stays open across watch restarts,
 * and every (re)connect starts with a full relist so the mirror reconverges
 * after any gap in the stream.
 */
use crate::error::Result;
use crate::pipeline::{ObjectKey, WatchNotification, WatchSource};
use async_trait::async_trait;
use futures::{TryStreamExt, pin_mut};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Maximum number of restart attempts for the watch stream
const MAX_WATCH_RESTARTS: u32 = 50;

/// Maximum backoff time in seconds between restart attempts
const MAX_BACKOFF_SECONDS: u64 = 60;

/// Watch stream timeout in seconds (294 vs 300 to allow 6 seconds for graceful shutdown)
const WATCH_TIMEOUT_SECONDS: u32 = 294;

/// Buffer between the k8s stream and the pipeline's watch adapter
const NOTIFICATION_CHANNEL_CAPACITY: usize = 100;

/// Watch source for k8s Deployments in a single namespace
pub struct DeploymentSource {
    client: Client,
    synced: Arc<AtomicBool>,
}

impl DeploymentSource {
    /// Create a source from an inferred cluster configuration
    ///
    /// # Errors
    ///
    /// Returns an error if k8s client creation fails
    pub async fn new() -> Result<Self> {
        let client = crate::k8s::client::new().await?;
        Ok(Self::with_client(client))
    }

    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            synced: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl WatchSource for DeploymentSource {
    type Object = Deployment;

    async fn subscribe(
        &self,
        namespace: &str,
    ) -> Result<mpsc::Receiver<WatchNotification<Deployment>>> {
        let (tx, rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let synced = Arc::clone(&self.synced);
        let namespace = namespace.to_string();

        tokio::spawn(async move {
            run_watch_loop(api, tx, synced, namespace).await;
        });

        Ok(rx)
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

/// Relist-then-watch loop with capped exponential backoff
///
/// Ends when the subscriber goes away or the restart budget is spent.
async fn run_watch_loop(
    api: Api<Deployment>,
    tx: mpsc::Sender<WatchNotification<Deployment>>,
    synced: Arc<AtomicBool>,
    namespace: String,
) {
    info!(namespace = %namespace, "starting deployment watcher");

    let mut backoff_seconds = 1;
    let mut restart_count = 0;

    loop {
        if restart_count >= MAX_WATCH_RESTARTS {
            error!(
                restarts = MAX_WATCH_RESTARTS,
                "deployment watcher exceeded maximum restart attempts, stopping"
            );
            break;
        }

        match watch_once(&api, &tx, &synced, &namespace).await {
            Ok(StreamEnd::SubscriberGone) => {
                debug!("subscriber dropped, deployment watcher stopping");
                break;
            }
            Ok(StreamEnd::Expired) => {
                debug!("deployment watch stream ended normally, restarting");
                backoff_seconds = 1;
                restart_count = 0;
            }
            Err(e) => {
                restart_count += 1;
                error!(
                    attempt = restart_count,
                    max = MAX_WATCH_RESTARTS,
                    backoff_secs = backoff_seconds,
                    error = %e,
                    "deployment watcher failed, restarting"
                );
                sleep(Duration::from_secs(backoff_seconds)).await;
                backoff_seconds = (backoff_seconds * 2).min(MAX_BACKOFF_SECONDS);
            }
        }

        sleep(Duration::from_secs(1)).await;
    }
}

enum StreamEnd {
    /// The server closed the stream after its timeout; relist and rewatch
    Expired,
    /// The pipeline dropped its receiver; stop for good
    SubscriberGone,
}

/// One relist followed by one watch stream
async fn watch_once(
    api: &Api<Deployment>,
    tx: &mpsc::Sender<WatchNotification<Deployment>>,
    synced: &AtomicBool,
    namespace: &str,
) -> Result<StreamEnd> {
    // Full relist first so the mirror converges even after missed events.
    let list = api.list(&ListParams::default()).await?;
    let resource_version = list.metadata.resource_version.unwrap_or_else(|| "0".to_string());
    let objects: Vec<(ObjectKey, Deployment)> = list
        .items
        .into_iter()
        .map(|d| (object_key(&d, namespace), d))
        .collect();

    info!(count = objects.len(), "deployment relist complete");
    if tx.send(WatchNotification::Resynced(objects)).await.is_err() {
        return Ok(StreamEnd::SubscriberGone);
    }
    synced.store(true, Ordering::SeqCst);

    let wp = WatchParams::default().timeout(WATCH_TIMEOUT_SECONDS);
    let stream = api.watch(&wp, &resource_version).await?;
    pin_mut!(stream);

    while let Some(event) = stream.try_next().await? {
        let notification = match event {
            WatchEvent::Added(deployment) => {
                let key = object_key(&deployment, namespace);
                debug!(key = %key, "deployment added");
                WatchNotification::Added {
                    key,
                    object: deployment,
                }
            }
            WatchEvent::Modified(deployment) => {
                let key = object_key(&deployment, namespace);
                debug!(key = %key, "deployment modified");
                WatchNotification::Updated {
                    key,
                    object: deployment,
                }
            }
            WatchEvent::Deleted(deployment) => {
                let key = object_key(&deployment, namespace);
                debug!(key = %key, "deployment deleted");
                WatchNotification::Deleted { key }
            }
            WatchEvent::Bookmark(_) => continue,
            WatchEvent::Error(e) => {
                warn!(status = %e.status, reason = %e.reason, "watch stream error, relisting");
                return Ok(StreamEnd::Expired);
            }
        };

        if tx.send(notification).await.is_err() {
            return Ok(StreamEnd::SubscriberGone);
        }
    }

    Ok(StreamEnd::Expired)
}

fn object_key(deployment: &Deployment, fallback_namespace: &str) -> ObjectKey {
    ObjectKey::new(
        deployment
            .namespace()
            .unwrap_or_else(|| fallback_namespace.to_string()),
        deployment.name_any(),
    )
}
