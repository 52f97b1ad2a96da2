//! HTTP surface over a running pipeline.
//!
//! Two read-only routes: the mirrored cache as JSON under
//! `/api/<resource>`, and the health snapshot under `/health`. The server
//! never writes through to the cluster; it serves whatever the pipeline
//! currently mirrors.

use crate::pipeline::{EventHandler, Pipeline, WatchSource};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use warp::{Filter, Rejection, Reply};

/// Build the route tree for a pipeline
///
/// Exposed separately from [`serve`] so the routes can be mounted into a
/// larger filter chain or driven by `warp::test`.
pub fn routes<S, H>(
    pipeline: Arc<Pipeline<S, H>>,
    resource: &'static str,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone
where
    S: WatchSource,
    S::Object: Serialize,
    H: EventHandler<S::Object>,
{
    let cache = {
        let pipeline = Arc::clone(&pipeline);
        warp::path("api")
            .and(warp::path(resource))
            .and(warp::path::end())
            .and_then(move || {
                let pipeline = Arc::clone(&pipeline);
                async move {
                    let objects = pipeline.list().await;
                    Ok::<_, Rejection>(warp::reply::json(&objects))
                }
            })
    };

    let health = warp::path("health").and(warp::path::end()).and_then(move || {
        let pipeline = Arc::clone(&pipeline);
        async move {
            let snapshot = pipeline.health().await;
            Ok::<_, Rejection>(warp::reply::json(&snapshot))
        }
    });

    warp::get().and(cache.or(health))
}

/// Serve the pipeline's cache and health until the token fires
pub async fn serve<S, H>(
    pipeline: Arc<Pipeline<S, H>>,
    resource: &'static str,
    port: u16,
    shutdown: CancellationToken,
) where
    S: WatchSource,
    S::Object: Serialize,
    H: EventHandler<S::Object>,
{
    let (addr, server) = warp::serve(routes(pipeline, resource)).bind_with_graceful_shutdown(
        ([0, 0, 0, 0], port),
        async move {
            shutdown.cancelled().await;
        },
    );
    info!(%addr, "http server listening");
    server.await;
    info!("http server stopped");
}
