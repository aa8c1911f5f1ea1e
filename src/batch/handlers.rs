//! Target-side get-batch handlers: control messages (phase 1 and phase 2) and the
//! redirected data request. Routed from `router::handlers`, which owns the URL space.

use axum::body::{Body, Bytes};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use super::registry::TaskRegistry;
use super::types::{BatchRequest, HEADER_TASK_ID, TaskScope};
use crate::error::BatchError;
use crate::router::path::MossPath;
use crate::router::protocol::MossQuery;

fn task_header(response: &mut Response, task_id: &str) {
    if let Ok(value) = HeaderValue::from_str(task_id) {
        response.headers_mut().insert(HEADER_TASK_ID, value);
    }
}

fn scope_of(
    registry: &TaskRegistry,
    path: &MossPath,
    query: &MossQuery,
) -> Result<TaskScope, BatchError> {
    let deps = registry.deps();
    if let Some(bucket) = &path.bucket {
        deps.buckets.lookup(bucket, query.provider.as_deref())?;
    }
    let tid = query
        .tid
        .as_deref()
        .filter(|tid| !tid.is_empty())
        .ok_or_else(|| BatchError::InvalidRequest("missing coordinator id (tid)".to_string()))?;
    let coordinator = deps
        .membership
        .get_member(&tid.into())
        .ok_or_else(|| BatchError::NodeNotFound(tid.into()))?;

    Ok(TaskScope {
        bucket: path.bucket.clone(),
        coordinator: coordinator.id,
    })
}

/// Phase 1 on the coordinator (prepare to receive, mint the task id) and phase 2 on
/// every other node (start sending).
pub async fn handle_control(
    registry: &Arc<TaskRegistry>,
    path: MossPath,
    query: MossQuery,
    body: Bytes,
) -> Result<Response, BatchError> {
    let request = BatchRequest::from_json(&body)?;
    let deps = registry.deps();
    // prep_rx and send validate the node count; a mismatch aborts the task.
    let scope = scope_of(registry, &path, &query)?;
    let designated = scope.coordinator == *deps.membership.local_id();
    let coordinator = deps
        .membership
        .get_member(&scope.coordinator)
        .ok_or_else(|| BatchError::NodeNotFound(scope.coordinator.clone()))?;

    let (task, created) = registry.acquire(scope, &path.task_id, designated)?;
    tracing::debug!(
        "Control {} for task {} wave {} (created: {})",
        if designated { "prep-rx" } else { "send" },
        task.id(),
        path.wave_id,
        created
    );

    let result = if designated {
        task.prep_rx(request, path.wave_id.clone(), path.nat)
    } else {
        task.send(request, coordinator, path.wave_id.clone(), path.nat)
    };
    if let Err(err) = result {
        // A stale or replayed message is turned away; the live task keeps going.
        if err.is_task_fatal() || created {
            if !designated {
                task.bcast_abort(&err).await;
            }
            task.abort(err.clone());
        }
        return Err(err);
    }

    let mut response = StatusCode::OK.into_response();
    task_header(&mut response, task.id().as_str());
    Ok(response)
}

/// The client's redirected data request: waits for the shards and streams the archive.
pub async fn handle_assemble(
    registry: &Arc<TaskRegistry>,
    path: MossPath,
    body: Bytes,
) -> Result<Response, BatchError> {
    let request = BatchRequest::from_json(&body)?;
    let task = registry.get_active(&path.task_id)?;

    let stream = match task.assemble(&request, &path.wave_id).await {
        Ok(stream) => stream,
        Err(err) if err.is_benign() => {
            tracing::debug!("Task {}: {}", task.id(), err);
            task.bcast_abort(&err).await;
            task.abort(err);
            return Ok(StatusCode::NO_CONTENT.into_response());
        }
        Err(err) => {
            if err.is_task_fatal() {
                task.bcast_abort(&err).await;
                task.abort(err.clone());
            } else {
                tracing::debug!("Task {}: data request rejected: {}", task.id(), err);
            }
            return Err(err);
        }
    };

    let chunks = futures::stream::unfold(stream.body, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });
    let mut response = Body::from_stream(chunks).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(stream.format.content_type()),
    );
    task_header(&mut response, task.id().as_str());
    Ok(response)
}
