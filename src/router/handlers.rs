use axum::{
    Json,
    body::Bytes,
    extract::{Extension, Path, Query},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::edge::{EdgeRouter, Redirect};
use super::path::MossPath;
use super::protocol::{ClusterNodeInfo, ClusterResponse, MossQuery};
use crate::batch::handlers::{handle_assemble, handle_control};
use crate::batch::registry::TaskRegistry;
use crate::batch::types::HEADER_TASK_ID;
use crate::error::BatchError;
use crate::membership::service::MembershipService;
use crate::ratelimit::FrontendLimiter;

fn into_response(result: Result<Response, BatchError>) -> Response {
    match result {
        Ok(response) => response,
        Err(err) => {
            match err.status_code() {
                StatusCode::TOO_MANY_REQUESTS => tracing::debug!("get-batch: {}", err),
                status if status.is_server_error() => tracing::error!("get-batch: {}", err),
                _ => tracing::warn!("get-batch: {}", err),
            }
            err.into_response()
        }
    }
}

fn redirect_response(redirect: Redirect) -> Response {
    let mut response = StatusCode::TEMPORARY_REDIRECT.into_response();
    let headers = response.headers_mut();
    if let Ok(location) = HeaderValue::from_str(&redirect.location) {
        headers.insert(header::LOCATION, location);
    }
    if let Ok(task_id) = HeaderValue::from_str(redirect.task_id.as_str()) {
        headers.insert(HEADER_TASK_ID, task_id);
    }
    response
}

/// `GET /v1/ml/moss`: client request without a bucket in the path.
pub async fn handle_moss_root(
    Extension(edge): Extension<Arc<EdgeRouter>>,
    Query(query): Query<MossQuery>,
    body: Bytes,
) -> Response {
    into_response(edge.get_batch(None, &query, body).await.map(redirect_response))
}

/// `GET /v1/ml/moss/...`: either a client request (`/<bucket>`) or the redirected
/// data request (`[/<bucket>]/<task>/<wave>/<nat>`).
pub async fn handle_moss_get(
    Extension(edge): Extension<Arc<EdgeRouter>>,
    Extension(registry): Extension<Arc<TaskRegistry>>,
    Path(rest): Path<String>,
    Query(query): Query<MossQuery>,
    body: Bytes,
) -> Response {
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    let result = match segments.len() {
        0 => edge.get_batch(None, &query, body).await.map(redirect_response),
        1 => edge
            .get_batch(Some(segments[0]), &query, body)
            .await
            .map(redirect_response),
        _ => match MossPath::parse(&rest) {
            Ok(path) => handle_assemble(&registry, path, body).await,
            Err(err) => Err(err),
        },
    };
    into_response(result)
}

/// `POST /v1/ml/moss/...`: phase 1 and phase 2 control messages.
pub async fn handle_moss_post(
    Extension(registry): Extension<Arc<TaskRegistry>>,
    Path(rest): Path<String>,
    Query(query): Query<MossQuery>,
    body: Bytes,
) -> Response {
    let result = match MossPath::parse(&rest) {
        Ok(path) => handle_control(&registry, path, query, body).await,
        Err(err) => Err(err),
    };
    into_response(result)
}

pub async fn handle_cluster(
    Extension(membership): Extension<Arc<MembershipService>>,
    Extension(registry): Extension<Arc<TaskRegistry>>,
    Extension(limiter): Extension<Arc<FrontendLimiter>>,
    Extension(edge): Extension<Arc<EdgeRouter>>,
) -> (StatusCode, Json<ClusterResponse>) {
    let nodes = membership
        .all_members()
        .into_iter()
        .map(|node| ClusterNodeInfo {
            id: node.id.to_string(),
            http_addr: node.http_addr.to_string(),
            data_addr: node.data_addr.to_string(),
            state: format!("{:?}", node.state),
        })
        .collect();

    (
        StatusCode::OK,
        Json(ClusterResponse {
            local_node: membership.local_id().to_string(),
            version: membership.version(),
            active: membership.count_active(),
            nodes,
            tasks: registry.len(),
            active_tasks: registry.active_count(),
            limiter_entries: limiter.len(),
            edge: edge.stats(),
        }),
    )
}
