use axum::{
    Json,
    body::Bytes,
    extract::{Extension, Path, Query},
    http::StatusCode,
};
use std::sync::Arc;

use super::protocol::{ProviderQuery, PutObjectResponse};
use super::service::ObjectService;
use super::types::StoreError;
use crate::bucket::directory::BucketDirectory;
use crate::membership::service::MembershipService;
use crate::ratelimit::{FrontendLimiter, Verb};

fn failed(bucket: String, name: String) -> Json<PutObjectResponse> {
    Json(PutObjectResponse {
        success: false,
        bucket,
        name,
        node: None,
        size: 0,
        checksum: 0,
    })
}

pub async fn handle_put_object(
    Extension(service): Extension<Arc<ObjectService>>,
    Extension(buckets): Extension<Arc<BucketDirectory>>,
    Extension(limiter): Extension<Arc<FrontendLimiter>>,
    Extension(membership): Extension<Arc<MembershipService>>,
    Path((bucket_name, name)): Path<(String, String)>,
    Query(query): Query<ProviderQuery>,
    body: Bytes,
) -> (StatusCode, Json<PutObjectResponse>) {
    let bucket = match buckets.lookup(&bucket_name, query.provider.as_deref()) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!("PUT {}/{} rejected: {}", bucket_name, name, e);
            return (e.status_code(), failed(bucket_name, name));
        }
    };

    if let Err(e) = limiter.admit(&bucket, Verb::Put, membership.count_active()) {
        return (e.status_code(), failed(bucket_name, name));
    }

    match service.put_object(&bucket, &name, body).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(e) => {
            tracing::error!("Failed to put {}/{}: {}", bucket_name, name, e);
            let status = match e {
                StoreError::NoOwner => StatusCode::SERVICE_UNAVAILABLE,
                StoreError::Forward(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, failed(bucket_name, name))
        }
    }
}

pub async fn handle_internal_put_object(
    Extension(service): Extension<Arc<ObjectService>>,
    Extension(buckets): Extension<Arc<BucketDirectory>>,
    Path((bucket_name, name)): Path<(String, String)>,
    Query(query): Query<ProviderQuery>,
    body: Bytes,
) -> (StatusCode, Json<PutObjectResponse>) {
    let bucket = match buckets.lookup(&bucket_name, query.provider.as_deref()) {
        Ok(b) => b,
        Err(e) => return (e.status_code(), failed(bucket_name, name)),
    };

    match service.put_local(&bucket, &name, body).await {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(e) => {
            tracing::error!("Forwarded put {}/{} failed: {}", bucket_name, name, e);
            (StatusCode::INTERNAL_SERVER_ERROR, failed(bucket_name, name))
        }
    }
}
