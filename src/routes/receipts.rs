//! Receipt attachment upload, download and removal

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::service_requests::{
    fetch_request, lock_request, notify_updated, save_request, to_response, LoadedRequest,
};
use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::attachments::MAX_FILES_PER_UPLOAD;
use crate::domain::{Principal, WorkflowError};
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequestIdExt;
use crate::services::UploadedFile;

/// Multipart field names accepted for receipt files
const FILE_FIELDS: [&str; 3] = ["receipts", "receipts[]", "files"];

async fn read_files(mut multipart: Multipart) -> ApiResult<Vec<UploadedFile>> {
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {}", e)))?
    {
        if !field.name().is_some_and(|name| FILE_FIELDS.contains(&name)) {
            continue;
        }
        // Stop reading early once the batch is already too large
        if files.len() == MAX_FILES_PER_UPLOAD {
            return Err(WorkflowError::TooManyAttachments {
                max: MAX_FILES_PER_UPLOAD,
            }
            .into());
        }

        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;

        files.push(UploadedFile {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    Ok(files)
}

/// POST /service-requests/:id/receipts
///
/// Multipart upload of 1 to 5 receipt files (JPEG, PNG, WEBP or PDF).
pub async fn upload_receipts(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;
    let files = read_files(multipart).await?;

    // Authorize and validate before anything touches disk
    let current = fetch_request(&state.db, id).await?;
    current.request.ensure_can_upload(&principal, files.len())?;
    let extensions = files
        .iter()
        .enumerate()
        .map(|(index, file)| state.storage.validate(index, file))
        .collect::<Result<Vec<_>, _>>()?;

    let mut stored = Vec::with_capacity(files.len());
    for (file, extension) in files.iter().zip(extensions) {
        match state.storage.store(id, extension, &file.bytes).await {
            Ok(path) => {
                tracing::debug!(file_name = ?file.file_name, path = %path, "Receipt file stored");
                stored.push(path);
            }
            Err(e) => {
                discard(&state, &stored).await;
                return Err(e.into());
            }
        }
    }

    let loaded = match attach(&state, id, &principal, stored.clone()).await {
        Ok(loaded) => loaded,
        Err(e) => {
            discard(&state, &stored).await;
            return Err(e);
        }
    };

    tracing::info!(
        request_id = headers.request_id(),
        service_request_id = %id,
        principal = %principal,
        files = stored.len(),
        "Receipts uploaded"
    );

    notify_updated(&state, &loaded.request, principal);
    Ok(DataResponse::new(to_response(&state, loaded)))
}

async fn attach(
    state: &AppState,
    id: Uuid,
    principal: &Principal,
    paths: Vec<String>,
) -> ApiResult<LoadedRequest> {
    let mut tx = state.db.begin().await?;
    let mut loaded = lock_request(&mut tx, id).await?;
    loaded.request.add_receipts(principal, paths, Utc::now())?;
    save_request(&mut tx, &loaded.request).await?;
    tx.commit().await?;
    Ok(loaded)
}

/// Remove files written for an upload that did not get recorded
async fn discard(state: &AppState, paths: &[String]) {
    for path in paths {
        if let Err(e) = state.storage.delete(path).await {
            tracing::warn!(path = %path, error = %e, "Failed to clean up receipt file");
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RemoveReceiptQuery {
    pub path: String,
}

/// DELETE /service-requests/:id/receipts?path=...
pub async fn remove_receipt(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<RemoveReceiptQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let principal = auth.principal;

    let mut tx = state.db.begin().await?;
    let mut loaded = lock_request(&mut tx, id).await?;
    let removed = loaded
        .request
        .remove_receipt(&principal, &query.path, Utc::now())?;
    save_request(&mut tx, &loaded.request).await?;
    tx.commit().await?;

    // The record is gone; a leftover file is only logged
    if let Err(e) = state.storage.delete(&removed.path).await {
        tracing::warn!(path = %removed.path, error = %e, "Failed to delete receipt file");
    }

    tracing::info!(
        request_id = headers.request_id(),
        service_request_id = %id,
        principal = %principal,
        path = %removed.path,
        "Receipt removed"
    );

    notify_updated(&state, &loaded.request, principal);
    Ok(DataResponse::new(to_response(&state, loaded)))
}

/// GET /storage/receipts/:id/:file_name
///
/// Files are only handed to the request's participants and admins.
pub async fn download_receipt(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path((id, file_name)): Path<(Uuid, String)>,
) -> Result<Response, ApiError> {
    let loaded = fetch_request(&state.db, id).await?;
    let stored_path = format!("receipts/{}/{}", id, file_name);
    let attachment = loaded.request.find_receipt(&auth.principal, &stored_path)?;

    let (bytes, content_type) = state
        .storage
        .read(&attachment.path)
        .await?
        .ok_or_else(|| ApiError::not_found("Receipt file not found"))?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "private, max-age=300"),
        ],
        bytes,
    )
        .into_response())
}
