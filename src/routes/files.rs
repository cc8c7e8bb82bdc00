use axum::{
    body::Body,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::BytesMut;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::info;

use crate::middleware::rate_limiter_middleware;
use crate::models::{AppState, UploadRequest, UploadResponse};
use crate::types::{AppError, AppResult};

/// RFC 5987 `attr-char`: everything else in `filename*` is percent-encoded.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Room for multipart boundaries and the email field on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn router(state: AppState) -> Router {
    let body_limit = state.uploads.max_upload_bytes().saturating_add(MULTIPART_OVERHEAD);

    let upload = Router::new()
        .route("/upload", post(upload_file))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limiter_middleware))
        .layer(DefaultBodyLimit::max(body_limit));

    Router::new()
        .merge(upload)
        .route("/download/{record_id}", get(download_file))
        .with_state(state)
}

async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    let request = read_upload_form(multipart, state.uploads.max_upload_bytes()).await?;
    info!(
        file_name = %request.original_name,
        size_bytes = request.data.len(),
        "Upload received"
    );

    let public_base = public_base_url(&state, &headers);
    let receipt = state.uploads.handle_upload(request, &public_base).await?;
    Ok(Json(receipt.into()))
}

/// Collect the `file` part and the `email` field, stopping as soon as the
/// file grows past `max_bytes`.
async fn read_upload_form(mut multipart: Multipart, max_bytes: usize) -> AppResult<UploadRequest> {
    let mut file = None;
    let mut email = None;

    let too_large = |err| multipart_error(err, max_bytes);

    while let Some(mut field) = multipart.next_field().await.map_err(too_large)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let original_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);

                let mut data = BytesMut::new();
                while let Some(chunk) = field.chunk().await.map_err(too_large)? {
                    if data.len() + chunk.len() > max_bytes {
                        return Err(AppError::PayloadTooLarge { limit: max_bytes });
                    }
                    data.extend_from_slice(&chunk);
                }
                file = Some((original_name, content_type, data.freeze()));
            }
            Some("email") => {
                email = Some(field.text().await.map_err(too_large)?);
            }
            _ => {}
        }
    }

    let (original_name, content_type, data) =
        file.ok_or_else(|| AppError::ClientInput("No file uploaded".to_string()))?;

    Ok(UploadRequest {
        data,
        content_type,
        original_name,
        recipient_email: email.unwrap_or_default(),
    })
}

fn multipart_error(err: MultipartError, max_bytes: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge { limit: max_bytes }
    } else {
        AppError::ClientInput(err.body_text())
    }
}

/// Base for download links: the configured public URL, else the request's `Host`.
fn public_base_url(state: &AppState, headers: &HeaderMap) -> String {
    let server = &state.config.server;
    if let Some(base) = &server.public_base_url {
        return base.trim_end_matches('/').to_string();
    }

    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}:{}", server.host, server.port));
    format!("{}://{}", server.public_scheme, host)
}

async fn download_file(
    State(state): State<AppState>,
    Path(record_id): Path<String>,
) -> AppResult<Response> {
    let (record, download) = state.downloads.handle_download(&record_id).await?;

    let content_type = download
        .content_type
        .unwrap_or_else(|| record.content_type.clone());

    let mut response = Body::from_stream(download.body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Some(length) = download.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    if let Ok(disposition) = HeaderValue::from_str(&content_disposition(&record.original_name)) {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }

    Ok(response)
}

/// `attachment; filename="..."`, plus an RFC 5987 `filename*` when the name
/// is not plain ASCII.
fn content_disposition(original_name: &str) -> String {
    let mut fallback = String::with_capacity(original_name.len());
    for c in original_name.chars() {
        match c {
            '"' | '\\' => {
                fallback.push('\\');
                fallback.push(c);
            }
            ' '..='~' => fallback.push(c),
            _ => fallback.push('_'),
        }
    }

    let mut value = format!("attachment; filename=\"{}\"", fallback);
    if !original_name.chars().all(|c| (' '..='~').contains(&c)) {
        value.push_str("; filename*=UTF-8''");
        value.push_str(&utf8_percent_encode(original_name, ATTR_CHAR).to_string());
    }
    value
}
