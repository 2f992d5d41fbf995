//! HTTP handlers for creating, serving and deleting pastes.
//! Storage calls block, so they run on the blocking pool; paste bodies are
//! streamed straight from the read handle, which is dropped once the body
//! is done or its read deadline passes.

use crate::{
    errors::AppError,
    models::PasteId,
    state::AppState,
    storage::{ByteStream, StorageError},
};
use axum::{
    Form,
    body::Body,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use std::{
    collections::HashMap,
    io::{self, Seek, SeekFrom},
    ops::Range,
    time::Duration,
};
use tracing::debug;

/// Form field carrying the paste content.
pub const FIELD_NAME: &str = "paste";

const CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const NO_PASTE: &str = "no paste provided";

/// Chunks buffered ahead of a slow client.
const BODY_BUFFER: usize = 2;

/// `POST /`: store the `paste` form field and answer with its URL.
pub async fn create_paste(
    State(state): State<AppState>,
    request: Request,
) -> Result<impl IntoResponse, AppError> {
    let content = read_paste_field(request).await?;
    let service = state.service.clone();
    let id = tokio::task::spawn_blocking(move || service.put(content)).await??;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
    Ok((headers, format!("{}/{}\n", state.site_url, id)))
}

/// `GET /{id}`: stream a paste with caching headers.
///
/// Honours `If-None-Match`/`If-Modified-Since` (304) and a single
/// `Range: bytes=a-b` (206, or 416 when it cannot be satisfied).
pub async fn get_paste(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    request_headers: HeaderMap,
) -> Result<Response, AppError> {
    let id = parse_id(&raw_id)?;
    let service = state.service.clone();
    let mut paste = tokio::task::spawn_blocking(move || service.get(&id)).await??;

    let modified = paste.modified();
    let size = paste.size();
    let etag = format!("\"{}-{}\"", modified.timestamp(), id);
    let last_modified = http_date(modified);

    if not_modified(&request_headers, &etag, modified) {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        insert_str(response.headers_mut(), header::ETAG, &etag);
        insert_str(response.headers_mut(), header::LAST_MODIFIED, &last_modified);
        return Ok(response);
    }

    let range = match requested_range(&request_headers, &etag, &last_modified, size) {
        Ok(range) => range,
        Err(Unsatisfiable) => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            insert_str(
                response.headers_mut(),
                header::CONTENT_RANGE,
                &format!("bytes */{size}"),
            );
            return Ok(response);
        }
    };

    let served = range.clone().unwrap_or(0..size);
    if served.start > 0 {
        paste
            .seek(SeekFrom::Start(served.start))
            .map_err(StorageError::from)?;
    }
    let chunks = paste.into_bounded_stream(served.end - served.start);
    let mut response = Response::new(Body::from_stream(with_deadline(
        chunks,
        state.read_timeout,
    )));
    let headers = response.headers_mut();
    set_paste_headers(
        headers,
        &etag,
        modified,
        served.end - served.start,
        state.service.lifetime(),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if range.is_some() {
        insert_str(
            headers,
            header::CONTENT_RANGE,
            &format!("bytes {}-{}/{}", served.start, served.end - 1, size),
        );
        *response.status_mut() = StatusCode::PARTIAL_CONTENT;
    }
    Ok(response)
}

/// `DELETE /{id}`: remove a paste before it expires.
pub async fn delete_paste(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&raw_id)?;
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || service.delete(&id)).await??;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_id(raw: &str) -> Result<PasteId, AppError> {
    raw.parse::<PasteId>()
        .map_err(|err| StorageError::from(err).into())
}

fn insert_str(headers: &mut HeaderMap, name: header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

/// Move the body onto its own task so the read handle is dropped when the
/// deadline passes, even if the client has stopped reading.
fn with_deadline(mut chunks: ByteStream, timeout: Duration) -> ByteStream {
    let (tx, rx) = tokio::sync::mpsc::channel(BODY_BUFFER);
    tokio::spawn(async move {
        let pump = async {
            while let Some(chunk) = chunks.next().await {
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(timeout, pump).await.is_err() {
            debug!(?timeout, "read deadline passed, releasing paste");
            let _ = tx.try_send(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "paste read deadline exceeded",
            )));
        }
        drop(chunks);
    });
    Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    }))
}

/// Extract the paste field from a urlencoded or multipart form body.
async fn read_paste_field(request: Request) -> Result<Bytes, AppError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    let content = if is_multipart {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|rejection| AppError::new(rejection.status(), rejection.body_text()))?;
        let mut found = None;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| AppError::new(err.status(), err.body_text()))?
        {
            if field.name() == Some(FIELD_NAME) {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::new(err.status(), err.body_text()))?;
                found = Some(bytes);
                break;
            }
        }
        found
    } else {
        let Form(mut fields) = Form::<HashMap<String, String>>::from_request(request, &())
            .await
            .map_err(|rejection| AppError::new(rejection.status(), rejection.body_text()))?;
        fields.remove(FIELD_NAME).map(Bytes::from)
    };

    content
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| AppError::bad_request(NO_PASTE))
}

/// Returned when a `Range` header cannot be served.
#[derive(Debug, PartialEq, Eq)]
struct Unsatisfiable;

/// The single byte range asked for, `None` to serve the whole paste.
///
/// Multiple ranges and other units are ignored, as is a `Range` whose
/// `If-Range` validator no longer matches.
fn requested_range(
    headers: &HeaderMap,
    etag: &str,
    last_modified: &str,
    size: u64,
) -> Result<Option<Range<u64>>, Unsatisfiable> {
    let Some(raw) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };
    if let Some(validator) = headers.get(header::IF_RANGE).and_then(|v| v.to_str().ok()) {
        let validator = validator.trim();
        if validator != etag && validator != last_modified {
            return Ok(None);
        }
    }
    let Some(ranges) = raw.trim().strip_prefix("bytes=") else {
        return Ok(None);
    };
    if ranges.contains(',') {
        return Ok(None);
    }

    let (first, last) = ranges.split_once('-').ok_or(Unsatisfiable)?;
    let (first, last) = (first.trim(), last.trim());
    let range = if first.is_empty() {
        let suffix: u64 = last.parse().map_err(|_| Unsatisfiable)?;
        if suffix == 0 {
            return Err(Unsatisfiable);
        }
        size.saturating_sub(suffix)..size
    } else {
        let start: u64 = first.parse().map_err(|_| Unsatisfiable)?;
        if start >= size {
            return Err(Unsatisfiable);
        }
        let end = if last.is_empty() {
            size
        } else {
            let last: u64 = last.parse().map_err(|_| Unsatisfiable)?;
            if last < start {
                return Err(Unsatisfiable);
            }
            last.saturating_add(1).min(size)
        };
        start..end
    };
    Ok(Some(range))
}

/// `If-None-Match` takes precedence; `If-Modified-Since` is only consulted
/// without it.
fn not_modified(headers: &HeaderMap, etag: &str, modified: DateTime<Utc>) -> bool {
    if headers.contains_key(header::IF_NONE_MATCH) {
        return etag_matches(headers, etag);
    }
    headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .is_some_and(|since| modified.timestamp() <= since.timestamp())
}

fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.split(',')
                .map(str::trim)
                .any(|candidate| candidate == etag || candidate == "*")
        })
}

fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn set_paste_headers(
    headers: &mut HeaderMap,
    etag: &str,
    modified: DateTime<Utc>,
    length: u64,
    lifetime: Option<Duration>,
) {
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    insert_str(headers, header::ETAG, etag);
    insert_str(headers, header::LAST_MODIFIED, &http_date(modified));

    let Some(lifetime) = lifetime.and_then(|l| chrono::Duration::from_std(l).ok()) else {
        return;
    };
    let death = modified + lifetime;
    let left = (death - Utc::now()).num_seconds().max(0);
    insert_str(headers, header::EXPIRES, &http_date(death));
    insert_str(
        headers,
        header::CACHE_CONTROL,
        &format!("max-age={left}, must-revalidate"),
    );
}
