use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::Corpus;
use crate::db;
use crate::error::{RequestError, SyntaxError, UploadError};
use crate::index::SearchIndex;
use crate::ingest::{self, Scope};
use crate::model::{Content, ContentKind, Volume, WorkRecord};
use crate::parser::{process_volume, Flattened};
use crate::query::{parse_query, SearchRequest};

#[derive(Clone)]
pub struct AppState {
    pub corpus: Arc<Corpus>,
    pub db_path: Arc<PathBuf>,
    pub index: SearchIndex,
    pub ingest_lock: Arc<Mutex<()>>,
    pub max_results: usize,
}

// ── Errors ──

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("not found: {0}")]
    NotFound(&'static str, Vec<String>),
    #[error("index error: {0:#}")]
    Index(#[from] anyhow::Error),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
    pub params: Vec<String>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Upload(_) | Self::Syntax(_) | Self::Request(_) | Self::Malformed(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(..) => StatusCode::NOT_FOUND,
            Self::Index(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        let (message, params) = match self {
            Self::Upload(e) => (e.code(), e.params()),
            Self::Syntax(e) => (e.code(), e.params()),
            Self::Request(e) => (e.code(), e.params()),
            Self::Malformed(detail) => ("BAD_REQUEST_GENERIC", vec![detail.clone()]),
            Self::NotFound(code, params) => (*code, params.clone()),
            Self::Index(_) => ("INTERNAL_SERVER_ERROR", Vec::new()),
        };
        ErrorBody {
            code: self.status().as_u16(),
            message: message.to_string(),
            params,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{self}");
        } else if status == StatusCode::BAD_REQUEST {
            warn!("{self}");
        } else {
            debug!("{self}");
        }
        (status, Json(self.body())).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Runs storage and pipeline work off the async runtime.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Index(e.into()))?
}

/// Like [`blocking`], holding `lock` until `f` returns. The guard lives in
/// the blocking task, so a dropped request does not release it early.
async fn blocking_locked<T, F>(lock: &Arc<Mutex<()>>, f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    let held = Arc::clone(lock).lock_owned().await;
    blocking(move || {
        let _held = held;
        f()
    })
    .await
}

fn open(state: &AppState) -> ApiResult<rusqlite::Connection> {
    Ok(db::connect(&state.db_path)?)
}

// ── Router ──

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/volumes", get(get_volumes))
        .route("/volumes/{volume}", post(ingest_volume))
        .route("/works", get(get_works))
        .route("/works/{code}", get(get_work).post(ingest_work))
        .route("/works/{code}/{kinds}", get(get_contents))
        .route("/search", post(search))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: AppState, bind: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {bind}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on http://{addr}");
    axum::serve(listener, router(state))
        .await
        .context("server shutdown")?;
    Ok(())
}

// ── Reads ──

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn get_volumes(State(state): State<AppState>) -> ApiResult<Json<Vec<Volume>>> {
    let volumes = blocking(move || Ok(db::fetch_volumes(&open(&state)?)?)).await?;
    if volumes.is_empty() {
        return Err(ApiError::NotFound("NOT_FOUND_VOLUMES", vec![]));
    }
    Ok(Json(volumes))
}

async fn get_works(State(state): State<AppState>) -> ApiResult<Json<Vec<WorkRecord>>> {
    let works = blocking(move || Ok(db::fetch_works(&open(&state)?)?)).await?;
    if works.is_empty() {
        return Err(ApiError::NotFound("NOT_FOUND_WORKS", vec![]));
    }
    Ok(Json(works))
}

async fn get_work(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<WorkRecord>> {
    let work = blocking({
        let code = code.clone();
        move || Ok(db::fetch_work(&open(&state)?, &code)?)
    })
    .await?;
    work.map(Json)
        .ok_or_else(|| ApiError::NotFound("NOT_FOUND_WORK", vec![code]))
}

#[derive(Debug, Default, Deserialize)]
pub struct ContentParams {
    pub ordinals: Option<String>,
}

fn kind_segment(segment: &str) -> Option<ContentKind> {
    match segment {
        "headings" => Some(ContentKind::Heading),
        "paragraphs" => Some(ContentKind::Paragraph),
        "footnotes" => Some(ContentKind::Footnote),
        "summaries" => Some(ContentKind::Summary),
        _ => None,
    }
}

fn parse_ordinals(raw: &str) -> Result<Vec<i32>, RequestError> {
    raw.split(',')
        .map(|s| s.trim().parse::<i32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| RequestError::InvalidOrdinals(raw.to_string()))
}

async fn get_contents(
    State(state): State<AppState>,
    Path((code, kinds)): Path<(String, String)>,
    Query(params): Query<ContentParams>,
) -> ApiResult<Json<Vec<Content>>> {
    let kind = kind_segment(&kinds)
        .ok_or_else(|| ApiError::NotFound("NOT_FOUND_RESOURCE", vec![kinds.clone()]))?;
    let ordinals = match params.ordinals.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(parse_ordinals(raw)?),
        _ => None,
    };
    let (work, contents) = blocking({
        let code = code.clone();
        move || {
            let conn = open(&state)?;
            let work = db::fetch_work(&conn, &code)?;
            let contents = db::fetch_contents(&conn, &code, kind, ordinals.as_deref())?;
            Ok((work, contents))
        }
    })
    .await?;
    if work.is_none() {
        return Err(ApiError::NotFound("NOT_FOUND_WORK", vec![code]));
    }
    if contents.is_empty() {
        return Err(ApiError::NotFound("NOT_FOUND_CONTENTS", vec![code, kinds]));
    }
    Ok(Json(contents))
}

// ── Search ──

async fn search(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> ApiResult<Json<Vec<Content>>> {
    let Json(request) = body.map_err(|e| ApiError::Malformed(e.body_text()))?;
    if request.query.trim().is_empty() {
        return Err(RequestError::EmptyQuery.into());
    }
    let ast = parse_query(&request.query)?;
    let t0 = Instant::now();
    let options = request.options.clone();
    let hits = blocking(move || {
        let query = state.index.build_query(&ast, &options)?;
        let keys = state.index.search(query.as_ref(), state.max_results)?;
        Ok(db::fetch_by_keys(&open(&state)?, &keys)?)
    })
    .await?;
    info!(
        query = %request.query,
        hits = hits.len(),
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "search"
    );
    if hits.is_empty() {
        return Err(ApiError::NotFound("NOT_FOUND_MATCHES", vec![]));
    }
    Ok(Json(hits))
}

// ── Ingestion ──

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub volume_number: i32,
    pub works: Vec<String>,
    pub contents: usize,
}

impl From<&Flattened> for IngestSummary {
    fn from(flat: &Flattened) -> Self {
        Self {
            volume_number: flat.volume.volume_number,
            works: flat.works.iter().map(|w| w.code.clone()).collect(),
            contents: flat.contents.len(),
        }
    }
}

async fn ingest_work(
    State(state): State<AppState>,
    Path(code): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<IngestSummary>)> {
    let code = code.trim().to_string();
    if code.is_empty() {
        return Err(RequestError::InvalidWorkId(code).into());
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(RequestError::EmptyWorkText.into());
    }
    let volume = state
        .corpus
        .locate_work(&code)
        .map(|(v, _)| v.volume_number)
        .ok_or_else(|| RequestError::InvalidWorkId(code.clone()))?;
    ingest(state, body, volume, Some(code)).await
}

async fn ingest_volume(
    State(state): State<AppState>,
    Path(volume): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<IngestSummary>)> {
    let number = volume
        .trim()
        .parse::<i32>()
        .map_err(|_| RequestError::InvalidVolume(volume.clone()))?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(RequestError::EmptyWorkText.into());
    }
    ingest(state, body, number, None).await
}

async fn ingest(
    state: AppState,
    body: Bytes,
    volume: i32,
    work: Option<String>,
) -> ApiResult<(StatusCode, Json<IngestSummary>)> {
    let cancel = CancelToken::new();
    let _guard = cancel.drop_guard();
    let t0 = Instant::now();

    let lock = Arc::clone(&state.ingest_lock);
    let summary = blocking_locked(&lock, move || {
        let flat = process_volume(&body, Some(volume), &state.corpus, &cancel)?;
        let (flat, scope) = match work {
            Some(code) => (
                flat.only_work(&code)
                    .ok_or(RequestError::InvalidWorkId(code))?,
                Scope::Works,
            ),
            None => (flat, Scope::Volume),
        };
        cancel.check()?;
        let conn = open(&state)?;
        ingest::persist(&conn, &state.index, &flat, scope)?;
        Ok(IngestSummary::from(&flat))
    })
    .await?;

    info!(
        volume = summary.volume_number,
        works = ?summary.works,
        contents = summary.contents,
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "ingested"
    );
    Ok((StatusCode::CREATED, Json(summary)))
}
