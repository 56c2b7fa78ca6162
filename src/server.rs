//! HTTP surface: the Microsub endpoint, WebSub callbacks and a health check.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Form, Path, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{self, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::app::{AppContext, Result, TributaryError};
use crate::broker::Event;
use crate::domain::{Channel, ChannelSetting, Feed, FeedSummary, NOTIFICATIONS_CHANNEL};
use crate::ingest;
use crate::store::Store;
use crate::websub::verify_signature;

const EVENTS_VERSION: &str = r#"{"version":"1.0.0"}"#;

/// Error response in the `{error, error_description}` shape.
#[derive(Debug)]
pub struct AppError(TributaryError);

impl From<TributaryError> for AppError {
    fn from(e: TributaryError) -> Self {
        AppError(e)
    }
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            TributaryError::BadRequest(_)
            | TributaryError::Signature(_)
            | TributaryError::InvalidUrl(_)
            | TributaryError::UnsupportedFormat(_)
            | TributaryError::FeedParse(_)
            | TributaryError::TimeParse(_)
            | TributaryError::Fetch(_)
            | TributaryError::Config(_) => StatusCode::BAD_REQUEST,
            TributaryError::Unauthorized => StatusCode::UNAUTHORIZED,
            TributaryError::ChannelNotFound(_) | TributaryError::FeedNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self.status_code() {
            StatusCode::BAD_REQUEST => "invalid_request",
            StatusCode::UNAUTHORIZED => "unauthorized",
            StatusCode::NOT_FOUND => "not_found",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected: {}", self.0);
        }
        let body = json!({
            "error": self.error_code(),
            "error_description": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult = std::result::Result<Response, AppError>;

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/microsub", get(microsub_get).post(microsub_post))
        .route("/incoming/{feed_id}", get(incoming_verify).post(incoming_push))
        .route("/health", get(health))
        .with_state(ctx)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(ctx: Arc<AppContext>, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Request parameters from the query string and form body, in order.
struct Params(Vec<(String, String)>);

impl Params {
    fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| TributaryError::BadRequest(format!("missing parameter '{}'", name)))
    }

    /// Values of a repeated parameter, accepting both `name` and `name[]`.
    fn all(&self, name: &str) -> Vec<String> {
        let list = format!("{}[]", name);
        self.0
            .iter()
            .filter(|(k, _)| k == name || *k == list)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn has_any(&self, names: &[&str]) -> bool {
        names.iter().any(|n| !self.all(n).is_empty())
    }
}

async fn microsub_get(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
) -> ApiResult {
    microsub(ctx, Method::GET, headers, Params(query)).await
}

async fn microsub_post(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Query(mut query): Query<Vec<(String, String)>>,
    Form(form): Form<Vec<(String, String)>>,
) -> ApiResult {
    query.extend(form);
    microsub(ctx, Method::POST, headers, Params(query)).await
}

async fn microsub(ctx: Arc<AppContext>, method: Method, headers: HeaderMap, params: Params) -> ApiResult {
    if !ctx.authorizer.authorize(&headers, params.get("access_token")) {
        return Err(TributaryError::Unauthorized.into());
    }

    let action = params.require("action")?;
    tracing::debug!("{} microsub action={}", method, action);

    match (action, method == Method::POST) {
        ("channels", false) => list_channels(&ctx),
        ("channels", true) => update_channels(&ctx, &params).await,
        ("timeline", false) => timeline(&ctx, &params),
        ("timeline", true) => timeline_update(&ctx, &params),
        ("follow", false) => list_follows(&ctx, &params),
        ("follow", true) => {
            let feed = ingest::follow(&ctx, params.require("channel")?, params.require("url")?).await?;
            Ok(Json(summary_of(&feed)).into_response())
        }
        ("unfollow", true) => {
            ingest::unfollow(&ctx, params.require("channel")?, params.require("url")?).await?;
            Ok(Json(json!({})).into_response())
        }
        ("search", _) => search(&ctx, &params).await,
        ("preview", _) => {
            let items = ingest::preview(&ctx, params.require("url")?).await?;
            Ok(Json(json!({ "items": items })).into_response())
        }
        ("events", false) => events(&ctx),
        (other, _) => Err(TributaryError::BadRequest(format!("unsupported action '{}'", other)).into()),
    }
}

fn with_unread(ctx: &AppContext, mut channel: Channel) -> Result<Channel> {
    channel.unread = ctx.timeline(&channel.uid)?.unread()?;
    Ok(channel)
}

fn list_channels(ctx: &AppContext) -> ApiResult {
    let channels = ctx
        .store
        .get_all_channels()?
        .into_iter()
        .map(|c| with_unread(ctx, c))
        .collect::<Result<Vec<_>>>()?;
    Ok(Json(json!({ "channels": channels })).into_response())
}

/// Settings carried by a create or update request, if any were given.
fn setting_from(ctx: &AppContext, uid: &str, params: &Params) -> Result<Option<ChannelSetting>> {
    if !params.has_any(&["backend", "include", "exclude", "exclude_type"]) {
        return Ok(None);
    }

    let mut setting = ctx.router.get(uid)?;
    if let Some(backend) = params.get("backend") {
        setting.backend = backend.to_string();
    }
    if let Some(include) = params.all("include").pop() {
        setting.include_regex = include;
    }
    if let Some(exclude) = params.all("exclude").pop() {
        setting.exclude_regex = exclude;
    }
    let types = params.all("exclude_type");
    if !types.is_empty() {
        setting.exclude_types = types.into_iter().filter(|t| !t.is_empty()).collect();
    }

    ctx.timelines.kind_for(&setting)?;
    Ok(Some(setting))
}

fn apply_setting(ctx: &AppContext, uid: &str, setting: Option<ChannelSetting>) -> Result<()> {
    if let Some(setting) = setting {
        ctx.store.save_setting(uid, &setting)?;
        ctx.router.set(uid, setting)?;
    }
    Ok(())
}

async fn update_channels(ctx: &AppContext, params: &Params) -> ApiResult {
    if params.get("method") == Some("delete") {
        let uid = params.require("channel")?;
        delete_channel(ctx, uid).await?;
        return Ok(Json(json!({})).into_response());
    }

    let name = params.require("name")?;
    match params.get("channel") {
        Some(uid) => {
            let setting = setting_from(ctx, uid, params)?;
            ctx.store.rename_channel(uid, name)?;
            apply_setting(ctx, uid, setting)?;

            let channel = with_unread(ctx, Channel::new(uid, name))?;
            ctx.broker.publish(Event::UpdateChannel(channel.clone()));
            Ok(Json(channel).into_response())
        }
        None => {
            let uid = Uuid::new_v4().to_string();
            let setting = setting_from(ctx, &uid, params)?;
            let channel = ctx.store.add_channel(&uid, name)?;
            apply_setting(ctx, &uid, setting)?;
            tracing::info!("Created channel {} ({})", name, uid);

            let channel = with_unread(ctx, channel)?;
            ctx.broker.publish(Event::NewChannel(channel.clone()));
            Ok(Json(channel).into_response())
        }
    }
}

async fn delete_channel(ctx: &AppContext, uid: &str) -> Result<()> {
    if uid == NOTIFICATIONS_CHANNEL {
        return Err(TributaryError::BadRequest("the notifications channel cannot be deleted".into()));
    }
    let channel = ctx
        .store
        .get_channel(uid)?
        .ok_or_else(|| TributaryError::ChannelNotFound(uid.to_string()))?;

    for feed in ctx.store.get_feeds_by_channel(uid)? {
        if let Err(e) = ctx.websub.unsubscribe(&feed).await {
            tracing::warn!("WebSub unsubscribe for {} failed: {}", feed.url, e);
        }
    }
    ctx.timeline(uid)?.clear()?;
    ctx.store.delete_channel(uid)?;
    ctx.router.remove(uid)?;

    tracing::info!("Deleted channel {}", uid);
    ctx.broker.publish(Event::DeleteChannel(channel));
    Ok(())
}

fn timeline(ctx: &AppContext, params: &Params) -> ApiResult {
    let uid = params.require("channel")?;
    if ctx.store.get_channel(uid)?.is_none() {
        return Err(TributaryError::ChannelNotFound(uid.to_string()).into());
    }
    let page = ctx
        .timeline(uid)?
        .items(params.get("before"), params.get("after"))?;
    Ok(Json(page).into_response())
}

fn timeline_update(ctx: &AppContext, params: &Params) -> ApiResult {
    let uid = params.require("channel")?;
    let method = params.require("method")?;
    if method != "mark_read" {
        return Err(TributaryError::BadRequest(format!("unsupported timeline method '{}'", method)).into());
    }

    let channel = ctx
        .store
        .get_channel(uid)?
        .ok_or_else(|| TributaryError::ChannelNotFound(uid.to_string()))?;
    let entries = params.all("entry");
    ctx.timeline(uid)?.mark_read(&entries)?;

    ctx.broker
        .publish(Event::UpdateChannel(with_unread(ctx, channel)?));
    Ok(Json(json!({})).into_response())
}

fn summary_of(feed: &Feed) -> FeedSummary {
    let mut summary = FeedSummary::new(&feed.url);
    summary.name = feed.name.clone().unwrap_or_default();
    summary.photo = feed.photo.clone().unwrap_or_default();
    summary
}

fn list_follows(ctx: &AppContext, params: &Params) -> ApiResult {
    let uid = params.require("channel")?;
    let feeds: Vec<FeedSummary> = ctx
        .store
        .get_feeds_by_channel(uid)?
        .iter()
        .map(summary_of)
        .collect();
    Ok(Json(json!({ "items": feeds })).into_response())
}

async fn search(ctx: &AppContext, params: &Params) -> ApiResult {
    let query = params.require("query")?;
    match params.get("channel") {
        Some(channel) => {
            let items = ctx.search.query(channel, query)?;
            Ok(Json(json!({ "items": items })).into_response())
        }
        None => {
            let results = ingest::find_feeds(ctx, query).await?;
            Ok(Json(json!({ "results": results })).into_response())
        }
    }
}

fn frame(event: &str, data: &str) -> Bytes {
    Bytes::from(format!("event: {}\r\ndata: {}\r\n\r\n", event, data))
}

/// Server-sent events: a `started` frame, then one frame per broker event
/// for as long as the client stays connected.
fn events(ctx: &AppContext) -> ApiResult {
    let listener = ctx.broker.subscribe();

    let started = stream::once(async { Ok::<_, Infallible>(frame("started", EVENTS_VERSION)) });
    let updates = stream::unfold(listener, |mut listener| async move {
        loop {
            let event = listener.recv().await?;
            match event.data() {
                Ok(data) => return Some((Ok(frame(event.name(), &data)), listener)),
                Err(e) => tracing::warn!("Dropping unserializable {} event: {}", event.name(), e),
            }
        }
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(started.chain(updates)))
        .map_err(|e| AppError(TributaryError::Other(e.to_string())))
}

/// Hub verification of intent, or notice that a subscription was denied.
async fn incoming_verify(
    State(ctx): State<Arc<AppContext>>,
    Path(feed_id): Path<i64>,
    Query(query): Query<Vec<(String, String)>>,
) -> ApiResult {
    let params = Params(query);
    let feed = ctx
        .store
        .get_feed(feed_id)?
        .ok_or_else(|| TributaryError::FeedNotFound(feed_id.to_string()))?;

    if params.get("hub.mode") == Some("denied") {
        tracing::warn!(
            "Hub denied subscription to {}: {}",
            feed.url,
            params.get("hub.reason").unwrap_or("no reason given")
        );
        return Ok(StatusCode::OK.into_response());
    }

    let challenge = params.require("hub.challenge")?.to_string();
    if params.get("hub.mode") == Some("subscribe") {
        let lease = params.get("hub.lease_seconds").and_then(|s| s.parse().ok());
        ctx.websub.confirm(feed_id, lease)?;
        tracing::info!("WebSub subscription for {} verified", feed.url);
    }
    Ok((StatusCode::OK, challenge).into_response())
}

/// Content pushed by a hub. Nothing reaches the normalizer unless the
/// signature checks out.
async fn incoming_push(
    State(ctx): State<Arc<AppContext>>,
    Path(feed_id): Path<i64>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let feed = ctx
        .store
        .get_feed(feed_id)?
        .ok_or_else(|| TributaryError::BadRequest(format!("unknown feed {}", feed_id)))?;
    let secret = feed
        .secret
        .as_deref()
        .ok_or_else(|| TributaryError::BadRequest(format!("feed {} has no subscription", feed_id)))?;

    let signature = headers.get("x-hub-signature").and_then(|v| v.to_str().ok());
    verify_signature(secret, signature, &body)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let added = ingest::ingest_body(&ctx, &feed, content_type, &body).await?;
    tracing::info!("Push for {}: {} new items", feed.url, added);

    Ok(StatusCode::OK.into_response())
}
