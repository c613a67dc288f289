//! Axum router serving the HTML pages and the archived media.
//!
//! Requests never write to the store; everything below reads through the
//! shared [`MetadataReader`].

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::{
    config::ServerConfig,
    error::{TubeError, TubeResult},
    media::{MediaResolver, ResolvedFile, serve_file},
    metadata::MetadataReader,
    pages::{self, ChannelTab},
    templates::{Templates, static_asset},
    thumbnail::{ImageQuery, ThumbnailService, ThumbnailSpec},
};

const THUMBNAIL_CACHE_CONTROL: &str = "public, max-age=86400";

#[derive(Clone)]
pub struct AppState {
    pub reader: MetadataReader,
    pub resolver: MediaResolver,
    pub thumbnails: Arc<ThumbnailService>,
    pub templates: Arc<Templates>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(reader: MetadataReader, config: ServerConfig) -> TubeResult<Self> {
        Ok(Self {
            resolver: MediaResolver::new(reader.clone()),
            thumbnails: Arc::new(ThumbnailService::new(config.thumbnails)),
            templates: Arc::new(Templates::new()?),
            config: Arc::new(config),
            reader,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/watch", get(watch))
        .route("/statistics", get(statistics))
        .route("/channel/{id}", get(channel_home))
        .route("/channel/{id}/{tab}", get(channel_tab))
        .route("/channel/{id}/{tab}/page/{page}", get(channel_tab_page))
        .route("/res/video/{id}", get(video_file))
        .route("/res/subtitles/{id}", get(subtitles_file))
        .route("/res/chapters/{id}", get(chapters_file))
        .route("/res/thumb/{id}", get(thumbnail_image))
        .route("/res/profile/{id}", get(profile_image))
        .route("/res/banner/{id}", get(banner_image))
        .route("/static/{file}", get(static_file))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds the configured address and serves until Ctrl+C.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let reader = MetadataReader::new(config.db_path())
        .await
        .context("initializing metadata reader")?;
    let bind = (config.host.clone(), config.port);
    let state = AppState::new(reader, config).context("loading templates")?;

    let listener = tokio::net::TcpListener::bind((bind.0.as_str(), bind.1))
        .await
        .with_context(|| format!("binding to {}:{}", bind.0, bind.1))?;
    let addr = listener.local_addr().context("reading bound address")?;
    info!(%addr, "server listening");
    println!("Serving archive on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running HTTP server")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl+C handler");
    }
    info!("shutting down");
}

/// Unknown paths. A trailing slash is redirected to the bare path; anything
/// under `/res/` keeps the JSON error body of the resource routes.
async fn not_found(State(state): State<AppState>, uri: Uri) -> Response {
    let path = uri.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        let target = match uri.query() {
            Some(query) => format!("{trimmed}?{query}"),
            None => trimmed.to_string(),
        };
        return Redirect::permanent(&target).into_response();
    }
    let err = TubeError::not_found("page", path.to_string());
    if path.starts_with("/res/") {
        return err.into_response();
    }
    error_page(&state, err)
}

/// Renders `err` as an HTML page with the error's status code.
fn error_page(state: &AppState, err: TubeError) -> Response {
    err.log();
    let status = err.status();
    match state
        .templates
        .render("error.html", &pages::ErrorPage::new(&err))
    {
        Ok(html) => (status, html).into_response(),
        Err(render_err) => render_err.into_response(),
    }
}

/// Renders a page view-model, or the error page if assembling it failed.
fn page_response<S: Serialize>(state: &AppState, name: &str, view: TubeResult<S>) -> Response {
    match view.and_then(|view| state.templates.render(name, &view)) {
        Ok(html) => html.into_response(),
        Err(err) => error_page(state, err),
    }
}

async fn home(State(state): State<AppState>) -> Response {
    let page = pages::home_page(&state.reader, state.config.page_size as i64, Utc::now()).await;
    page_response(&state, "home.html", page)
}

#[derive(Debug, Deserialize)]
struct WatchQuery {
    v: Option<String>,
}

async fn watch(State(state): State<AppState>, Query(query): Query<WatchQuery>) -> Response {
    let Some(videoid) = query.v.filter(|v| !v.trim().is_empty()) else {
        return Redirect::to("/").into_response();
    };
    let page = pages::watch_page(&state.reader, videoid.trim(), Utc::now()).await;
    page_response(&state, "watch.html", page)
}

async fn channel_home(State(state): State<AppState>, AxumPath(id): AxumPath<i64>) -> Response {
    render_channel(&state, id, Some(ChannelTab::Home), "home", 1).await
}

async fn channel_tab(
    State(state): State<AppState>,
    AxumPath((id, tab)): AxumPath<(i64, String)>,
) -> Response {
    render_channel(&state, id, ChannelTab::parse(&tab), &tab, 1).await
}

async fn channel_tab_page(
    State(state): State<AppState>,
    AxumPath((id, tab, page)): AxumPath<(i64, String, u32)>,
) -> Response {
    render_channel(&state, id, ChannelTab::parse(&tab), &tab, page).await
}

async fn render_channel(
    state: &AppState,
    id: i64,
    tab: Option<ChannelTab>,
    requested: &str,
    page: u32,
) -> Response {
    let view = match tab {
        Some(tab) => {
            pages::channel_page(
                &state.reader,
                id,
                tab,
                page,
                state.config.page_size,
                Utc::now(),
            )
            .await
        }
        None => Err(TubeError::not_found("tab", requested)),
    };
    page_response(state, "channel.html", view)
}

async fn statistics(State(state): State<AppState>) -> Response {
    let page = pages::statistics_page(&state.reader, Utc::now()).await;
    page_response(&state, "statistics.html", page)
}

async fn video_file(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> TubeResult<Response> {
    let file = state.resolver.resolve_video(&id).await?;
    serve_file(&file, &headers).await
}

async fn subtitles_file(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> TubeResult<Response> {
    let file = state.resolver.resolve_subtitles(&id).await?;
    serve_file(&file, &headers).await
}

async fn chapters_file(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> TubeResult<Response> {
    let file = state.resolver.resolve_chapters(&id).await?;
    serve_file(&file, &headers).await
}

async fn thumbnail_image(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<ImageQuery>,
    headers: HeaderMap,
) -> TubeResult<Response> {
    let file = state.resolver.resolve_thumbnail(&id).await?;
    image_response(&state, file, &query, &headers).await
}

async fn profile_image(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Query(query): Query<ImageQuery>,
    headers: HeaderMap,
) -> TubeResult<Response> {
    let file = state.resolver.resolve_profile(id).await?;
    image_response(&state, file, &query, &headers).await
}

async fn banner_image(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Query(query): Query<ImageQuery>,
    headers: HeaderMap,
) -> TubeResult<Response> {
    let file = state.resolver.resolve_banner(id).await?;
    image_response(&state, file, &query, &headers).await
}

/// Serves `file` resized per `query`. Without usable parameters the original
/// bytes are streamed unchanged.
async fn image_response(
    state: &AppState,
    file: ResolvedFile,
    query: &ImageQuery,
    headers: &HeaderMap,
) -> TubeResult<Response> {
    let spec = match ThumbnailSpec::from_query(query) {
        Ok(Some(spec)) => spec,
        Ok(None) => return serve_file(&file, headers).await,
        Err(err) => {
            debug!(error = %err, "serving original image");
            return serve_file(&file, headers).await;
        }
    };

    let thumbnail = state.thumbnails.thumbnail(&file.path, spec).await?;
    if etag_matches(headers, &thumbnail.etag) {
        return Ok((
            StatusCode::NOT_MODIFIED,
            [(header::ETAG, thumbnail.etag.clone())],
        )
            .into_response());
    }
    Ok((
        [
            (header::CONTENT_TYPE, thumbnail.mime.to_string()),
            (header::ETAG, thumbnail.etag.clone()),
            (header::CACHE_CONTROL, THUMBNAIL_CACHE_CONTROL.to_string()),
        ],
        thumbnail.bytes.clone(),
    )
        .into_response())
}

fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .split(',')
                .map(str::trim)
                .any(|candidate| candidate == "*" || candidate == etag)
        })
}

async fn static_file(AxumPath(file): AxumPath<String>) -> TubeResult<Response> {
    let (mime, body) =
        static_asset(&file).ok_or_else(|| TubeError::not_found("asset", file.clone()))?;
    Ok(([(header::CONTENT_TYPE, mime)], body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::MetadataStore,
        registry::{
            ArchiveRegistry,
            tests::{png_bytes, write_archive},
        },
    };
    use axum::{
        body::{Body, to_bytes},
        http::{HeaderValue, Request},
    };
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct ServerTestContext {
        state: AppState,
        _temp: TempDir,
    }

    impl ServerTestContext {
        /// One indexed archive with videos `a` < `b` < `c`.
        async fn new() -> Self {
            let temp = tempfile::tempdir().unwrap();
            let data_dir = std::fs::canonicalize(temp.path()).unwrap();
            let config = ServerConfig::for_data_dir(&data_dir);
            let store = MetadataStore::open(&config.db_path()).await.unwrap();

            let archive = data_dir.join("archives").join("chan");
            write_archive(&archive, "Test Channel", &[("a", 100), ("b", 200), ("c", 300)]).await;
            let registry = ArchiveRegistry::new(&store, &config);
            registry.register(&archive, false).await.unwrap();
            let summary = registry.reindex(1_000).await.unwrap();
            assert!(summary.failures.is_empty());

            let reader = MetadataReader::new(config.db_path()).await.unwrap();
            Self {
                state: AppState::new(reader, config).unwrap(),
                _temp: temp,
            }
        }

        async fn get(&self, uri: &str) -> Response {
            self.request(Request::get(uri).body(Body::empty()).unwrap())
                .await
        }

        async fn request(&self, request: Request<Body>) -> Response {
            router(self.state.clone()).oneshot(request).await.unwrap()
        }

        async fn channel_id(&self) -> i64 {
            self.state.reader.list_channels().await.unwrap()[0].id
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn home_lists_the_channel() {
        let ctx = ServerTestContext::new().await;
        let response = ctx.get("/").await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("Test Channel"));
        assert!(html.contains("?v=c"));
    }

    #[tokio::test]
    async fn watch_without_id_redirects_home() {
        let ctx = ServerTestContext::new().await;
        let response = ctx.get("/watch").await;
        assert!(response.status().is_redirection());
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/");
    }

    #[tokio::test]
    async fn watch_page_links_neighbours_and_tracks() {
        let ctx = ServerTestContext::new().await;
        let response = ctx.get("/watch?v=b").await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("<video"));
        assert!(html.contains("?v=a"));
        assert!(html.contains("?v=c"));
        assert!(html.contains("kind=\"chapters\""));
    }

    #[tokio::test]
    async fn unknown_video_renders_html_404() {
        let ctx = ServerTestContext::new().await;
        let response = ctx.get("/watch?v=zzz").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/html")
        );
        let html = body_text(response).await;
        assert!(html.contains("Video not found"));
        assert!(html.contains("<h1>404</h1>"));
    }

    #[tokio::test]
    async fn page_errors_are_html_and_resource_errors_json() {
        let ctx = ServerTestContext::new().await;
        let id = ctx.channel_id().await;
        for uri in [
            "/channel/999".to_string(),
            format!("/channel/{id}/videos/page/9"),
            format!("/channel/{id}/shorts"),
            "/nothing/here".to_string(),
        ] {
            let response = ctx.get(&uri).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
            assert!(body_text(response).await.contains("<h1>404</h1>"), "{uri}");
        }

        let response = ctx.get(&format!("/channel/{id}/videos/page/0")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("<h1>400</h1>"));

        for uri in ["/res/video/zzz", "/res/unknown/thing"] {
            let response = ctx.get(uri).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
            let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
            assert!(body["error"].is_string(), "{uri}");
        }
    }

    #[tokio::test]
    async fn trailing_slashes_redirect() {
        let ctx = ServerTestContext::new().await;
        let id = ctx.channel_id().await;
        for path in [
            format!("/channel/{id}"),
            format!("/channel/{id}/videos"),
            format!("/channel/{id}/videos/page/1"),
        ] {
            let response = ctx.get(&format!("{path}/")).await;
            assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT, "{path}");
            assert_eq!(response.headers()[header::LOCATION], path.as_str());
            assert_eq!(ctx.get(&path).await.status(), StatusCode::OK, "{path}");
        }
        let response = ctx.get("/watch/?v=a").await;
        assert_eq!(response.headers()[header::LOCATION], "/watch?v=a");
    }

    #[tokio::test]
    async fn channel_tabs_and_bounds() {
        let ctx = ServerTestContext::new().await;
        let id = ctx.channel_id().await;

        assert_eq!(ctx.get(&format!("/channel/{id}")).await.status(), StatusCode::OK);
        assert_eq!(
            ctx.get(&format!("/channel/{id}/about")).await.status(),
            StatusCode::OK
        );
        assert_eq!(
            ctx.get(&format!("/channel/{id}/videos/page/1")).await.status(),
            StatusCode::OK
        );
        assert_eq!(
            ctx.get(&format!("/channel/{id}/videos/page/9")).await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ctx.get(&format!("/channel/{id}/shorts")).await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ctx.get("/channel/999").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn statistics_page_renders_without_data() {
        let ctx = ServerTestContext::new().await;
        let response = ctx.get("/statistics").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("not been calculated"));
    }

    #[tokio::test]
    async fn video_stream_honours_ranges() {
        let ctx = ServerTestContext::new().await;
        let request = Request::get("/res/video/a")
            .header(header::RANGE, "bytes=1-3")
            .body(Body::empty())
            .unwrap();
        let response = ctx.request(request).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "video/mp4");
        assert_eq!(body_text(response).await, "ide");
    }

    #[tokio::test]
    async fn chapter_track_is_webvtt() {
        let ctx = ServerTestContext::new().await;
        let response = ctx.get("/res/chapters/a").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.starts_with("WEBVTT"));
    }

    #[tokio::test]
    async fn missing_subtitles_are_404() {
        let ctx = ServerTestContext::new().await;
        assert_eq!(
            ctx.get("/res/subtitles/a").await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn thumbnails_resize_and_revalidate() {
        let ctx = ServerTestContext::new().await;
        let response = ctx.get("/res/thumb/a?w=8&rh=0.5&c=cc").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "image/png");
        let etag = response.headers().get(header::ETAG).unwrap().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 4));

        let request = Request::get("/res/thumb/a?w=8&rh=0.5&c=cc")
            .header(header::IF_NONE_MATCH, etag)
            .body(Body::empty())
            .unwrap();
        assert_eq!(ctx.request(request).await.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn invalid_image_params_serve_the_original() {
        let ctx = ServerTestContext::new().await;
        let response = ctx.get("/res/thumb/a?w=wide").await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), png_bytes(16, 9).as_slice());
    }

    #[tokio::test]
    async fn profile_image_is_served() {
        let ctx = ServerTestContext::new().await;
        let id = ctx.channel_id().await;
        let response = ctx.get(&format!("/res/profile/{id}?w=4&h=4")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            ctx.get(&format!("/res/banner/{id}")).await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn static_assets_and_fallback() {
        let ctx = ServerTestContext::new().await;
        let response = ctx.get("/static/style.css").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            HeaderValue::from_static("text/css; charset=utf-8")
        );
        assert_eq!(ctx.get("/static/missing.js").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(ctx.get("/nothing/here").await.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn etag_matching_handles_lists() {
        let mut headers = HeaderMap::new();
        assert!(!etag_matches(&headers, "\"x\""));
        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("\"a\", \"x\""));
        assert!(etag_matches(&headers, "\"x\""));
    }
}
