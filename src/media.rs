//! Maps video and channel identifiers to files on disk and streams them.

use std::path::{Path, PathBuf};

use axum::{
    body::Body,
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use mime_guess::{MimeGuess, mime::Mime};
use serde::Serialize;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tokio_util::io::ReaderStream;

use crate::{
    error::{TubeError, TubeResult},
    metadata::{ChannelRecord, MetadataReader, VideoRecord},
};

const TRACK_MIME: &str = "text/vtt; charset=utf-8";

/// A file ready to be streamed, with the content type to announce.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFile {
    pub path: PathBuf,
    pub mime: Option<String>,
}

impl ResolvedFile {
    fn guessed(path: PathBuf) -> Self {
        let mime = MimeGuess::from_path(&path).first().map(|m| m.to_string());
        Self { path, mime }
    }
}

/// Which of a video's files are actually present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MediaAvailability {
    pub video: bool,
    pub subtitles: bool,
    pub chapters: bool,
}

#[derive(Clone)]
pub struct MediaResolver {
    reader: MetadataReader,
}

impl MediaResolver {
    pub fn new(reader: MetadataReader) -> Self {
        Self { reader }
    }

    pub async fn resolve_video(&self, videoid: &str) -> TubeResult<ResolvedFile> {
        let video = self.video(videoid).await?;
        let path = existing_file(&video.filepath, "video file")?;
        let mime = video
            .mimetype
            .filter(|mime| mime.parse::<Mime>().is_ok())
            .or_else(|| MimeGuess::from_path(&path).first().map(|m| m.to_string()));
        Ok(ResolvedFile { path, mime })
    }

    pub async fn resolve_subtitles(&self, videoid: &str) -> TubeResult<ResolvedFile> {
        let video = self.video(videoid).await?;
        let Some(path) = video.subtitles_path.as_deref() else {
            return Err(TubeError::not_found("subtitles", videoid));
        };
        track(existing_file(path, "subtitle track")?)
    }

    pub async fn resolve_chapters(&self, videoid: &str) -> TubeResult<ResolvedFile> {
        let video = self.video(videoid).await?;
        let Some(path) = video.chapters_path.as_deref() else {
            return Err(TubeError::not_found("chapters", videoid));
        };
        track(existing_file(path, "chapter track")?)
    }

    pub async fn resolve_thumbnail(&self, videoid: &str) -> TubeResult<ResolvedFile> {
        let video = self.video(videoid).await?;
        let Some(path) = video.thumb_path.as_deref() else {
            return Err(TubeError::not_found("thumbnail", videoid));
        };
        Ok(ResolvedFile::guessed(existing_file(path, "thumbnail")?))
    }

    pub async fn resolve_profile(&self, channel_id: i64) -> TubeResult<ResolvedFile> {
        let channel = self.channel(channel_id).await?;
        let Some(path) = channel.profile_path.as_deref() else {
            return Err(TubeError::not_found("profile image", channel_id.to_string()));
        };
        Ok(ResolvedFile::guessed(existing_file(path, "profile image")?))
    }

    pub async fn resolve_banner(&self, channel_id: i64) -> TubeResult<ResolvedFile> {
        let channel = self.channel(channel_id).await?;
        let Some(path) = channel.banner_path.as_deref() else {
            return Err(TubeError::not_found("banner image", channel_id.to_string()));
        };
        Ok(ResolvedFile::guessed(existing_file(path, "banner image")?))
    }

    /// Lets the watch page degrade instead of failing when files vanished.
    pub fn availability(video: &VideoRecord) -> MediaAvailability {
        let present = |path: Option<&str>| path.is_some_and(|path| Path::new(path).is_file());
        MediaAvailability {
            video: present(Some(&video.filepath)),
            subtitles: present(video.subtitles_path.as_deref()),
            chapters: present(video.chapters_path.as_deref()),
        }
    }

    async fn video(&self, videoid: &str) -> TubeResult<VideoRecord> {
        self.reader
            .get_video(videoid)
            .await?
            .ok_or_else(|| TubeError::not_found("video", videoid))
    }

    async fn channel(&self, channel_id: i64) -> TubeResult<ChannelRecord> {
        self.reader
            .get_channel(channel_id)
            .await?
            .ok_or_else(|| TubeError::not_found("channel", channel_id.to_string()))
    }
}

fn existing_file(path: &str, what: &'static str) -> TubeResult<PathBuf> {
    let path = PathBuf::from(path);
    if path.is_file() {
        Ok(path)
    } else {
        Err(TubeError::missing(what, path))
    }
}

fn track(path: PathBuf) -> TubeResult<ResolvedFile> {
    Ok(ResolvedFile {
        path,
        mime: Some(TRACK_MIME.to_string()),
    })
}

/// Streams `file`, honouring a single `Range: bytes=` request. Every request
/// gets its own file handle, so concurrent range reads share nothing.
pub async fn serve_file(file: &ResolvedFile, headers: &HeaderMap) -> TubeResult<Response> {
    let mut handle = File::open(&file.path).await.map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => TubeError::missing("file", &file.path),
        _ => TubeError::TransientIo(err),
    })?;
    let size = handle.metadata().await?.len();

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| parse_range_header(value, size));

    let mut builder = Response::builder().header(header::ACCEPT_RANGES, "bytes");
    if let Some(mime) = file.mime.as_deref() {
        builder = builder.header(header::CONTENT_TYPE, mime);
    }

    let response = match range {
        Some((start, _)) if start >= size => builder
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{size}"))
            .body(Body::empty()),
        Some((start, end)) => {
            let end = end.min(size.saturating_sub(1));
            let length = end - start + 1;
            handle.seek(std::io::SeekFrom::Start(start)).await?;
            let stream = ReaderStream::new(handle.take(length));
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{size}"))
                .header(header::CONTENT_LENGTH, length)
                .body(Body::from_stream(stream))
        }
        None => builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, size)
            .body(Body::from_stream(ReaderStream::new(handle))),
    };
    response.map_err(|err| TubeError::Other(err.into()))
}

/// Parses `bytes=a-b`, `bytes=a-` and `bytes=-n`. Anything else (including
/// multi-range requests) yields `None` and the full body is served.
pub fn parse_range_header(value: &str, size: u64) -> Option<(u64, u64)> {
    let range = value.trim().strip_prefix("bytes=")?.trim();
    if range.is_empty() || range.contains(',') {
        return None;
    }
    let (start_str, end_str) = range.split_once('-')?;

    if start_str.is_empty() {
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 {
            return None;
        }
        if suffix_len >= size {
            return Some((0, size.saturating_sub(1)));
        }
        return Some((size - suffix_len, size.saturating_sub(1)));
    }

    let start: u64 = start_str.parse().ok()?;
    let end = if end_str.is_empty() {
        size.saturating_sub(1)
    } else {
        end_str.parse().ok()?
    };
    if end < start {
        return None;
    }
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        MetadataStore,
        tests::{sample_channel, sample_video},
    };
    use axum::body::to_bytes;
    use axum::http::HeaderValue;
    use tempfile::tempdir;

    struct MediaTestContext {
        _temp: tempfile::TempDir,
        dir: PathBuf,
        store: MetadataStore,
        resolver: MediaResolver,
    }

    impl MediaTestContext {
        async fn new() -> Self {
            let temp = tempdir().unwrap();
            let dir = temp.path().to_path_buf();
            let store = MetadataStore::open(&dir.join("tube.db")).await.unwrap();
            let resolver = MediaResolver::new(store.reader());
            Self {
                _temp: temp,
                dir,
                store,
                resolver,
            }
        }

        async fn insert(&self, mut video: VideoRecord) -> i64 {
            video.filepath = self.dir.join(format!("{}.mp4", video.id)).to_string_lossy().into();
            self.store
                .import_channel(&sample_channel("c"), &[video])
                .await
                .unwrap()
        }
    }

    fn range(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static(value));
        headers
    }

    #[tokio::test]
    async fn ten_megabyte_range_returns_exact_slice() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("big.mp4");
        let data: Vec<u8> = (0..10 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        let file = ResolvedFile {
            path,
            mime: Some("video/mp4".into()),
        };

        let response = serve_file(&file, &range("bytes=0-999")).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes 0-999/10485760"
        );
        assert_eq!(response.headers().get(header::ACCEPT_RANGES).unwrap(), "bytes");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 1000);
        assert_eq!(body.as_ref(), &data[..1000]);
    }

    #[tokio::test]
    async fn range_past_end_is_not_satisfiable() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("small.bin");
        std::fs::write(&path, b"0123456789").unwrap();
        let file = ResolvedFile { path, mime: None };

        let response = serve_file(&file, &range("bytes=10-")).await.unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers().get(header::CONTENT_RANGE).unwrap(), "bytes */10");

        let response = serve_file(&file, &range("bytes=-3")).await.unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"789");

        let response = serve_file(&file, &range("items=0-1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), 10);
    }

    #[test]
    fn parse_range_variants() {
        assert_eq!(parse_range_header("bytes=0-999", 5000), Some((0, 999)));
        assert_eq!(parse_range_header("bytes=100-", 5000), Some((100, 4999)));
        assert_eq!(parse_range_header("bytes=-500", 5000), Some((4500, 4999)));
        assert_eq!(parse_range_header("bytes=-9000", 5000), Some((0, 4999)));
        assert_eq!(parse_range_header("bytes=5-1", 5000), None);
        assert_eq!(parse_range_header("bytes=0-1,4-5", 5000), None);
        assert_eq!(parse_range_header("bytes=-0", 5000), None);
    }

    #[tokio::test]
    async fn unknown_video_is_not_found() {
        let ctx = MediaTestContext::new().await;
        let err = ctx.resolver.resolve_video("nope").await.unwrap_err();
        assert!(matches!(err, TubeError::NotFound { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_resource_missing() {
        let ctx = MediaTestContext::new().await;
        ctx.insert(sample_video("gone", 1)).await;
        let err = ctx.resolver.resolve_video("gone").await.unwrap_err();
        assert!(matches!(err, TubeError::ResourceMissing { .. }));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn resolves_video_and_tracks() {
        let ctx = MediaTestContext::new().await;
        let mut video = sample_video("here", 1);
        let subs = ctx.dir.join("here.vtt");
        std::fs::write(&subs, "WEBVTT\n").unwrap();
        video.subtitles_path = Some(subs.to_string_lossy().into());
        ctx.insert(video).await;
        std::fs::write(ctx.dir.join("here.mp4"), b"video").unwrap();

        let file = ctx.resolver.resolve_video("here").await.unwrap();
        assert_eq!(file.mime.as_deref(), Some("video/mp4"));
        let track = ctx.resolver.resolve_subtitles("here").await.unwrap();
        assert_eq!(track.path, subs);
        assert_eq!(track.mime.as_deref(), Some(TRACK_MIME));

        let err = ctx.resolver.resolve_chapters("here").await.unwrap_err();
        assert!(matches!(err, TubeError::NotFound { .. }));

        let stored = ctx.store.reader().get_video("here").await.unwrap().unwrap();
        assert_eq!(
            MediaResolver::availability(&stored),
            MediaAvailability {
                video: true,
                subtitles: true,
                chapters: false
            }
        );
    }

    #[tokio::test]
    async fn channel_images_resolve_by_channel_id() {
        let ctx = MediaTestContext::new().await;
        let profile = ctx.dir.join("p.png");
        std::fs::write(&profile, b"PNG").unwrap();
        let mut channel = sample_channel("imgs");
        channel.profile_path = Some(profile.to_string_lossy().into());
        let id = ctx.store.import_channel(&channel, &[]).await.unwrap();

        let file = ctx.resolver.resolve_profile(id).await.unwrap();
        assert_eq!(file.mime.as_deref(), Some("image/png"));
        let err = ctx.resolver.resolve_banner(id).await.unwrap_err();
        assert!(matches!(err, TubeError::NotFound { .. }));
        let err = ctx.resolver.resolve_profile(id + 100).await.unwrap_err();
        assert!(matches!(err, TubeError::NotFound { .. }));
    }
}
