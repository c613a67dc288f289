//! On-demand resizing and cropping of thumbnails, profile pictures and
//! banners.
//!
//! Query parameters follow the archive viewer's historical scheme:
//!
//! * `w`, `h`: target width/height in pixels
//! * `rw`: width relative to the height, `rh`: height relative to the width
//! * `c`: crop anchor (`tl tc tr cl cc cr bl bc br`) or `letterbox`; anything
//!   else scales to the exact target size
//! * `e`: comma separated extras; `stretch` allows upscaling
//!
//! Rendering is deterministic, so results are memoized per (source, spec).

use std::{
    collections::HashMap,
    io::Cursor,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage, imageops, imageops::FilterType};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::{
    config::ThumbnailSettings,
    error::{TubeError, TubeResult},
};

/// Raw query string of an image route.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageQuery {
    pub w: Option<String>,
    pub h: Option<String>,
    pub rw: Option<String>,
    pub rh: Option<String>,
    pub c: Option<String>,
    pub e: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid image parameter `{name}`: {value}")]
pub struct InvalidParameter {
    pub name: &'static str,
    pub value: String,
}

/// A relative factor stored in ten-thousandths so specs stay hashable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ratio(u32);

impl Ratio {
    const SCALE: f64 = 10_000.0;

    pub fn from_f64(value: f64) -> Option<Self> {
        if value.is_finite() && value > 0.0 && value <= 100.0 {
            Some(Self((value * Self::SCALE).round().max(1.0) as u32))
        } else {
            None
        }
    }

    pub fn get(self) -> f64 {
        self.0 as f64 / Self::SCALE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Anchor {
    TopLeft,
    TopCenter,
    TopRight,
    CenterLeft,
    Center,
    CenterRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

impl Anchor {
    fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "tl" => Self::TopLeft,
            "tc" => Self::TopCenter,
            "tr" => Self::TopRight,
            "cl" => Self::CenterLeft,
            "cc" => Self::Center,
            "cr" => Self::CenterRight,
            "bl" => Self::BottomLeft,
            "bc" => Self::BottomCenter,
            "br" => Self::BottomRight,
            _ => return None,
        })
    }

    /// Top-left corner of the kept window given the surplus on each axis.
    fn offset(self, spare_x: u32, spare_y: u32) -> (u32, u32) {
        let x = match self {
            Self::TopLeft | Self::CenterLeft | Self::BottomLeft => 0,
            Self::TopCenter | Self::Center | Self::BottomCenter => spare_x / 2,
            Self::TopRight | Self::CenterRight | Self::BottomRight => spare_x,
        };
        let y = match self {
            Self::TopLeft | Self::TopCenter | Self::TopRight => 0,
            Self::CenterLeft | Self::Center | Self::CenterRight => spare_y / 2,
            Self::BottomLeft | Self::BottomCenter | Self::BottomRight => spare_y,
        };
        (x, y)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CropMode {
    /// Scale to the exact target size, ignoring the aspect ratio.
    #[default]
    Scale,
    /// Scale to fit inside the target and pad with black.
    Letterbox,
    /// Scale to cover the target and cut away the surplus around the anchor.
    Anchor(Anchor),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ThumbnailSpec {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub rel_width: Option<Ratio>,
    pub rel_height: Option<Ratio>,
    pub crop: CropMode,
    pub stretch: bool,
}

impl ThumbnailSpec {
    /// `Ok(None)` when the query asks for nothing, so the source is served as is.
    pub fn from_query(query: &ImageQuery) -> Result<Option<Self>, InvalidParameter> {
        let spec = Self {
            width: parse_pixels("w", query.w.as_deref())?,
            height: parse_pixels("h", query.h.as_deref())?,
            rel_width: parse_ratio("rw", query.rw.as_deref())?,
            rel_height: parse_ratio("rh", query.rh.as_deref())?,
            crop: match query.c.as_deref().map(str::trim) {
                Some("letterbox") | Some("fit") => CropMode::Letterbox,
                Some(value) => Anchor::parse(value).map_or(CropMode::Scale, CropMode::Anchor),
                None => CropMode::Scale,
            },
            stretch: query
                .e
                .as_deref()
                .is_some_and(|extras| extras.split(',').any(|extra| extra.trim() == "stretch")),
        };
        if spec == Self::default() {
            Ok(None)
        } else {
            Ok(Some(spec))
        }
    }

    /// Output dimensions for a `source_w` x `source_h` image.
    pub fn target_size(&self, source_w: u32, source_h: u32, max_dimension: u32) -> (u32, u32) {
        let (sw, sh) = (source_w.max(1) as f64, source_h.max(1) as f64);
        let (mut w, mut h) = match (self.width, self.height, self.rel_width, self.rel_height) {
            (Some(w), Some(h), _, _) => (w as f64, h as f64),
            (Some(w), None, _, Some(rh)) => (w as f64, w as f64 * rh.get()),
            (None, Some(h), Some(rw), _) => (h as f64 * rw.get(), h as f64),
            (Some(w), None, _, None) => (w as f64, w as f64 * sh / sw),
            (None, Some(h), None, _) => (h as f64 * sw / sh, h as f64),
            (None, None, _, _) => (sw, sh),
        };

        if !self.stretch && (w > sw || h > sh) {
            let factor = (sw / w).min(sh / h);
            w *= factor;
            h *= factor;
        }
        let max = max_dimension.max(1) as f64;
        if w > max || h > max {
            let factor = (max / w).min(max / h);
            w *= factor;
            h *= factor;
        }
        ((w.round() as u32).max(1), (h.round() as u32).max(1))
    }
}

fn parse_pixels(name: &'static str, raw: Option<&str>) -> Result<Option<u32>, InvalidParameter> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 1.0 && *value <= u32::MAX as f64)
        .map(|value| Some(value.round() as u32))
        .ok_or_else(|| InvalidParameter {
            name,
            value: raw.to_string(),
        })
}

fn parse_ratio(name: &'static str, raw: Option<&str>) -> Result<Option<Ratio>, InvalidParameter> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    raw.parse::<f64>()
        .ok()
        .and_then(Ratio::from_f64)
        .map(Some)
        .ok_or_else(|| InvalidParameter {
            name,
            value: raw.to_string(),
        })
}

/// Resizes and crops `source` according to `spec`.
pub fn render(source: &DynamicImage, spec: &ThumbnailSpec, max_dimension: u32) -> DynamicImage {
    let (sw, sh) = (source.width(), source.height());
    let (tw, th) = spec.target_size(sw, sh, max_dimension);

    match spec.crop {
        CropMode::Scale => {
            if (tw, th) == (sw, sh) {
                source.clone()
            } else {
                source.resize_exact(tw, th, FilterType::Lanczos3)
            }
        }
        CropMode::Anchor(anchor) => {
            let scale = (tw as f64 / sw.max(1) as f64).max(th as f64 / sh.max(1) as f64);
            let cw = ((sw as f64 * scale).round() as u32).max(tw);
            let ch = ((sh as f64 * scale).round() as u32).max(th);
            let covered = if (cw, ch) == (sw, sh) {
                source.clone()
            } else {
                source.resize_exact(cw, ch, FilterType::Lanczos3)
            };
            let (x, y) = anchor.offset(cw - tw, ch - th);
            covered.crop_imm(x, y, tw, th)
        }
        CropMode::Letterbox => {
            let fitted = source.resize(tw, th, FilterType::Lanczos3).to_rgba8();
            let mut canvas = RgbaImage::from_pixel(tw, th, Rgba([0, 0, 0, 255]));
            let x = tw.saturating_sub(fitted.width()) / 2;
            let y = th.saturating_sub(fitted.height()) / 2;
            imageops::overlay(&mut canvas, &fitted, x as i64, y as i64);
            DynamicImage::ImageRgba8(canvas)
        }
    }
}

/// Encoded output of one render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
    pub etag: String,
}

impl Thumbnail {
    fn new(bytes: Vec<u8>, mime: &'static str) -> Self {
        let etag = format!("\"{}\"", &blake3::hash(&bytes).to_hex()[..32]);
        Self { bytes, mime, etag }
    }
}

/// Decodes, renders and re-encodes in the source's format. Formats without
/// an encoder here come out as PNG; animated GIFs keep their first frame.
pub fn render_bytes(bytes: &[u8], spec: &ThumbnailSpec, max_dimension: u32) -> TubeResult<Thumbnail> {
    let format = image::guess_format(bytes)?;
    let source = image::load_from_memory_with_format(bytes, format)?;
    let rendered = render(&source, spec, max_dimension);

    let (output, rendered) = match format {
        ImageFormat::Jpeg => (format, DynamicImage::ImageRgb8(rendered.to_rgb8())),
        ImageFormat::Gif | ImageFormat::WebP => {
            (format, DynamicImage::ImageRgba8(rendered.to_rgba8()))
        }
        _ => (ImageFormat::Png, rendered),
    };
    let mut buf = Cursor::new(Vec::new());
    rendered.write_to(&mut buf, output)?;
    Ok(Thumbnail::new(buf.into_inner(), output.to_mime_type()))
}

/// Distinct renders kept in memory. Requests beyond this are rendered without
/// being stored.
const MAX_CACHED_THUMBNAILS: usize = 4096;

type CacheKey = (PathBuf, ThumbnailSpec);

/// Renders thumbnails off the async runtime and optionally memoizes them.
///
/// Each key owns a `OnceCell`, so concurrent requests for the same key wait
/// for a single render. A failed render drops its cell so the next request
/// retries.
pub struct ThumbnailService {
    settings: ThumbnailSettings,
    cache: Mutex<HashMap<CacheKey, Arc<OnceCell<Arc<Thumbnail>>>>>,
    capacity: usize,
    renders: AtomicUsize,
}

impl ThumbnailService {
    pub fn new(settings: ThumbnailSettings) -> Self {
        Self {
            settings,
            cache: Mutex::new(HashMap::new()),
            capacity: MAX_CACHED_THUMBNAILS,
            renders: AtomicUsize::new(0),
        }
    }

    pub async fn thumbnail(&self, source: &Path, spec: ThumbnailSpec) -> TubeResult<Arc<Thumbnail>> {
        if !self.settings.cache {
            return self.generate(source, spec).await.map(Arc::new);
        }

        let key = (source.to_path_buf(), spec);
        let cell = {
            let mut cache = self.cache.lock();
            match cache.get(&key) {
                Some(cell) => cell.clone(),
                None if cache.len() >= self.capacity => {
                    drop(cache);
                    debug!(path = %source.display(), "thumbnail cache full, rendering uncached");
                    return self.generate(source, spec).await.map(Arc::new);
                }
                None => cache.entry(key.clone()).or_default().clone(),
            }
        };
        if cell.initialized() {
            debug!(path = %source.display(), "thumbnail cache hit");
        }
        let result = cell
            .get_or_try_init(|| async { self.generate(source, spec).await.map(Arc::new) })
            .await
            .cloned();
        if result.is_err() {
            let mut cache = self.cache.lock();
            if cache
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, &cell) && !current.initialized())
            {
                cache.remove(&key);
            }
        }
        result
    }

    #[cfg(test)]
    fn render_count(&self) -> usize {
        self.renders.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn cached_entries(&self) -> usize {
        self.cache.lock().len()
    }

    async fn generate(&self, source: &Path, spec: ThumbnailSpec) -> TubeResult<Thumbnail> {
        let bytes = tokio::fs::read(source).await.map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => TubeError::missing("image", source),
            _ => TubeError::TransientIo(err),
        })?;
        self.renders.fetch_add(1, Ordering::Relaxed);
        let max = self.settings.max_dimension;
        tokio::task::spawn_blocking(move || render_bytes(&bytes, &spec, max))
            .await
            .map_err(|err| TubeError::Other(err.into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::png_bytes;
    use image::{GenericImageView, Rgb, RgbImage};

    fn query(pairs: &[(&str, &str)]) -> ImageQuery {
        let mut query = ImageQuery::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "w" => query.w = value,
                "h" => query.h = value,
                "rw" => query.rw = value,
                "rh" => query.rh = value,
                "c" => query.c = value,
                "e" => query.e = value,
                _ => unreachable!(),
            }
        }
        query
    }

    fn spec(pairs: &[(&str, &str)]) -> ThumbnailSpec {
        ThumbnailSpec::from_query(&query(pairs)).unwrap().unwrap()
    }

    /// 200x100: red left half, blue right half.
    fn split_image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(200, 100, |x, _| {
            if x < 100 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        }))
    }

    #[test]
    fn empty_query_means_original() {
        assert_eq!(ThumbnailSpec::from_query(&ImageQuery::default()), Ok(None));
        assert_eq!(ThumbnailSpec::from_query(&query(&[("w", "")])), Ok(None));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = ThumbnailSpec::from_query(&query(&[("w", "abc")])).unwrap_err();
        assert_eq!(err.name, "w");
        assert!(ThumbnailSpec::from_query(&query(&[("rh", "-1")])).is_err());
        assert!(ThumbnailSpec::from_query(&query(&[("h", "0")])).is_err());
    }

    #[test]
    fn crop_and_extras_parse() {
        let parsed = spec(&[("w", "320"), ("rh", "0.5625"), ("c", "cc"), ("e", "circle,stretch")]);
        assert_eq!(parsed.crop, CropMode::Anchor(Anchor::Center));
        assert!(parsed.stretch);
        assert_eq!(spec(&[("w", "1"), ("c", "letterbox")]).crop, CropMode::Letterbox);
        assert_eq!(spec(&[("w", "1"), ("c", "zz")]).crop, CropMode::Scale);
    }

    #[test]
    fn target_size_rules() {
        let max = 4000;
        assert_eq!(spec(&[("w", "320"), ("rh", "0.5625")]).target_size(1280, 720, max), (320, 180));
        assert_eq!(spec(&[("h", "90"), ("rw", "2")]).target_size(1280, 720, max), (180, 90));
        assert_eq!(spec(&[("w", "640")]).target_size(1280, 720, max), (640, 360));
        assert_eq!(spec(&[("h", "360")]).target_size(1280, 720, max), (640, 360));
        // Never upscaled without `stretch`, aspect of the request is kept.
        assert_eq!(spec(&[("w", "400")]).target_size(100, 100, max), (100, 100));
        assert_eq!(spec(&[("w", "400"), ("h", "100")]).target_size(100, 100, max), (100, 25));
        assert_eq!(
            spec(&[("w", "400"), ("e", "stretch")]).target_size(100, 100, max),
            (400, 400)
        );
        assert_eq!(
            spec(&[("w", "5000"), ("h", "2500"), ("e", "stretch")]).target_size(100, 100, 1920),
            (1920, 960)
        );
    }

    #[test]
    fn anchors_keep_the_requested_side() {
        let source = split_image();
        let left = render(&source, &spec(&[("w", "100"), ("rh", "1"), ("c", "cl")]), 4000);
        assert_eq!(left.dimensions(), (100, 100));
        assert_eq!(left.get_pixel(50, 50).0, [255, 0, 0, 255]);

        let right = render(&source, &spec(&[("w", "100"), ("rh", "1"), ("c", "cr")]), 4000);
        assert_eq!(right.get_pixel(50, 50).0, [0, 0, 255, 255]);
    }

    #[test]
    fn letterbox_pads_with_black() {
        let boxed = render(
            &split_image(),
            &spec(&[("w", "100"), ("h", "100"), ("c", "letterbox")]),
            4000,
        );
        assert_eq!(boxed.dimensions(), (100, 100));
        assert_eq!(boxed.get_pixel(50, 5).0, [0, 0, 0, 255]);
        assert_ne!(boxed.get_pixel(10, 50).0, [0, 0, 0, 255]);
    }

    #[test]
    fn rendering_is_deterministic() {
        let source = png_bytes(64, 48);
        let request = spec(&[("w", "32"), ("rh", "0.5625"), ("c", "cc")]);
        let first = render_bytes(&source, &request, 1920).unwrap();
        let second = render_bytes(&source, &request, 1920).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.mime, "image/png");
        let decoded = image::load_from_memory(&first.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (32, 18));
    }

    #[test]
    fn jpeg_stays_jpeg() {
        let mut buf = Cursor::new(Vec::new());
        split_image().write_to(&mut buf, ImageFormat::Jpeg).unwrap();
        let thumb = render_bytes(&buf.into_inner(), &spec(&[("w", "50")]), 1920).unwrap();
        assert_eq!(thumb.mime, "image/jpeg");
        assert_eq!(image::guess_format(&thumb.bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn webp_and_gif_keep_their_format() {
        for format in [ImageFormat::WebP, ImageFormat::Gif] {
            let mut buf = Cursor::new(Vec::new());
            DynamicImage::ImageRgba8(split_image().to_rgba8())
                .write_to(&mut buf, format)
                .unwrap();
            let thumb = render_bytes(&buf.into_inner(), &spec(&[("w", "50")]), 1920).unwrap();
            assert_eq!(thumb.mime, format.to_mime_type());
            assert_eq!(image::guess_format(&thumb.bytes).unwrap(), format);
            let decoded = image::load_from_memory(&thumb.bytes).unwrap();
            assert_eq!(decoded.width(), 50);
        }
    }

    #[test]
    fn corrupt_source_fails_the_request() {
        let err = render_bytes(b"definitely not an image", &spec(&[("w", "5")]), 1920).unwrap_err();
        assert!(matches!(err, TubeError::Image(_)));
    }

    #[tokio::test]
    async fn concurrent_requests_render_once() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("thumb.png");
        std::fs::write(&path, png_bytes(64, 64)).unwrap();
        let service = Arc::new(ThumbnailService::new(ThumbnailSettings::default()));
        let request = spec(&[("w", "16")]);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                let path = path.clone();
                tokio::spawn(async move { service.thumbnail(&path, request).await.unwrap() })
            })
            .collect();
        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(service.render_count(), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("later.png");
        let service = ThumbnailService::new(ThumbnailSettings::default());
        let request = spec(&[("w", "8")]);

        let err = service.thumbnail(&path, request).await.unwrap_err();
        assert!(matches!(err, TubeError::ResourceMissing { .. }));

        assert_eq!(service.cached_entries(), 0);

        std::fs::write(&path, png_bytes(16, 16)).unwrap();
        assert!(service.thumbnail(&path, request).await.is_ok());
        assert_eq!(service.cached_entries(), 1);
    }

    #[tokio::test]
    async fn full_cache_still_serves() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("t.png");
        std::fs::write(&path, png_bytes(16, 16)).unwrap();
        let mut service = ThumbnailService::new(ThumbnailSettings::default());
        service.capacity = 1;

        service.thumbnail(&path, spec(&[("w", "8")])).await.unwrap();
        let thumb = service.thumbnail(&path, spec(&[("w", "4")])).await.unwrap();
        service.thumbnail(&path, spec(&[("w", "4")])).await.unwrap();
        assert_eq!(image::load_from_memory(&thumb.bytes).unwrap().width(), 4);
        assert_eq!(service.cached_entries(), 1);
        assert_eq!(service.render_count(), 3);

        service.thumbnail(&path, spec(&[("w", "8")])).await.unwrap();
        assert_eq!(service.render_count(), 3);
    }

    #[tokio::test]
    async fn cache_can_be_disabled() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("t.png");
        std::fs::write(&path, png_bytes(16, 16)).unwrap();
        let service = ThumbnailService::new(ThumbnailSettings {
            cache: false,
            max_dimension: 1920,
        });
        let request = spec(&[("w", "8")]);
        service.thumbnail(&path, request).await.unwrap();
        service.thumbnail(&path, request).await.unwrap();
        assert_eq!(service.render_count(), 2);
    }
}
