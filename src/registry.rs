//! Archive registration and (re-)indexing.
//!
//! An archive is a directory holding `archive.db` plus the video files it
//! lists. Registration only records where archives live; `reindex` reads every
//! discovered `archive.db` and mirrors it into `tube.db`. Embedded images and
//! text tracks are exported once into the data directory so the serving path
//! only ever deals with plain files.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use anyhow::{Context, Result, bail};
use libsql::{Builder, Connection, Row, Value, params};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{
    config::ServerConfig,
    error::{TubeError, TubeResult},
    metadata::{ArchiveLocation, ChannelRecord, MetadataStore, VideoRecord},
};

pub const ARCHIVE_DB_NAME: &str = "archive.db";
const IMAGES_SUBDIR: &str = "images";
const TRACKS_SUBDIR: &str = "tracks";
const SIDECAR_IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

const CHANNEL_FIELDS: [&str; 11] = [
    "name",
    "url",
    "language",
    "description",
    "location",
    "joined",
    "links",
    "profile",
    "profileformat",
    "banner",
    "bannerformat",
];
const CHANNEL_REQUIRED: [&str; 1] = ["name"];

const VIDEO_FIELDS: [&str; 19] = [
    "youtubeID",
    "title",
    "timestamp",
    "description",
    "subtitles",
    "filename",
    "thumb",
    "thumbformat",
    "duration",
    "tags",
    "language",
    "width",
    "height",
    "resolution",
    "viewcount",
    "likecount",
    "dislikecount",
    "statisticsupdated",
    "chapters",
];
const VIDEO_REQUIRED: [&str; 4] = ["youtubeID", "title", "timestamp", "filename"];

/// Outcome of a full re-index, printed by the CLI.
#[derive(Debug, Default)]
pub struct ReindexSummary {
    pub archives: usize,
    pub channels: usize,
    pub videos: usize,
    pub failures: Vec<TubeError>,
}

pub fn is_archive(dir: &Path) -> bool {
    dir.join(ARCHIVE_DB_NAME).is_file()
}

/// Archive directories covered by `root`. A recursive location yields every
/// archive below it, without looking inside archives that were already found.
pub fn discover(root: &Path, recursive: bool) -> Vec<PathBuf> {
    if !recursive {
        return if is_archive(root) {
            vec![root.to_path_buf()]
        } else {
            Vec::new()
        };
    }

    let mut found = Vec::new();
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry) = walker.next() {
        let Ok(entry) = entry else {
            continue;
        };
        if !entry.file_type().is_dir() || !is_archive(entry.path()) {
            continue;
        }
        found.push(entry.into_path());
        walker.skip_current_dir();
    }
    found
}

pub struct ArchiveRegistry<'a> {
    store: &'a MetadataStore,
    data_dir: PathBuf,
    images_dir: PathBuf,
    tracks_dir: PathBuf,
}

impl<'a> ArchiveRegistry<'a> {
    pub fn new(store: &'a MetadataStore, config: &ServerConfig) -> Self {
        let data_dir =
            fs::canonicalize(&config.data_dir).unwrap_or_else(|_| config.data_dir.clone());
        let media_dir = data_dir.join(crate::config::MEDIA_SUBDIR);
        Self {
            store,
            images_dir: media_dir.join(IMAGES_SUBDIR),
            tracks_dir: media_dir.join(TRACKS_SUBDIR),
            data_dir,
        }
    }

    /// Records `folder` as an archive (or, with `recursive`, as a parent of
    /// archives). The path is stored relative to the data directory when it
    /// lives inside it.
    pub async fn register(&self, folder: &Path, recursive: bool) -> TubeResult<ArchiveLocation> {
        let abspath = fs::canonicalize(folder)
            .map_err(|_| TubeError::malformed(folder, "directory does not exist"))?;
        if !abspath.is_dir() {
            return Err(TubeError::malformed(folder, "not a directory"));
        }
        if !recursive && !is_archive(&abspath) {
            return Err(TubeError::malformed(
                folder,
                format!("{ARCHIVE_DB_NAME} not found"),
            ));
        }

        let location = ArchiveLocation {
            relpath: self.relative_path(&abspath),
            abspath: abspath.to_string_lossy().into_owned(),
            recursive,
        };
        self.store.record_archive(&location).await?;
        info!(path = %location.relpath, recursive, "registered archive location");
        Ok(location)
    }

    /// Imports every archive reachable from the registered locations. A broken
    /// archive is reported in the summary and leaves its previous import alone.
    pub async fn reindex(&self, now: i64) -> Result<ReindexSummary> {
        let mut summary = ReindexSummary::default();
        for location in self.store.list_archives().await? {
            let root = self.location_path(&location);
            let archives = discover(&root, location.recursive);
            if archives.is_empty() {
                warn!(path = %root.display(), "no archives found at registered location");
                summary.failures.push(TubeError::malformed(
                    &root,
                    format!("no {ARCHIVE_DB_NAME} found"),
                ));
                continue;
            }

            for dir in archives {
                summary.archives += 1;
                match self.import_archive(&dir).await {
                    Ok(videos) => {
                        info!(path = %dir.display(), videos, "indexed archive");
                        summary.channels += 1;
                    }
                    Err(err) => {
                        warn!(error = %err, "skipping archive");
                        summary.failures.push(err);
                    }
                }
            }
        }
        let info = self.store.refresh_info(now).await?;
        summary.videos = usize::try_from(info.videos).unwrap_or_default();
        Ok(summary)
    }

    async fn import_archive(&self, dir: &Path) -> TubeResult<usize> {
        let snapshot = read_archive(dir)
            .await
            .map_err(|err| TubeError::malformed(dir, format!("{err:#}")))?;
        let (channel, videos) = self
            .materialize(dir, snapshot)
            .map_err(|err| TubeError::malformed(dir, format!("{err:#}")))?;
        self.store.import_channel(&channel, &videos).await?;
        Ok(videos.len())
    }

    /// Turns raw archive rows into store records, exporting blobs and tracks.
    fn materialize(
        &self,
        dir: &Path,
        snapshot: ArchiveSnapshot,
    ) -> Result<(ChannelRecord, Vec<VideoRecord>)> {
        let ArchiveSnapshot { channel, videos } = snapshot;
        let lastupdate = fs::metadata(dir.join(ARCHIVE_DB_NAME))
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or_default();

        let profile_path = channel
            .profile
            .as_deref()
            .map(|bytes| self.export_image(bytes, channel.profileformat.as_deref()))
            .transpose()?;
        let banner_path = channel
            .banner
            .as_deref()
            .map(|bytes| self.export_image(bytes, channel.bannerformat.as_deref()))
            .transpose()?;

        let record = ChannelRecord {
            id: 0,
            relpath: self.relative_path(dir),
            abspath: dir.to_string_lossy().into_owned(),
            name: channel.name,
            url: channel.url,
            language: channel.language,
            description: channel.description,
            location: channel.location,
            joined: channel.joined,
            links: channel.links,
            profile_path,
            banner_path,
            videos: videos.len() as i64,
            lastupdate,
        };

        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(videos.len());
        for video in videos {
            if !seen.insert(video.youtube_id.clone()) {
                debug!(id = %video.youtube_id, "duplicate video id in archive");
                continue;
            }
            records.push(self.materialize_video(dir, video)?);
        }
        Ok((record, records))
    }

    fn materialize_video(&self, dir: &Path, video: ArchiveVideo) -> Result<VideoRecord> {
        let filepath = dir.join(&video.filename);
        if !filepath.is_file() {
            debug!(path = %filepath.display(), "video file listed but not present");
        }

        let thumb_path = match video.thumb.as_deref() {
            Some(bytes) => Some(self.export_image(bytes, video.thumbformat.as_deref())?),
            None => sidecar_image(&filepath),
        };
        let subtitles_path = match video.subtitles.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(text) => Some(self.write_track(
                &video.youtube_id,
                "subtitles",
                &normalize_webvtt(text),
            )?),
            None => sidecar_subtitles(&filepath),
        };
        let chapters_path = video
            .chapters
            .as_deref()
            .and_then(|text| chapters_to_webvtt(text, video.duration))
            .map(|vtt| self.write_track(&video.youtube_id, "chapters", &vtt))
            .transpose()?;

        Ok(VideoRecord {
            mimetype: mime_guess::from_path(&filepath)
                .first()
                .map(|mime| mime.to_string()),
            filepath: filepath.to_string_lossy().into_owned(),
            id: video.youtube_id,
            channel_id: 0,
            title: video.title,
            timestamp: video.timestamp,
            description: video.description.unwrap_or_default(),
            subtitles_path,
            chapters_path,
            thumb_path,
            duration: video.duration,
            tags: parse_tags(video.tags.as_deref()),
            language: video.language,
            width: video.width,
            height: video.height,
            resolution: video.resolution,
            viewcount: video.viewcount,
            likecount: video.likecount,
            dislikecount: video.dislikecount,
            statisticsupdated: video.statisticsupdated,
        })
    }

    /// Writes an embedded image under a content-derived name, once.
    fn export_image(&self, bytes: &[u8], declared: Option<&str>) -> Result<String> {
        fs::create_dir_all(&self.images_dir)
            .with_context(|| format!("creating {}", self.images_dir.display()))?;
        let hash = blake3::hash(bytes).to_hex();
        let path = self
            .images_dir
            .join(format!("{}.{}", &hash[..16], image_extension(bytes, declared)));
        if !path.exists() {
            fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
        }
        Ok(path.to_string_lossy().into_owned())
    }

    fn write_track(&self, video_id: &str, kind: &str, contents: &str) -> Result<String> {
        fs::create_dir_all(&self.tracks_dir)
            .with_context(|| format!("creating {}", self.tracks_dir.display()))?;
        let path = self
            .tracks_dir
            .join(format!("{}.{kind}.vtt", safe_file_stem(video_id)));
        fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
        Ok(path.to_string_lossy().into_owned())
    }

    fn relative_path(&self, path: &Path) -> String {
        match path.strip_prefix(&self.data_dir) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().into_owned(),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }

    fn location_path(&self, location: &ArchiveLocation) -> PathBuf {
        let rel = Path::new(&location.relpath);
        if rel.is_absolute() {
            rel.to_path_buf()
        } else {
            self.data_dir.join(rel)
        }
    }
}

struct ArchiveSnapshot {
    channel: ArchiveChannel,
    videos: Vec<ArchiveVideo>,
}

struct ArchiveChannel {
    name: String,
    url: Option<String>,
    language: Option<String>,
    description: Option<String>,
    location: Option<String>,
    joined: Option<String>,
    links: Option<String>,
    profile: Option<Vec<u8>>,
    profileformat: Option<String>,
    banner: Option<Vec<u8>>,
    bannerformat: Option<String>,
}

struct ArchiveVideo {
    youtube_id: String,
    title: String,
    timestamp: i64,
    description: Option<String>,
    subtitles: Option<String>,
    filename: String,
    thumb: Option<Vec<u8>>,
    thumbformat: Option<String>,
    duration: Option<i64>,
    tags: Option<String>,
    language: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
    resolution: Option<String>,
    viewcount: Option<i64>,
    likecount: Option<i64>,
    dislikecount: Option<i64>,
    statisticsupdated: Option<i64>,
    chapters: Option<String>,
}

async fn read_archive(dir: &Path) -> Result<ArchiveSnapshot> {
    let path = dir.join(ARCHIVE_DB_NAME);
    let db = Builder::new_local(&path)
        .build()
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let conn = db.connect()?;

    let mut rows = select_tolerant(
        &conn,
        "channel",
        &CHANNEL_FIELDS,
        &CHANNEL_REQUIRED,
        "ORDER BY rowid DESC LIMIT 1",
    )
    .await?;
    let row = rows.next().await?.context("channel table is empty")?;
    let channel = row_to_archive_channel(&row)?;

    let mut rows = select_tolerant(&conn, "videos", &VIDEO_FIELDS, &VIDEO_REQUIRED, "").await?;
    let mut videos = Vec::new();
    while let Some(row) = rows.next().await? {
        videos.push(row_to_archive_video(&row)?);
    }
    Ok(ArchiveSnapshot { channel, videos })
}

/// Selects `fields` from `table`, substituting NULL for optional columns the
/// archive predates.
async fn select_tolerant(
    conn: &Connection,
    table: &str,
    fields: &[&str],
    required: &[&str],
    suffix: &str,
) -> Result<libsql::Rows> {
    let mut rows = conn
        .query(&format!("PRAGMA table_info({table})"), params![])
        .await?;
    let mut present = HashSet::new();
    while let Some(row) = rows.next().await? {
        let name: String = row.get(1)?;
        present.insert(name.to_ascii_lowercase());
    }
    if present.is_empty() {
        bail!("table `{table}` is missing");
    }
    for column in required {
        if !present.contains(&column.to_ascii_lowercase()) {
            bail!("table `{table}` has no `{column}` column");
        }
    }

    let select = fields
        .iter()
        .map(|field| {
            if present.contains(&field.to_ascii_lowercase()) {
                (*field).to_string()
            } else {
                format!("NULL AS {field}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    Ok(conn
        .query(&format!("SELECT {select} FROM {table} {suffix}"), params![])
        .await?)
}

fn row_to_archive_channel(row: &Row) -> Result<ArchiveChannel> {
    Ok(ArchiveChannel {
        name: value_text(row.get_value(0)?).context("channel has no name")?,
        url: value_text(row.get_value(1)?),
        language: value_text(row.get_value(2)?),
        description: value_text(row.get_value(3)?),
        location: value_text(row.get_value(4)?),
        joined: value_text(row.get_value(5)?),
        links: value_text(row.get_value(6)?),
        profile: value_blob(row.get_value(7)?),
        profileformat: value_text(row.get_value(8)?),
        banner: value_blob(row.get_value(9)?),
        bannerformat: value_text(row.get_value(10)?),
    })
}

fn row_to_archive_video(row: &Row) -> Result<ArchiveVideo> {
    let youtube_id = value_text(row.get_value(0)?).context("video without youtubeID")?;
    Ok(ArchiveVideo {
        title: value_text(row.get_value(1)?).unwrap_or_else(|| youtube_id.clone()),
        timestamp: value_int(row.get_value(2)?).unwrap_or_default(),
        description: value_text(row.get_value(3)?),
        subtitles: value_text(row.get_value(4)?),
        filename: value_text(row.get_value(5)?)
            .with_context(|| format!("video {youtube_id} has no filename"))?,
        thumb: value_blob(row.get_value(6)?),
        thumbformat: value_text(row.get_value(7)?),
        duration: value_int(row.get_value(8)?),
        tags: value_text(row.get_value(9)?),
        language: value_text(row.get_value(10)?),
        width: value_int(row.get_value(11)?),
        height: value_int(row.get_value(12)?),
        resolution: value_text(row.get_value(13)?),
        viewcount: value_int(row.get_value(14)?),
        likecount: value_int(row.get_value(15)?),
        dislikecount: value_int(row.get_value(16)?),
        statisticsupdated: value_int(row.get_value(17)?),
        chapters: value_text(row.get_value(18)?),
        youtube_id,
    })
}

fn value_text(value: Value) -> Option<String> {
    let text = match value {
        Value::Text(text) => text,
        Value::Integer(number) => number.to_string(),
        Value::Real(number) => number.to_string(),
        Value::Blob(bytes) => String::from_utf8(bytes).ok()?,
        Value::Null => return None,
    };
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn value_int(value: Value) -> Option<i64> {
    match value {
        Value::Integer(number) => Some(number),
        Value::Real(number) => Some(number as i64),
        Value::Text(text) => {
            let text = text.trim();
            text.parse::<i64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().map(|number| number as i64))
        }
        _ => None,
    }
}

fn value_blob(value: Value) -> Option<Vec<u8>> {
    match value {
        Value::Blob(bytes) if !bytes.is_empty() => Some(bytes),
        _ => None,
    }
}

/// Tags are stored either as a JSON array or as a comma separated list.
fn parse_tags(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Vec::new();
    };
    if raw.starts_with('[')
        && let Ok(tags) = serde_json::from_str::<Vec<String>>(raw)
    {
        return tags;
    }
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn image_extension(bytes: &[u8], declared: Option<&str>) -> &'static str {
    if let Ok(format) = image::guess_format(bytes)
        && let Some(ext) = format.extensions_str().first().copied()
    {
        return ext;
    }
    declared
        .and_then(mime_guess::get_mime_extensions_str)
        .and_then(|exts| exts.first().copied())
        .unwrap_or("img")
}

fn safe_file_stem(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn sidecar_image(video: &Path) -> Option<String> {
    SIDECAR_IMAGE_EXTENSIONS
        .iter()
        .map(|ext| video.with_extension(ext))
        .find(|path| path.is_file())
        .map(|path| path.to_string_lossy().into_owned())
}

/// `<stem>.vtt` first, then any `<stem>.<lang>.vtt`.
fn sidecar_subtitles(video: &Path) -> Option<String> {
    let exact = video.with_extension("vtt");
    if exact.is_file() {
        return Some(exact.to_string_lossy().into_owned());
    }
    let parent = video.parent()?;
    let stem = video.file_stem()?.to_str()?;
    let prefix = format!("{stem}.");
    let mut candidates: Vec<PathBuf> = fs::read_dir(parent)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().and_then(|ext| ext.to_str()) == Some("vtt")
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(&prefix))
        })
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .map(|path| path.to_string_lossy().into_owned())
}

/// Archives store subtitles either as WebVTT or as SRT text.
pub fn normalize_webvtt(text: &str) -> String {
    let trimmed = text.trim_start_matches('\u{feff}');
    if trimmed.starts_with("WEBVTT") {
        return trimmed.to_string();
    }
    let mut out = String::from("WEBVTT\n\n");
    for line in trimmed.lines() {
        if line.contains("-->") {
            out.push_str(&line.replace(',', "."));
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

/// Converts archive chapter text (one `[HH:]MM:SS[.mmm] Title` per line) into a
/// WebVTT chapters track. Each chapter ends where the next one starts; the last
/// one ends with the video. Returns `None` if no line could be parsed.
pub fn chapters_to_webvtt(text: &str, duration: Option<i64>) -> Option<String> {
    let mut chapters: Vec<(u64, String)> = text
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (stamp, title) = line.split_once(char::is_whitespace)?;
            let start = parse_chapter_time(stamp.trim_end_matches(['-', ':']))?;
            let title = title.trim().trim_start_matches(['-', ' ']).trim();
            Some((start, title.to_string()))
        })
        .collect();
    if chapters.is_empty() {
        return None;
    }
    chapters.sort_by_key(|(start, _)| *start);

    let video_end = duration
        .filter(|secs| *secs > 0)
        .map(|secs| (secs as u64).saturating_mul(1000));
    let mut out = String::from("WEBVTT\n");
    for (index, (start, title)) in chapters.iter().enumerate() {
        let end = chapters
            .get(index + 1)
            .map(|(next, _)| *next)
            .or(video_end)
            .filter(|end| end > start)
            .unwrap_or(start.saturating_add(1000));
        out.push_str(&format!(
            "\n{}\n{} --> {}\n{}\n",
            index + 1,
            format_vtt_time(*start),
            format_vtt_time(end),
            title
        ));
    }
    Some(out)
}

fn parse_chapter_time(stamp: &str) -> Option<u64> {
    let (clock, millis) = match stamp.split_once('.') {
        Some((clock, fraction)) => {
            let digits = fraction.get(..fraction.len().min(3))?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let scale = 10u64.pow(3 - digits.len() as u32);
            (clock, digits.parse::<u64>().ok()? * scale)
        }
        None => (stamp, 0),
    };
    let parts: Vec<u64> = clock
        .split(':')
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<_>>()?;
    let seconds = match parts.as_slice() {
        [m, s] => m.checked_mul(60)?.checked_add(*s)?,
        [h, m, s] => h
            .checked_mul(3600)?
            .checked_add(m.checked_mul(60)?)?
            .checked_add(*s)?,
        _ => return None,
    };
    seconds.checked_mul(1000)?.checked_add(millis)
}

fn format_vtt_time(millis: u64) -> String {
    let hours = millis / 3_600_000;
    let minutes = (millis / 60_000) % 60;
    let seconds = (millis / 1000) % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{:03}", millis % 1000)
}
