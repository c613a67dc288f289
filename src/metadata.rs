//! Metadata persistence layer for archivetube.
//!
//! `tube.db` is written by the registry (and the statistics run) through
//! [`MetadataStore`] and read on every page render through the cloneable
//! [`MetadataReader`].

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use libsql::{Builder, Connection, Row, params};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::statistics::{ArchiveStatistics, StatsBucket, WeeklyStats};

pub const SCHEMA_VERSION: i64 = 1;

/// A channel imported from one archive directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelRecord {
    pub id: i64,
    pub relpath: String,
    pub abspath: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joined: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner_path: Option<String>,
    pub videos: i64,
    pub lastupdate: i64,
}

/// Rows stored in the `videos` table. File paths are absolute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoRecord {
    pub id: String,
    pub channel_id: i64,
    pub title: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub filepath: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitles_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapters_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewcount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likecount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dislikecount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statisticsupdated: Option<i64>,
}

/// A registered archive: either one archive directory or a parent that is
/// searched recursively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveLocation {
    pub relpath: String,
    pub abspath: String,
    pub recursive: bool,
}

/// The single row of the `info` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreInfo {
    pub lastupdate: Option<i64>,
    pub channels: i64,
    pub videos: i64,
    pub dbversion: i64,
    pub statisticsupdated: Option<i64>,
}

const CHANNEL_COLUMNS: &str = "id, relpath, abspath, name, url, language, description, location, \
     joined, links, profile_path, banner_path, videos, lastupdate";

const VIDEO_COLUMNS: &str = "id, channel_id, title, timestamp, description, filepath, mimetype, \
     subtitles_path, chapters_path, thumb_path, duration, tags_json, language, width, height, \
     resolution, viewcount, likecount, dislikecount, statisticsupdated";

const BUCKET_COLUMNS: &str = "videos, res_8k, res_4k, res_fullhd, res_hd, res_sd, res_ld, \
     res_unknown, subtitles, chapters, duration";

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS info (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            lastupdate INTEGER,
            channels INTEGER NOT NULL DEFAULT 0,
            videos INTEGER NOT NULL DEFAULT 0,
            dbversion INTEGER NOT NULL,
            statisticsupdated INTEGER
        );

        CREATE TABLE IF NOT EXISTS archives (
            relpath TEXT PRIMARY KEY,
            abspath TEXT NOT NULL,
            recursive INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS channels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            relpath TEXT NOT NULL UNIQUE,
            abspath TEXT NOT NULL,
            name TEXT NOT NULL,
            url TEXT,
            language TEXT,
            description TEXT,
            location TEXT,
            joined TEXT,
            links TEXT,
            profile_path TEXT,
            banner_path TEXT,
            videos INTEGER NOT NULL DEFAULT 0,
            lastupdate INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS videos (
            id TEXT PRIMARY KEY,
            channel_id INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            timestamp INTEGER NOT NULL DEFAULT 0,
            description TEXT NOT NULL DEFAULT '',
            filepath TEXT NOT NULL,
            mimetype TEXT,
            subtitles_path TEXT,
            chapters_path TEXT,
            thumb_path TEXT,
            duration INTEGER,
            tags_json TEXT NOT NULL DEFAULT '[]',
            language TEXT,
            width INTEGER,
            height INTEGER,
            resolution TEXT,
            viewcount INTEGER,
            likecount INTEGER,
            dislikecount INTEGER,
            statisticsupdated INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_videos_channel_time ON videos(channel_id, timestamp, id);
        CREATE INDEX IF NOT EXISTS idx_videos_time ON videos(timestamp);

        CREATE TABLE IF NOT EXISTS stats_overall (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            videos INTEGER NOT NULL,
            res_8k INTEGER NOT NULL,
            res_4k INTEGER NOT NULL,
            res_fullhd INTEGER NOT NULL,
            res_hd INTEGER NOT NULL,
            res_sd INTEGER NOT NULL,
            res_ld INTEGER NOT NULL,
            res_unknown INTEGER NOT NULL,
            subtitles INTEGER NOT NULL,
            chapters INTEGER NOT NULL,
            duration INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stats_weekly (
            year INTEGER NOT NULL,
            week INTEGER NOT NULL,
            monday TEXT NOT NULL,
            sunday TEXT NOT NULL,
            videos INTEGER NOT NULL,
            res_8k INTEGER NOT NULL,
            res_4k INTEGER NOT NULL,
            res_fullhd INTEGER NOT NULL,
            res_hd INTEGER NOT NULL,
            res_sd INTEGER NOT NULL,
            res_ld INTEGER NOT NULL,
            res_unknown INTEGER NOT NULL,
            subtitles INTEGER NOT NULL,
            chapters INTEGER NOT NULL,
            duration INTEGER NOT NULL,
            PRIMARY KEY (year, week)
        );
        "#,
    )
    .await?;

    conn.execute(
        "INSERT OR IGNORE INTO info (id, dbversion, channels, videos) VALUES (1, ?1, 0, 0)",
        params![SCHEMA_VERSION],
    )
    .await?;

    Ok(())
}

/// Writable handle used by the registry and the statistics run.
#[derive(Debug)]
pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    /// Opens (and if necessary creates) `tube.db` and ensures the schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating metadata directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening metadata DB {}", path.display()))?;

        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    /// Reader sharing this store's connection.
    pub fn reader(&self) -> MetadataReader {
        MetadataReader {
            conn: self.conn.clone(),
        }
    }

    /// Adds an archive location, or updates the recursive flag if it is
    /// already registered.
    pub async fn record_archive(&self, location: &ArchiveLocation) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO archives (relpath, abspath, recursive)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(relpath) DO UPDATE SET
                    abspath = excluded.abspath,
                    recursive = excluded.recursive
                "#,
                params![
                    location.relpath.as_str(),
                    location.abspath.as_str(),
                    location.recursive as i64,
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn list_archives(&self) -> Result<Vec<ArchiveLocation>> {
        fetch_archives(&self.conn).await
    }

    /// Imports one archive atomically: the channel row is upserted by its
    /// relative path and its video set is replaced. Returns the channel id.
    pub async fn import_channel(
        &self,
        channel: &ChannelRecord,
        videos: &[VideoRecord],
    ) -> Result<i64> {
        let tx = self.conn.transaction().await?;

        let mut rows = tx
            .query(
                r#"
                INSERT INTO channels (
                    relpath, abspath, name, url, language, description, location,
                    joined, links, profile_path, banner_path, videos, lastupdate
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(relpath) DO UPDATE SET
                    abspath = excluded.abspath,
                    name = excluded.name,
                    url = excluded.url,
                    language = excluded.language,
                    description = excluded.description,
                    location = excluded.location,
                    joined = excluded.joined,
                    links = excluded.links,
                    profile_path = excluded.profile_path,
                    banner_path = excluded.banner_path,
                    videos = excluded.videos,
                    lastupdate = excluded.lastupdate
                RETURNING id
                "#,
                params![
                    channel.relpath.as_str(),
                    channel.abspath.as_str(),
                    channel.name.as_str(),
                    channel.url.as_deref(),
                    channel.language.as_deref(),
                    channel.description.as_deref(),
                    channel.location.as_deref(),
                    channel.joined.as_deref(),
                    channel.links.as_deref(),
                    channel.profile_path.as_deref(),
                    channel.banner_path.as_deref(),
                    videos.len() as i64,
                    channel.lastupdate,
                ],
            )
            .await?;
        let channel_id: i64 = rows
            .next()
            .await?
            .context("channel upsert returned no id")?
            .get(0)?;
        drop(rows);

        tx.execute(
            "DELETE FROM videos WHERE channel_id = ?1",
            params![channel_id],
        )
        .await?;

        for video in videos {
            let mut owner = tx
                .query(
                    "SELECT channel_id FROM videos WHERE id = ?1",
                    params![video.id.as_str()],
                )
                .await?;
            if let Some(row) = owner.next().await? {
                let previous: i64 = row.get(0)?;
                warn!(
                    video = %video.id,
                    from = previous,
                    to = channel_id,
                    "video already indexed under another channel, moving it"
                );
            }
            drop(owner);

            let tags_json = serde_json::to_string(&video.tags).context("serializing tags")?;
            tx.execute(
                r#"
                INSERT INTO videos (
                    id, channel_id, title, timestamp, description, filepath, mimetype,
                    subtitles_path, chapters_path, thumb_path, duration, tags_json,
                    language, width, height, resolution, viewcount, likecount,
                    dislikecount, statisticsupdated
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                    ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20
                )
                ON CONFLICT(id) DO UPDATE SET
                    channel_id = excluded.channel_id,
                    title = excluded.title,
                    timestamp = excluded.timestamp,
                    description = excluded.description,
                    filepath = excluded.filepath,
                    mimetype = excluded.mimetype,
                    subtitles_path = excluded.subtitles_path,
                    chapters_path = excluded.chapters_path,
                    thumb_path = excluded.thumb_path,
                    duration = excluded.duration,
                    tags_json = excluded.tags_json,
                    language = excluded.language,
                    width = excluded.width,
                    height = excluded.height,
                    resolution = excluded.resolution,
                    viewcount = excluded.viewcount,
                    likecount = excluded.likecount,
                    dislikecount = excluded.dislikecount,
                    statisticsupdated = excluded.statisticsupdated
                "#,
                params![
                    video.id.as_str(),
                    channel_id,
                    video.title.as_str(),
                    video.timestamp,
                    video.description.as_str(),
                    video.filepath.as_str(),
                    video.mimetype.as_deref(),
                    video.subtitles_path.as_deref(),
                    video.chapters_path.as_deref(),
                    video.thumb_path.as_deref(),
                    video.duration,
                    tags_json,
                    video.language.as_deref(),
                    video.width,
                    video.height,
                    video.resolution.as_deref(),
                    video.viewcount,
                    video.likecount,
                    video.dislikecount,
                    video.statisticsupdated,
                ],
            )
            .await?;
        }

        // Moved videos leave stale counts on their previous channel.
        tx.execute(
            "UPDATE channels SET videos = \
             (SELECT COUNT(*) FROM videos WHERE videos.channel_id = channels.id)",
            params![],
        )
        .await?;

        tx.commit().await?;
        Ok(channel_id)
    }

    /// Recomputes the counters in `info` and stamps the update time.
    pub async fn refresh_info(&self, now: i64) -> Result<StoreInfo> {
        self.conn
            .execute(
                r#"
                UPDATE info SET
                    lastupdate = ?1,
                    channels = (SELECT COUNT(*) FROM channels),
                    videos = (SELECT COUNT(*) FROM videos)
                WHERE id = 1
                "#,
                params![now],
            )
            .await?;
        fetch_info(&self.conn).await
    }

    /// Replaces every stored statistic in one transaction.
    pub async fn replace_statistics(&self, stats: &ArchiveStatistics, now: i64) -> Result<()> {
        let tx = self.conn.transaction().await?;
        tx.execute("DELETE FROM stats_weekly", params![]).await?;
        tx.execute("DELETE FROM stats_overall", params![]).await?;

        let o = &stats.overall;
        tx.execute(
            &format!(
                "INSERT INTO stats_overall (id, {BUCKET_COLUMNS}) \
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                o.videos,
                o.res_8k,
                o.res_4k,
                o.res_fullhd,
                o.res_hd,
                o.res_sd,
                o.res_ld,
                o.res_unknown,
                o.subtitles,
                o.chapters,
                o.duration,
            ],
        )
        .await?;

        for week in &stats.weekly {
            let b = &week.bucket;
            tx.execute(
                &format!(
                    "INSERT INTO stats_weekly (year, week, monday, sunday, {BUCKET_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
                ),
                params![
                    week.year as i64,
                    week.week as i64,
                    week.monday.to_string(),
                    week.sunday.to_string(),
                    b.videos,
                    b.res_8k,
                    b.res_4k,
                    b.res_fullhd,
                    b.res_hd,
                    b.res_sd,
                    b.res_ld,
                    b.res_unknown,
                    b.subtitles,
                    b.chapters,
                    b.duration,
                ],
            )
            .await?;
        }

        tx.execute(
            "UPDATE info SET statisticsupdated = ?1 WHERE id = 1",
            params![now],
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Cloneable read-only view over `tube.db`, shared by every request.
#[derive(Clone)]
pub struct MetadataReader {
    conn: Connection,
}

impl MetadataReader {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let db = Builder::new_local(path.as_ref())
            .build()
            .await
            .with_context(|| format!("opening metadata DB {}", path.as_ref().display()))?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    pub async fn info(&self) -> Result<StoreInfo> {
        fetch_info(&self.conn).await
    }

    pub async fn list_archives(&self) -> Result<Vec<ArchiveLocation>> {
        fetch_archives(&self.conn).await
    }

    pub async fn get_channel(&self, channel_id: i64) -> Result<Option<ChannelRecord>> {
        let stmt = self
            .conn
            .prepare(&format!(
                "SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1"
            ))
            .await?;
        let mut rows = stmt.query([channel_id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_channel(&row)?)),
            None => Ok(None),
        }
    }

    /// All channels, alphabetically.
    pub async fn list_channels(&self) -> Result<Vec<ChannelRecord>> {
        let stmt = self
            .conn
            .prepare(&format!(
                "SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY name COLLATE NOCASE, id"
            ))
            .await?;
        let mut rows = stmt.query(params![]).await?;
        let mut channels = Vec::new();
        while let Some(row) = rows.next().await? {
            channels.push(row_to_channel(&row)?);
        }
        Ok(channels)
    }

    pub async fn get_video(&self, videoid: &str) -> Result<Option<VideoRecord>> {
        self.fetch_one(
            &format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?1"),
            params![videoid],
        )
        .await
    }

    /// One page of a channel's videos, newest first.
    pub async fn list_channel_videos(
        &self,
        channel_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<VideoRecord>> {
        self.fetch_many(
            &format!(
                "SELECT {VIDEO_COLUMNS} FROM videos WHERE channel_id = ?1 \
                 ORDER BY timestamp DESC, id DESC LIMIT ?2 OFFSET ?3"
            ),
            params![channel_id, limit, offset],
        )
        .await
    }

    pub async fn count_channel_videos(&self, channel_id: i64) -> Result<i64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM videos WHERE channel_id = ?1",
                params![channel_id],
            )
            .await?;
        let row = rows.next().await?.context("missing count row")?;
        Ok(row.get(0)?)
    }

    /// Most recently published videos across every channel.
    pub async fn list_recent_videos(&self, limit: i64) -> Result<Vec<VideoRecord>> {
        self.fetch_many(
            &format!(
                "SELECT {VIDEO_COLUMNS} FROM videos ORDER BY timestamp DESC, id DESC LIMIT ?1"
            ),
            params![limit],
        )
        .await
    }

    pub async fn list_all_videos(&self) -> Result<Vec<VideoRecord>> {
        self.fetch_many(
            &format!("SELECT {VIDEO_COLUMNS} FROM videos ORDER BY timestamp, id"),
            params![],
        )
        .await
    }

    /// The video published right after `video` in the same channel.
    pub async fn next_video(&self, video: &VideoRecord) -> Result<Option<VideoRecord>> {
        self.fetch_one(
            &format!(
                "SELECT {VIDEO_COLUMNS} FROM videos WHERE channel_id = ?1 \
                 AND (timestamp > ?2 OR (timestamp = ?2 AND id > ?3)) \
                 ORDER BY timestamp ASC, id ASC LIMIT 1"
            ),
            params![video.channel_id, video.timestamp, video.id.as_str()],
        )
        .await
    }

    /// The video published right before `video` in the same channel.
    pub async fn previous_video(&self, video: &VideoRecord) -> Result<Option<VideoRecord>> {
        self.fetch_one(
            &format!(
                "SELECT {VIDEO_COLUMNS} FROM videos WHERE channel_id = ?1 \
                 AND (timestamp < ?2 OR (timestamp = ?2 AND id < ?3)) \
                 ORDER BY timestamp DESC, id DESC LIMIT 1"
            ),
            params![video.channel_id, video.timestamp, video.id.as_str()],
        )
        .await
    }

    /// Most recently published video of a channel.
    pub async fn latest_video(&self, channel_id: i64) -> Result<Option<VideoRecord>> {
        self.fetch_one(
            &format!(
                "SELECT {VIDEO_COLUMNS} FROM videos WHERE channel_id = ?1 \
                 ORDER BY timestamp DESC, id DESC LIMIT 1"
            ),
            params![channel_id],
        )
        .await
    }

    /// Stored statistics, or `None` if they were never calculated.
    pub async fn load_statistics(&self) -> Result<Option<ArchiveStatistics>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {BUCKET_COLUMNS} FROM stats_overall WHERE id = 1"),
                params![],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let overall = row_to_bucket(&row, 0)?;

        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT year, week, monday, sunday, {BUCKET_COLUMNS} FROM stats_weekly \
                     ORDER BY year DESC, week DESC"
                ),
                params![],
            )
            .await?;
        let mut weekly = Vec::new();
        while let Some(row) = rows.next().await? {
            let monday: String = row.get(2)?;
            let sunday: String = row.get(3)?;
            weekly.push(WeeklyStats {
                year: row.get::<i64>(0)? as i32,
                week: row.get::<i64>(1)? as u32,
                monday: monday
                    .parse::<NaiveDate>()
                    .context("parsing stored week start")?,
                sunday: sunday
                    .parse::<NaiveDate>()
                    .context("parsing stored week end")?,
                bucket: row_to_bucket(&row, 4)?,
            });
        }
        Ok(Some(ArchiveStatistics { overall, weekly }))
    }

    async fn fetch_one(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Option<VideoRecord>> {
        let mut rows = self.conn.query(sql, params).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_video(&row)?)),
            None => Ok(None),
        }
    }

    async fn fetch_many(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<VideoRecord>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut videos = Vec::new();
        while let Some(row) = rows.next().await? {
            videos.push(row_to_video(&row)?);
        }
        Ok(videos)
    }
}

async fn fetch_info(conn: &Connection) -> Result<StoreInfo> {
    let mut rows = conn
        .query(
            "SELECT lastupdate, channels, videos, dbversion, statisticsupdated FROM info WHERE id = 1",
            params![],
        )
        .await?;
    let row = rows.next().await?.context("missing info row")?;
    Ok(StoreInfo {
        lastupdate: row.get(0)?,
        channels: row.get(1)?,
        videos: row.get(2)?,
        dbversion: row.get(3)?,
        statisticsupdated: row.get(4)?,
    })
}

async fn fetch_archives(conn: &Connection) -> Result<Vec<ArchiveLocation>> {
    let mut rows = conn
        .query(
            "SELECT relpath, abspath, recursive FROM archives ORDER BY relpath",
            params![],
        )
        .await?;
    let mut archives = Vec::new();
    while let Some(row) = rows.next().await? {
        archives.push(ArchiveLocation {
            relpath: row.get(0)?,
            abspath: row.get(1)?,
            recursive: row.get::<i64>(2)? != 0,
        });
    }
    Ok(archives)
}

fn row_to_channel(row: &Row) -> Result<ChannelRecord> {
    Ok(ChannelRecord {
        id: row.get(0)?,
        relpath: row.get(1)?,
        abspath: row.get(2)?,
        name: row.get(3)?,
        url: row.get(4)?,
        language: row.get(5)?,
        description: row.get(6)?,
        location: row.get(7)?,
        joined: row.get(8)?,
        links: row.get(9)?,
        profile_path: row.get(10)?,
        banner_path: row.get(11)?,
        videos: row.get(12)?,
        lastupdate: row.get(13)?,
    })
}

/// Column order must match `VIDEO_COLUMNS`.
fn row_to_video(row: &Row) -> Result<VideoRecord> {
    let tags_json: String = row.get(11)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).context("parsing stored tags JSON")?;
    Ok(VideoRecord {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        title: row.get(2)?,
        timestamp: row.get(3)?,
        description: row.get(4)?,
        filepath: row.get(5)?,
        mimetype: row.get(6)?,
        subtitles_path: row.get(7)?,
        chapters_path: row.get(8)?,
        thumb_path: row.get(9)?,
        duration: row.get(10)?,
        tags,
        language: row.get(12)?,
        width: row.get(13)?,
        height: row.get(14)?,
        resolution: row.get(15)?,
        viewcount: row.get(16)?,
        likecount: row.get(17)?,
        dislikecount: row.get(18)?,
        statisticsupdated: row.get(19)?,
    })
}

fn row_to_bucket(row: &Row, offset: i32) -> Result<StatsBucket> {
    Ok(StatsBucket {
        videos: row.get(offset)?,
        res_8k: row.get(offset + 1)?,
        res_4k: row.get(offset + 2)?,
        res_fullhd: row.get(offset + 3)?,
        res_hd: row.get(offset + 4)?,
        res_sd: row.get(offset + 5)?,
        res_ld: row.get(offset + 6)?,
        res_unknown: row.get(offset + 7)?,
        subtitles: row.get(offset + 8)?,
        chapters: row.get(offset + 9)?,
        duration: row.get(offset + 10)?,
    })
}
