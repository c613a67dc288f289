//! Typed view-models for every HTML page, assembled from the metadata reader.
//!
//! Assembly functions take `now` explicitly so relative ages are testable.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::{TubeError, TubeResult},
    humanize::{format_date, format_duration, group_digits, pluralize, relative_age_from_unix},
    media::{MediaAvailability, MediaResolver},
    metadata::{ChannelRecord, MetadataReader, VideoRecord},
    statistics::{StatsBucket, WeeklyStats},
};

/// Number of videos shown on a channel's home tab.
const CHANNEL_HOME_VIDEOS: i64 = 12;

const CARD_THUMB_QUERY: &str = "w=320&rh=0.5625&c=cc";
const PLAYER_THUMB_QUERY: &str = "w=1280&rh=0.5625&c=letterbox";
const PROFILE_QUERY: &str = "w=88&h=88&c=cc";
const BANNER_QUERY: &str = "w=1920&rh=0.1667&c=cc";

pub fn watch_url(videoid: &str) -> String {
    format!("/watch?v={videoid}")
}

pub fn channel_url(channel_id: i64) -> String {
    format!("/channel/{channel_id}")
}

/// A video in a listing.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VideoCard {
    pub id: String,
    pub title: String,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub duration: Option<String>,
    pub age: String,
    pub date: String,
    pub views: Option<String>,
    pub channel_name: Option<String>,
    pub channel_url: String,
}

impl VideoCard {
    pub fn new(video: &VideoRecord, channel_name: Option<&str>, now: DateTime<Utc>) -> Self {
        Self {
            id: video.id.clone(),
            title: video.title.clone(),
            url: watch_url(&video.id),
            thumbnail_url: video
                .thumb_path
                .as_ref()
                .map(|_| format!("/res/thumb/{}?{CARD_THUMB_QUERY}", video.id)),
            duration: video.duration.map(format_duration),
            age: relative_age_from_unix(video.timestamp, now),
            date: format_date(video.timestamp),
            views: video.viewcount.map(|views| pluralize(views, "view", "views")),
            channel_name: channel_name.map(str::to_string),
            channel_url: channel_url(video.channel_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChannelSummary {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub profile_url: Option<String>,
    pub banner_url: Option<String>,
    pub video_count: i64,
    pub videos: String,
    pub updated: String,
}

impl ChannelSummary {
    pub fn new(channel: &ChannelRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: channel.id,
            name: channel.name.clone(),
            url: channel_url(channel.id),
            profile_url: channel
                .profile_path
                .as_ref()
                .map(|_| format!("/res/profile/{}?{PROFILE_QUERY}", channel.id)),
            banner_url: channel
                .banner_path
                .as_ref()
                .map(|_| format!("/res/banner/{}?{BANNER_QUERY}", channel.id)),
            video_count: channel.videos,
            videos: pluralize(channel.videos, "video", "videos"),
            updated: relative_age_from_unix(channel.lastupdate, now),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HomePage {
    pub title: String,
    pub totals: String,
    pub updated: Option<String>,
    pub channels: Vec<ChannelSummary>,
    pub recent: Vec<VideoCard>,
}

pub async fn home_page(
    reader: &MetadataReader,
    recent_limit: i64,
    now: DateTime<Utc>,
) -> TubeResult<HomePage> {
    let info = reader.info().await?;
    let channels = reader.list_channels().await?;
    let names: HashMap<i64, &str> = channels
        .iter()
        .map(|channel| (channel.id, channel.name.as_str()))
        .collect();

    let recent = reader
        .list_recent_videos(recent_limit)
        .await?
        .iter()
        .map(|video| VideoCard::new(video, names.get(&video.channel_id).copied(), now))
        .collect();

    Ok(HomePage {
        title: "Archive".to_string(),
        totals: format!(
            "{}, {}",
            pluralize(info.channels, "channel", "channels"),
            pluralize(info.videos, "video", "videos")
        ),
        updated: info
            .lastupdate
            .map(|timestamp| relative_age_from_unix(timestamp, now)),
        channels: channels
            .iter()
            .map(|channel| ChannelSummary::new(channel, now))
            .collect(),
        recent,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelTab {
    Home,
    Videos,
    About,
}

impl ChannelTab {
    const ALL: [Self; 3] = [Self::Home, Self::Videos, Self::About];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "home" => Some(Self::Home),
            "videos" => Some(Self::Videos),
            "about" => Some(Self::About),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Videos => "videos",
            Self::About => "about",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Home => "Home",
            Self::Videos => "Videos",
            Self::About => "About",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TabLink {
    pub label: &'static str,
    pub url: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Pagination {
    pub page: u32,
    pub pages: u32,
    pub previous_url: Option<String>,
    pub next_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AboutField {
    pub label: &'static str,
    pub value: String,
    pub link: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChannelPage {
    pub title: String,
    pub channel: ChannelSummary,
    pub tab: ChannelTab,
    pub tabs: Vec<TabLink>,
    pub description: Option<String>,
    pub videos: Vec<VideoCard>,
    pub pagination: Option<Pagination>,
    pub about: Vec<AboutField>,
}

/// Builds one tab of a channel page. `page` is 1-based and only meaningful on
/// the videos tab; a page past the end is a 404.
pub async fn channel_page(
    reader: &MetadataReader,
    channel_id: i64,
    tab: ChannelTab,
    page: u32,
    page_size: u32,
    now: DateTime<Utc>,
) -> TubeResult<ChannelPage> {
    let channel = reader
        .get_channel(channel_id)
        .await?
        .ok_or_else(|| TubeError::not_found("channel", channel_id.to_string()))?;
    let base_url = channel_url(channel.id);
    let tabs = ChannelTab::ALL
        .iter()
        .map(|candidate| TabLink {
            label: candidate.label(),
            url: format!("{base_url}/{}", candidate.as_str()),
            active: *candidate == tab,
        })
        .collect();

    let mut view = ChannelPage {
        title: channel.name.clone(),
        channel: ChannelSummary::new(&channel, now),
        tab,
        tabs,
        description: None,
        videos: Vec::new(),
        pagination: None,
        about: Vec::new(),
    };

    match tab {
        ChannelTab::Home => {
            if page != 1 {
                return Err(TubeError::not_found("page", page.to_string()));
            }
            view.description = channel.description.clone().filter(|text| !text.trim().is_empty());
            view.videos = reader
                .list_channel_videos(channel.id, 0, CHANNEL_HOME_VIDEOS)
                .await?
                .iter()
                .map(|video| VideoCard::new(video, None, now))
                .collect();
        }
        ChannelTab::Videos => {
            let page_size = page_size.max(1);
            let total = reader.count_channel_videos(channel.id).await?;
            let pages = (total as u64).div_ceil(page_size as u64).max(1) as u32;
            if page == 0 {
                return Err(TubeError::InvalidRequest("pages start at 1".to_string()));
            }
            if page > pages {
                return Err(TubeError::not_found("page", page.to_string()));
            }
            let offset = (page as i64 - 1) * page_size as i64;
            view.videos = reader
                .list_channel_videos(channel.id, offset, page_size as i64)
                .await?
                .iter()
                .map(|video| VideoCard::new(video, None, now))
                .collect();
            let page_url = |n: u32| format!("{base_url}/videos/page/{n}");
            view.pagination = Some(Pagination {
                page,
                pages,
                previous_url: (page > 1).then(|| page_url(page - 1)),
                next_url: (page < pages).then(|| page_url(page + 1)),
            });
        }
        ChannelTab::About => {
            if page != 1 {
                return Err(TubeError::not_found("page", page.to_string()));
            }
            view.description = channel.description.clone().filter(|text| !text.trim().is_empty());
            view.about = about_fields(&channel);
        }
    }

    Ok(view)
}

fn about_fields(channel: &ChannelRecord) -> Vec<AboutField> {
    let fields: [(&'static str, &Option<String>, bool); 5] = [
        ("Channel URL", &channel.url, true),
        ("Location", &channel.location, false),
        ("Joined", &channel.joined, false),
        ("Links", &channel.links, false),
        ("Language", &channel.language, false),
    ];
    fields
        .into_iter()
        .filter_map(|(label, value, link)| {
            let value = value.as_deref()?.trim();
            (!value.is_empty()).then(|| AboutField {
                label,
                value: value.to_string(),
                link,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VideoDetails {
    pub id: String,
    pub title: String,
    pub description: String,
    pub date: String,
    pub age: String,
    pub duration: Option<String>,
    pub views: Option<String>,
    pub likes: Option<String>,
    pub dislikes: Option<String>,
    pub resolution: Option<String>,
    pub language: Option<String>,
    pub tags: Vec<String>,
    pub poster_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WatchPage {
    pub title: String,
    pub video: VideoDetails,
    pub channel: ChannelSummary,
    pub previous: Option<VideoCard>,
    pub next: Option<VideoCard>,
    pub latest: Option<VideoCard>,
    pub availability: MediaAvailability,
    pub stream_url: String,
    pub mimetype: Option<String>,
    pub subtitles_url: Option<String>,
    pub chapters_url: Option<String>,
}

pub async fn watch_page(
    reader: &MetadataReader,
    videoid: &str,
    now: DateTime<Utc>,
) -> TubeResult<WatchPage> {
    let video = reader
        .get_video(videoid)
        .await?
        .ok_or_else(|| TubeError::not_found("video", videoid))?;
    let channel = reader
        .get_channel(video.channel_id)
        .await?
        .ok_or_else(|| TubeError::not_found("channel", video.channel_id.to_string()))?;

    let card = |video: VideoRecord| VideoCard::new(&video, Some(&channel.name), now);
    let previous = reader.previous_video(&video).await?.map(card);
    let next = reader.next_video(&video).await?.map(card);
    let latest = reader.latest_video(channel.id).await?.map(card);

    let availability = MediaResolver::availability(&video);
    let resolution = match (video.width, video.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => Some(format!("{width}x{height}")),
        _ => video.resolution.clone(),
    };

    Ok(WatchPage {
        title: video.title.clone(),
        stream_url: format!("/res/video/{}", video.id),
        mimetype: video.mimetype.clone(),
        subtitles_url: availability
            .subtitles
            .then(|| format!("/res/subtitles/{}", video.id)),
        chapters_url: availability
            .chapters
            .then(|| format!("/res/chapters/{}", video.id)),
        availability,
        video: VideoDetails {
            id: video.id.clone(),
            title: video.title.clone(),
            description: video.description.clone(),
            date: format_date(video.timestamp),
            age: relative_age_from_unix(video.timestamp, now),
            duration: video.duration.map(format_duration),
            views: video.viewcount.map(|views| pluralize(views, "view", "views")),
            likes: video.likecount.map(group_digits),
            dislikes: video.dislikecount.map(group_digits),
            resolution,
            language: video.language.clone(),
            tags: video.tags.clone(),
            poster_url: video
                .thumb_path
                .as_ref()
                .map(|_| format!("/res/thumb/{}?{PLAYER_THUMB_QUERY}", video.id)),
        },
        channel: ChannelSummary::new(&channel, now),
        previous,
        next,
        latest,
    })
}

/// One count with its share of the bucket, e.g. `12 (40.0%)`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsCell {
    pub label: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsRow {
    pub label: String,
    pub range: Option<String>,
    pub videos: String,
    pub resolutions: Vec<StatsCell>,
    pub subtitles: String,
    pub chapters: String,
    pub total_duration: String,
    pub average_duration: String,
}

impl StatsRow {
    fn new(label: String, range: Option<String>, bucket: &StatsBucket) -> Self {
        let share = |count: i64| format!("{} ({:.1}%)", group_digits(count), bucket.percent(count));
        Self {
            label,
            range,
            videos: group_digits(bucket.videos),
            resolutions: bucket
                .resolutions()
                .into_iter()
                .map(|(label, count)| StatsCell {
                    label,
                    value: share(count),
                })
                .collect(),
            subtitles: share(bucket.subtitles),
            chapters: share(bucket.chapters),
            total_duration: format_duration(bucket.duration),
            average_duration: format_duration(bucket.average_duration()),
        }
    }

    fn weekly(week: &WeeklyStats) -> Self {
        Self::new(
            format!("{}-W{:02}", week.year, week.week),
            Some(format!(
                "{} to {}",
                week.monday.format("%b %-d"),
                week.sunday.format("%b %-d, %Y")
            )),
            &week.bucket,
        )
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatisticsPage {
    pub title: String,
    pub updated: Option<String>,
    pub overall: Option<StatsRow>,
    pub weekly: Vec<StatsRow>,
}

/// `overall` stays `None` when statistics were never calculated.
pub async fn statistics_page(
    reader: &MetadataReader,
    now: DateTime<Utc>,
) -> TubeResult<StatisticsPage> {
    let info = reader.info().await?;
    let stats = reader.load_statistics().await?;
    Ok(StatisticsPage {
        title: "Statistics".to_string(),
        updated: info
            .statisticsupdated
            .map(|timestamp| relative_age_from_unix(timestamp, now)),
        overall: stats
            .as_ref()
            .map(|stats| StatsRow::new("All videos".to_string(), None, &stats.overall)),
        weekly: stats
            .map(|stats| stats.weekly.iter().map(StatsRow::weekly).collect())
            .unwrap_or_default(),
    })
}

/// Shown instead of a page whose data could not be assembled.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorPage {
    pub title: String,
    pub status: u16,
    pub message: String,
}

impl ErrorPage {
    pub fn new(err: &TubeError) -> Self {
        let status = err.status();
        Self {
            title: status.canonical_reason().unwrap_or("Error").to_string(),
            status: status.as_u16(),
            message: err.public_message(),
        }
    }
}
