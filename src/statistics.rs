//! Offline archive statistics: resolution mix, subtitle and chapter coverage
//! and durations, overall and per ISO week.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Weekday};
use serde::Serialize;

use crate::metadata::VideoRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolutionClass {
    Uhd8k,
    Uhd4k,
    FullHd,
    Hd,
    Sd,
    Ld,
}

impl ResolutionClass {
    /// Classifies by the larger and smaller side so portrait videos land in
    /// the same class as their landscape counterparts.
    pub fn classify(width: i64, height: i64) -> Option<Self> {
        if width <= 0 || height <= 0 {
            return None;
        }
        let larger = width.max(height);
        let smaller = width.min(height);
        Some(if larger < 1200 {
            if larger < 700 && smaller < 400 {
                Self::Ld
            } else {
                Self::Sd
            }
        } else if larger < 1900 {
            Self::Hd
        } else if larger < 3500 {
            Self::FullHd
        } else if larger < 6000 {
            Self::Uhd4k
        } else {
            Self::Uhd8k
        })
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Uhd8k => "8K",
            Self::Uhd4k => "4K",
            Self::FullHd => "FullHD",
            Self::Hd => "HD",
            Self::Sd => "SD",
            Self::Ld => "LD",
        }
    }
}

/// Counters for one group of videos. Durations are in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsBucket {
    pub videos: i64,
    pub res_8k: i64,
    pub res_4k: i64,
    pub res_fullhd: i64,
    pub res_hd: i64,
    pub res_sd: i64,
    pub res_ld: i64,
    pub res_unknown: i64,
    pub subtitles: i64,
    pub chapters: i64,
    pub duration: i64,
}

impl StatsBucket {
    pub fn add(&mut self, video: &VideoRecord) {
        self.videos += 1;
        let class = match (video.width, video.height) {
            (Some(width), Some(height)) => ResolutionClass::classify(width, height),
            _ => None,
        };
        match class {
            Some(ResolutionClass::Uhd8k) => self.res_8k += 1,
            Some(ResolutionClass::Uhd4k) => self.res_4k += 1,
            Some(ResolutionClass::FullHd) => self.res_fullhd += 1,
            Some(ResolutionClass::Hd) => self.res_hd += 1,
            Some(ResolutionClass::Sd) => self.res_sd += 1,
            Some(ResolutionClass::Ld) => self.res_ld += 1,
            None => self.res_unknown += 1,
        }
        if video.subtitles_path.is_some() {
            self.subtitles += 1;
        }
        if video.chapters_path.is_some() {
            self.chapters += 1;
        }
        self.duration += video.duration.unwrap_or(0).max(0);
    }

    /// Share of `count` among the bucket's videos, in percent.
    pub fn percent(&self, count: i64) -> f64 {
        if self.videos == 0 {
            0.0
        } else {
            count as f64 * 100.0 / self.videos as f64
        }
    }

    pub fn average_duration(&self) -> i64 {
        if self.videos == 0 {
            0
        } else {
            self.duration / self.videos
        }
    }

    /// `(label, count)` pairs in display order.
    pub fn resolutions(&self) -> [(&'static str, i64); 7] {
        [
            (ResolutionClass::Uhd8k.label(), self.res_8k),
            (ResolutionClass::Uhd4k.label(), self.res_4k),
            (ResolutionClass::FullHd.label(), self.res_fullhd),
            (ResolutionClass::Hd.label(), self.res_hd),
            (ResolutionClass::Sd.label(), self.res_sd),
            (ResolutionClass::Ld.label(), self.res_ld),
            ("Unknown", self.res_unknown),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeeklyStats {
    pub year: i32,
    pub week: u32,
    pub monday: NaiveDate,
    pub sunday: NaiveDate,
    pub bucket: StatsBucket,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveStatistics {
    pub overall: StatsBucket,
    /// Newest week first; weeks without videos are omitted.
    pub weekly: Vec<WeeklyStats>,
}

/// Groups videos by the ISO week (UTC) of their publish timestamp.
pub fn calculate(videos: &[VideoRecord]) -> ArchiveStatistics {
    let mut overall = StatsBucket::default();
    let mut weeks: BTreeMap<(i32, u32), StatsBucket> = BTreeMap::new();

    for video in videos {
        overall.add(video);
        let Some(published) = DateTime::from_timestamp(video.timestamp, 0) else {
            continue;
        };
        let iso = published.date_naive().iso_week();
        weeks
            .entry((iso.year(), iso.week()))
            .or_default()
            .add(video);
    }

    let weekly = weeks
        .into_iter()
        .rev()
        .filter_map(|((year, week), bucket)| {
            let monday = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)?;
            let sunday = NaiveDate::from_isoywd_opt(year, week, Weekday::Sun)?;
            Some(WeeklyStats {
                year,
                week,
                monday,
                sunday,
                bucket,
            })
        })
        .collect();

    ArchiveStatistics { overall, weekly }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::tests::sample_video;

    #[test]
    fn classify_thresholds() {
        assert_eq!(ResolutionClass::classify(640, 360), Some(ResolutionClass::Ld));
        assert_eq!(ResolutionClass::classify(854, 480), Some(ResolutionClass::Sd));
        assert_eq!(ResolutionClass::classify(699, 400), Some(ResolutionClass::Sd));
        assert_eq!(ResolutionClass::classify(1280, 720), Some(ResolutionClass::Hd));
        assert_eq!(ResolutionClass::classify(1920, 1080), Some(ResolutionClass::FullHd));
        assert_eq!(ResolutionClass::classify(1080, 1920), Some(ResolutionClass::FullHd));
        assert_eq!(ResolutionClass::classify(3840, 2160), Some(ResolutionClass::Uhd4k));
        assert_eq!(ResolutionClass::classify(7680, 4320), Some(ResolutionClass::Uhd8k));
        assert_eq!(ResolutionClass::classify(0, 1080), None);
    }

    #[test]
    fn buckets_count_coverage_and_duration() {
        let mut with_tracks = sample_video("a", 0);
        with_tracks.subtitles_path = Some("/t/a.vtt".into());
        with_tracks.chapters_path = Some("/t/a.chapters.vtt".into());
        let mut unknown = sample_video("b", 0);
        unknown.width = None;
        unknown.duration = Some(60);

        let mut bucket = StatsBucket::default();
        bucket.add(&with_tracks);
        bucket.add(&unknown);
        assert_eq!(bucket.videos, 2);
        assert_eq!(bucket.res_fullhd, 1);
        assert_eq!(bucket.res_unknown, 1);
        assert_eq!(bucket.subtitles, 1);
        assert_eq!(bucket.chapters, 1);
        assert_eq!(bucket.duration, 180);
        assert_eq!(bucket.average_duration(), 90);
        assert!((bucket.percent(bucket.subtitles) - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn weekly_groups_by_iso_week() {
        // 2024-01-01 is a Monday; 2024-01-07 23:00 is still week 1.
        let videos = vec![
            sample_video("mon", 1_704_067_200),
            sample_video("sun", 1_704_668_400),
            sample_video("next", 1_704_672_000),
        ];
        let stats = calculate(&videos);
        assert_eq!(stats.overall.videos, 3);
        assert_eq!(stats.weekly.len(), 2);

        let newest = &stats.weekly[0];
        assert_eq!((newest.year, newest.week), (2024, 2));
        assert_eq!(newest.bucket.videos, 1);

        let first = &stats.weekly[1];
        assert_eq!((first.year, first.week), (2024, 1));
        assert_eq!(first.monday, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(first.sunday, NaiveDate::from_ymd_opt(2024, 1, 7).unwrap());
        assert_eq!(first.bucket.videos, 2);
    }

    #[test]
    fn empty_archive_has_no_weeks() {
        let stats = calculate(&[]);
        assert_eq!(stats, ArchiveStatistics::default());
        assert_eq!(stats.overall.percent(0), 0.0);
    }
}
