#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DB_FILE_NAME: &str = "tube.db";
pub const CONFIG_FILE_NAME: &str = "archivetube.toml";
pub const MEDIA_SUBDIR: &str = "media";
pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PAGE_SIZE: u32 = 30;
pub const DEFAULT_THUMBNAIL_MAX: u32 = 1920;

const ENV_HOST: &str = "ARCHIVETUBE_HOST";
const ENV_PORT: &str = "ARCHIVETUBE_PORT";
const ENV_PAGE_SIZE: &str = "ARCHIVETUBE_PAGE_SIZE";
const ENV_THUMBNAIL_CACHE: &str = "ARCHIVETUBE_THUMBNAIL_CACHE";
const ENV_THUMBNAIL_MAX: &str = "ARCHIVETUBE_THUMBNAIL_MAX";

/// Everything a running instance needs to know, resolved once at startup and
/// handed to each component.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub page_size: u32,
    pub thumbnails: ThumbnailSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailSettings {
    pub cache: bool,
    pub max_dimension: u32,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            cache: true,
            max_dimension: DEFAULT_THUMBNAIL_MAX,
        }
    }
}

impl ServerConfig {
    /// Defaults for `data_dir` with no env, `.env` or toml input.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            page_size: DEFAULT_PAGE_SIZE,
            thumbnails: ThumbnailSettings::default(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    /// Where images and tracks exported from archives are written.
    pub fn media_dir(&self) -> PathBuf {
        self.data_dir.join(MEDIA_SUBDIR)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub page_size: Option<u32>,
    pub env_path: Option<PathBuf>,
}

/// Optional `archivetube.toml` inside the data directory.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub page_size: Option<u32>,
    pub thumbnails: FileThumbnails,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileThumbnails {
    pub cache: Option<bool>,
    pub max_dimension: Option<u32>,
}

pub fn resolve_server_config(data_dir: &Path, overrides: RuntimeOverrides) -> Result<ServerConfig> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    let file_config = read_file_config(&data_dir.join(CONFIG_FILE_NAME))?;
    Ok(build_server_config(
        data_dir,
        &file_vars,
        &file_config,
        env_var_string,
        overrides,
    ))
}

/// Precedence per key: CLI override, process env, `.env`, toml, default.
fn build_server_config(
    data_dir: &Path,
    file_vars: &HashMap<String, String>,
    file_config: &FileConfig,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> ServerConfig {
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_parsed(ENV_HOST, file_vars, &env_lookup, |v| Some(v.to_string())))
        .or_else(|| {
            file_config
                .host
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup_parsed(ENV_PORT, file_vars, &env_lookup, |v| v.parse().ok()))
        .or(file_config.port)
        .unwrap_or(DEFAULT_PORT);
    let page_size = overrides
        .page_size
        .filter(|size| *size > 0)
        .or_else(|| lookup_parsed(ENV_PAGE_SIZE, file_vars, &env_lookup, parse_positive))
        .or(file_config.page_size.filter(|size| *size > 0))
        .unwrap_or(DEFAULT_PAGE_SIZE);
    let cache = lookup_parsed(ENV_THUMBNAIL_CACHE, file_vars, &env_lookup, parse_flag)
        .or(file_config.thumbnails.cache)
        .unwrap_or(true);
    let max_dimension = lookup_parsed(ENV_THUMBNAIL_MAX, file_vars, &env_lookup, parse_positive)
        .or(file_config.thumbnails.max_dimension.filter(|max| *max > 0))
        .unwrap_or(DEFAULT_THUMBNAIL_MAX);

    ServerConfig {
        data_dir: data_dir.to_path_buf(),
        host,
        port,
        page_size,
        thumbnails: ThumbnailSettings {
            cache,
            max_dimension,
        },
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// First value for `key` that parses, trying the process env before `.env`.
fn lookup_parsed<T>(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    env_lookup(key)
        .and_then(|value| parse(value.trim()))
        .or_else(|| {
            file_vars
                .get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .and_then(|value| parse(value))
        })
}

fn parse_positive(value: &str) -> Option<u32> {
    value.parse().ok().filter(|number| *number > 0)
}

pub fn read_file_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Parsing {}", path.display()))
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
