//! Error type shared by the request handlers and the archive registry.
//!
//! Store and registry internals keep using `anyhow`; everything that crosses
//! the HTTP boundary is funnelled into [`TubeError`] so the status code and the
//! public message are decided in one place.

use std::path::PathBuf;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum TubeError {
    /// Unknown video, channel or page.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The store references a file that no longer exists on disk.
    #[error("{what} missing on disk: {}", path.display())]
    ResourceMissing { what: &'static str, path: PathBuf },

    /// An archive that could not be imported. Only produced while indexing.
    #[error("malformed archive {}: {reason}", path.display())]
    MalformedArchive { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    TransientIo(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type TubeResult<T> = Result<T, TubeError>;

impl TubeError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn missing(what: &'static str, path: impl Into<PathBuf>) -> Self {
        Self::ResourceMissing {
            what,
            path: path.into(),
        }
    }

    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedArchive {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } | Self::ResourceMissing { .. } => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Image(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::MalformedArchive { .. }
            | Self::TransientIo(_)
            | Self::Template(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message sent to the browser. Never contains filesystem paths.
    pub fn public_message(&self) -> String {
        match self {
            Self::NotFound { entity, .. } => format!("{entity} not found"),
            Self::ResourceMissing { what, .. } => format!("{what} is unavailable"),
            Self::InvalidRequest(message) => message.clone(),
            Self::Image(_) => "image could not be processed".to_string(),
            _ => "internal server error".to_string(),
        }
    }

    /// Logs at a level matching how alarming the error is.
    pub fn log(&self) {
        let status = self.status();
        match self {
            Self::ResourceMissing { .. } => tracing::warn!(error = %self, "serving degraded response"),
            _ if status.is_server_error() => {
                tracing::error!(status = %status, error = %self, "request failed")
            }
            _ => tracing::debug!(status = %status, error = %self, "request rejected"),
        }
    }
}

/// JSON body for resource routes. HTML pages render their own error view.
impl IntoResponse for TubeError {
    fn into_response(self) -> Response {
        self.log();
        let body = json!({ "error": self.public_message() });
        (self.status(), Json(body)).into_response()
    }
}
