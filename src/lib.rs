#![forbid(unsafe_code)]

//! Library half of archivetube: the metadata store, the archive registry and
//! everything the HTTP server needs to browse a local video archive.

pub mod config;
pub mod error;
pub mod humanize;
pub mod media;
pub mod metadata;
pub mod pages;
pub mod preflight;
pub mod registry;
pub mod server;
pub mod statistics;
pub mod templates;
pub mod thumbnail;
