//! Directory roles of the queue and crash-safe staging.
//!
//! Files move `inbox → cache → outbox`. Moving into the cache is a rename in
//! the same tree, so a file is always in exactly one place; whatever is still
//! in the cache at startup was staged but never delivered.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use thiserror::Error;

use super::{QueueError, io_error};
use crate::workbook::FileType;

pub const CACHE_DIR_NAME: &str = ".cache";

const STAMP_FORMAT: &str = "%Y-%m-%d %H%M%S";

/// Why an inbox entry cannot be queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidEntry {
    #[error("not a regular file")]
    NotAFile,

    #[error("unrecognized file type")]
    UnknownType,

    #[error("{0} files are not supported for now")]
    Unsupported(FileType),
}

/// Cheap validity check: a regular file with a supported extension.
pub async fn validate_entry(path: &Path) -> Result<FileType, InvalidEntry> {
    let is_file = tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(InvalidEntry::NotAFile);
    }
    let file_type = FileType::from_path(path).ok_or(InvalidEntry::UnknownType)?;
    if !file_type.is_supported() {
        return Err(InvalidEntry::Unsupported(file_type));
    }
    Ok(file_type)
}

/// `"{YYYY-MM-DD HHMMSS} {name}"`.
pub fn staged_name(original: &str, stamp: NaiveDateTime) -> String {
    format!("{} {original}", stamp.format(STAMP_FORMAT))
}

/// `name` with ` [n]` inserted before its extension.
pub fn disambiguated(name: &str, n: u32) -> String {
    let path = Path::new(name);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => {
            format!("{} [{n}].{}", stem.to_string_lossy(), ext.to_string_lossy())
        }
        _ => format!("{name} [{n}]"),
    }
}

#[derive(Debug, Clone)]
pub struct QueueDirs {
    pub root: PathBuf,
    pub inbox: PathBuf,
    pub outbox: PathBuf,
    pub cache: PathBuf,
}

impl QueueDirs {
    pub fn new(root: impl Into<PathBuf>, in_dir_name: &str, out_dir_name: &str) -> Self {
        let root = root.into();
        Self {
            inbox: root.join(in_dir_name),
            outbox: root.join(out_dir_name),
            cache: root.join(CACHE_DIR_NAME),
            root,
        }
    }

    /// Create the root and the three role directories if missing.
    pub async fn create(&self) -> Result<(), QueueError> {
        for dir in [&self.root, &self.inbox, &self.outbox, &self.cache] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(io_error("create directory", dir))?;
        }
        Ok(())
    }

    /// Inbox entry names, dot entries excluded, sorted.
    pub async fn inbox_entries(&self) -> Result<Vec<String>, QueueError> {
        list_entries(&self.inbox).await
    }

    /// Entries left in the cache by an interrupted run.
    pub async fn residual_entries(&self) -> Result<Vec<String>, QueueError> {
        list_entries(&self.cache).await
    }

    /// First of `candidate`, `candidate [1]`, `candidate [2]`, ... free in
    /// both the cache and the outbox.
    pub async fn unique_name(&self, candidate: &str) -> Result<String, QueueError> {
        let mut name = candidate.to_string();
        let mut n = 0;
        while self.is_taken(&name).await? {
            n += 1;
            name = disambiguated(candidate, n);
        }
        Ok(name)
    }

    async fn is_taken(&self, name: &str) -> Result<bool, QueueError> {
        for dir in [&self.cache, &self.outbox] {
            let path = dir.join(name);
            let exists = tokio::fs::try_exists(&path)
                .await
                .map_err(io_error("check", &path))?;
            if exists {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Move an inbox entry into the cache under a fresh staged name.
    pub async fn stage(&self, original: &str) -> Result<String, QueueError> {
        self.stage_at(original, Local::now().naive_local()).await
    }

    pub async fn stage_at(&self, original: &str, stamp: NaiveDateTime) -> Result<String, QueueError> {
        let name = self.unique_name(&staged_name(original, stamp)).await?;
        let from = self.inbox.join(original);
        tokio::fs::rename(&from, self.cache.join(&name))
            .await
            .map_err(io_error("stage", &from))?;
        Ok(name)
    }

    pub fn cached(&self, staged_name: &str) -> PathBuf {
        self.cache.join(staged_name)
    }

    pub fn delivered(&self, staged_name: &str) -> PathBuf {
        self.outbox.join(staged_name)
    }
}

async fn list_entries(dir: &Path) -> Result<Vec<String>, QueueError> {
    let mut read_dir = tokio::fs::read_dir(dir)
        .await
        .map_err(io_error("list", dir))?;
    let mut names = Vec::new();
    while let Some(entry) = read_dir.next_entry().await.map_err(io_error("list", dir))? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
