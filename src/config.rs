//! JSON build plans.
//!
//! A plan lists the insertions of an archive together with its header
//! metadata, so an archive can be rebuilt reproducibly:
//!
//! ```json
//! {
//!   "archive_type": "install",
//!   "note": "my app 1.0",
//!   "timestamp": "2024-05-01T12:00:00Z",
//!   "archive_base": "build",
//!   "entries": [
//!     { "path": "build/app.prg", "prefix": "/myapp" },
//!     { "path": "build/data", "prefix": "/myapp", "compression": "none" }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::archive::{Archive, ArchiveHeader, ArchiveType, Timestamp};
use crate::error::{CarError, Result};
use crate::manifest::Manifest;
use crate::record::Compression;

/// One insertion. Directories are walked and all their files inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanEntry {
    pub path: PathBuf,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub compression: Compression,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildPlan {
    /// Directory that entry paths are relative to. When loaded from a file
    /// this defaults to the directory holding the plan.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    /// Stripped from archive paths, see [`Manifest::with_archive_base`].
    #[serde(default)]
    pub archive_base: Option<PathBuf>,
    #[serde(default)]
    pub archive_type: ArchiveType,
    #[serde(default)]
    pub note: String,
    /// Defaults to the time the archive is built.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub entries: Vec<PlanEntry>,
}

impl BuildPlan {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Loads a plan file, resolving `base_dir` against the plan's own directory.
    /// The resulting `base_dir` is always absolute.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| CarError::io(e, path))?;
        let mut plan = Self::from_json(&text)?;
        let plan_dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let plan_dir = std::path::absolute(plan_dir).map_err(|e| CarError::io(e, plan_dir))?;
        plan.base_dir = Some(match plan.base_dir.take() {
            Some(base) if base.is_absolute() => base,
            Some(base) => plan_dir.join(base),
            None => plan_dir,
        });
        debug!(plan = %path.display(), entries = plan.entries.len(), "loaded build plan");
        Ok(plan)
    }

    pub fn header(&self) -> Result<ArchiveHeader> {
        let timestamp = match &self.timestamp {
            Some(ts) => Timestamp::from_datetime(ts)?,
            None => Timestamp::now()?,
        };
        ArchiveHeader::new(self.archive_type, timestamp, self.note.clone())
    }

    pub fn manifest(&self) -> Result<Manifest> {
        let base_dir = self
            .base_dir
            .clone()
            .ok_or_else(|| CarError::Validation("the build plan has no base_dir".into()))?;
        let mut manifest = Manifest::new(base_dir);
        if let Some(archive_base) = &self.archive_base {
            manifest = manifest.with_archive_base(archive_base)?;
        }
        for entry in &self.entries {
            manifest.insert_tree(&entry.path, &entry.prefix, entry.compression)?;
        }
        Ok(manifest)
    }

    pub fn build(&self) -> Result<Archive> {
        Ok(Archive::new(self.header()?, self.manifest()?))
    }
}
