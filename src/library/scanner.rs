use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::{debug, info};
use walkdir::WalkDir;

/// List of supported audio file extensions
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "wav", "m4a", "aac", "opus", "wma",
];

/// Track listing for one music directory, in file-name order.
///
/// The index of a track in this listing is its physical index.
#[derive(Debug, Clone)]
pub struct Library {
    root: PathBuf,
    tracks: Vec<PathBuf>,
}

impl Library {
    /// List the audio files directly inside `directory`
    pub fn scan<P: AsRef<Path>>(directory: P) -> anyhow::Result<Self> {
        let root = directory.as_ref().to_path_buf();
        let mut tracks = Vec::new();

        for entry in WalkDir::new(&root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = entry.with_context(|| format!("Failed to list {:?}", root))?;
            let path = entry.path();

            // Skip directories
            if !path.is_file() {
                continue;
            }

            if is_supported(path) {
                debug!("Found track {:?}", path);
                tracks.push(path.to_path_buf());
            }
        }

        if tracks.is_empty() {
            bail!("No playable tracks in {:?}", root);
        }

        info!("Found {} tracks in {:?}", tracks.len(), root);
        Ok(Self { root, tracks })
    }

    /// Rescan the same directory
    pub fn reload(&self) -> anyhow::Result<Self> {
        Self::scan(&self.root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn path(&self, track: usize) -> Option<&Path> {
        self.tracks.get(track).map(PathBuf::as_path)
    }

    /// File name used as the per-track volume key
    pub fn name(&self, track: usize) -> Option<&str> {
        self.path(track)
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
    }

    pub fn tracks(&self) -> &[PathBuf] {
        &self.tracks
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}
