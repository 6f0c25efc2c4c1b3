//! The fixed catalog of recordings a new call is drawn from.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;
use rand::seq::SliceRandom;
use tokio::io::AsyncRead;

use super::file::ReaderSource;
use super::generator::builtin_tones;
use crate::streaming::error::{StreamError, StreamResult};

/// Reader type handed out by [`Asset::open`].
pub type AssetReader = Box<dyn AsyncRead + Send + Unpin>;

/// File extensions picked up by [`AssetCatalog::from_dir`].
pub const ASSET_EXTENSIONS: [&str; 3] = ["wav", "raw", "pcm"];

#[derive(Debug, Clone)]
enum AssetData {
    File(PathBuf),
    Memory(Arc<[u8]>),
}

/// One recording: either a file on disk or bytes held in memory.
#[derive(Debug, Clone)]
pub struct Asset {
    name: String,
    data: AssetData,
}

impl Asset {
    /// An asset backed by a file, read afresh for every call.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            data: AssetData::File(path),
        }
    }

    /// An asset held in memory.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            data: AssetData::Memory(bytes.into()),
        }
    }

    /// Asset name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a fresh frame source positioned at the start of the asset.
    pub async fn open(&self, frame_size: usize) -> StreamResult<ReaderSource<AssetReader>> {
        let reader: AssetReader = match &self.data {
            AssetData::File(path) => Box::new(tokio::fs::File::open(path).await?),
            AssetData::Memory(bytes) => Box::new(Cursor::new(Arc::clone(bytes))),
        };
        Ok(ReaderSource::new(reader, self.name.clone(), frame_size))
    }
}

/// A non-empty set of assets with uniform random selection.
#[derive(Debug, Clone)]
pub struct AssetCatalog {
    assets: Vec<Asset>,
}

impl AssetCatalog {
    /// Build a catalog. Fails if `assets` is empty.
    pub fn new(assets: Vec<Asset>) -> StreamResult<Self> {
        if assets.is_empty() {
            return Err(StreamError::EmptyCatalog);
        }
        Ok(Self { assets })
    }

    /// The built-in generated recordings.
    pub fn builtin() -> Self {
        let assets = builtin_tones()
            .into_iter()
            .map(|tone| Asset::from_bytes(tone.name.clone(), tone.render_wav()))
            .collect();
        Self { assets }
    }

    /// Every `.wav`, `.raw` or `.pcm` file directly inside `dir`, sorted by name.
    pub fn from_dir(dir: impl AsRef<Path>) -> StreamResult<Self> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            let wanted = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ASSET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if wanted && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        tracing::info!(dir = %dir.as_ref().display(), assets = paths.len(), "Loaded asset catalog");
        Self::new(paths.into_iter().map(Asset::from_file).collect())
    }

    /// Pick an asset uniformly at random.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> &Asset {
        // Non-empty by construction.
        self.assets.choose(rng).unwrap_or(&self.assets[0])
    }

    /// Pick an asset uniformly at random using the thread-local generator.
    pub fn choose_random(&self) -> &Asset {
        self.choose(&mut rand::thread_rng())
    }

    /// Number of assets.
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Whether the catalog has no assets.
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Asset names in catalog order.
    pub fn names(&self) -> Vec<&str> {
        self.assets.iter().map(Asset::name).collect()
    }
}
