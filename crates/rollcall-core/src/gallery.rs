//! Reference gallery: one embedding per known identity.
//!
//! Built once at startup from a directory of `.jpg` / `.png` images. Each
//! file name stem becomes the identity name.

use crate::engine::{EngineError, FaceEngine};
use crate::types::Embedding;
use image::ImageReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

const REFERENCE_EXTENSIONS: [&str; 2] = ["jpg", "png"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("cannot read gallery directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("face engine failed on {path}: {source}")]
    Engine {
        path: PathBuf,
        #[source]
        source: EngineError,
    },
}

/// A reference image that did not make it into the gallery.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GalleryWarning {
    #[error("no face found in {}", path.display())]
    NoFace { path: PathBuf },
    #[error("cannot decode {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },
}

/// A known person.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name: String,
    pub embedding: Embedding,
    /// Reference image the embedding came from.
    pub source: PathBuf,
}

/// Known identities in directory order. Names are not deduplicated.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    identities: Vec<Identity>,
}

/// Outcome of [`Gallery::load_dir`].
#[derive(Debug)]
pub struct GalleryLoad {
    pub gallery: Gallery,
    pub warnings: Vec<GalleryWarning>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, identity: Identity) {
        self.identities.push(identity);
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Identity> {
        self.identities.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(|i| i.name.as_str())
    }

    pub fn embeddings(&self) -> impl Iterator<Item = &Embedding> {
        self.identities.iter().map(|i| &i.embedding)
    }

    /// Load every reference image in `dir`.
    ///
    /// Files are visited in file-name order. An image yielding no face, or
    /// one that cannot be decoded, is skipped with a warning; an engine
    /// failure aborts the load. When an image holds several faces the first
    /// (most confident) one is used.
    pub fn load_dir(dir: &Path, engine: &mut dyn FaceEngine) -> Result<GalleryLoad, GalleryError> {
        let read_err = |source| GalleryError::ReadDir {
            path: dir.to_path_buf(),
            source,
        };

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path.is_file() && is_reference_image(&path) {
                paths.push(path);
            }
        }
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let mut gallery = Gallery::new();
        let mut warnings = Vec::new();

        for path in paths {
            let image = match ImageReader::open(&path)
                .and_then(|r| r.with_guessed_format())
                .map_err(|e| e.to_string())
                .and_then(|r| r.decode().map_err(|e| e.to_string()))
            {
                Ok(img) => img.to_luma8(),
                Err(reason) => {
                    tracing::warn!(path = %path.display(), %reason, "skipping unreadable reference image");
                    warnings.push(GalleryWarning::Unreadable { path, reason });
                    continue;
                }
            };

            let faces = engine
                .analyze(image.as_raw(), image.width(), image.height())
                .map_err(|source| GalleryError::Engine {
                    path: path.clone(),
                    source,
                })?;

            let Some(face) = faces.into_iter().next() else {
                tracing::warn!(path = %path.display(), "no face found in reference image");
                warnings.push(GalleryWarning::NoFace { path });
                continue;
            };

            let name = identity_name(&path);
            tracing::info!(name = %name, path = %path.display(), "loaded identity");
            gallery.push(Identity {
                name,
                embedding: face.embedding,
                source: path,
            });
        }

        tracing::info!(
            identities = gallery.len(),
            skipped = warnings.len(),
            dir = %dir.display(),
            "gallery loaded"
        );

        Ok(GalleryLoad { gallery, warnings })
    }
}

impl FromIterator<Identity> for Gallery {
    fn from_iter<I: IntoIterator<Item = Identity>>(iter: I) -> Self {
        Self {
            identities: iter.into_iter().collect(),
        }
    }
}

fn is_reference_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| REFERENCE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

fn identity_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
