//! Model previews.
//!
//! [`render`] turns a kernel [`Scene`] into a fixed-size raster, and
//! [`ThumbnailStore`] keeps the encoded PNGs keyed by content fingerprint so
//! that files with identical content share a single thumbnail.

pub mod error;
mod render;
mod store;

pub use crate::render::render;
pub use crate::store::ThumbnailStore;

use crate::error::{ErrorKind, Result};
use cadventory_kernel::Scene;
use exn::ResultExt;
use image::ImageEncoder;
use image::codecs::png::PngEncoder;
use tracing::instrument;

pub const MIN_SIZE: u32 = 16;
pub const MAX_SIZE: u32 = 2048;
pub const DEFAULT_SIZE: u32 = 256;

/// What [`Thumbnailer::thumbnail`] had to do to produce a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// A new image was rendered and written to the store.
    Rendered(String),
    /// An image for this fingerprint was already in the store.
    Reused(String),
}

impl Output {
    /// Store-relative thumbnail reference.
    pub fn reference(&self) -> &str {
        match self {
            Output::Rendered(reference) | Output::Reused(reference) => reference,
        }
    }

    pub fn into_reference(self) -> String {
        match self {
            Output::Rendered(reference) | Output::Reused(reference) => reference,
        }
    }
}

/// Renders scenes at a fixed size into a [`ThumbnailStore`].
#[derive(Debug, Clone)]
pub struct Thumbnailer {
    store: ThumbnailStore,
    size: u32,
}

impl Thumbnailer {
    pub fn new(store: ThumbnailStore, size: u32) -> Result<Self> {
        if !(MIN_SIZE..=MAX_SIZE).contains(&size) {
            exn::bail!(ErrorKind::InvalidSize(size));
        }
        Ok(Self { store, size })
    }

    pub fn store(&self) -> &ThumbnailStore {
        &self.store
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Reference of an existing thumbnail for `fingerprint`, without rendering.
    pub fn existing(&self, fingerprint: &str) -> Option<String> {
        let reference = ThumbnailStore::reference(fingerprint, self.size).ok()?;
        self.store.contains(&reference).then_some(reference)
    }

    /// Produce a thumbnail for content `fingerprint`, rendering `scene` only if
    /// the store doesn't already hold one.
    ///
    /// This is CPU-bound and performs blocking I/O; async callers should run
    /// it on a blocking thread.
    #[instrument(skip(self, scene), fields(triangles = scene.triangles.len(), size = self.size))]
    pub fn thumbnail(&self, fingerprint: &str, scene: &Scene) -> Result<Output> {
        let reference = ThumbnailStore::reference(fingerprint, self.size)?;
        if self.store.contains(&reference) {
            return Ok(Output::Reused(reference));
        }
        let image = render(scene, self.size)?;
        let mut png = Vec::new();
        PngEncoder::new(&mut png)
            .write_image(image.as_raw(), image.width(), image.height(), image::ColorType::Rgba8)
            .or_raise(|| ErrorKind::Encode)?;
        self.store.persist(&reference, &png)?;
        tracing::debug!(reference = %reference, bytes = png.len(), "Thumbnail rendered");
        Ok(Output::Rendered(reference))
    }
}
