//! `ImageReader`: the injected collaborator that decodes scientific
//! raster formats into [`scipathj_types::Image`]. File-format decoding
//! of microscopy-specific containers (the spec's explicit non-goal) is
//! not implemented here; [`FileSystemImageReader`] covers the common
//! formats the `image` crate itself decodes (TIFF, PNG, JPEG, BMP),
//! following the same `image::load_from_memory` entry point
//! `mujou_pipeline::decode_and_grayscale` uses for its own decode step.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use scipathj_types::{BitDepth, Dimensions, Image};

use crate::error::ImageDecodeError;

/// External collaborator: decodes a path on disk into an [`Image`].
/// Implementations may wrap any backend (a microscopy SDK, a test
/// fixture); [`FileSystemImageReader`] is the default, `image`-crate-
/// backed implementation.
pub trait ImageReader: Send + Sync {
    /// # Errors
    /// Returns [`ImageDecodeError`] if the file cannot be read or
    /// decoded.
    fn read(&self, path: &Path) -> Result<Image, ImageDecodeError>;
}

/// Decodes PNG/JPEG/BMP/TIFF/WebP via the `image` crate and converts to
/// an 8-bit RGB [`Image`], discarding alpha (color deconvolution
/// requires exactly 3 channels).
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSystemImageReader;

impl ImageReader for FileSystemImageReader {
    fn read(&self, path: &Path) -> Result<Image, ImageDecodeError> {
        let bytes = std::fs::read(path).map_err(|source| ImageDecodeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let decoded = image::load_from_memory(&bytes).map_err(|source| ImageDecodeError::Decode {
            path: path.display().to_string(),
            source,
        })?;
        let rgb = decoded.to_rgb8();
        let dimensions = Dimensions::new(rgb.width(), rgb.height());
        Ok(Image::new(dimensions, 3, BitDepth::Eight, rgb.into_raw(), None))
    }
}

/// Bounded LRU cache over any [`ImageReader`], internally synchronized
/// so multiple orchestrator workers may share one cache. Evicts the
/// least-recently-used entry once `capacity` decoded images are held.
pub struct CachingImageReader<R> {
    inner: R,
    capacity: usize,
    cache: Mutex<Cache>,
}

#[derive(Default)]
struct Cache {
    order: VecDeque<String>,
    entries: std::collections::HashMap<String, Image>,
}

impl<R: ImageReader> CachingImageReader<R> {
    #[must_use]
    pub fn new(inner: R, capacity: usize) -> Self {
        Self {
            inner,
            capacity,
            cache: Mutex::new(Cache::default()),
        }
    }
}

impl<R: ImageReader> ImageReader for CachingImageReader<R> {
    fn read(&self, path: &Path) -> Result<Image, ImageDecodeError> {
        let key = path.display().to_string();

        {
            let mut cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(image) = cache.entries.get(&key).cloned() {
                cache.order.retain(|k| k != &key);
                cache.order.push_back(key);
                return Ok(image);
            }
        }

        let image = self.inner.read(path)?;

        if self.capacity > 0 {
            let mut cache = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if cache.entries.len() >= self.capacity {
                if let Some(oldest) = cache.order.pop_front() {
                    cache.entries.remove(&oldest);
                }
            }
            cache.order.push_back(key.clone());
            cache.entries.insert(key, image.clone());
        }

        Ok(image)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingReader {
        calls: AtomicUsize,
    }

    impl ImageReader for CountingReader {
        fn read(&self, _path: &Path) -> Result<Image, ImageDecodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Image::new(Dimensions::new(1, 1), 3, BitDepth::Eight, vec![0, 0, 0], None))
        }
    }

    #[test]
    fn cache_hit_avoids_second_decode() {
        let reader = CachingImageReader::new(CountingReader { calls: AtomicUsize::new(0) }, 4);
        let path = Path::new("a.png");
        reader.read(path).unwrap();
        reader.read(path).unwrap();
        assert_eq!(reader.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn eviction_drops_least_recently_used() {
        let reader = CachingImageReader::new(CountingReader { calls: AtomicUsize::new(0) }, 1);
        reader.read(Path::new("a.png")).unwrap();
        reader.read(Path::new("b.png")).unwrap();
        reader.read(Path::new("a.png")).unwrap();
        assert_eq!(reader.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let reader = CachingImageReader::new(CountingReader { calls: AtomicUsize::new(0) }, 0);
        reader.read(Path::new("a.png")).unwrap();
        reader.read(Path::new("a.png")).unwrap();
        assert_eq!(reader.inner.calls.load(Ordering::SeqCst), 2);
    }
}
