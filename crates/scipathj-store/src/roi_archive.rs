//! ImageJ-ROI-style binary record codec and ZIP archive import/export.
//!
//! Each `.roi` entry follows the big-endian, fixed-offset layout the
//! spec prescribes: a 4-byte magic, a version, a shape-type byte, an
//! integer bounding box, an integer vertex-offset array (for
//! cross-tool/ImageJ display compatibility), then a v2 extension block
//! carrying the exact `f32` precision this crate actually round-trips
//! on: full-precision vertices (or rectangle fields), the assigned id
//! (reusing ImageJ's per-ROI "position" field), the category, the
//! ignored flag, and an optional cell-link pair. Encoding is a pure
//! function of the `Roi`'s fields, so importing and re-exporting the
//! same in-memory ROIs yields byte-identical archives.

use std::io::{Cursor, Read, Write};

use scipathj_types::{Category, CellLinks, Geometry, Point, Polygon, Rectangle, Roi};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::StoreError;

const MAGIC: &[u8; 4] = b"Iout";
const VERSION: u16 = 2;

fn category_to_byte(category: Category) -> u8 {
    match category {
        Category::Vessel => 0,
        Category::Nucleus => 1,
        Category::Cytoplasm => 2,
        Category::Cell => 3,
        Category::Ignore => 4,
    }
}

fn byte_to_category(byte: u8, entry: &str) -> Result<Category, StoreError> {
    match byte {
        0 => Ok(Category::Vessel),
        1 => Ok(Category::Nucleus),
        2 => Ok(Category::Cytoplasm),
        3 => Ok(Category::Cell),
        4 => Ok(Category::Ignore),
        other => Err(StoreError::MalformedRoi {
            entry: entry.to_string(),
            reason: format!("unknown category byte {other}"),
        }),
    }
}

/// Encodes one ROI into the binary `.roi` record.
///
/// # Panics
/// In debug builds, if the ROI's vertex count does not fit in a `u16`
/// (the vertex-count field's width) — a degenerate input this codec
/// cannot represent.
#[must_use]
pub fn encode_roi(roi: &Roi) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_be_bytes());

    let (roi_type, vertices): (u8, Vec<Point>) = match roi.geometry() {
        Geometry::Polygon(polygon) => (0, polygon.vertices().to_vec()),
        Geometry::Rectangle(rect) => (
            1,
            vec![
                Point::new(rect.x, rect.y),
                Point::new(rect.x + rect.width, rect.y),
                Point::new(rect.x + rect.width, rect.y + rect.height),
                Point::new(rect.x, rect.y + rect.height),
            ],
        ),
    };
    out.push(roi_type);
    out.push(category_to_byte(roi.category()));

    let bounds = roi.geometry().bounds();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let top = bounds.y.max(0.0).round() as u16;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let left = bounds.x.max(0.0).round() as u16;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bottom = (bounds.y + bounds.height).max(0.0).round() as u16;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let right = (bounds.x + bounds.width).max(0.0).round() as u16;
    out.extend_from_slice(&top.to_be_bytes());
    out.extend_from_slice(&left.to_be_bytes());
    out.extend_from_slice(&bottom.to_be_bytes());
    out.extend_from_slice(&right.to_be_bytes());

    debug_assert!(u16::try_from(vertices.len()).is_ok(), "vertex count must fit in u16");
    #[allow(clippy::cast_possible_truncation)]
    let n = vertices.len() as u16;
    out.extend_from_slice(&n.to_be_bytes());
    for p in &vertices {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let x_offset = (p.x - bounds.x).max(0.0).round() as u16;
        out.extend_from_slice(&x_offset.to_be_bytes());
    }
    for p in &vertices {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let y_offset = (p.y - bounds.y).max(0.0).round() as u16;
        out.extend_from_slice(&y_offset.to_be_bytes());
    }

    // --- v2 extension block: full-precision, lossless round-trip data ---
    let stroke_color: u32 = roi.display_color().map_or(0xFFFF_FFFF, |[r, g, b, a]| {
        u32::from_be_bytes([r, g, b, a])
    });
    out.extend_from_slice(&stroke_color.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // stroke width, fixed
    #[allow(clippy::cast_possible_truncation)]
    let position = roi.id() as u32;
    out.extend_from_slice(&position.to_be_bytes());

    out.push(1); // subpixel flag: always present
    out.extend_from_slice(&n.to_be_bytes());
    for p in &vertices {
        out.extend_from_slice(&p.x.to_be_bytes());
    }
    for p in &vertices {
        out.extend_from_slice(&p.y.to_be_bytes());
    }

    out.push(u8::from(roi.ignored()));

    match roi.links() {
        Some(links) => {
            out.push(1);
            out.extend_from_slice(&links.nucleus_id.to_be_bytes());
            out.extend_from_slice(&links.cytoplasm_id.to_be_bytes());
        }
        None => out.push(0),
    }

    out
}

/// Decodes one `.roi` record back into an `Roi`, attributing it to
/// `image_key` with `name` (normally the entry's path components).
pub fn decode_roi(bytes: &[u8], image_key: &str, name: &str) -> Result<Roi, StoreError> {
    let entry = format!("{image_key}/{name}.roi");
    let mut cursor = Cursor::new(bytes);
    let malformed = |reason: &str| StoreError::MalformedRoi {
        entry: entry.clone(),
        reason: reason.to_string(),
    };

    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic).map_err(|_| malformed("truncated magic"))?;
    if &magic != MAGIC {
        return Err(malformed("bad magic bytes"));
    }

    let version = read_u16(&mut cursor).ok_or_else(|| malformed("truncated version"))?;
    if version != VERSION {
        return Err(malformed("unsupported version"));
    }

    let mut shape_and_category = [0u8; 2];
    cursor
        .read_exact(&mut shape_and_category)
        .map_err(|_| malformed("truncated shape/category"))?;
    let roi_type = shape_and_category[0];
    let category = byte_to_category(shape_and_category[1], &entry)?;

    let top = read_u16(&mut cursor).ok_or_else(|| malformed("truncated bounds"))?;
    let left = read_u16(&mut cursor).ok_or_else(|| malformed("truncated bounds"))?;
    let bottom = read_u16(&mut cursor).ok_or_else(|| malformed("truncated bounds"))?;
    let right = read_u16(&mut cursor).ok_or_else(|| malformed("truncated bounds"))?;
    let bounds = Rectangle::new(
        f32::from(left),
        f32::from(top),
        f32::from(right.saturating_sub(left)),
        f32::from(bottom.saturating_sub(top)),
    );

    let n = read_u16(&mut cursor).ok_or_else(|| malformed("truncated coordinate count"))?;
    skip(&mut cursor, usize::from(n) * 2).map_err(|_| malformed("truncated x offsets"))?;
    skip(&mut cursor, usize::from(n) * 2).map_err(|_| malformed("truncated y offsets"))?;

    let _stroke_color = read_u32(&mut cursor).ok_or_else(|| malformed("truncated stroke color"))?;
    let _stroke_width = read_u16(&mut cursor).ok_or_else(|| malformed("truncated stroke width"))?;
    let position = read_u32(&mut cursor).ok_or_else(|| malformed("truncated position"))?;

    let mut subpixel_flag = [0u8; 1];
    cursor
        .read_exact(&mut subpixel_flag)
        .map_err(|_| malformed("truncated subpixel flag"))?;
    if subpixel_flag[0] != 1 {
        return Err(malformed("record missing required subpixel block"));
    }
    let sub_n = read_u16(&mut cursor).ok_or_else(|| malformed("truncated subpixel count"))?;
    let mut xs = Vec::with_capacity(usize::from(sub_n));
    for _ in 0..sub_n {
        xs.push(read_f32(&mut cursor).ok_or_else(|| malformed("truncated subpixel x"))?);
    }
    let mut ys = Vec::with_capacity(usize::from(sub_n));
    for _ in 0..sub_n {
        ys.push(read_f32(&mut cursor).ok_or_else(|| malformed("truncated subpixel y"))?);
    }
    let vertices: Vec<Point> = xs.into_iter().zip(ys).map(|(x, y)| Point::new(x, y)).collect();

    let geometry = match roi_type {
        0 => {
            let polygon = Polygon::new(vertices).map_err(|source| malformed(&format!("invalid polygon: {source}")))?;
            Geometry::Polygon(polygon)
        }
        1 => Geometry::Rectangle(bounds),
        other => return Err(malformed(&format!("unsupported roi type {other}"))),
    };

    let mut ignored_byte = [0u8; 1];
    cursor
        .read_exact(&mut ignored_byte)
        .map_err(|_| malformed("truncated ignored flag"))?;

    let mut links_flag = [0u8; 1];
    cursor
        .read_exact(&mut links_flag)
        .map_err(|_| malformed("truncated links flag"))?;
    let links = if links_flag[0] == 1 {
        let nucleus_id = read_u32(&mut cursor).ok_or_else(|| malformed("truncated nucleus id"))?;
        let cytoplasm_id = read_u32(&mut cursor).ok_or_else(|| malformed("truncated cytoplasm id"))?;
        Some(CellLinks {
            nucleus_id: u64::from(nucleus_id),
            cytoplasm_id: u64::from(cytoplasm_id),
        })
    } else {
        None
    };

    let mut roi = Roi::new(u64::from(position), image_key, name, category, geometry).with_id(u64::from(position));
    roi.set_ignored(ignored_byte[0] == 1);
    if let Some(links) = links {
        roi = roi.with_links(links);
    }
    Ok(roi)
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> Option<u16> {
    let mut buf = [0u8; 2];
    cursor.read_exact(&mut buf).ok()?;
    Some(u16::from_be_bytes(buf))
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Option<u32> {
    let mut buf = [0u8; 4];
    cursor.read_exact(&mut buf).ok()?;
    Some(u32::from_be_bytes(buf))
}

fn read_f32(cursor: &mut Cursor<&[u8]>) -> Option<f32> {
    let mut buf = [0u8; 4];
    cursor.read_exact(&mut buf).ok()?;
    Some(f32::from_be_bytes(buf))
}

fn skip(cursor: &mut Cursor<&[u8]>, n: usize) -> std::io::Result<()> {
    let mut buf = vec![0u8; n];
    cursor.read_exact(&mut buf)
}

/// Writes every `(image_key, Roi)` pair into a ZIP archive at `path`,
/// one entry per ROI named `<image_key>/<roi_name>.roi`. Entries are
/// written in the iteration order `rois_by_image` provides; a fixed
/// input order yields a byte-identical archive.
///
/// # Errors
/// Returns [`StoreError::Io`] or [`StoreError::Zip`] on failure.
pub fn export_archive(path: &std::path::Path, rois_by_image: &[(String, Vec<Roi>)]) -> Result<(), StoreError> {
    let file = std::fs::File::create(path).map_err(|source| StoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (image_key, rois) in rois_by_image {
        for roi in rois {
            let entry_name = format!("{image_key}/{}.roi", roi.name());
            writer.start_file(entry_name, options)?;
            writer.write_all(&encode_roi(roi)).map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })?;
        }
    }
    writer.finish()?;
    Ok(())
}

/// Reads every `.roi` entry out of the archive at `path`. Tolerant of
/// nested zips (an entry that is itself a zip is recursed into, its
/// inner `.roi` entries attributed to the same `image_key` derived from
/// the outer entry's parent directory).
///
/// If `for_image_key` is `Some`, only entries under that image's
/// directory are decoded; otherwise every image is imported.
///
/// # Errors
/// Returns [`StoreError::Io`], [`StoreError::Zip`], or
/// [`StoreError::MalformedRoi`] on failure.
pub fn import_archive(path: &std::path::Path, for_image_key: Option<&str>) -> Result<Vec<(String, Roi)>, StoreError> {
    let file = std::fs::File::open(path).map_err(|source| StoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut archive = ZipArchive::new(file)?;
    import_from_zip(&mut archive, for_image_key)
}

fn import_from_zip<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    for_image_key: Option<&str>,
) -> Result<Vec<(String, Roi)>, StoreError> {
    let mut out = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let entry_path = entry.name().to_string();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).map_err(|source| StoreError::Io {
            path: entry_path.clone(),
            source,
        })?;

        if entry_path.ends_with(".zip") {
            let cursor = Cursor::new(bytes);
            let mut nested = ZipArchive::new(cursor)?;
            out.extend(import_from_zip(&mut nested, for_image_key)?);
            continue;
        }

        let Some(rest) = entry_path.strip_suffix(".roi") else {
            continue;
        };
        let Some((image_key, roi_name)) = rest.rsplit_once('/') else {
            continue;
        };
        if let Some(wanted) = for_image_key {
            if image_key != wanted {
                continue;
            }
        }
        let roi = decode_roi(&bytes, image_key, roi_name)?;
        out.push((image_key.to_string(), roi));
    }
    Ok(out)
}
