//! Layered file equivalence: size, then decoded pixels for images, then bytes.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use image::{DynamicImage, ImageReader};

use super::exif::read_orientation;

const CHUNK_SIZE: usize = 8192;
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Outcome of comparing two files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Identical,
    SizeDiffers,
    /// Both decode as images but the oriented RGB pixels differ.
    PixelsDiffer,
    /// Same size, bytes differ (and pixels weren't conclusive).
    ContentDiffers,
}

impl Comparison {
    pub fn is_identical(self) -> bool {
        self == Comparison::Identical
    }
}

/// Compare two files for content equivalence.
///
/// Images whose oriented pixels match count as identical even when their
/// bytes (e.g. metadata) differ. When either image fails to decode the
/// comparison falls back to bytes. I/O errors on either file are returned,
/// never reported as a difference.
pub fn compare_files(a: &Path, b: &Path) -> io::Result<Comparison> {
    compare_as(a, b, is_image(a) && is_image(b))
}

/// [`compare_files`] with the image decision made by the caller, for files
/// whose on-disk name (e.g. a `.part` temp) doesn't carry the real extension.
pub fn compare_as(a: &Path, b: &Path, decode_images: bool) -> io::Result<Comparison> {
    let size_a = std::fs::metadata(a)?.len();
    let size_b = std::fs::metadata(b)?.len();
    if size_a != size_b {
        return Ok(Comparison::SizeDiffers);
    }

    if decode_images {
        match compare_pixels(a, b) {
            Ok(true) => return Ok(Comparison::Identical),
            Ok(false) => return Ok(Comparison::PixelsDiffer),
            Err(e) => {
                tracing::debug!(
                    "Pixel comparison of {} and {} failed, comparing bytes: {}",
                    a.display(),
                    b.display(),
                    e
                );
            }
        }
    }

    compare_bytes(a, b)
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|x| ext.eq_ignore_ascii_case(x)))
}

fn compare_pixels(a: &Path, b: &Path) -> image::ImageResult<bool> {
    let img_a = load_oriented(a)?;
    let img_b = load_oriented(b)?;
    Ok(same_pixels(&img_a, &img_b))
}

fn load_oriented(path: &Path) -> image::ImageResult<DynamicImage> {
    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(apply_orientation(img, read_orientation(path)))
}

/// Rotate per EXIF orientation: 3 → 180°, 6 → 90° cw, 8 → 270° cw.
/// Mirrored orientations (2, 4, 5, 7) are left as-is.
pub fn apply_orientation(img: DynamicImage, orientation: Option<u32>) -> DynamicImage {
    match orientation {
        Some(3) => img.rotate180(),
        Some(6) => img.rotate90(),
        Some(8) => img.rotate270(),
        _ => img,
    }
}

/// Dimensions first, then the RGB8 buffers (alpha dropped).
pub fn same_pixels(a: &DynamicImage, b: &DynamicImage) -> bool {
    if a.width() != b.width() || a.height() != b.height() {
        return false;
    }
    let rgb_a = a.to_rgb8();
    let rgb_b = b.to_rgb8();
    rgb_a.as_raw() == rgb_b.as_raw()
}

fn compare_bytes(a: &Path, b: &Path) -> io::Result<Comparison> {
    let mut file_a = File::open(a)?;
    let mut file_b = File::open(b)?;
    let mut buf_a = [0u8; CHUNK_SIZE];
    let mut buf_b = [0u8; CHUNK_SIZE];
    loop {
        let n_a = read_full(&mut file_a, &mut buf_a)?;
        let n_b = read_full(&mut file_b, &mut buf_b)?;
        if buf_a[..n_a] != buf_b[..n_b] {
            return Ok(Comparison::ContentDiffers);
        }
        if n_a == 0 {
            return Ok(Comparison::Identical);
        }
    }
}

/// `read` until the buffer is full or EOF; short reads would otherwise
/// misalign the two streams.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
