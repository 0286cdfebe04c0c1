use std::path::Path;

/// Read the EXIF `Orientation` tag (1-8) from an image file.
///
/// Returns `None` when the file can't be opened, has no EXIF data, or the
/// tag is missing. Callers treat that as "no rotation".
pub fn read_orientation(path: &Path) -> Option<u32> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!("Cannot open {} for EXIF: {}", path.display(), e);
            return None;
        }
    };
    let mut bufreader = std::io::BufReader::new(&file);
    let exif_reader = exif::Reader::new();

    match exif_reader.read_from_container(&mut bufreader) {
        Ok(exif_data) => exif_data
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0)),
        Err(e) => {
            tracing::debug!("No EXIF data in {}: {}", path.display(), e);
            None
        }
    }
}
