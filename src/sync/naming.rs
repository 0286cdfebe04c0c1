//! Local naming rules: album directories, item filenames, numbered variants.

use std::path::{Path, PathBuf};

/// Directory name for an album: keep alphanumerics (Unicode-aware), space,
/// `-` and `_`, then trim trailing whitespace.
///
/// Distinct album names may map to the same key; such albums share a
/// directory.
pub fn album_key(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    kept.trim_end().to_string()
}

/// Directory an album is stored in. Names with no usable characters fall
/// back to the album id, and then to `album`, so an album never writes into
/// the output root.
pub fn album_dir(name: &str, album_id: &str) -> String {
    [album_key(name), album_key(album_id)]
        .into_iter()
        .find(|key| !key.is_empty())
        .unwrap_or_else(|| "album".to_string())
}

/// Clean a server-suggested filename by removing characters that are invalid
/// on common filesystems: `/`, `\`, `:`, `*`, `?`, `"`, `<`, `>`, `|` and
/// control characters. Returns `None` when nothing usable is left.
pub fn clean_filename(filename: &str) -> Option<String> {
    let cleaned: String = filename
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .filter(|c| !c.is_control())
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return None;
    }
    Some(cleaned.to_string())
}

/// `photo_<4-digit index>_<id>.jpg` for items the server sent no name for.
/// `index` is the 1-based record position.
pub fn fallback_filename(index: usize, item_id: &str) -> String {
    format!("photo_{:04}_{}.jpg", index, item_id)
}

/// Name to store an item under: the cleaned server suggestion, else the
/// synthesized fallback.
pub fn item_filename(hint: Option<&str>, index: usize, item_id: &str) -> String {
    hint.and_then(clean_filename)
        .unwrap_or_else(|| fallback_filename(index, item_id))
}

/// Split into `(stem, extension)` where the extension keeps its dot.
///
/// Leading dots belong to the stem, so `.hidden` has no extension and
/// `archive.tar.gz` splits as `("archive.tar", ".gz")`.
pub fn split_extension(filename: &str) -> (&str, &str) {
    let leading_dots = filename.len() - filename.trim_start_matches('.').len();
    match filename[leading_dots..].rfind('.') {
        Some(pos) => filename.split_at(leading_dots + pos),
        None => (filename, ""),
    }
}

/// `IMG_1.jpg`, 2 → `IMG_1_2.jpg`.
pub fn numbered_variant(filename: &str, n: u32) -> String {
    let (stem, ext) = split_extension(filename);
    format!("{}_{}{}", stem, n, ext)
}

/// Stem with one trailing `_<digits>` removed: `IMG_1` → `IMG`, `IMG` → `IMG`.
pub fn original_base(stem: &str) -> &str {
    match stem.rsplit_once('_') {
        Some((base, suffix)) if is_digits(suffix) => base,
        _ => stem,
    }
}

/// Whether `stem` is `base` itself or `base_<digits>`.
pub fn is_variant_of(stem: &str, base: &str) -> bool {
    if stem == base {
        return true;
    }
    stem.strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(is_digits)
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// In-flight download path for one item. Unique per item within an album
/// run and excluded from local inventory.
pub fn temp_path(dir: &Path, index: usize, item_id: &str) -> PathBuf {
    dir.join(format!(".{:04}_{}.part", index, item_id))
}

pub fn is_temp_file(filename: &str) -> bool {
    filename.ends_with(".part")
}
