//! Decoding of the packed `moments` blob returned with album detail.
//!
//! The blob is a concatenation of fixed-width records. Each record carries a
//! zero-padded item id at a fixed offset; nothing else in the record is used.

use std::collections::HashMap;

/// Width of one moment record, in characters.
pub const RECORD_LEN: usize = 277;
/// Offset of the id field inside a record.
pub const ID_OFFSET: usize = 9;
/// Width of the zero-padded id field.
pub const ID_LEN: usize = 16;

/// Slice `blob` into records and return one id per record, in order.
///
/// A trailing partial record still yields an id (possibly truncated or
/// empty). Leading `'0'` characters are stripped, so an all-zero field
/// decodes to `""`. Never fails.
pub fn decode_moment_ids(blob: &str) -> Vec<String> {
    let chars: Vec<char> = blob.chars().collect();
    chars
        .chunks(RECORD_LEN)
        .map(|record| {
            let start = ID_OFFSET.min(record.len());
            let end = (ID_OFFSET + ID_LEN).min(record.len());
            record[start..end]
                .iter()
                .skip_while(|c| **c == '0')
                .collect()
        })
        .collect()
}

/// An id that appears more than once in a decoded list.
/// Positions are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateId {
    pub id: String,
    pub first: usize,
    pub repeat: usize,
}

/// Report every repeat occurrence of an id, paired with where it first appeared.
pub fn duplicate_ids(ids: &[String]) -> Vec<DuplicateId> {
    let mut first_seen: HashMap<&str, usize> = HashMap::with_capacity(ids.len());
    let mut dups = Vec::new();
    for (i, id) in ids.iter().enumerate() {
        let pos = i + 1;
        match first_seen.get(id.as_str()) {
            Some(&first) => dups.push(DuplicateId {
                id: id.clone(),
                first,
                repeat: pos,
            }),
            None => {
                first_seen.insert(id, pos);
            }
        }
    }
    dups
}
