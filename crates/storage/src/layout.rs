//! On-storage layout: `<database>/<category>/<NNNN>.json`.

use derive_more::Display;
use std::path::PathBuf;

/// Numeric identifier of a file within a category (`0001.json` is `1`).
///
/// Zero is never a file; it stands for "no files yet".
pub type FileNumber = u32;

/// Largest number expressible with the four-digit naming convention.
pub const MAX_FILE_NUMBER: FileNumber = 9999;

/// How the files of a category are shaped, and therefore merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Each file holds a whole JSON object; the latest file replaces the rest.
    Object,
    /// Each file holds a JSON array; files accumulate in upload order.
    Array,
}

/// A data category, i.e. a sub-folder of every database folder.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    #[display("databases")]
    Databases,
    #[display("messages")]
    Messages,
    #[display("results")]
    Results,
    #[display("sponsors")]
    Sponsors,
}
impl Category {
    pub const ALL: [Category; 4] = [Self::Databases, Self::Messages, Self::Results, Self::Sponsors];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Databases => "databases",
            Self::Messages => "messages",
            Self::Results => "results",
            Self::Sponsors => "sponsors",
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            Self::Databases | Self::Sponsors => Shape::Object,
            Self::Messages | Self::Results => Shape::Array,
        }
    }
}

/// File name for a file number, zero-padded to four digits.
///
/// ```
/// assert_eq!(tally_storage::file_name(7), "0007.json");
/// ```
pub fn file_name(number: FileNumber) -> String {
    format!("{number:04}.json")
}

/// Parse a file name following the strict `NNNN.json` convention.
///
/// Anything else (wrong digit count, signs, other extensions, sub-paths)
/// is not a data file and yields `None`.
pub fn parse_file_number(name: &str) -> Option<FileNumber> {
    let digits = name.strip_suffix(".json")?;
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Key of a category sub-folder.
pub(crate) fn category_key(folder: &str, category: Category) -> PathBuf {
    PathBuf::from(folder).join(category.as_str())
}

/// Full key of a numbered file.
pub fn file_key(folder: &str, category: Category, number: FileNumber) -> PathBuf {
    category_key(folder, category).join(file_name(number))
}
