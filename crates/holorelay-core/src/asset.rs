//! Received file names: sanitization, logical names and classification
//!
//! Every file that arrives on the transfer channel is stored under its
//! sanitized name. The name also decides what happens next:
//! - a recognized model extension queues a load under its logical name
//! - the reserved name-list file replaces the skin part names
//! - anything else is stored and left alone

use std::path::Path;

/// Characters rejected by at least one common host filesystem
const INVALID_FILE_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Strip characters that are invalid in a file name and trim whitespace
pub fn sanitize_file_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() && !INVALID_FILE_NAME_CHARS.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Whether a sanitized name can be used as a file inside the storage root
pub fn is_storable_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".."
}

/// Registry key for a file: extension stripped, lower-cased
///
/// `Skin.OBJ` and `skin.obj` both map to `skin`.
pub fn logical_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| file_name.to_lowercase())
}

/// What a received file turns into once it is on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetKind {
    /// Loadable 3D model, carries the logical name
    Model(String),
    /// Replacement list of skin part names
    NameList,
    /// Stored only
    Other,
}

/// Rules used to classify received files
#[derive(Debug, Clone)]
pub struct AssetRules {
    /// Model extensions without the leading dot, compared case-insensitively
    pub model_extensions: Vec<String>,
    /// Reserved name-list file, compared case-insensitively
    pub name_list_file: String,
}

impl Default for AssetRules {
    fn default() -> Self {
        Self {
            model_extensions: vec!["obj".to_string()],
            name_list_file: "name.txt".to_string(),
        }
    }
}

impl AssetRules {
    /// Classify a sanitized file name
    pub fn classify(&self, file_name: &str) -> AssetKind {
        if file_name.eq_ignore_ascii_case(&self.name_list_file) {
            return AssetKind::NameList;
        }

        let extension = Path::new(file_name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_string());

        match extension {
            Some(ext)
                if self
                    .model_extensions
                    .iter()
                    .any(|known| known.trim_start_matches('.').eq_ignore_ascii_case(&ext)) =>
            {
                AssetKind::Model(logical_name(file_name))
            }
            _ => AssetKind::Other,
        }
    }
}

/// Parse name-list content: one name per line, trimmed, blank lines dropped
pub fn parse_name_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
