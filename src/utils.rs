use std::ffi::OsString;
use std::path::{Path, PathBuf};
use url::Url;

/// `<destination>.part.<number>`
pub fn part_file_path(destination: &Path, number: u32) -> PathBuf {
    sibling_temp_path(destination, &format!("part.{}", number))
}

/// Appends `.<suffix>` to the full file name, keeping the same directory.
pub fn sibling_temp_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

pub fn get_filename_from_url(url_str: &str) -> Option<String> {
    let url = Url::parse(url_str).ok()?;

    if let Some(segments) = url.path_segments() {
        if let Some(filename) = segments.last() {
            if !filename.is_empty() {
                return Some(filename.to_string());
            }
        }
    }

    None
}

pub fn default_filename(url_str: &str) -> String {
    get_filename_from_url(url_str)
        .map(|name| sanitize_filename(&name))
        .unwrap_or_else(|| format!("download_{}", uuid::Uuid::new_v4()))
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_', "_")
}
