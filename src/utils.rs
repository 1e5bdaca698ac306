use anyhow::{Context, Result};
use percent_encoding::percent_decode_str;
use url::Url;

/// Last non-empty path segment of the URL, percent-decoded.
pub fn get_filename_from_url(url_str: &str) -> Result<String> {
    let url = Url::parse(url_str).with_context(|| format!("Invalid URL: {}", url_str))?;

    let name = url
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|segment| !segment.is_empty())
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned());

    // Fallback if no filename found in path
    Ok(name.unwrap_or_else(|| format!("download_{}", uuid::Uuid::new_v4())))
}

pub fn sanitize_filename(filename: &str) -> String {
    let cleaned = filename.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_', "_");
    if cleaned.chars().all(|c| c == '.') {
        // "." and ".." would name a directory, not a file.
        return format!("download_{}", uuid::Uuid::new_v4());
    }
    cleaned
}
