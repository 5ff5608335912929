use anyhow::{Result, anyhow};
use std::path::Path;

/// Upper bound on renames tried by [`unique_filename`]
pub const MAX_RENAME_ATTEMPTS: usize = 1000;

/// Reduces a client-supplied filename to a single safe path component.
/// Returns None when nothing usable is left.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    // Browsers on Windows may send the full client path
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim();

    if name != filename.trim() {
        tracing::warn!("Path components stripped from upload name: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Limit length safely for UTF-8
    let sanitized = if sanitized.len() > 255 {
        let mut end = 255;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    match sanitized.as_str() {
        "" | "." | ".." => None,
        _ => Some(sanitized),
    }
}

/// Next candidate after `filename` collided: `a.b.jpg` becomes `a.b_.jpg`,
/// `README` becomes `README_`.
pub fn disambiguate(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}_.{ext}"),
        None => format!("{filename}_"),
    }
}

/// Returns `filename` if nothing exists at `dir/filename`, otherwise the first
/// free name produced by repeatedly applying [`disambiguate`].
///
/// The existence check and the later create are not atomic. Staging areas
/// are private to one request, which makes the race harmless here.
pub async fn unique_filename(dir: &Path, filename: &str) -> Result<String> {
    let mut candidate = filename.to_string();

    for _ in 0..MAX_RENAME_ATTEMPTS {
        if !tokio::fs::try_exists(dir.join(&candidate)).await? {
            return Ok(candidate);
        }
        candidate = disambiguate(&candidate);
    }

    Err(anyhow!(
        "No free name for {} in {} after {} attempts",
        filename,
        dir.display(),
        MAX_RENAME_ATTEMPTS
    ))
}
