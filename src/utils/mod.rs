use regex::Regex;
use std::sync::OnceLock;
use url::Url;

use crate::error::{ErrorKind, ProviderError};

fn url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"'`]+"#).expect("url regex is valid"))
}

/// First http(s) URL inside shared text, without trailing punctuation
pub fn extract_url(text: &str) -> Option<String> {
    url_pattern()
        .find(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', ')', ']']).to_string())
}

fn invalid(message: impl Into<String>) -> ProviderError {
    ProviderError::new(ErrorKind::Validation, message)
}

/// Validate a shared video link and return its canonical form.
///
/// Accepts free text containing a link, unwraps one level of `url=` deep link, drops `utm_*`
/// parameters and the fragment. Anything that is not an http(s) URL with a host is rejected.
pub fn normalize_url(input: &str) -> Result<String, ProviderError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty URL"));
    }
    let candidate = extract_url(trimmed).unwrap_or_else(|| trimmed.to_string());
    let mut parsed = Url::parse(&candidate).map_err(|_| invalid(format!("Invalid URL format: {trimmed}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("URL must use HTTP or HTTPS protocol"));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid(format!("URL has no host: {trimmed}")));
    }

    let nested = parsed
        .query_pairs()
        .find(|(key, value)| key == "url" && (value.starts_with("http://") || value.starts_with("https://")))
        .map(|(_, value)| value.into_owned());
    if let Some(inner) = nested {
        parsed = Url::parse(&inner).map_err(|_| invalid(format!("Invalid nested URL: {inner}")))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(invalid("nested URL must use HTTP or HTTPS protocol"));
        }
    }

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !key.to_ascii_lowercase().starts_with("utm_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }
    parsed.set_fragment(None);

    Ok(parsed.to_string())
}

/// Stable key for persistence: numeric video id, else short-link code, else the URL itself
pub fn video_id(normalized: &str) -> String {
    let Ok(parsed) = Url::parse(normalized) else {
        return normalized.to_string();
    };
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    if let Some(pos) = segments.iter().position(|seg| *seg == "video") {
        if let Some(id) = segments.get(pos + 1) {
            if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
                return id.to_string();
            }
        }
    }

    let host = parsed.host_str().unwrap_or_default();
    let short_host = host.starts_with("vm.") || host.starts_with("vt.");
    match segments.as_slice() {
        [code, ..] if short_host => code.to_string(),
        ["t", code, ..] => code.to_string(),
        _ => normalized.to_string(),
    }
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Elapsed milliseconds for display; sub-minute values keep one decimal
pub fn format_elapsed(millis: u64) -> String {
    match millis {
        0..=999 => format!("{millis}ms"),
        1_000..=59_999 => format!("{:.1}s", millis as f64 / 1000.0),
        _ => format_duration(millis as f64 / 1000.0),
    }
}

/// Sanitize filename for safe filesystem usage
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            c if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' => c,
            _ => '_',
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

/// Generate a unique filename with timestamp
pub fn generate_unique_filename(base_name: &str, extension: &str) -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let random_suffix = uuid::Uuid::new_v4().simple().to_string();

    format!(
        "transcript_{}_{}_{}.{}",
        sanitize_filename(base_name),
        timestamp,
        &random_suffix[..8],
        extension
    )
}

/// Extract domain from URL for display purposes
pub fn extract_domain(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .map(|host| host.strip_prefix("www.").unwrap_or(host).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_url_from_shared_text() {
        assert_eq!(
            extract_url("Check this out! https://vm.tiktok.com/ABC123/ #fyp"),
            Some("https://vm.tiktok.com/ABC123/".to_string())
        );
        assert_eq!(
            extract_url("(https://www.tiktok.com/@a/video/1)."),
            Some("https://www.tiktok.com/@a/video/1".to_string())
        );
        assert_eq!(extract_url("no link here"), None);
    }

    #[test]
    fn test_normalize_keeps_short_link() {
        assert_eq!(
            normalize_url("https://vm.tiktok.com/ABC123/").unwrap(),
            "https://vm.tiktok.com/ABC123/"
        );
    }

    #[test]
    fn test_normalize_strips_tracking_and_fragment() {
        assert_eq!(
            normalize_url("https://WWW.TikTok.com/@user/video/7234?utm_source=share&lang=en#top").unwrap(),
            "https://www.tiktok.com/@user/video/7234?lang=en"
        );
        assert_eq!(
            normalize_url("https://www.tiktok.com/@user/video/7234?utm_campaign=x").unwrap(),
            "https://www.tiktok.com/@user/video/7234"
        );
    }

    #[test]
    fn test_normalize_unwraps_deep_link() {
        let wrapped = "https://share.example.com/open?url=https%3A%2F%2Fvm.tiktok.com%2FXYZ%2F";
        assert_eq!(normalize_url(wrapped).unwrap(), "https://vm.tiktok.com/XYZ/");
    }

    #[test]
    fn test_normalize_rejects_bad_input() {
        for bad in ["", "   ", "not-a-url", "ftp://example.com/file", "mailto:someone@example.com"] {
            let err = normalize_url(bad).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Validation, "{bad}");
        }
    }

    #[test]
    fn test_video_id() {
        assert_eq!(video_id("https://www.tiktok.com/@user/video/7234567890"), "7234567890");
        assert_eq!(video_id("https://vm.tiktok.com/ABC123/"), "ABC123");
        assert_eq!(video_id("https://www.tiktok.com/t/ZT8abc/"), "ZT8abc");
        assert_eq!(video_id("https://example.com/clip"), "https://example.com/clip");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.0), "30s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m 1s");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(850), "850ms");
        assert_eq!(format_elapsed(2_340), "2.3s");
        assert_eq!(format_elapsed(65_000), "1m 5s");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Hello World!"), "Hello_World");
        assert_eq!(sanitize_filename("test/file?name"), "test_file_name");
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain("https://www.tiktok.com/@a/video/1"), Some("tiktok.com".to_string()));
        assert_eq!(extract_domain("invalid-url"), None);
    }
}
