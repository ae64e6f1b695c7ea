//! Result detection over page text and candidate elements.
//!
//! Pure functions; nothing here touches a browser.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

/// Known terminal phrase found in the page text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagePhrase {
    /// The source video has no captions
    NoTranscript,
    InvalidUrl,
    /// Transient backend trouble; resubmit after a delay
    ServiceUnavailable,
    Challenge,
}

impl PagePhrase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PagePhrase::NoTranscript => "no_transcript",
            PagePhrase::InvalidUrl => "invalid_url",
            PagePhrase::ServiceUnavailable => "service_unavailable",
            PagePhrase::Challenge => "challenge",
        }
    }
}

const NO_TRANSCRIPT_PHRASES: &[&str] = &[
    "subtitles not available",
    "no subtitles",
    "no transcript",
    "transcript not available",
    "no captions available",
    "captions not available",
];

const INVALID_URL_PHRASES: &[&str] = &["invalid url", "no valid tiktok data found", "please enter a valid"];

const SERVICE_PHRASES: &[&str] = &[
    "service unavailable",
    "temporarily unavailable",
    "something went wrong",
    "error processing",
    "failed to process",
    "internal server error",
    "bad gateway",
    "gateway timeout",
];

const CHALLENGE_PHRASES: &[&str] = &[
    "captcha",
    "verify you are human",
    "are you a robot",
    "checking your browser",
    "cf-challenge",
    "unusual traffic",
];

/// Text that belongs to the page chrome rather than a transcript
const BOILERPLATE_PHRASES: &[&str] = &[
    "enter video url",
    "script.tokaudit.io",
    "transcript generator",
    "privacy policy",
    "terms of service",
    "all rights reserved",
    "accept cookies",
    "frequently asked questions",
];

fn gateway_status() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // A bare 5xx code only counts next to status wording: "503 error", "error 502", "http 504"
    RE.get_or_init(|| {
        Regex::new(r"\b50[234]\b\s*[:\-]?\s*(?:error|server error|unavailable)\b|\b(?:error|status|http|code)\s*[:\-]?\s*50[234]\b")
            .expect("gateway status regex is valid")
    })
}

/// First known phrase in the page text.
///
/// A missing-captions notice wins over everything else since it is a valid answer.
pub fn detect_phrase(page_text: &str) -> Option<(PagePhrase, &'static str)> {
    let text = page_text.to_lowercase();
    let find = |markers: &[&'static str]| markers.iter().find(|marker| text.contains(*marker)).copied();

    if let Some(marker) = find(NO_TRANSCRIPT_PHRASES) {
        return Some((PagePhrase::NoTranscript, marker));
    }
    if let Some(marker) = find(INVALID_URL_PHRASES) {
        return Some((PagePhrase::InvalidUrl, marker));
    }
    if let Some(marker) = find(SERVICE_PHRASES) {
        return Some((PagePhrase::ServiceUnavailable, marker));
    }
    if gateway_status().is_match(&text) {
        return Some((PagePhrase::ServiceUnavailable, "5xx status"));
    }
    find(CHALLENGE_PHRASES).map(|marker| (PagePhrase::Challenge, marker))
}

fn timestamp_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // 0:01, 00:01:02, 00:00:01,000 (SRT), [00:12]
    RE.get_or_init(|| Regex::new(r"\b\d{1,2}:\d{2}(?::\d{2})?(?:[.,]\d{1,3})?\b").expect("timestamp regex is valid"))
}

pub fn has_timestamp_marker(text: &str) -> bool {
    timestamp_marker().is_match(text)
}

pub fn is_boilerplate(text: &str) -> bool {
    let lower = text.to_lowercase();
    BOILERPLATE_PHRASES.iter().any(|p| lower.contains(p))
}

/// Element as reported by the candidate scan script
#[derive(Debug, Clone, Deserialize)]
pub struct RawCandidate {
    pub tag: String,
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub monospace: bool,
    /// class or id mentions transcript/result
    #[serde(default)]
    pub hint: bool,
}

/// Normalized candidate used for scoring
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub tag: String,
    pub selector: String,
    pub text: String,
    pub text_length: usize,
    pub has_timestamp_marker: bool,
    pub is_monospace: bool,
    pub hint: bool,
}

pub const TIMESTAMP_BONUS: i64 = 200;
pub const MONOSPACE_BONUS: i64 = 150;
pub const HINT_BONUS: i64 = 100;
pub const MIN_CANDIDATE_LENGTH: usize = 30;

impl Candidate {
    pub fn new(tag: impl Into<String>, text: impl Into<String>) -> Self {
        let tag = tag.into().to_lowercase();
        let text = text.into().trim().to_string();
        Self {
            is_monospace: matches!(tag.as_str(), "pre" | "code"),
            has_timestamp_marker: has_timestamp_marker(&text),
            text_length: text.chars().count(),
            selector: tag.clone(),
            tag,
            text,
            hint: false,
        }
    }

    pub fn from_raw(raw: RawCandidate) -> Self {
        let mut candidate = Self::new(raw.tag, raw.text);
        candidate.is_monospace |= raw.monospace;
        candidate.hint = raw.hint;
        if !raw.selector.is_empty() {
            candidate.selector = raw.selector;
        }
        candidate
    }

    pub fn score(&self) -> i64 {
        let mut score = self.text_length as i64;
        if self.has_timestamp_marker {
            score += TIMESTAMP_BONUS;
        }
        if self.is_monospace {
            score += MONOSPACE_BONUS;
        }
        if self.hint {
            score += HINT_BONUS;
        }
        score
    }

    pub fn qualifies(&self, min_length: usize) -> bool {
        self.text_length >= min_length && !is_boilerplate(&self.text)
    }
}

/// Highest-scoring qualifying candidate. Earlier elements win ties.
pub fn select_candidate(candidates: &[Candidate], min_length: usize) -> Option<&Candidate> {
    candidates
        .iter()
        .filter(|c| c.qualifies(min_length))
        .fold(None, |best: Option<&Candidate>, c| match best {
            Some(b) if b.score() >= c.score() => Some(b),
            _ => Some(c),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_phrases_case_insensitively() {
        assert_eq!(
            detect_phrase("Oops! Subtitles Not Available for this clip").map(|p| p.0),
            Some(PagePhrase::NoTranscript)
        );
        assert_eq!(detect_phrase("Invalid URL, try again").map(|p| p.0), Some(PagePhrase::InvalidUrl));
        assert_eq!(
            detect_phrase("503 Service Unavailable").map(|p| p.0),
            Some(PagePhrase::ServiceUnavailable)
        );
        assert_eq!(
            detect_phrase("Please complete the CAPTCHA").map(|p| p.0),
            Some(PagePhrase::Challenge)
        );
        assert_eq!(detect_phrase("Paste a link and press START"), None);
    }

    #[test]
    fn test_status_codes_need_status_wording() {
        for text in ["Error 502", "HTTP 504", "503 error, try later", "status: 503"] {
            assert_eq!(
                detect_phrase(text).map(|p| p.0),
                Some(PagePhrase::ServiceUnavailable),
                "{text}"
            );
        }
        for text in [
            "Video 7350312345 by @creator",
            "https://www.tiktok.com/@user/video/7503123456789",
            "1,503 views",
            "Posted 2025-03-04, 504 likes",
        ] {
            assert_eq!(detect_phrase(text), None, "{text}");
        }
    }

    #[test]
    fn test_no_transcript_wins_over_other_markers() {
        let text = "Something went wrong? No. Subtitles Not Available.";
        assert_eq!(detect_phrase(text).map(|p| p.0), Some(PagePhrase::NoTranscript));
    }

    #[test]
    fn test_timestamp_marker() {
        assert!(has_timestamp_marker("[00:12] hello there"));
        assert!(has_timestamp_marker("00:00:01,000 --> 00:00:02,000"));
        assert!(!has_timestamp_marker("no markers in here at all"));
    }

    #[test]
    fn test_scoring_bonuses() {
        let plain = Candidate::new("div", "a".repeat(100));
        assert_eq!(plain.score(), 100);

        let pre = Candidate::new("pre", "a".repeat(100));
        assert_eq!(pre.score(), 100 + MONOSPACE_BONUS);

        let stamped = Candidate::new("div", format!("0:01 {}", "a".repeat(95)));
        assert_eq!(stamped.score(), 100 + TIMESTAMP_BONUS);
    }

    #[test]
    fn test_select_prefers_structured_over_longer_prose() {
        let prose = Candidate::new("div", "word ".repeat(60));
        let transcript = Candidate::new("pre", "0:01 hello world this is the transcript body");
        let candidates = vec![prose, transcript.clone()];
        let chosen = select_candidate(&candidates, MIN_CANDIDATE_LENGTH).unwrap();
        assert_eq!(chosen.text, transcript.text);
    }

    #[test]
    fn test_select_skips_short_and_boilerplate() {
        let short = Candidate::new("pre", "too short");
        let chrome = Candidate::new("div", "Enter Video Url above and press start to begin the process");
        assert!(select_candidate(&[short.clone(), chrome], MIN_CANDIDATE_LENGTH).is_none());

        let ok = Candidate::new("div", "this sentence is comfortably longer than thirty characters");
        assert_eq!(select_candidate(&[short, ok.clone()], MIN_CANDIDATE_LENGTH), Some(&ok));
    }

    #[test]
    fn test_raw_candidate_flags() {
        let raw: RawCandidate = serde_json::from_str(
            r#"{"tag":"DIV","selector":"div#transcript","text":"  hi  ","monospace":true,"hint":true}"#,
        )
        .unwrap();
        let candidate = Candidate::from_raw(raw);
        assert_eq!(candidate.tag, "div");
        assert_eq!(candidate.text_length, 2);
        assert!(candidate.is_monospace);
        assert!(candidate.hint);
        assert_eq!(candidate.selector, "div#transcript");
    }
}
