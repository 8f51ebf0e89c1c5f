use regex::Regex;
use std::sync::OnceLock;

/// Below this, recognition services rarely find a match.
pub const MIN_RECOGNIZABLE_SECONDS: f64 = 1.0;

fn seconds_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d*)?|\.\d+)\s*Seconds").expect("valid seconds regex"))
}

/// Extracts the snippet length from game-stage text such as `"Stage 2 - 1.5 Seconds"`.
///
/// Returns `None` when the text carries no positive, finite duration.
pub fn parse_stage_duration(text: &str) -> Option<f64> {
    let caps = seconds_re().captures(text)?;
    let secs: f64 = caps.get(1)?.as_str().parse().ok()?;
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

pub fn is_recognizable(seconds: f64) -> bool {
    seconds >= MIN_RECOGNIZABLE_SECONDS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_seconds() {
        assert_eq!(parse_stage_duration("Stage 3: 4.5 Seconds"), Some(4.5));
        assert_eq!(parse_stage_duration("16 Seconds"), Some(16.0));
        assert_eq!(parse_stage_duration("0.1Seconds"), Some(0.1));
        assert_eq!(parse_stage_duration(".5 Seconds"), Some(0.5));
        assert_eq!(parse_stage_duration("Stage 1: .5 Seconds"), Some(0.5));
        assert_eq!(parse_stage_duration("2. Seconds"), Some(2.0));
    }

    #[test]
    fn ignores_text_without_duration() {
        assert_eq!(parse_stage_duration("Know it? Search for the title"), None);
        assert_eq!(parse_stage_duration("0 Seconds"), None);
        assert_eq!(parse_stage_duration("4.5 seconds"), None);
    }

    #[test]
    fn short_snippets_are_not_recognizable() {
        assert!(!is_recognizable(0.1));
        assert!(is_recognizable(1.0));
    }
}
