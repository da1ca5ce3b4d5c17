//! Minute arithmetic, locale-ambiguous number parsing and workplace code
//! normalisation (§4.1).

use chrono::{Datelike, NaiveDateTime};

/// Industrial minutes are 0.6 real minutes; every real-minute quantity that
/// needs to be reported in the shop's "industrial minute" unit goes through
/// this constant.
pub const INDUSTRIAL_FACTOR: f64 = 0.6;

pub type Timestamp = NaiveDateTime;

/// Whole minutes between `a` and `b`. Negative if `b` precedes `a`. Floors
/// towards negative infinity the way `timedelta // 60s` does in the source
/// system, i.e. partial minutes are truncated towards zero duration.
pub fn minutes_between(a: Timestamp, b: Timestamp) -> i64 {
    (b - a).num_seconds().div_euclid(60)
}

/// A deadline only participates in lateness scoring if its year is 2025 or
/// later; earlier years are cleaning artefacts (unset dates default to the
/// epoch) rather than real deadlines.
pub fn is_effective_deadline(ts: Option<Timestamp>) -> bool {
    ts.is_some_and(|t| t.year() >= 2025)
}

/// Parse a possibly locale-ambiguous decimal number.
///
/// Detection rule: if only a comma separator is present, it is the decimal
/// separator. If both `,` and `.` are present, whichever is rightmost is the
/// decimal separator and the other is a thousands separator. If only `.` (or
/// neither) is present, standard parsing applies.
pub fn parse_locale_number(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let last_comma = s.rfind(',');
    let last_dot = s.rfind('.');

    let normalized = match (last_comma, last_dot) {
        (Some(_), None) => s.replace(',', "."),
        (Some(ci), Some(di)) if ci > di => {
            // thousands-dot, decimal-comma: "1.234,56"
            s.replace('.', "").replace(',', ".")
        }
        (Some(_), Some(_)) => {
            // thousands-comma, decimal-dot: "1,234.56"
            s.replace(',', "")
        }
        (None, _) => s.to_string(),
    };

    normalized.parse::<f64>().ok()
}

/// Strip, fold dash variants to ASCII `-`, strip zero-width characters,
/// upper-case. Mirrors the cleaning layer's `normalize_wp` plus the
/// dash/zero-width hardening the window builder re-applies defensively.
pub fn normalize_workplace(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        match ch {
            '\u{2010}'..='\u{2015}' | '\u{2012}' | '–' | '—' => out.push('-'),
            '\u{200B}'..='\u{200D}' | '\u{FEFF}' => {}
            other => out.push(other),
        }
    }
    out.trim().to_uppercase()
}
