//! Window builder (C3, §4.3): clamps shift windows to "now", merges
//! overlaps per machine, and initialises cursors.

use std::collections::HashMap;

use crate::model::Window;
use crate::time::Timestamp;

/// Per-machine ordered shift windows plus the globals the dispatcher needs
/// to compute earliest-start times.
#[derive(Clone)]
pub struct WindowSet {
    pub by_machine: HashMap<String, Vec<Window>>,
    pub earliest_global: Timestamp,
    pub first_start_by_machine: HashMap<String, Timestamp>,
}

/// Build windows from raw `(workplace, start, end)` shift rows.
///
/// `now` is the reference instant: windows ending at or before it are
/// dropped entirely, windows straddling it are clamped so they start at
/// `now`, and all surviving windows are merged per machine when overlapping
/// or abutting (§4.3).
pub fn build_windows(shifts: &[(String, Timestamp, Timestamp)], now: Timestamp) -> WindowSet {
    let mut by_raw_machine: HashMap<String, Vec<(Timestamp, Timestamp)>> = HashMap::new();

    for (workplace, start, end) in shifts {
        if *end <= now {
            continue;
        }
        let clamped_start = if *start < now { now } else { *start };
        if clamped_start < *end {
            by_raw_machine
                .entry(workplace.clone())
                .or_default()
                .push((clamped_start, *end));
        }
    }

    let mut by_machine = HashMap::new();
    let mut first_start_by_machine = HashMap::new();
    let mut earliest_global: Option<Timestamp> = None;

    for (machine, mut intervals) in by_raw_machine {
        intervals.sort_by_key(|(s, _)| *s);

        let mut merged: Vec<(Timestamp, Timestamp)> = Vec::with_capacity(intervals.len());
        for (s, e) in intervals {
            match merged.last_mut() {
                Some((_, last_e)) if s <= *last_e => {
                    if e > *last_e {
                        *last_e = e;
                    }
                }
                _ => merged.push((s, e)),
            }
        }

        let windows: Vec<Window> = merged
            .into_iter()
            .filter(|(s, e)| e > s)
            .map(|(s, e)| Window::new(s, e))
            .collect();

        if let Some(first) = windows.first() {
            first_start_by_machine.insert(machine.clone(), first.start);
            earliest_global = Some(match earliest_global {
                Some(cur) => cur.min(first.start),
                None => first.start,
            });
        }

        by_machine.insert(machine, windows);
    }

    WindowSet {
        by_machine,
        earliest_global: earliest_global.unwrap_or(now),
        first_start_by_machine,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveDate;

    fn dt(h: u32, m: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn drops_windows_fully_in_the_past() {
        let now = dt(10, 0);
        let shifts = vec![("M1".to_string(), dt(6, 0), dt(8, 0))];
        let ws = build_windows(&shifts, now);
        assert!(ws.by_machine.get("M1").unwrap().is_empty());
    }

    #[test]
    fn clamps_straddling_window_to_now() {
        let now = dt(10, 0);
        let shifts = vec![("M1".to_string(), dt(8, 0), dt(12, 0))];
        let ws = build_windows(&shifts, now);
        let wins = &ws.by_machine["M1"];
        assert_eq!(wins.len(), 1);
        assert_eq!(wins[0].start, now);
        assert_eq!(wins[0].cursor, now);
        assert_eq!(wins[0].end, dt(12, 0));
    }

    #[test]
    fn merges_overlapping_and_abutting_windows() {
        let now = dt(0, 0);
        let shifts = vec![
            ("M1".to_string(), dt(10, 0), dt(12, 0)),
            ("M1".to_string(), dt(12, 0), dt(14, 0)), // abutting
            ("M1".to_string(), dt(13, 0), dt(15, 0)), // overlapping
        ];
        let ws = build_windows(&shifts, now);
        let wins = &ws.by_machine["M1"];
        assert_eq!(wins.len(), 1);
        assert_eq!(wins[0].start, dt(10, 0));
        assert_eq!(wins[0].end, dt(15, 0));
    }

    #[test]
    fn tracks_earliest_global_and_first_start_per_machine() {
        let now = dt(0, 0);
        let shifts = vec![
            ("M1".to_string(), dt(11, 0), dt(12, 0)),
            ("M2".to_string(), dt(9, 0), dt(10, 0)),
        ];
        let ws = build_windows(&shifts, now);
        assert_eq!(ws.earliest_global, dt(9, 0));
        assert_eq!(ws.first_start_by_machine["M1"], dt(11, 0));
        assert_eq!(ws.first_start_by_machine["M2"], dt(9, 0));
    }
}
