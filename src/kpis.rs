//! Aggregate KPI derivation (C8, §4.8 expansion): turns the raw placement,
//! order-delivery and lateness rows into the day-band percentages and
//! headline numbers `report.rs` writes out. Grace-day bands, idle-time
//! columns and shift-time-delay all get their own function here, mirroring
//! the separate derivations the source system keeps apart rather than
//! folding everything into one pass.

use std::collections::HashMap;

use crate::model::{MachineSets, Op, OrderDeliveryRow, PlacementRecord};
use crate::time::{self, Timestamp, INDUSTRIAL_FACTOR};
use crate::windows::WindowSet;

/// A non-effective deadline (or no actual delivery to compare against)
/// always counts as on-time rather than being excluded from the denominator
/// (§4.8 "grace bands", `INCLUDE_NON_EFFECTIVE_IN_ONTIME`).
pub const INCLUDE_NON_EFFECTIVE_IN_ONTIME: bool = true;

/// Percentage of a population that starts/delivers on time, within each of
/// the 0-7 day grace bands, or beyond 7 days (§4.8, §6).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DayBandKpis {
    pub on_time: f64,
    pub within_1d: f64,
    pub within_2d: f64,
    pub within_3d: f64,
    pub within_4d: f64,
    pub within_5d: f64,
    pub within_6d: f64,
    pub within_7d: f64,
    pub beyond_7d: f64,
}

impl DayBandKpis {
    fn set_day(&mut self, day: u32, pct: f64) {
        match day {
            0 => self.on_time = pct,
            1 => self.within_1d = pct,
            2 => self.within_2d = pct,
            3 => self.within_3d = pct,
            4 => self.within_4d = pct,
            5 => self.within_5d = pct,
            6 => self.within_6d = pct,
            7 => self.within_7d = pct,
            _ => unreachable!(),
        }
    }
}

fn day_bands(pairs: &[(Timestamp, Option<Timestamp>)]) -> DayBandKpis {
    let mut out = DayBandKpis::default();
    if pairs.is_empty() {
        return out;
    }

    let denom = pairs.len() as f64;

    for day in 0..=7u32 {
        let grace = chrono::Duration::days(day as i64);
        let mut count = 0usize;
        for (actual, target) in pairs {
            match target {
                Some(t) => {
                    if *actual <= *t + grace {
                        count += 1;
                    }
                }
                None => {
                    if INCLUDE_NON_EFFECTIVE_IN_ONTIME {
                        count += 1;
                    }
                }
            }
        }
        out.set_day(day, count as f64 / denom * 100.0);
    }

    let grace7 = chrono::Duration::days(7);
    let beyond = pairs
        .iter()
        .filter(|(actual, target)| target.is_some_and(|t| *actual > t + grace7))
        .count();
    out.beyond_7d = beyond as f64 / denom * 100.0;
    out
}

/// Op-level day bands: every placement's `start` against its
/// `latest_start_date`, ineffective deadlines folded in per
/// `INCLUDE_NON_EFFECTIVE_IN_ONTIME` (§4.8).
pub fn compute_op_day_bands(placements: &[PlacementRecord]) -> DayBandKpis {
    let pairs: Vec<(Timestamp, Option<Timestamp>)> = placements
        .iter()
        .map(|p| (p.start, p.latest_start_date))
        .collect();
    day_bands(&pairs)
}

/// Order-level day bands: every order's actual delivery against its
/// supposed delivery date. Orders with no actual delivery yet (not fully
/// placed) are excluded entirely rather than counted as on-time (§4.8).
pub fn compute_order_day_bands(orders: &[OrderDeliveryRow]) -> DayBandKpis {
    let pairs: Vec<(Timestamp, Option<Timestamp>)> = orders
        .iter()
        .filter_map(|o| {
            let actual = o.delivery_after_scheduling?;
            let target = o
                .supposed_delivery_date
                .filter(|d| time::is_effective_deadline(Some(*d)));
            Some((actual, target))
        })
        .collect();
    day_bands(&pairs)
}

fn overlap_minutes(a0: Timestamp, a1: Timestamp, b0: Timestamp, b1: Timestamp) -> i64 {
    let s = a0.max(b0);
    let e = a1.min(b1);
    if e <= s {
        0
    } else {
        time::minutes_between(s, e)
    }
}

/// Sum of shift-covered minutes in `[t0, t1)` against a machine's raw,
/// unclamped, unmerged shift windows (§4.8 "idle before").
fn cap_minutes(wins: &[(Timestamp, Timestamp)], t0: Timestamp, t1: Timestamp) -> i64 {
    if t1 <= t0 {
        return 0;
    }
    let mut total = 0;
    for (a, b) in wins {
        if *b <= t0 {
            continue;
        }
        if *a >= t1 {
            break;
        }
        total += overlap_minutes(t0, t1, *a, *b);
    }
    total
}

/// Post-dispatch derivation of `idle_before_real`/`idle_before_industrial`
/// on every placement: the shift-covered minutes a machine sat idle between
/// the previous op's end (or the first shift start, for the first op) and
/// this op's start. Deliberately run against the raw, pre-clamp shift rows
/// rather than the dispatcher's merged `WindowSet`, matching how the source
/// system keeps this a separate derivation from the placement pass itself
/// (§4.8).
pub fn add_idle_before(
    placements: &mut [PlacementRecord],
    raw_shifts: &[(String, Timestamp, Timestamp)],
    machines: &MachineSets,
) {
    let mut windows_by_machine: HashMap<&str, Vec<(Timestamp, Timestamp)>> = HashMap::new();
    for (workplace, start, end) in raw_shifts {
        windows_by_machine
            .entry(workplace.as_str())
            .or_default()
            .push((*start, *end));
    }
    for wins in windows_by_machine.values_mut() {
        wins.sort_by_key(|(s, _)| *s);
    }

    let mut by_machine: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, p) in placements.iter().enumerate() {
        by_machine.entry(p.workplace.as_str()).or_default().push(idx);
    }

    for (workplace, mut indices) in by_machine {
        indices.sort_by_key(|&i| placements[i].start);
        let is_unlimited = machines.is_unlimited(workplace);
        let wins = windows_by_machine.get(workplace);
        let mut prev_end: Option<Timestamp> = None;

        for idx in indices {
            let idle = if is_unlimited {
                0
            } else {
                match (prev_end, wins) {
                    (None, Some(w)) if !w.is_empty() => {
                        cap_minutes(w, w[0].0, placements[idx].start)
                    }
                    (None, _) => 0,
                    (Some(end), Some(w)) => cap_minutes(w, end, placements[idx].start),
                    (Some(_), None) => 0,
                }
            };
            placements[idx].idle_before_real = idle;
            placements[idx].idle_before_industrial = (idle as f64 / INDUSTRIAL_FACTOR).round() as i64;
            prev_end = Some(placements[idx].end);
        }
    }
}

/// Total machine-idle minutes that fall inside a shift window, summed
/// across every gap between consecutive placements on the same machine
/// (§4.8 "shift-time delay"). Unlike [`add_idle_before`], this runs against
/// the dispatcher's already-clamped-and-merged [`WindowSet`], since it's
/// measuring idle time during the run rather than before it started.
pub fn sum_delay_in_shift_minutes(placements: &[PlacementRecord], windows: &WindowSet) -> (i64, i64) {
    let mut by_machine: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, p) in placements.iter().enumerate() {
        by_machine.entry(p.workplace.as_str()).or_default().push(idx);
    }

    let mut total_real = 0i64;
    for (workplace, mut indices) in by_machine {
        if indices.len() < 2 {
            continue;
        }
        indices.sort_by_key(|&i| placements[i].start);
        let Some(wins) = windows.by_machine.get(workplace) else {
            continue;
        };
        if wins.is_empty() {
            continue;
        }
        for pair in indices.windows(2) {
            let gap_start = placements[pair[0]].end;
            let gap_end = placements[pair[1]].start;
            if gap_end <= gap_start {
                continue;
            }
            for w in wins {
                if w.end <= gap_start {
                    continue;
                }
                if w.start >= gap_end {
                    break;
                }
                total_real += overlap_minutes(gap_start, gap_end, w.start, w.end);
            }
        }
    }

    let total_industrial = (total_real as f64 / INDUSTRIAL_FACTOR).round() as i64;
    (total_real, total_industrial)
}

/// Headline eligible/fixable/saved counters (§4.8, summary.csv rows
/// "Already late (input)" through "Saved").
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerKpis {
    pub eligible_jobs: usize,
    pub planned_late: usize,
    pub planned_late_pct: f64,
    pub fixable_jobs: usize,
    pub on_time_fixable: usize,
    pub on_time_fixable_pct: f64,
    pub late_completed: usize,
    pub late_completed_pct: f64,
    pub overall_saved_pct: f64,
}

/// `ops` is every schedulable op considered for this run (record type 60 or
/// 115); `placements` is what the dispatcher actually produced.
pub fn compute_scheduler_kpis(ops: &[Op], placements: &[PlacementRecord], now: Timestamp) -> SchedulerKpis {
    let total_sched = ops.len();
    if total_sched == 0 {
        return SchedulerKpis::default();
    }

    let placement_by_job: HashMap<&str, &PlacementRecord> =
        placements.iter().map(|p| (p.job_id.as_str(), p)).collect();

    let mut planned_late = 0usize;
    let mut fixable = 0usize;
    let mut on_time_fixable = 0usize;
    let mut late_completed = 0usize;

    for op in ops {
        let Some(ddl) = op.effective_deadline else {
            continue;
        };
        if ddl < now {
            planned_late += 1;
            if placement_by_job.contains_key(op.job_id.as_str()) {
                late_completed += 1;
            }
        } else {
            fixable += 1;
            if let Some(p) = placement_by_job.get(op.job_id.as_str()) {
                if p.start <= ddl {
                    on_time_fixable += 1;
                }
            }
        }
    }

    SchedulerKpis {
        eligible_jobs: total_sched,
        planned_late,
        planned_late_pct: planned_late as f64 / total_sched as f64 * 100.0,
        fixable_jobs: fixable,
        on_time_fixable,
        on_time_fixable_pct: if fixable > 0 { on_time_fixable as f64 / fixable as f64 * 100.0 } else { 0.0 },
        late_completed,
        late_completed_pct: if planned_late > 0 { late_completed as f64 / planned_late as f64 * 100.0 } else { 0.0 },
        overall_saved_pct: on_time_fixable as f64 / total_sched as f64 * 100.0,
    }
}
