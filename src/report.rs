//! Summary report writer (C8, §4.8 / §6): collapses a run's KPIs into the
//! `metric,value` rows of `summary.csv` — op-level headline counters
//! followed by the op-level and order-level day-band percentages.

use std::path::Path;

use crate::error::CoreResult;
use crate::io::csv as core_csv;
use crate::kpis::{DayBandKpis, SchedulerKpis};
use crate::model::{LateRow, OrderDeliveryRow, PlacementRecord, SummaryRow, UnplacedRow};
use crate::time::{self, Timestamp};

/// Counters only available before the dispatch pass runs (§4.2 "already
/// late" bookkeeping); folded into the summary alongside the post-pass
/// KPIs.
pub struct RunCounters {
    pub eligible_ops: usize,
    pub already_late_ops: usize,
}

#[allow(clippy::too_many_arguments)]
pub fn build_summary(
    placements: &[PlacementRecord],
    late: &[LateRow],
    unplaced: &[UnplacedRow],
    orders: &[OrderDeliveryRow],
    counters: &RunCounters,
    scheduler_kpis: &SchedulerKpis,
    op_bands: &DayBandKpis,
    order_bands: &DayBandKpis,
    real_gap_min: i64,
    ind_gap_min: i64,
) -> Vec<SummaryRow> {
    let unique_orders = placements.iter().map(|p| p.order_no.as_str()).collect::<std::collections::HashSet<_>>().len();
    let unique_machines = placements.iter().map(|p| p.workplace.as_str()).collect::<std::collections::HashSet<_>>().len();
    let total_real_min: i64 = placements.iter().map(|p| p.duration_min).sum();
    let total_ind_min = if total_real_min > 0 {
        (total_real_min as f64 / time::INDUSTRIAL_FACTOR).round() as i64
    } else {
        0
    };
    let first_start = placements.iter().map(|p| p.start).min();
    let last_end = placements.iter().map(|p| p.end).max();

    let pct_pre_ops_late = counters.already_late_ops as f64 / counters.eligible_ops.max(1) as f64 * 100.0;

    vec![
        SummaryRow::new("Eligible ops (60/115) before scheduling", counters.eligible_ops),
        SummaryRow::new("% ops already late (pre)", format!("{:.2}", pct_pre_ops_late)),
        SummaryRow::new("Already late (input)", scheduler_kpis.planned_late),
        SummaryRow::new("On-time possible", scheduler_kpis.fixable_jobs),
        SummaryRow::new("On-time (fixable)", scheduler_kpis.on_time_fixable),
        SummaryRow::new("Late jobs completed", scheduler_kpis.late_completed),
        SummaryRow::new("Saved", format!("{:.2}", scheduler_kpis.on_time_fixable_pct)),
        SummaryRow::new("Scheduled jobs", placements.len()),
        SummaryRow::new("Late jobs (beyond configured grace)", late.len()),
        SummaryRow::new("Unplaced jobs", unplaced.len()),
        SummaryRow::new("Unique orders (scheduled)", unique_orders),
        SummaryRow::new("Unique machines (scheduled)", unique_machines),
        SummaryRow::new("Total real minutes", total_real_min),
        SummaryRow::new("Total industrial minutes", total_ind_min),
        SummaryRow::new("First start", display_ts(first_start)),
        SummaryRow::new("Last end", display_ts(last_end)),
        SummaryRow::new("Total delay in shift time (real)", real_gap_min),
        SummaryRow::new("Total delay in shift time (industrial)", ind_gap_min),
        SummaryRow::new("% On time (Start <= LSD)", format!("{:.2}", op_bands.on_time)),
        SummaryRow::new("% Within 1 day grace", format!("{:.2}", op_bands.within_1d)),
        SummaryRow::new("% Within 2 days grace", format!("{:.2}", op_bands.within_2d)),
        SummaryRow::new("% Within 3 day grace", format!("{:.2}", op_bands.within_3d)),
        SummaryRow::new("% Within 4 day grace", format!("{:.2}", op_bands.within_4d)),
        SummaryRow::new("% Within 5 day grace", format!("{:.2}", op_bands.within_5d)),
        SummaryRow::new("% Within 6 day grace", format!("{:.2}", op_bands.within_6d)),
        SummaryRow::new("% Within 7 day grace", format!("{:.2}", op_bands.within_7d)),
        SummaryRow::new("% Beyond 7 days grace", format!("{:.2}", op_bands.beyond_7d)),
        SummaryRow::new("% Orders On time (Delivery <= SupposedDate)", format!("{:.2}", order_bands.on_time)),
        SummaryRow::new("% Orders Within 1 day grace", format!("{:.2}", order_bands.within_1d)),
        SummaryRow::new("% Orders Within 2 day grace", format!("{:.2}", order_bands.within_2d)),
        SummaryRow::new("% Orders Within 3 day grace", format!("{:.2}", order_bands.within_3d)),
        SummaryRow::new("% Orders Within 4 day grace", format!("{:.2}", order_bands.within_4d)),
        SummaryRow::new("% Orders Within 5 day grace", format!("{:.2}", order_bands.within_5d)),
        SummaryRow::new("% Orders Within 6 day grace", format!("{:.2}", order_bands.within_6d)),
        SummaryRow::new("% Orders Within 7 day grace", format!("{:.2}", order_bands.within_7d)),
        SummaryRow::new("% Orders Beyond 7 days grace", format!("{:.2}", order_bands.beyond_7d)),
    ]
}

fn display_ts(ts: Option<Timestamp>) -> String {
    match ts {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => String::new(),
    }
}

pub fn write_summary(path: impl AsRef<Path>, rows: &[SummaryRow]) -> CoreResult<()> {
    core_csv::write_to_file(path, rows)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::kpis;
    use chrono::NaiveDate;

    fn dt(h: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn placement(job_id: &str) -> PlacementRecord {
        PlacementRecord {
            job_id: job_id.to_string(),
            order_no: "O1".to_string(),
            order_pos: 1,
            orderstate: 0,
            item_no: String::new(),
            sort_pos: 0,
            workplace: "M1".to_string(),
            start: dt(8),
            end: dt(9),
            duration_min: 60,
            latest_start_date: None,
            starts_before_lsd: None,
            within_grace: Some(true),
            priority_group: 0,
            is_unlimited: false,
            is_outsourcing: false,
            outsourcing_delivery: None,
            buffer_real: 0,
            buffer_industrial: 0,
            reason: "dispatched".to_string(),
            record_type: 60,
            idle_before_real: 0,
            idle_before_industrial: 0,
        }
    }

    #[test]
    fn summary_rows_carry_every_headline_metric() {
        let placements = vec![placement("J1")];
        let op_bands = kpis::compute_op_day_bands(&placements);
        let order_bands = DayBandKpis::default();
        let scheduler_kpis = SchedulerKpis::default();
        let counters = RunCounters { eligible_ops: 1, already_late_ops: 0 };

        let rows = build_summary(&placements, &[], &[], &[], &counters, &scheduler_kpis, &op_bands, &order_bands, 0, 0);
        assert!(rows.iter().any(|r| r.metric == "Scheduled jobs" && r.value == "1"));
        assert!(rows.iter().any(|r| r.metric == "% Orders Beyond 7 days grace"));
        assert_eq!(rows.len(), 36);
    }
}
