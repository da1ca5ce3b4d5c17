//! Input loader (C2, §4.2): reads cleaned tabular inputs, type-coerces,
//! filters to relevant record types, and derives the pre-scheduling
//! counters used by the summary report.

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::error::CoreResult;
use crate::model::{MachineSets, Op, PriorityGroup, RecordType};
use crate::time::{self, Timestamp};

use super::csv as core_csv;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Every column is optional at the wire level; an absent or unparsable cell
/// degrades to 0/`None` rather than aborting the load (§7 "Malformed row").
#[derive(Debug, Deserialize, Default)]
struct RawJobRow {
    #[serde(default)]
    job_id: Option<String>,
    #[serde(default)]
    order_no: Option<String>,
    #[serde(default)]
    order_pos: Option<String>,
    #[serde(default)]
    item_no: Option<String>,
    #[serde(default)]
    sort_pos: Option<String>,
    #[serde(default)]
    workplace: Option<String>,
    #[serde(default)]
    workplace_group: Option<String>,
    #[serde(default)]
    duration_min: Option<String>,
    #[serde(default)]
    buffer_min: Option<String>,
    #[serde(default)]
    date_start: Option<String>,
    #[serde(default)]
    effective_deadline: Option<String>,
    #[serde(default)]
    latest_date_head: Option<String>,
    #[serde(default)]
    priority_group: Option<String>,
    #[serde(default)]
    orderstate: Option<String>,
    #[serde(default)]
    record_type: Option<String>,
    #[serde(default)]
    op_needs_upstream: Option<String>,
    #[serde(default)]
    op_upstream_orders: Option<String>,
    // Retained only to accept the full cleaned schema; record-type 90 rows
    // have already been folded into op_needs_upstream/op_upstream_orders
    // upstream of this crate (§3).
    #[serde(default, rename = "purchased_item")]
    _purchased_item: Option<String>,
    #[serde(default, rename = "produced_item")]
    _produced_item: Option<String>,
    #[serde(default, rename = "is_material_rt90")]
    _is_material_rt90: Option<String>,
    #[serde(default, rename = "material_available_now")]
    _material_available_now: Option<String>,
    #[serde(default, rename = "material_needs_upstream")]
    _material_needs_upstream: Option<String>,
    #[serde(default, rename = "upstream_order_nos")]
    _upstream_order_nos: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawShiftRow {
    workplace: String,
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
struct RawMachineRow {
    workplace: String,
}

fn to_int(raw: &Option<String>, default: i64) -> i64 {
    raw.as_deref()
        .and_then(time::parse_locale_number)
        .map(|v| v as i64)
        .unwrap_or(default)
}

fn to_int_nonneg(raw: &Option<String>, default: i64) -> i64 {
    let v = to_int(raw, default);
    v.max(0)
}

fn to_float(raw: &Option<String>, default: f64) -> f64 {
    raw.as_deref()
        .and_then(time::parse_locale_number)
        .unwrap_or(default)
}

fn to_timestamp(raw: &Option<String>) -> Option<Timestamp> {
    let s = raw.as_deref()?.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(s, DATE_FORMAT).ok()
}

fn to_bool_upstream_flag(raw: &Option<String>) -> bool {
    match raw.as_deref() {
        Some(s) => matches!(s.trim().to_uppercase().as_str(), "1" | "TRUE" | "T" | "Y" | "YES"),
        None => false,
    }
}

fn trimmed(raw: &Option<String>) -> String {
    raw.as_deref().unwrap_or("").trim().to_string()
}

/// Result of loading and normalising the cleaned input tables.
pub struct LoadedInput {
    /// Schedulable (60/115) ops only.
    pub ops: Vec<Op>,
    /// `order_no -> latest_date_head`, taken from record-type 10 header rows.
    pub order_deadlines: HashMap<String, Option<Timestamp>>,
    pub shifts: Vec<(String, Timestamp, Timestamp)>,
    pub machines: MachineSets,
    pub eligible_ops: usize,
    pub already_late_ops: usize,
    pub already_late_orders: usize,
}

pub fn load_cleaned_inputs(
    jobs_path: impl AsRef<Path>,
    shifts_path: impl AsRef<Path>,
    unlimited_path: impl AsRef<Path>,
    outsourcing_path: impl AsRef<Path>,
    now: Timestamp,
) -> CoreResult<LoadedInput> {
    log::info!("loading cleaned inputs");

    let raw_jobs: Vec<RawJobRow> = core_csv::read_from_file(jobs_path)?;

    let mut ops = Vec::new();
    let mut order_deadlines: HashMap<String, Option<Timestamp>> = HashMap::new();
    let mut eligible_ops = 0usize;
    let mut already_late_ops = 0usize;

    for row in &raw_jobs {
        let record_type = match RecordType::from_code(to_int(&row.record_type, -1) as i32) {
            Some(rt) => rt,
            None => continue,
        };
        let order_no = trimmed(&row.order_no);

        if record_type == RecordType::OrderHeader {
            let ddl = to_timestamp(&row.latest_date_head);
            order_deadlines.insert(order_no, ddl);
            continue;
        }
        if !record_type.is_schedulable() {
            continue;
        }

        let effective_deadline = to_timestamp(&row.effective_deadline);
        eligible_ops += 1;
        if let Some(ddl) = effective_deadline {
            if ddl < now {
                already_late_ops += 1;
            }
        }

        let upstream_orders = trimmed(&row.op_upstream_orders)
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        ops.push(Op {
            job_id: trimmed(&row.job_id),
            order_no,
            order_pos: to_int(&row.order_pos, -1),
            item_no: trimmed(&row.item_no),
            sort_pos: to_int(&row.sort_pos, 0),
            workplace: time::normalize_workplace(&trimmed(&row.workplace)),
            workplace_group: trimmed(&row.workplace_group),
            duration_min: to_float(&row.duration_min, 0.0).max(0.0),
            buffer_min: to_int_nonneg(&row.buffer_min, 0),
            date_start: to_timestamp(&row.date_start),
            effective_deadline,
            latest_date_head: to_timestamp(&row.latest_date_head),
            priority_group: PriorityGroup::from_code(to_int(&row.priority_group, 2) as i32),
            orderstate: to_int(&row.orderstate, 0),
            record_type,
            op_needs_upstream: to_bool_upstream_flag(&row.op_needs_upstream),
            op_upstream_orders: upstream_orders,
        });
    }

    let already_late_orders = order_deadlines
        .values()
        .filter(|ddl| time::is_effective_deadline(**ddl) && ddl.unwrap() < now)
        .count();

    let raw_shifts: Vec<RawShiftRow> = core_csv::read_from_file(shifts_path)?;
    let mut shifts = Vec::with_capacity(raw_shifts.len());
    for row in &raw_shifts {
        let workplace = time::normalize_workplace(&row.workplace);
        let (Some(start), Some(end)) = (
            NaiveDateTime::parse_from_str(row.start.trim(), DATE_FORMAT).ok(),
            NaiveDateTime::parse_from_str(row.end.trim(), DATE_FORMAT).ok(),
        ) else {
            continue;
        };
        if start < end {
            shifts.push((workplace, start, end));
        }
    }

    let unlimited = load_machine_set(unlimited_path.as_ref())?;
    let outsourcing = load_machine_set(outsourcing_path.as_ref())?;

    log::info!(
        "loaded {} schedulable ops, {} shift rows, {} unlimited machines, {} outsourcing machines",
        ops.len(),
        shifts.len(),
        unlimited.len(),
        outsourcing.len()
    );

    Ok(LoadedInput {
        ops,
        order_deadlines,
        shifts,
        machines: MachineSets {
            unlimited,
            outsourcing,
        },
        eligible_ops,
        already_late_ops,
        already_late_orders,
    })
}

fn load_machine_set(path: &Path) -> CoreResult<std::collections::HashSet<String>> {
    if !path.exists() {
        // Machine-set files are optional refinements; an absent file just
        // means no machine belongs to that set.
        return Ok(std::collections::HashSet::new());
    }
    let rows: Vec<RawMachineRow> = core_csv::read_from_file(path)?;
    Ok(rows
        .into_iter()
        .map(|r| time::normalize_workplace(&r.workplace))
        .filter(|wp| !wp.is_empty() && wp != "TBA")
        .collect())
}
