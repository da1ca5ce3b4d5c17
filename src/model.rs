//! Strongly-typed record per op and per shift window (§3, §9 design note).
//!
//! The cleaning layer hands this crate already-normalised rows; unknown or
//! missing columns default to zero/`None` at load rather than failing the
//! whole batch (§7).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// `record_type` discriminates header rows (deadline-only), schedulable ops
/// and the material rows consumed upstream of this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum RecordType {
    OrderHeader = 10,
    StandardOp = 60,
    AltOp = 115,
    Material = 90,
}

impl RecordType {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            10 => Some(Self::OrderHeader),
            60 => Some(Self::StandardOp),
            115 => Some(Self::AltOp),
            90 => Some(Self::Material),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_schedulable(self) -> bool {
        matches!(self, Self::StandardOp | Self::AltOp)
    }
}

/// PG0 bottleneck / PG1 non-bottleneck / PG2 unlimited-parallel (does not
/// consume machine capacity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum PriorityGroup {
    Bottleneck = 0,
    NonBottleneck = 1,
    Unlimited = 2,
}

impl PriorityGroup {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Bottleneck,
            1 => Self::NonBottleneck,
            _ => Self::Unlimited,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_unlimited(self) -> bool {
        matches!(self, Self::Unlimited)
    }
}

/// A single unit of scheduling work (§3 "Op").
#[derive(Debug, Clone)]
pub struct Op {
    pub job_id: String,
    pub order_no: String,
    pub order_pos: i64,
    pub item_no: String,
    pub sort_pos: i64,
    pub workplace: String,
    pub workplace_group: String,
    pub duration_min: f64,
    pub buffer_min: i64,
    pub date_start: Option<Timestamp>,
    pub effective_deadline: Option<Timestamp>,
    pub latest_date_head: Option<Timestamp>,
    pub priority_group: PriorityGroup,
    pub orderstate: i64,
    pub record_type: RecordType,
    pub op_needs_upstream: bool,
    pub op_upstream_orders: Vec<String>,
}

impl Op {
    pub fn is_os5(&self) -> bool {
        self.orderstate == 5
    }
}

/// A `[start, end)` interval of machine availability with an advancing
/// cursor. `cursor` starts at `start` and only ever moves forward as ops are
/// placed in it (§3 "Shift window" invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: Timestamp,
    pub end: Timestamp,
    pub cursor: Timestamp,
}

impl Window {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self {
            start,
            end,
            cursor: start,
        }
    }
}

/// The two special machine sets that change placement semantics (§3
/// "Machine").
#[derive(Debug, Clone, Default)]
pub struct MachineSets {
    pub unlimited: HashSet<String>,
    pub outsourcing: HashSet<String>,
}

impl MachineSets {
    pub fn is_unlimited(&self, workplace: &str) -> bool {
        self.unlimited.contains(workplace)
    }

    pub fn is_outsourcing(&self, workplace: &str) -> bool {
        self.outsourcing.contains(workplace)
    }
}

/// One row of `plan.csv` (§3 "Placement record", §6).
#[derive(Debug, Clone, Serialize)]
pub struct PlacementRecord {
    pub job_id: String,
    pub order_no: String,
    pub order_pos: i64,
    pub orderstate: i64,
    pub item_no: String,
    pub sort_pos: i64,
    pub workplace: String,
    pub start: Timestamp,
    pub end: Timestamp,
    pub duration_min: i64,
    pub latest_start_date: Option<Timestamp>,
    pub starts_before_lsd: Option<bool>,
    pub within_grace: Option<bool>,
    pub priority_group: i32,
    pub is_unlimited: bool,
    pub is_outsourcing: bool,
    pub outsourcing_delivery: Option<Timestamp>,
    pub buffer_real: i64,
    pub buffer_industrial: i64,
    pub reason: String,
    pub record_type: i32,
    pub idle_before_real: i64,
    pub idle_before_industrial: i64,
}

/// One row of `late.csv`: a placed op that violates the grace window.
#[derive(Debug, Clone, Serialize)]
pub struct LateRow {
    pub job_id: String,
    pub order_no: String,
    pub order_pos: i64,
    pub orderstate: i64,
    pub workplace: String,
    pub start: Timestamp,
    pub end: Timestamp,
    pub latest_start_date: Timestamp,
    pub allowed: Timestamp,
    pub days_late: i64,
    pub record_type: i32,
}

/// Why an op was never placed (§4.6 "Termination", §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnplacedReason {
    WorkplaceMissingOrTba,
    BlockedByPredecessorOrMaterial,
    NoCapacityInWindows,
}

impl UnplacedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkplaceMissingOrTba => "workplace_missing_or_tba",
            Self::BlockedByPredecessorOrMaterial => "blocked_by_predecessor_or_material",
            Self::NoCapacityInWindows => "no_capacity_in_windows",
        }
    }
}

/// One row of `unplaced.csv`.
#[derive(Debug, Clone, Serialize)]
pub struct UnplacedRow {
    pub job_id: String,
    pub order_no: String,
    pub order_pos: i64,
    pub workplace: String,
    pub latest_start_date: Option<Timestamp>,
    pub orderstate: i64,
    pub reason: String,
}

/// One row of `orders_delivery.csv`.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDeliveryRow {
    pub order_no: String,
    pub supposed_delivery_date: Option<Timestamp>,
    pub delivery_after_scheduling: Option<Timestamp>,
    pub days_late: Option<i64>,
}

/// One `Metric, Value` row of `summary.csv`.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub metric: String,
    pub value: String,
}

impl SummaryRow {
    pub fn new(metric: impl Into<String>, value: impl ToString) -> Self {
        Self {
            metric: metric.into(),
            value: value.to_string(),
        }
    }
}
