//! Heap-key scoring (C5, §4.5): turns an op, its earliest estimated start
//! and the current schedule state into the single `f64` the dispatcher's
//! min-heap orders on. Lower sorts first. Exact equality is broken by
//! `job_id` in the dispatcher's heap comparator (§4.6), not here.

use std::collections::HashSet;

use crate::model::Op;
use crate::precedence::PrecedenceGraph;
use crate::time::{self, Timestamp};

/// Dominates every other term: an OS5 op always dispatches before any
/// non-OS5 op, regardless of weights.
pub const OS5_ABSOLUTE_PRIORITY: f64 = -1e12;
/// Added on top of the ordinary score for an op that directly blocks an OS5
/// successor, so the chain feeding an OS5 order clears out of its way.
pub const OS5_UPSTREAM_BOOST: f64 = -5e11;
/// Small nudge for an op whose material dependency has just cleared
/// (it still has an unplaced successor waiting), so it doesn't linger
/// behind ops that never waited on anything.
pub const UPSTREAM_EPS: f64 = 0.5;
/// Stand-in urgency for ops with no effective deadline: large enough that
/// any deadline-bound op always outranks them on the urgency term alone.
const NO_DEADLINE_MINUTES: f64 = 1.0e7;

/// Linear weights over the scoring terms (§4.5). Field names match the
/// `w_*` keys of the source system's weight dict; `sa::jitter_weights`
/// perturbs these within per-family clamp bounds during the
/// simulated-annealing search (§4.7).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub w_has_ddl: f64,
    pub w_priority: f64,
    pub w_orderstate: f64,
    pub w_cont: f64,
    pub w_ddl_minutes: f64,
    pub w_lateness: f64,
    pub w_duration_late: f64,
    pub w_spt_near: f64,
    pub w_earliest: f64,
    pub w_duration: f64,
    pub w_orderpos: f64,
}

/// Same magnitudes as the source system's `DEFAULT_WEIGHTS` (§6
/// "Constants").
pub const DEFAULT_WEIGHTS: Weights = Weights {
    w_has_ddl: 1000.0,
    w_priority: 150.0,
    w_orderstate: 10.0,
    w_cont: 8.0,
    w_ddl_minutes: 1.0,
    w_lateness: 12.0,
    w_duration_late: 0.25,
    w_spt_near: 0.06,
    w_earliest: 0.5,
    w_duration: 0.02,
    w_orderpos: 0.005,
};

fn blocks_os5(op: &Op, graph: &PrecedenceGraph, os5_job_ids: &HashSet<String>) -> bool {
    graph
        .succ
        .get(&op.job_id)
        .is_some_and(|succs| succs.iter().any(|s| os5_job_ids.contains(s)))
}

/// Score `op` for dispatch ordering, given its current earliest estimated
/// start `earliest` and whether it would continue directly on the same
/// machine as a placed predecessor (§4.5).
///
/// `os5_job_ids` is the set of job ids with `orderstate == 5`, computed once
/// per run by the caller so this stays a pure function of its inputs.
pub fn heap_key(
    op: &Op,
    now: Timestamp,
    earliest: Timestamp,
    is_continuation: bool,
    graph: &PrecedenceGraph,
    os5_job_ids: &HashSet<String>,
    weights: &Weights,
) -> f64 {
    if op.is_os5() {
        return OS5_ABSOLUTE_PRIORITY;
    }

    let has_ddl = if op.effective_deadline.is_some() { 0.0 } else { 1.0 };
    let ddl_minutes = match op.effective_deadline {
        Some(ddl) => time::minutes_between(now, ddl).max(0) as f64,
        None => NO_DEADLINE_MINUTES,
    };

    let duration = op.duration_min.max(0.0);
    let earliest_min = time::minutes_between(now, earliest).max(0) as f64;
    let cont = if is_continuation { 0.0 } else { 1.0 };

    let mut lateness = 0.0;
    let mut duration_late = 0.0;
    let mut spt_near = 0.0;
    if let Some(ddl) = op.effective_deadline {
        lateness = time::minutes_between(ddl, earliest).max(0) as f64;
        if lateness > 0.0 {
            duration_late = duration;
        }
        if ddl_minutes <= 2.0 * 24.0 * 60.0 {
            spt_near = duration;
        }
    }

    let mut key = 0.0;
    key += weights.w_has_ddl * has_ddl;
    key += weights.w_priority * op.priority_group.code() as f64;
    key += weights.w_orderstate * (-(op.orderstate as f64) * 100.0);
    key += weights.w_cont * cont;
    key += weights.w_ddl_minutes * ddl_minutes;
    key += weights.w_lateness * lateness;
    key += weights.w_duration_late * duration_late;
    key += weights.w_spt_near * spt_near;
    key += weights.w_earliest * earliest_min;
    key += weights.w_duration * duration;
    key += weights.w_orderpos * (-(op.order_pos as f64));

    if blocks_os5(op, graph, os5_job_ids) {
        key += OS5_UPSTREAM_BOOST;
    }

    key
}

/// Small extra bonus for an op that still has an unplaced successor: it
/// should dispatch ahead of otherwise-equal ops that nothing depends on
/// (§4.5 "upstream pending").
pub fn upstream_pending_bonus(op: &Op, graph: &PrecedenceGraph, placed: &HashSet<String>) -> f64 {
    let has_unplaced_successor = graph
        .succ
        .get(&op.job_id)
        .is_some_and(|succs| succs.iter().any(|s| !placed.contains(s)));
    if has_unplaced_successor {
        -UPSTREAM_EPS
    } else {
        0.0
    }
}
