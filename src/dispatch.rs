//! Dispatch loop (C6, §4.6): the priority-driven event loop that turns
//! ready ops into placements, one commit at a time.
//!
//! Every op enters the ready heap once its precedence indegree drops to
//! zero. Each iteration peeks up to [`LOOKAHEAD`] of the highest-priority
//! ready ops and applies the pick policy in `§4.6`'s precedence order:
//! outsourcing milestones first, then feasible-now OS5 ops, then strict
//! same-machine continuations, then gap-fill, then a scored fallback. This
//! is what lets a machine take a lower-priority job that fits a gap instead
//! of idling behind a higher-priority job still waiting on a material or
//! precedence dependency.

use std::collections::{HashMap, HashSet};

use binary_heap_plus::BinaryHeap;
use chrono::Duration;
use ordered_float::OrderedFloat;

use crate::model::{LateRow, MachineSets, Op, PlacementRecord, UnplacedReason, UnplacedRow};
use crate::precedence::PrecedenceGraph;
use crate::scoring::{self, Weights};
use crate::time::{self, Timestamp, INDUSTRIAL_FACTOR};
use crate::windows::WindowSet;

/// How many of the highest-priority ready ops are considered together when
/// filling a machine gap (§4.6 step 1).
pub const LOOKAHEAD: usize = 20;
/// Tolerance below which a window is treated as having no usable remaining
/// capacity (§6 "Constants").
pub const GAP_TOL_MINUTES: i64 = 1;
/// Grace days before a placement counts as late (§6 "Constants").
pub const GRACE_DAYS: i64 = 2;
const GRACE_MINUTES: i64 = GRACE_DAYS * 24 * 60;
/// Penalty added to an otherwise-feasible OS5 candidate that has an
/// immediate same-machine successor, so chained OS5 ops place in order
/// rather than the last one jumping the queue (§4.6 step 2b).
const OS5_IMMEDIATE_SUCCESSOR_PENALTY: f64 = 1_000_000.0;

/// Per-machine duration multiplier applied before placement when
/// `orderstate <= 3` (§4.6 step 4 "AP0031 quirk"; §9 Open Question (c)
/// treats this as configurable rather than a hard-coded literal).
#[derive(Debug, Clone)]
pub struct InflationFactors(HashMap<String, f64>);

impl Default for InflationFactors {
    fn default() -> Self {
        let mut map = HashMap::new();
        map.insert("AP0031".to_string(), 1.0 / INDUSTRIAL_FACTOR);
        Self(map)
    }
}

impl InflationFactors {
    pub fn factor_for(&self, workplace: &str) -> f64 {
        self.0.get(workplace).copied().unwrap_or(1.0)
    }
}

pub struct DispatchOutcome {
    pub placements: Vec<PlacementRecord>,
    pub late: Vec<LateRow>,
    pub unplaced: Vec<UnplacedRow>,
}

type HeapEntry = (OrderedFloat<f64>, String);

fn minutes_duration(minutes: f64) -> Duration {
    Duration::seconds((minutes * 60.0).round() as i64)
}

fn is_milestone(op: &Op, machines: &MachineSets) -> bool {
    machines.is_outsourcing(&op.workplace) && op.orderstate > 3
}

/// Dispatcher-local bookkeeping that outlives any single iteration. Kept as
/// a struct so the many small helper closures in the source system become
/// methods here instead of a wall of captured-variable lambdas.
struct State<'a> {
    op_by_id: HashMap<&'a str, &'a Op>,
    graph: &'a PrecedenceGraph,
    machines: &'a MachineSets,
    inflation: &'a InflationFactors,
    weights: &'a Weights,
    now: Timestamp,
    os5_job_ids: HashSet<String>,
    /// Predecessor job id -> set of OS5 machines it feeds into.
    os5_pred_to_machine: HashMap<String, HashSet<String>>,
    os5_locked_machines: HashSet<String>,
    placed: HashSet<String>,
    end_times: HashMap<String, Option<Timestamp>>,
    machine_last_job: HashMap<String, String>,
    wp_ptr: HashMap<String, usize>,
    indegree: HashMap<String, usize>,
}

impl<'a> State<'a> {
    fn op(&self, job_id: &str) -> &'a Op {
        self.op_by_id[job_id]
    }

    fn is_continuation(&self, job_id: &str) -> bool {
        let op = self.op(job_id);
        self.graph.pred.get(job_id).is_some_and(|preds| {
            preds.iter().any(|p| {
                self.end_times.get(p).is_some_and(|end| end.is_some())
                    && self.op(p).workplace == op.workplace
            })
        })
    }

    fn has_direct_continuation(&self, job_id: &str) -> bool {
        let op = self.op(job_id);
        let Some(last) = self.machine_last_job.get(&op.workplace) else {
            return false;
        };
        self.graph
            .pred
            .get(job_id)
            .is_some_and(|preds| preds.contains(last))
    }

    fn has_real_pred(&self, job_id: &str) -> bool {
        self.graph.pred.get(job_id).is_some_and(|preds| {
            preds
                .iter()
                .any(|p| matches!(self.op(p).priority_group.code(), 0 | 1))
        })
    }

    fn has_immediate_same_machine_successor(&self, job_id: &str) -> bool {
        let op = self.op(job_id);
        self.graph.succ.get(job_id).is_some_and(|succs| {
            succs.iter().any(|s| {
                let s_op = self.op(s);
                if s_op.workplace != op.workplace {
                    return false;
                }
                self.graph.pred[s.as_str()]
                    .iter()
                    .filter(|p| p.as_str() != job_id)
                    .all(|p| self.placed.contains(p))
            })
        })
    }

    fn has_pending_deadline_ops(&self) -> bool {
        self.op_by_id.values().any(|op| {
            !self.placed.contains(&op.job_id)
                && self.indegree.get(&op.job_id).copied().unwrap_or(0) == 0
                && op.effective_deadline.is_some()
        })
    }

    fn any_effective_remaining_pg01(&self) -> bool {
        self.op_by_id.values().any(|op| {
            !self.placed.contains(&op.job_id)
                && matches!(op.priority_group.code(), 0 | 1)
                && op.effective_deadline.is_some()
        })
    }
}

/// Compute (and, if `commit`, consume) the earliest feasible `[start, end)`
/// for `op`, no earlier than `ready`, given `duration` minutes of work
/// (already AP0031-inflated if applicable).
///
/// Unlimited-capacity (PG2) ops walk windows without advancing the shared
/// cursor (other ops may use the same window concurrently); bounded
/// machines may split the op across multiple windows and do advance the
/// cursor (§4.6 step 4).
fn place_in_windows(
    duration: f64,
    ready: Timestamp,
    wins: &mut [crate::model::Window],
    wp_ptr: &mut usize,
    unlimited: bool,
    commit: bool,
) -> Option<(Timestamp, Timestamp)> {
    if wins.is_empty() {
        return None;
    }
    if duration <= 0.0 {
        return Some((ready, ready));
    }

    let n = wins.len();
    let mut idx = *wp_ptr.min(&(n - 1));
    if !(wins[idx].end > ready) {
        while idx < n && !(wins[idx].end > ready) {
            idx += 1;
        }
        if idx >= n && unlimited {
            // PG2 wrap: search from the start once more (§9 Open Question
            // (a) — a documented no-op once the window builder has already
            // clamped every window to `end > now`).
            idx = 0;
            while idx < n && !(wins[idx].end > ready) {
                idx += 1;
            }
        }
    }
    if idx >= n {
        return None;
    }

    let mut remaining = duration;
    let mut cursor_pos = ready;
    let mut segments: Vec<(Timestamp, Timestamp)> = Vec::new();

    while idx < n && remaining > 1e-9 {
        let (w_start, w_end, w_cursor) = (wins[idx].start, wins[idx].end, wins[idx].cursor);
        let floor = if unlimited { w_start.max(cursor_pos) } else { w_start.max(w_cursor).max(cursor_pos) };
        if floor >= w_end {
            idx += 1;
            continue;
        }
        let free = time::minutes_between(floor, w_end) as f64;
        if free <= 0.0 {
            idx += 1;
            continue;
        }
        let take = remaining.min(free);
        let end = floor + minutes_duration(take);
        if !unlimited && commit {
            wins[idx].cursor = end;
        }
        segments.push((floor, end));
        remaining -= take;
        cursor_pos = end;
        if remaining > 1e-9 && end >= w_end {
            idx += 1;
        }
    }

    if commit {
        *wp_ptr = idx.min(n.saturating_sub(1));
    }

    if segments.is_empty() || remaining > 1e-9 {
        return None;
    }
    Some((segments[0].0, segments.last().unwrap().1))
}

/// Run the dispatcher once over `ops` under `weights`, returning every
/// placement, grace-band violation and unplaced reason.
///
/// `progress` is called with a 0-100 estimate periodically; `cancelled` is
/// polled at dispatcher entry, the top of every main-loop iteration and
/// inside the window placement loop, matching §5's cancellation points.
#[allow(clippy::too_many_arguments)]
pub fn dispatch(
    ops: &[Op],
    graph: &PrecedenceGraph,
    windows: &mut WindowSet,
    machines: &MachineSets,
    inflation: &InflationFactors,
    weights: &Weights,
    now: Timestamp,
    mut progress: impl FnMut(u8),
    cancelled: impl Fn() -> bool,
) -> Option<DispatchOutcome> {
    if cancelled() {
        return None;
    }

    let op_by_id: HashMap<&str, &Op> = ops.iter().map(|o| (o.job_id.as_str(), o)).collect();
    let os5_job_ids: HashSet<String> = ops.iter().filter(|o| o.is_os5()).map(|o| o.job_id.clone()).collect();

    let mut os5_pred_to_machine: HashMap<String, HashSet<String>> = HashMap::new();
    for os5_id in &os5_job_ids {
        let os5_op = op_by_id[os5_id.as_str()];
        if os5_op.workplace.is_empty() || os5_op.workplace == "TBA" {
            continue;
        }
        if let Some(preds) = graph.pred.get(os5_id.as_str()) {
            for p in preds {
                os5_pred_to_machine
                    .entry(p.clone())
                    .or_default()
                    .insert(os5_op.workplace.clone());
            }
        }
    }
    let os5_upstream_jobs: HashSet<String> = os5_pred_to_machine.keys().cloned().collect();

    let indegree: HashMap<String, usize> =
        ops.iter().map(|o| (o.job_id.clone(), graph.indegree(&o.job_id))).collect();

    let mut st = State {
        op_by_id,
        graph,
        machines,
        inflation,
        weights,
        now,
        os5_job_ids,
        os5_pred_to_machine,
        os5_locked_machines: HashSet::new(),
        placed: HashSet::new(),
        end_times: HashMap::new(),
        machine_last_job: HashMap::new(),
        wp_ptr: HashMap::new(),
        indegree,
    };

    let mut heap: BinaryHeap<HeapEntry, binary_heap_plus::MinComparator> =
        BinaryHeap::with_capacity_min(ops.len());

    let mut placements = Vec::new();
    let mut late = Vec::new();
    let mut unplaced = Vec::new();

    let total = ops.len().max(1);

    let mut push_ready = |st: &mut State, heap: &mut BinaryHeap<HeapEntry, binary_heap_plus::MinComparator>, job_id: &str| {
        let op = st.op(job_id);
        let est = earliest_start(st, windows, job_id);
        let is_cont = st.is_continuation(job_id);
        let mut key = scoring::heap_key(op, now, est, is_cont, st.graph, &st.os5_job_ids, st.weights);
        key += scoring::upstream_pending_bonus(op, st.graph, &st.placed);
        heap.push((OrderedFloat(key), job_id.to_string()));
        if let Some(locks) = st.os5_pred_to_machine.get(job_id) {
            st.os5_locked_machines.extend(locks.iter().cloned());
        }
    };

    for op in ops {
        if st.indegree[&op.job_id] == 0 {
            push_ready(&mut st, &mut heap, &op.job_id);
        }
    }

    let mut done = 0usize;

    while !heap.is_empty() {
        if cancelled() {
            return None;
        }

        let mut pulled: Vec<HeapEntry> = Vec::with_capacity(LOOKAHEAD);
        while pulled.len() < LOOKAHEAD {
            match heap.pop() {
                Some(e) => pulled.push(e),
                None => break,
            }
        }

        let picked = pick_candidate(&st, windows, &pulled, &heap);

        let Some((picked_job, from_pulled)) = picked else {
            // Nothing in scope right now was actually feasible; everything
            // pulled goes back and the loop terminates once the heap is
            // genuinely exhausted of anything placeable. To avoid spinning
            // forever on a permanently-stuck batch, push them back once
            // more then break — residue ends up in `unplaced` below.
            for entry in pulled {
                heap.push(entry);
            }
            break;
        };

        if from_pulled {
            pulled.retain(|(_, j)| *j != picked_job);
        } else {
            // picked came from the tail of the heap beyond `pulled`; remove
            // it from there (outsourcing-milestone / OS5 picks may reach
            // past the lookahead window per §4.6 step 2a/2b).
            let mut rest: Vec<HeapEntry> = Vec::with_capacity(heap.len());
            while let Some(e) = heap.pop() {
                if e.1 == picked_job {
                    continue;
                }
                rest.push(e);
            }
            for e in rest {
                heap.push(e);
            }
        }
        for entry in pulled {
            heap.push(entry);
        }

        if cancelled() {
            return None;
        }

        let op = st.op(&picked_job);
        let est = earliest_start(&st, windows, &picked_job);
        let is_cont = st.is_continuation(&picked_job);

        let (start, end, placed_ok) = place_op(&mut st, windows, op, est);
        if !placed_ok {
            unplaced.push(unplaced_row(op, UnplacedReason::NoCapacityInWindows));
            st.placed.insert(picked_job.clone());
            st.end_times.insert(picked_job.clone(), None);
            done += 1;
            progress(((done * 100) / total) as u8);
            continue;
        }

        st.placed.insert(picked_job.clone());
        st.end_times.insert(picked_job.clone(), Some(end));
        st.machine_last_job.insert(op.workplace.clone(), picked_job.clone());
        if op.is_os5() {
            st.os5_locked_machines.remove(&op.workplace);
        }

        placements.push(build_placement(op, machines, start, end, is_cont));
        if let Some(row) = maybe_late_row(op, start) {
            late.push(row);
        }
        done += 1;

        if let Some(succs) = st.graph.succ.get(&picked_job).cloned() {
            for succ_id in succs {
                if let Some(indeg) = st.indegree.get_mut(&succ_id) {
                    *indeg = indeg.saturating_sub(1);
                    if *indeg == 0 {
                        push_ready(&mut st, &mut heap, &succ_id);
                    }
                }
            }
        }

        progress(((done * 100) / total) as u8);
    }

    for op in ops {
        if st.placed.contains(&op.job_id) {
            continue;
        }
        let reason = if op.workplace.is_empty() || op.workplace == "TBA" {
            UnplacedReason::WorkplaceMissingOrTba
        } else if st.indegree.get(&op.job_id).copied().unwrap_or(0) > 0 {
            UnplacedReason::BlockedByPredecessorOrMaterial
        } else {
            UnplacedReason::NoCapacityInWindows
        };
        unplaced.push(unplaced_row(op, reason));
    }

    progress(100);

    Some(DispatchOutcome {
        placements,
        late,
        unplaced,
    })
}

fn earliest_start(st: &State, windows: &WindowSet, job_id: &str) -> Timestamp {
    let op = st.op(job_id);
    let mut ready_times: Vec<Timestamp> = Vec::new();
    if let Some(preds) = st.graph.pred.get(job_id) {
        for p in preds {
            if let Some(Some(end)) = st.end_times.get(p) {
                let pred_op = st.op(p);
                if pred_op.workplace == op.workplace {
                    ready_times.push(*end);
                } else {
                    ready_times.push(*end + minutes_duration(pred_op.buffer_min as f64));
                }
            }
        }
    }

    if is_milestone(op, st.machines) {
        if let Some(date_start) = op.date_start {
            if date_start > st.now {
                return date_start;
            }
        }
        if st.has_real_pred(job_id) && !ready_times.is_empty() {
            return ready_times.into_iter().max().unwrap();
        }
        return st.now;
    }

    let mut est = st.now.max(windows.earliest_global);
    if let Some(max_ready) = ready_times.into_iter().max() {
        est = est.max(max_ready);
    }
    if let Some(first_wp) = windows.first_start_by_machine.get(&op.workplace) {
        est = est.max(*first_wp);
    }
    if st.machines.is_outsourcing(&op.workplace) && op.orderstate > 3 {
        if let Some(date_start) = op.date_start {
            est = est.max(date_start);
        }
    }
    est
}

/// Does `job_id` fit somewhere in its machine's remaining windows starting
/// no earlier than its current earliest start? (§4.6 "feasible now", used
/// by the OS5 and continuation pick stages; never mutates windows.)
fn feasible_now(st: &State, windows: &WindowSet, job_id: &str) -> bool {
    let op = st.op(job_id);
    if is_milestone(op, st.machines) {
        return true;
    }
    let Some(wins) = windows.by_machine.get(&op.workplace) else {
        return false;
    };
    if wins.is_empty() {
        return false;
    }
    let est = earliest_start(st, windows, job_id);
    if op.priority_group.is_unlimited() {
        return wins.iter().any(|w| est < w.end);
    }
    let idx = *st.wp_ptr.get(&op.workplace).unwrap_or(&0);
    wins.iter()
        .skip(idx)
        .any(|w| w.cursor.max(est) + Duration::minutes(GAP_TOL_MINUTES) <= w.end)
}

/// The earliest start of the (still unplaced) OS5 op that has `machine`
/// locked, if any. Used by the gap-fill stage's PG=2 "finishes before OS5
/// est" check (§4.6 step 2d).
fn os5_est_for_machine(st: &State, windows: &WindowSet, machine: &str) -> Option<Timestamp> {
    st.os5_job_ids
        .iter()
        .filter(|id| !st.placed.contains(id.as_str()))
        .map(|id| st.op(id))
        .find(|op| op.workplace == machine)
        .map(|op| earliest_start(st, windows, &op.job_id))
}

/// §4.6 step 2 pick policy, in precedence order (a)-(e). Returns the chosen
/// job id and whether it came from `pulled` (vs. reached past the lookahead
/// window into the rest of the heap, which only stages (a)/(b) may do).
fn pick_candidate(
    st: &State,
    windows: &WindowSet,
    pulled: &[HeapEntry],
    heap: &BinaryHeap<HeapEntry, binary_heap_plus::MinComparator>,
) -> Option<(String, bool)> {
    let in_pulled = |job_id: &str| pulled.iter().any(|(_, j)| j == job_id);

    // (a) Outsourcing milestone: smallest est across the whole ready set.
    let mut milestone_best: Option<(Timestamp, f64, &str)> = None;
    for (score, job_id) in pulled.iter().chain(heap.iter()) {
        let op = st.op(job_id);
        if !is_milestone(op, st.machines) {
            continue;
        }
        let est = earliest_start(st, windows, job_id);
        let better = match milestone_best {
            None => true,
            Some((best_est, best_score, _)) => (est, score.0) < (best_est, best_score),
        };
        if better {
            milestone_best = Some((est, score.0, job_id));
        }
    }
    if let Some((_, _, job_id)) = milestone_best {
        return Some((job_id.to_string(), in_pulled(job_id)));
    }

    // (b) OS5 feasible now: best score among feasible OS5 candidates.
    let mut os5_best: Option<(f64, &str)> = None;
    for (_, job_id) in pulled.iter().chain(heap.iter()) {
        let op = st.op(job_id);
        if !op.is_os5() {
            continue;
        }
        if !feasible_now(st, windows, job_id) {
            continue;
        }
        let est = earliest_start(st, windows, job_id);
        let is_cont = st.is_continuation(job_id);
        let mut sc = scoring::heap_key(op, st.now, est, is_cont, st.graph, &st.os5_job_ids, st.weights);
        sc += scoring::upstream_pending_bonus(op, st.graph, &st.placed);
        if st.has_immediate_same_machine_successor(job_id) {
            sc += OS5_IMMEDIATE_SUCCESSOR_PENALTY;
        }
        let better = match os5_best {
            None => true,
            Some((best_sc, _)) => sc < best_sc,
        };
        if better {
            os5_best = Some((sc, job_id));
        }
    }
    if let Some((_, job_id)) = os5_best {
        return Some((job_id.to_string(), in_pulled(job_id)));
    }

    // (c) Strict same-machine continuation.
    let mut cont_best: Option<(f64, &str)> = None;
    for (_, job_id) in pulled.iter().chain(heap.iter()) {
        if !st.has_direct_continuation(job_id) {
            continue;
        }
        let op = st.op(job_id);
        let Some(wins) = windows.by_machine.get(&op.workplace) else {
            continue;
        };
        if wins.is_empty() {
            continue;
        }
        let idx = *st.wp_ptr.get(&op.workplace).unwrap_or(&0);
        if idx >= wins.len() {
            continue;
        }
        let est = earliest_start(st, windows, job_id);
        let feasible = if op.priority_group.is_unlimited() {
            est < wins[idx].end
        } else {
            let w = &wins[idx];
            w.cursor + Duration::minutes(GAP_TOL_MINUTES) <= w.end
                && est <= w.cursor + Duration::minutes(GAP_TOL_MINUTES)
        };
        if !feasible {
            continue;
        }
        let mut sc = scoring::heap_key(op, st.now, est, true, st.graph, &st.os5_job_ids, st.weights);
        sc += scoring::upstream_pending_bonus(op, st.graph, &st.placed);
        let better = match cont_best {
            None => true,
            Some((best_sc, _)) => sc < best_sc,
        };
        if better {
            cont_best = Some((sc, job_id));
        }
    }
    if let Some((_, job_id)) = cont_best {
        return Some((job_id.to_string(), in_pulled(job_id)));
    }

    // (d) Gap-fill: walk `pulled` in heap order.
    for (_, job_id) in pulled {
        let op = st.op(job_id);
        let Some(wins) = windows.by_machine.get(&op.workplace) else {
            continue;
        };
        if wins.is_empty() {
            continue;
        }
        if matches!(op.priority_group.code(), 0 | 1) && op.effective_deadline.is_none() && st.has_pending_deadline_ops() {
            continue;
        }
        let est = earliest_start(st, windows, job_id);

        if op.priority_group.is_unlimited() {
            if st.os5_locked_machines.contains(&op.workplace) && !op.is_os5() {
                // §4.6 step 2d: a PG=2 op may cross an OS5-locked machine
                // only if it finishes before the OS5 op's own earliest start.
                let Some(os5_est) = os5_est_for_machine(st, windows, &op.workplace) else {
                    continue;
                };
                let duration = if op.orderstate <= 3 {
                    op.duration_min.max(0.0) * st.inflation.factor_for(&op.workplace)
                } else {
                    op.duration_min.max(0.0)
                };
                if est + minutes_duration(duration) > os5_est {
                    continue;
                }
            }
            if wins.iter().any(|w| est < w.end) {
                return Some((job_id.clone(), true));
            }
            continue;
        }

        let idx = *st.wp_ptr.get(&op.workplace).unwrap_or(&0);
        if idx >= wins.len() {
            continue;
        }
        if st.os5_locked_machines.contains(&op.workplace) && !op.is_os5() && !op.priority_group.is_unlimited() {
            continue;
        }
        let w = &wins[idx];
        if w.cursor.max(est) + Duration::minutes(GAP_TOL_MINUTES) <= w.end {
            return Some((job_id.clone(), true));
        }
    }

    // (e) Fallback: best-scored candidate whose deadline discipline allows it.
    let mut sorted: Vec<&HeapEntry> = pulled.iter().collect();
    sorted.sort_by_key(|(score, _)| *score);
    for (_, job_id) in sorted {
        let op = st.op(job_id);
        if matches!(op.priority_group.code(), 0 | 1) {
            if op.effective_deadline.is_none() && st.any_effective_remaining_pg01() {
                continue;
            }
            if op.effective_deadline.is_none() && st.has_pending_deadline_ops() {
                continue;
            }
        }
        return Some((job_id.clone(), true));
    }

    None
}

/// Place `op` at its earliest feasible start, mutating `windows`. Returns
/// `(start, end, placed)`; `placed=false` means no capacity window could
/// ever hold it so it should be reported `no_capacity_in_windows`.
fn place_op(st: &mut State, windows: &mut WindowSet, op: &Op, est: Timestamp) -> (Timestamp, Timestamp, bool) {
    if is_milestone(op, st.machines) {
        return (est, est, true);
    }
    if op.workplace.is_empty() || op.workplace == "TBA" {
        return (est, est, false);
    }

    // AP0031 quirk (§4.6): orders not yet past orderstate 3 get their
    // duration inflated by the configured machine multiplier.
    let effective_duration = if op.orderstate <= 3 {
        op.duration_min.max(0.0) * st.inflation.factor_for(&op.workplace)
    } else {
        op.duration_min.max(0.0)
    };

    let Some(wins) = windows.by_machine.get_mut(&op.workplace) else {
        return (est, est, false);
    };
    let unlimited = op.priority_group.is_unlimited();
    let wp_ptr = st.wp_ptr.entry(op.workplace.clone()).or_insert(0);

    match place_in_windows(effective_duration, est, wins, wp_ptr, unlimited, true) {
        Some((start, end)) => (start, end, true),
        None => (est, est, false),
    }
}

fn build_placement(op: &Op, machines: &MachineSets, start: Timestamp, end: Timestamp, is_continuation: bool) -> PlacementRecord {
    let is_unlimited = op.priority_group.is_unlimited();
    let is_outsourcing = machines.is_outsourcing(&op.workplace);
    let buffer_industrial = (op.buffer_min as f64 / INDUSTRIAL_FACTOR).round() as i64;

    let (starts_before_lsd, within_grace) = match op.effective_deadline {
        Some(ddl) => {
            let allowed = ddl + Duration::minutes(GRACE_MINUTES);
            (Some(start <= ddl), Some(start <= allowed))
        }
        None => (None, None),
    };

    PlacementRecord {
        job_id: op.job_id.clone(),
        order_no: op.order_no.clone(),
        order_pos: op.order_pos,
        orderstate: op.orderstate,
        item_no: op.item_no.clone(),
        sort_pos: op.sort_pos,
        workplace: op.workplace.clone(),
        start,
        end,
        duration_min: op.duration_min.round() as i64,
        latest_start_date: op.effective_deadline,
        starts_before_lsd,
        within_grace,
        priority_group: op.priority_group.code(),
        is_unlimited,
        is_outsourcing,
        outsourcing_delivery: (is_outsourcing && op.orderstate > 3 && op.date_start.is_some())
            .then_some(op.date_start.unwrap()),
        buffer_real: op.buffer_min,
        buffer_industrial,
        reason: placement_reason(op, start, is_unlimited, is_outsourcing, is_continuation),
        record_type: op.record_type.code(),
        idle_before_real: 0,
        idle_before_industrial: 0,
    }
}

/// Deterministic two-part reason string (§4.6 step 6). Primary classifies
/// urgency relative to `start`: past the deadline, imminent (<1 day),
/// upcoming (<3 days), a plain deadline statement, or none at all. Secondary
/// picks the highest-precedence placement cause, continuation first
/// (`scheduler.py:665-685`).
fn placement_reason(op: &Op, start: Timestamp, is_unlimited: bool, is_outsourcing_wp: bool, is_continuation: bool) -> String {
    let primary = match op.effective_deadline {
        None => "No deadline (priority/fit)".to_string(),
        Some(ddl) => {
            if start > ddl {
                "Past deadline (urgent)".to_string()
            } else if time::minutes_between(start, ddl) <= 24 * 60 {
                "Imminent deadline (<1 day)".to_string()
            } else if time::minutes_between(start, ddl) <= 3 * 24 * 60 {
                "Upcoming deadline (<3 days)".to_string()
            } else {
                format!("Has deadline on {}", ddl.format("%d-%m-%Y %H:%M"))
            }
        }
    };
    let is_milestone_op = is_outsourcing_wp && op.orderstate > 3;
    let secondary = if is_continuation {
        "Continuation (no buffer)"
    } else if is_milestone_op {
        "Outsourced milestone"
    } else if is_unlimited {
        "Unlimited parallel window"
    } else if op.priority_group.code() == 0 {
        "Bottleneck operation"
    } else {
        "Best candidate now"
    };
    format!("{primary} | {secondary}")
}

fn maybe_late_row(op: &Op, start: Timestamp) -> Option<LateRow> {
    let ddl = op.effective_deadline?;
    let allowed = ddl + Duration::minutes(GRACE_MINUTES);
    if start <= allowed {
        return None;
    }
    let days_late = {
        let secs = (start - allowed).num_seconds();
        ((secs as f64) / 86_400.0).ceil().max(0.0) as i64
    };
    Some(LateRow {
        job_id: op.job_id.clone(),
        order_no: op.order_no.clone(),
        order_pos: op.order_pos,
        orderstate: op.orderstate,
        workplace: op.workplace.clone(),
        start,
        end: start,
        latest_start_date: ddl,
        allowed,
        days_late,
        record_type: op.record_type.code(),
    })
}

fn unplaced_row(op: &Op, reason: UnplacedReason) -> UnplacedRow {
    UnplacedRow {
        job_id: op.job_id.clone(),
        order_no: op.order_no.clone(),
        order_pos: op.order_pos,
        workplace: op.workplace.clone(),
        latest_start_date: op.effective_deadline,
        orderstate: op.orderstate,
        reason: reason.as_str().to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{PriorityGroup, RecordType, Window};
    use chrono::NaiveDate;

    fn dt(h: u32, m: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn op(job_id: &str, workplace: &str, duration: f64, pg: PriorityGroup, orderstate: i64) -> Op {
        Op {
            job_id: job_id.to_string(),
            order_no: "O1".to_string(),
            order_pos: 1,
            item_no: String::new(),
            sort_pos: 0,
            workplace: workplace.to_string(),
            workplace_group: String::new(),
            duration_min: duration,
            buffer_min: 0,
            date_start: None,
            effective_deadline: None,
            latest_date_head: None,
            priority_group: pg,
            orderstate,
            record_type: RecordType::StandardOp,
            op_needs_upstream: false,
            op_upstream_orders: vec![],
        }
    }

    fn windows_with(machine: &str, start: Timestamp, end: Timestamp) -> WindowSet {
        let mut by_machine = HashMap::new();
        by_machine.insert(machine.to_string(), vec![Window::new(start, end)]);
        let mut first_start_by_machine = HashMap::new();
        first_start_by_machine.insert(machine.to_string(), start);
        WindowSet {
            by_machine,
            earliest_global: start,
            first_start_by_machine,
        }
    }

    fn empty_windows(now: Timestamp) -> WindowSet {
        WindowSet {
            by_machine: HashMap::new(),
            earliest_global: now,
            first_start_by_machine: HashMap::new(),
        }
    }

    fn graph_for(ops: &[Op]) -> PrecedenceGraph {
        crate::precedence::build_dependency_graph(ops, &HashMap::new())
    }

    fn run(ops: &[Op], graph: &PrecedenceGraph, windows: &mut WindowSet, machines: &MachineSets, now: Timestamp) -> DispatchOutcome {
        dispatch(
            ops,
            graph,
            windows,
            machines,
            &InflationFactors::default(),
            &scoring::DEFAULT_WEIGHTS,
            now,
            |_| {},
            || false,
        )
        .expect("not cancelled")
    }

    // Boundary scenario 1: single op fits first window.
    #[test]
    fn single_op_fits_first_window() {
        let ops = vec![op("J1", "M", 60.0, PriorityGroup::Bottleneck, 0)];
        let graph = graph_for(&ops);
        let mut windows = windows_with("M", dt(10, 0), dt(12, 0));
        let outcome = run(&ops, &graph, &mut windows, &MachineSets::default(), dt(10, 0));

        assert_eq!(outcome.placements.len(), 1);
        assert!(outcome.late.is_empty());
        assert!(outcome.unplaced.is_empty());
        assert_eq!(outcome.placements[0].start, dt(10, 0));
        assert_eq!(outcome.placements[0].end, dt(11, 0));
    }

    // Boundary scenario 2: split across two windows.
    #[test]
    fn split_across_two_windows() {
        let ops = vec![op("J1", "M", 120.0, PriorityGroup::Bottleneck, 0)];
        let graph = graph_for(&ops);
        let mut by_machine = HashMap::new();
        by_machine.insert(
            "M".to_string(),
            vec![Window::new(dt(10, 0), dt(10, 40)), Window::new(dt(11, 0), dt(12, 30))],
        );
        let mut windows = WindowSet {
            by_machine,
            earliest_global: dt(10, 0),
            first_start_by_machine: HashMap::from([("M".to_string(), dt(10, 0))]),
        };

        let outcome = run(&ops, &graph, &mut windows, &MachineSets::default(), dt(10, 0));
        assert_eq!(outcome.placements.len(), 1);
        assert_eq!(outcome.placements[0].start, dt(10, 0));
        assert_eq!(outcome.placements[0].end, dt(12, 20));
    }

    // Boundary scenario 3: precedence with cross-machine buffer.
    #[test]
    fn precedence_with_cross_machine_buffer() {
        let mut a = op("O1-2", "M1", 30.0, PriorityGroup::Bottleneck, 0);
        a.buffer_min = 15;
        a.order_no = "O1".to_string();
        a.order_pos = 2;
        let mut b = op("O1-1", "M2", 20.0, PriorityGroup::Bottleneck, 0);
        b.order_no = "O1".to_string();
        b.order_pos = 1;

        let ops = vec![a, b];
        let graph = graph_for(&ops);
        let mut windows = WindowSet {
            by_machine: HashMap::from([
                ("M1".to_string(), vec![Window::new(dt(10, 0), dt(16, 0))]),
                ("M2".to_string(), vec![Window::new(dt(10, 0), dt(16, 0))]),
            ]),
            earliest_global: dt(10, 0),
            first_start_by_machine: HashMap::from([
                ("M1".to_string(), dt(10, 0)),
                ("M2".to_string(), dt(10, 0)),
            ]),
        };

        let outcome = run(&ops, &graph, &mut windows, &MachineSets::default(), dt(10, 0));
        let a_p = outcome.placements.iter().find(|p| p.job_id == "O1-2").unwrap();
        let b_p = outcome.placements.iter().find(|p| p.job_id == "O1-1").unwrap();
        assert_eq!(a_p.start, dt(10, 0));
        assert_eq!(a_p.end, dt(10, 30));
        assert_eq!(b_p.start, dt(10, 45));
        assert_eq!(b_p.end, dt(11, 5));
    }

    // Boundary scenario 4: continuation zero-buffer.
    #[test]
    fn continuation_zero_buffer() {
        let mut a = op("O1-2", "M1", 30.0, PriorityGroup::Bottleneck, 0);
        a.buffer_min = 15;
        a.order_no = "O1".to_string();
        a.order_pos = 2;
        let mut b = op("O1-1", "M1", 20.0, PriorityGroup::Bottleneck, 0);
        b.order_no = "O1".to_string();
        b.order_pos = 1;

        let ops = vec![a, b];
        let graph = graph_for(&ops);
        let mut windows = windows_with("M1", dt(10, 0), dt(16, 0));

        let outcome = run(&ops, &graph, &mut windows, &MachineSets::default(), dt(10, 0));
        let b_p = outcome.placements.iter().find(|p| p.job_id == "O1-1").unwrap();
        assert_eq!(b_p.start, dt(10, 30));
        assert_eq!(b_p.end, dt(10, 50));
    }

    // Boundary scenario 5: OS5 preemption of queue.
    #[test]
    fn os5_preempts_queue() {
        let x = op("X", "M1", 30.0, PriorityGroup::NonBottleneck, 0);
        let y = op("Y", "M1", 30.0, PriorityGroup::Unlimited, 5);
        let ops = vec![x, y];
        let graph = graph_for(&ops);
        let mut windows = windows_with("M1", dt(10, 0), dt(16, 0));

        let outcome = run(&ops, &graph, &mut windows, &MachineSets::default(), dt(10, 0));
        let y_p = outcome.placements.iter().find(|p| p.job_id == "Y").unwrap();
        let x_p = outcome.placements.iter().find(|p| p.job_id == "X").unwrap();
        assert_eq!(y_p.start, dt(10, 0));
        assert_eq!(y_p.end, dt(10, 30));
        assert_eq!(x_p.start, dt(10, 30));
        assert_eq!(x_p.end, dt(11, 0));
    }

    // Boundary scenario 6: outsourcing milestone with future delivery.
    #[test]
    fn outsourcing_milestone_future_delivery() {
        let mut m = op("M1job", "OUT1", 0.0, PriorityGroup::NonBottleneck, 4);
        m.date_start = Some(dt(12, 0));
        let ops = vec![m];
        let graph = graph_for(&ops);
        let mut machines = MachineSets::default();
        machines.outsourcing.insert("OUT1".to_string());
        let mut windows = empty_windows(dt(10, 0));

        let outcome = run(&ops, &graph, &mut windows, &machines, dt(10, 0));
        assert_eq!(outcome.placements.len(), 1);
        assert_eq!(outcome.placements[0].start, dt(12, 0));
        assert_eq!(outcome.placements[0].end, dt(12, 0));
    }

    #[test]
    fn unlimited_machine_never_waits_on_capacity() {
        let ops = vec![
            op("J1", "PG2", 600.0, PriorityGroup::Unlimited, 0),
            op("J2", "PG2", 600.0, PriorityGroup::Unlimited, 0),
        ];
        let graph = graph_for(&ops);
        let mut windows = windows_with("PG2", dt(8, 0), dt(22, 0));

        let outcome = run(&ops, &graph, &mut windows, &MachineSets::default(), dt(8, 0));
        assert_eq!(outcome.placements.len(), 2);
        assert!(outcome.placements.iter().all(|p| p.start == dt(8, 0)));
    }

    #[test]
    fn op_missing_workplace_is_unplaced() {
        let ops = vec![op("J1", "", 60.0, PriorityGroup::Bottleneck, 0)];
        let graph = graph_for(&ops);
        let mut windows = empty_windows(dt(8, 0));
        let outcome = run(&ops, &graph, &mut windows, &MachineSets::default(), dt(8, 0));
        assert_eq!(outcome.unplaced.len(), 1);
        assert_eq!(outcome.unplaced[0].reason, "workplace_missing_or_tba");
    }

    #[test]
    fn op_with_no_window_capacity_is_unplaced() {
        let ops = vec![op("J1", "M1", 60.0, PriorityGroup::Bottleneck, 0)];
        let graph = graph_for(&ops);
        let mut windows = empty_windows(dt(8, 0));
        let outcome = run(&ops, &graph, &mut windows, &MachineSets::default(), dt(8, 0));
        assert_eq!(outcome.unplaced.len(), 1);
        assert_eq!(outcome.unplaced[0].reason, "no_capacity_in_windows");
    }

    #[test]
    fn ap0031_inflates_duration_below_orderstate_threshold() {
        let ops = vec![op("J1", "AP0031", 60.0, PriorityGroup::Bottleneck, 2)];
        let graph = graph_for(&ops);
        let mut windows = windows_with("AP0031", dt(8, 0), dt(22, 0));
        let outcome = run(&ops, &graph, &mut windows, &MachineSets::default(), dt(8, 0));
        assert_eq!(outcome.placements.len(), 1);
        // 60 real minutes / 0.6 industrial factor == 100 minutes.
        assert_eq!(outcome.placements[0].end, dt(9, 40));
    }
}
