//! Simulated-annealing meta-search over scoring weights (C7, §4.7).
//!
//! Each iteration jitters the current weights, runs the full dispatcher
//! against a fresh copy of the window set, and accepts or rejects the
//! result by the usual Metropolis criterion. The best outcome seen across
//! the whole run, not just the final temperature's outcome, is what gets
//! returned (§4.7 "retain best").

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use crate::dispatch::{self, DispatchOutcome, InflationFactors};
use crate::kpis;
use crate::model::{MachineSets, Op};
use crate::precedence::PrecedenceGraph;
use crate::scoring::{Weights, DEFAULT_WEIGHTS};
use crate::time::Timestamp;
use crate::windows::WindowSet;

pub const SA_ITERATIONS: usize = 45;
pub const SA_INITIAL_TEMP: f64 = 1.0;
pub const SA_COOLING: f64 = 0.95;
/// How far a single jitter step may move a weight, as a fraction of its
/// current value, before the per-family clamp below is applied (§4.7).
pub const SA_STEP_SCALE: f64 = 0.25;
/// Fixed so two runs against identical inputs produce byte-identical
/// outputs (§8 "Determinism").
pub const SA_SEED: u64 = 42;

/// Perturb every weight by `±SA_STEP_SCALE` then clamp by family: deadline
/// and priority terms get the widest range since they dominate the score,
/// duration/order-position terms (already small tie-breakers) the
/// narrowest, matching the source system's `jitter_weights` exactly
/// (§4.7).
pub fn jitter_weights(base: &Weights, rng: &mut Pcg64) -> Weights {
    let step = |rng: &mut Pcg64, v: f64| {
        let factor = 1.0 + rng.gen_range(-SA_STEP_SCALE..=SA_STEP_SCALE);
        (v * factor).max(1e-6)
    };
    let clamp = |v: f64, lo: f64, hi: f64| v.max(lo).min(hi);

    Weights {
        w_has_ddl: clamp(step(rng, base.w_has_ddl), 10.0, 5000.0),
        w_priority: clamp(step(rng, base.w_priority), 10.0, 5000.0),
        w_orderstate: clamp(step(rng, base.w_orderstate), 1e-4, 50.0),
        w_cont: clamp(step(rng, base.w_cont), 1e-4, 50.0),
        w_ddl_minutes: clamp(step(rng, base.w_ddl_minutes), 1e-4, 20.0),
        w_lateness: step(rng, base.w_lateness),
        w_duration_late: step(rng, base.w_duration_late),
        w_spt_near: step(rng, base.w_spt_near),
        w_earliest: clamp(step(rng, base.w_earliest), 1e-4, 20.0),
        w_duration: clamp(step(rng, base.w_duration), 1e-5, 5.0),
        w_orderpos: clamp(step(rng, base.w_orderpos), 1e-5, 5.0),
    }
}

/// Higher is better: `2.0 * on_time% + 0.8 * within_2d% - 1.0 * beyond_7d%`
/// over every placed op, exactly the fitness `run_once` optimises for
/// (§4.7 "objective").
fn objective(outcome: &DispatchOutcome) -> f64 {
    let bands = kpis::compute_op_day_bands(&outcome.placements);
    2.0 * bands.on_time + 0.8 * bands.within_2d - bands.beyond_7d
}

pub struct SaOutcome {
    pub weights: Weights,
    pub dispatch: DispatchOutcome,
    pub score: f64,
}

/// Run the SA search and return the best `(weights, dispatch outcome)` pair
/// found. `windows` is never mutated: each iteration dispatches against its
/// own clone. Returns `None` if cancelled before a single pass could
/// complete.
#[allow(clippy::too_many_arguments)]
pub fn search(
    ops: &[Op],
    graph: &PrecedenceGraph,
    windows: &WindowSet,
    machines: &MachineSets,
    inflation: &InflationFactors,
    now: Timestamp,
    mut progress: impl FnMut(u8),
    cancelled: impl Fn() -> bool,
) -> Option<SaOutcome> {
    let mut rng = Pcg64::seed_from_u64(SA_SEED);

    let mut current_weights = DEFAULT_WEIGHTS;
    let mut current_windows = windows.clone();
    let mut current_outcome = dispatch::dispatch(
        ops,
        graph,
        &mut current_windows,
        machines,
        inflation,
        &current_weights,
        now,
        |_| {},
        &cancelled,
    )?;
    let mut current_score = objective(&current_outcome);

    let mut best_weights = current_weights;
    let mut best_score = current_score;
    let mut best_outcome = DispatchOutcome {
        placements: current_outcome.placements.clone(),
        late: current_outcome.late.clone(),
        unplaced: current_outcome.unplaced.clone(),
    };

    let mut temp = SA_INITIAL_TEMP;

    for iter in 0..SA_ITERATIONS {
        if cancelled() {
            return None;
        }

        let candidate_weights = jitter_weights(&current_weights, &mut rng);
        let mut candidate_windows = windows.clone();
        let Some(candidate_outcome) = dispatch::dispatch(
            ops,
            graph,
            &mut candidate_windows,
            machines,
            inflation,
            &candidate_weights,
            now,
            |_| {},
            &cancelled,
        ) else {
            return None;
        };
        let candidate_score = objective(&candidate_outcome);

        // Higher score is better, so accept uphill moves unconditionally
        // and downhill moves with Metropolis probability.
        let accept = if candidate_score >= current_score {
            true
        } else {
            let delta = current_score - candidate_score;
            let acceptance_prob = (-delta / temp.max(1e-9)).exp();
            rng.gen_range(0.0..1.0) < acceptance_prob
        };

        if accept {
            current_weights = candidate_weights;
            current_score = candidate_score;
            current_outcome = candidate_outcome;
        }

        if current_score > best_score {
            best_score = current_score;
            best_weights = current_weights;
            best_outcome = DispatchOutcome {
                placements: current_outcome.placements.clone(),
                late: current_outcome.late.clone(),
                unplaced: current_outcome.unplaced.clone(),
            };
        }

        temp *= SA_COOLING;
        progress((((iter + 1) * 100) / SA_ITERATIONS) as u8);
    }

    Some(SaOutcome {
        weights: best_weights,
        dispatch: best_outcome,
        score: best_score,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn jitter_stays_within_clamp_bounds() {
        let mut rng = Pcg64::seed_from_u64(SA_SEED);
        for _ in 0..50 {
            let w = jitter_weights(&DEFAULT_WEIGHTS, &mut rng);
            assert!(w.w_has_ddl >= 10.0 && w.w_has_ddl <= 5000.0);
            assert!(w.w_priority >= 10.0 && w.w_priority <= 5000.0);
            assert!(w.w_orderstate >= 1e-4 && w.w_orderstate <= 50.0);
            assert!(w.w_duration >= 1e-5 && w.w_duration <= 5.0);
            assert!(w.w_orderpos >= 1e-5 && w.w_orderpos <= 5.0);
        }
    }

    #[test]
    fn search_is_deterministic_for_a_fixed_seed() {
        let ops: Vec<Op> = Vec::new();
        let graph = PrecedenceGraph::default();
        let now = chrono::NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let windows = WindowSet {
            by_machine: HashMap::new(),
            earliest_global: now,
            first_start_by_machine: HashMap::new(),
        };
        let machines = MachineSets::default();
        let inflation = InflationFactors::default();

        let a = search(&ops, &graph, &windows, &machines, &inflation, now, |_| {}, || false).unwrap();
        let b = search(&ops, &graph, &windows, &machines, &inflation, now, |_| {}, || false).unwrap();
        assert_eq!(a.weights, b.weights);
        assert_eq!(a.score, b.score);
    }

    #[test]
    fn cancelling_before_first_pass_yields_none() {
        let ops: Vec<Op> = Vec::new();
        let graph = PrecedenceGraph::default();
        let now = chrono::NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let windows = WindowSet {
            by_machine: HashMap::new(),
            earliest_global: now,
            first_start_by_machine: HashMap::new(),
        };
        let machines = MachineSets::default();
        let inflation = InflationFactors::default();

        let result = search(&ops, &graph, &windows, &machines, &inflation, now, |_| {}, || true);
        assert!(result.is_none());
    }

    // Boundary scenario 7 (§8): cancellation mid-SA, flagged after the third
    // iteration's progress callback fires. The search must stop and yield
    // `None` rather than returning a partial best.
    #[test]
    fn cancelling_mid_search_yields_none() {
        use std::cell::Cell;

        let ops: Vec<Op> = Vec::new();
        let graph = PrecedenceGraph::default();
        let now = chrono::NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let windows = WindowSet {
            by_machine: HashMap::new(),
            earliest_global: now,
            first_start_by_machine: HashMap::new(),
        };
        let machines = MachineSets::default();
        let inflation = InflationFactors::default();

        let iterations_seen = Cell::new(0u32);
        let cancel_after = 3u32;

        let result = search(
            &ops,
            &graph,
            &windows,
            &machines,
            &inflation,
            now,
            |_| {
                iterations_seen.set(iterations_seen.get() + 1);
            },
            || iterations_seen.get() >= cancel_after,
        );

        assert!(result.is_none());
    }
}
