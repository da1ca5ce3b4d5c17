//! Order-level delivery derivation (C8, §4.8): rolls per-op placements up
//! to a single delivery date per order, compared against the order
//! header's deadline.

use std::collections::HashMap;

use crate::model::{Op, OrderDeliveryRow, PlacementRecord};
use crate::time::{self, Timestamp};

/// One row per order seen in either the op list or the header deadlines,
/// so an order with no ops left in the cleaned input (fully upstream
/// material only) still shows up with a blank delivery.
///
/// The delivery date is taken from the chain's head op (the placement with
/// the smallest `order_pos` in that order), not the latest-ending
/// placement overall — a later op on a parallel branch finishing after the
/// head does not push the order's delivery date out (§4.8).
pub fn derive_order_delivery(
    ops: &[Op],
    placements: &[PlacementRecord],
    order_deadlines: &HashMap<String, Option<Timestamp>>,
) -> Vec<OrderDeliveryRow> {
    let mut ops_per_order: HashMap<&str, usize> = HashMap::new();
    for op in ops {
        *ops_per_order.entry(op.order_no.as_str()).or_insert(0) += 1;
    }

    let mut placed_per_order: HashMap<&str, usize> = HashMap::new();
    let mut head_per_order: HashMap<&str, &PlacementRecord> = HashMap::new();
    for p in placements {
        *placed_per_order.entry(p.order_no.as_str()).or_insert(0) += 1;
        head_per_order
            .entry(p.order_no.as_str())
            .and_modify(|head| {
                if p.order_pos < head.order_pos {
                    *head = p;
                }
            })
            .or_insert(p);
    }

    let mut order_nos: Vec<&str> = ops_per_order.keys().copied().collect();
    for order_no in order_deadlines.keys() {
        if !ops_per_order.contains_key(order_no.as_str()) {
            order_nos.push(order_no.as_str());
        }
    }
    order_nos.sort_unstable();
    order_nos.dedup();

    order_nos
        .into_iter()
        .map(|order_no| {
            let total = ops_per_order.get(order_no).copied().unwrap_or(0);
            let placed = placed_per_order.get(order_no).copied().unwrap_or(0);

            let supposed_delivery_date = order_deadlines.get(order_no).copied().flatten();

            let delivery_after_scheduling = if total > 0 && placed == total {
                head_per_order
                    .get(order_no)
                    .map(|head| head.end + chrono::Duration::minutes(head.buffer_real))
            } else {
                None
            };

            let days_late = days_late(supposed_delivery_date, delivery_after_scheduling);

            OrderDeliveryRow {
                order_no: order_no.to_string(),
                supposed_delivery_date,
                delivery_after_scheduling,
                days_late,
            }
        })
        .collect()
}

/// `ceil(max(0, actual - target) / 1 day)`, with a hard `0` whenever the
/// target isn't an effective deadline at all (§4.8).
fn days_late(target: Option<Timestamp>, actual: Option<Timestamp>) -> Option<i64> {
    let (target, actual) = (target?, actual?);
    if !time::is_effective_deadline(Some(target)) {
        return Some(0);
    }
    let seconds = (actual - target).num_seconds();
    if seconds <= 0 {
        return Some(0);
    }
    Some(((seconds as f64) / 86_400.0).ceil() as i64)
}
