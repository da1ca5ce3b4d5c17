//! Precedence graph construction (C4, §4.4): intra-order chains plus
//! material upstream edges.

use std::collections::{HashMap, HashSet};

use crate::model::Op;
use crate::time::{self, Timestamp};

/// Predecessor/successor sets per job id, ready for the dispatcher's
/// indegree bookkeeping.
#[derive(Debug, Default)]
pub struct PrecedenceGraph {
    pub pred: HashMap<String, HashSet<String>>,
    pub succ: HashMap<String, HashSet<String>>,
}

impl PrecedenceGraph {
    fn add_edge(&mut self, from: &str, to: &str) {
        self.succ.entry(from.to_string()).or_default().insert(to.to_string());
        self.pred.entry(to.to_string()).or_default().insert(from.to_string());
        self.pred.entry(from.to_string()).or_default();
        self.succ.entry(to.to_string()).or_default();
    }

    pub fn indegree(&self, job_id: &str) -> usize {
        self.pred.get(job_id).map_or(0, HashSet::len)
    }
}

/// Build the DAG from schedulable ops and order-header deadlines.
///
/// `order_deadlines` maps `order_no -> latest_date_head` (from record-type
/// 10 header rows); only orders whose header deadline is effective (year ≥
/// 2025) can gate a downstream op via a material edge (§4.4 point 2).
pub fn build_dependency_graph(
    ops: &[Op],
    order_deadlines: &HashMap<String, Option<Timestamp>>,
) -> PrecedenceGraph {
    let mut graph = PrecedenceGraph::default();

    for op in ops {
        graph.pred.entry(op.job_id.clone()).or_default();
        graph.succ.entry(op.job_id.clone()).or_default();
    }

    // 1. Intra-order chain: descending order_pos, predecessor -> successor.
    let mut by_order: HashMap<&str, Vec<&Op>> = HashMap::new();
    for op in ops {
        by_order.entry(op.order_no.as_str()).or_default().push(op);
    }
    for group in by_order.values_mut() {
        group.sort_by(|a, b| b.order_pos.cmp(&a.order_pos));
        for pair in group.windows(2) {
            graph.add_edge(&pair[0].job_id, &pair[1].job_id);
        }
    }

    // 2. Material edges: upstream order's lowest-order_pos schedulable op ->
    // this op, gated on the upstream order having an effective deadline.
    let mut lowest_by_order: HashMap<&str, &Op> = HashMap::new();
    for op in ops {
        lowest_by_order
            .entry(op.order_no.as_str())
            .and_modify(|cur| {
                if op.order_pos < cur.order_pos {
                    *cur = op;
                }
            })
            .or_insert(op);
    }

    for op in ops {
        if !op.op_needs_upstream {
            continue;
        }
        for upstream_order in &op.op_upstream_orders {
            let Some(upstream_op) = lowest_by_order.get(upstream_order.as_str()) else {
                continue;
            };
            let has_effective = order_deadlines
                .get(upstream_order.as_str())
                .is_some_and(|ddl| time::is_effective_deadline(*ddl));
            if !has_effective {
                continue;
            }
            graph.add_edge(&upstream_op.job_id, &op.job_id);
        }
    }

    graph
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{PriorityGroup, RecordType};

    fn op(job_id: &str, order_no: &str, order_pos: i64) -> Op {
        Op {
            job_id: job_id.to_string(),
            order_no: order_no.to_string(),
            order_pos,
            item_no: String::new(),
            sort_pos: 0,
            workplace: "M1".to_string(),
            workplace_group: String::new(),
            duration_min: 10.0,
            buffer_min: 0,
            date_start: None,
            effective_deadline: None,
            latest_date_head: None,
            priority_group: PriorityGroup::NonBottleneck,
            orderstate: 0,
            record_type: RecordType::StandardOp,
            op_needs_upstream: false,
            op_upstream_orders: vec![],
        }
    }

    #[test]
    fn intra_order_chain_runs_highest_pos_first() {
        let ops = vec![op("O1-1", "O1", 1), op("O1-2", "O1", 2), op("O1-3", "O1", 3)];
        let graph = build_dependency_graph(&ops, &HashMap::new());

        assert_eq!(graph.indegree("O1-3"), 0);
        assert_eq!(graph.indegree("O1-2"), 1);
        assert!(graph.pred["O1-2"].contains("O1-3"));
        assert_eq!(graph.indegree("O1-1"), 1);
        assert!(graph.pred["O1-1"].contains("O1-2"));
    }

    #[test]
    fn material_edge_only_when_upstream_deadline_is_effective() {
        let mut downstream = op("O2-1", "O2", 1);
        downstream.op_needs_upstream = true;
        downstream.op_upstream_orders = vec!["O1".to_string()];
        let upstream = op("O1-1", "O1", 1);

        let ops = vec![upstream, downstream];

        let mut deadlines = HashMap::new();
        deadlines.insert("O1".to_string(), None);
        let graph = build_dependency_graph(&ops, &deadlines);
        assert_eq!(graph.indegree("O2-1"), 0, "no effective deadline => no block");

        let mut deadlines2 = HashMap::new();
        deadlines2.insert(
            "O1".to_string(),
            Some(
                chrono::NaiveDate::from_ymd_opt(2026, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
            ),
        );
        let graph2 = build_dependency_graph(&ops, &deadlines2);
        assert_eq!(graph2.indegree("O2-1"), 1);
        assert!(graph2.pred["O2-1"].contains("O1-1"));
    }
}
