use std::collections::HashMap;

use serde::Serialize;

use crate::policy::Tier;

/// Per-function counters, keyed by exactly the names §6 lists so a telemetry consumer can diff
/// this crate's output against the original system's dictionaries without a translation table.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FunctionTelemetry {
    pub gvn_hits: usize,
    pub sccp_branch_prunes: usize,
    pub loop_edge_thread_prunes: usize,
    pub try_edge_thread_prunes: usize,
    pub dce_removed_total: usize,
    pub cfg_region_prunes: usize,
    pub label_prunes: usize,
    pub jump_noop_elisions: usize,
    pub licm_hoists: usize,
    pub guard_hoist_rejected: usize,
    pub expanded_attempts: usize,
    pub expanded_accepted: usize,
    pub expanded_fallbacks: usize,
    pub sccp_iteration_cap_hits: usize,
    pub fixed_point_fail_fast: usize,
    /// Set when the release-tier idempotence check (§4.12) finds that re-running the pipeline on
    /// an already-converged sequence changed it. Dev tier raises [crate::error::DriverError] on
    /// the same condition instead of recording it here.
    pub idempotence_violation: bool,
}

impl FunctionTelemetry {
    /// Fold one round's stats in, per §4.12: counters accumulate across rounds within a single
    /// function's optimization run.
    pub fn accumulate(&mut self, round: &molt_tir_transform::RoundStats) {
        self.gvn_hits += round.cse.gvn_hits;
        self.loop_edge_thread_prunes += round.edge_thread.loop_edge_thread_prunes;
        self.try_edge_thread_prunes += round.edge_thread.try_edge_thread_prunes;
        self.dce_removed_total += round.dce.dce_removed_total;
        self.cfg_region_prunes += round.dce.cfg_region_prunes;
        self.label_prunes += round.dce.label_prunes;
        self.jump_noop_elisions += round.dce.jump_noop_elisions;
        self.licm_hoists += round.licm.licm_hoisted;
        self.guard_hoist_rejected += round.guards.guards_rejected_mutation;
        self.sccp_iteration_cap_hits += round.sccp_iteration_cap_hits;
    }
}

/// One degradation-ladder step taken during a function's optimization run, per §6's
/// `{action, reason}` shape.
#[derive(Debug, Clone, Serialize)]
pub struct DegradeEvent {
    pub action: &'static str,
    pub reason: &'static str,
}

/// The serialized shape §6 specifies exactly: `{profile, tier, spent_ms, degraded,
/// degrade_events}`.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyOutcome {
    pub profile: &'static str,
    pub tier: &'static str,
    pub spent_ms: u64,
    pub degraded: bool,
    pub degrade_events: Vec<DegradeEvent>,
}

impl PolicyOutcome {
    pub fn new(profile: &'static str, tier: Tier) -> Self {
        Self {
            profile,
            tier: match tier {
                Tier::A => "A",
                Tier::B => "B",
                Tier::C => "C",
            },
            spent_ms: 0,
            degraded: false,
            degrade_events: Vec::new(),
        }
    }

    pub fn record_degrade_event(&mut self, action: &'static str, reason: &'static str) {
        self.degraded = true;
        self.degrade_events.push(DegradeEvent { action, reason });
    }
}

/// One pass's timing record for one function, per `examples/original_source`'s
/// `PassTiming`-shaped dict (`ms_total`, `samples_ms`, `attempted`, `degraded`).
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassTiming {
    pub ms_total: f64,
    pub samples_ms: Vec<f64>,
    pub attempted: usize,
    pub degraded: usize,
}

impl PassTiming {
    pub fn record_sample(&mut self, ms: f64, was_degraded: bool) {
        self.attempted += 1;
        self.ms_total += ms;
        self.samples_ms.push(ms);
        if was_degraded {
            self.degraded += 1;
        }
    }
}

/// The process-wide telemetry aggregator, per §5's "per-function aggregation then merge" and
/// §C's three separate per-function maps. A single function's run produces one entry in each
/// map; merging across functions is just `HashMap::insert`, so no lock is needed beyond whatever
/// the caller uses to serialize access to one `TelemetryAggregator` across functions (§5 allows
/// either a single lock or per-function aggregation followed by a merge — this type supports
/// the latter, leaving the former to the caller if it prefers to share one aggregator directly).
#[derive(Debug, Clone, Default)]
pub struct TelemetryAggregator {
    pub midend_stats_by_function: HashMap<String, FunctionTelemetry>,
    pub midend_policy_outcomes_by_function: HashMap<String, PolicyOutcome>,
    pub midend_pass_stats_by_function: HashMap<String, HashMap<&'static str, PassTiming>>,
}

impl TelemetryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_function(
        &mut self,
        function_name: impl Into<String>,
        stats: FunctionTelemetry,
        outcome: PolicyOutcome,
        pass_timings: HashMap<&'static str, PassTiming>,
    ) {
        let function_name = function_name.into();
        self.midend_stats_by_function.insert(function_name.clone(), stats);
        self.midend_policy_outcomes_by_function.insert(function_name.clone(), outcome);
        self.midend_pass_stats_by_function.insert(function_name, pass_timings);
    }

    /// Serialize the aggregator's current state as the three top-level dictionaries §C
    /// specifies, ready to hand to a front-end/back-end collaborator as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "midend_stats_by_function": self.midend_stats_by_function,
            "midend_policy_outcomes_by_function": self.midend_policy_outcomes_by_function,
            "midend_pass_stats_by_function": self.midend_pass_stats_by_function,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_outcome_serializes_to_the_spec_shape() {
        let mut outcome = PolicyOutcome::new("release", Tier::B);
        outcome.record_degrade_event("disable_deep_edge_thread", "budget_exceeded");
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["profile"], "release");
        assert_eq!(value["tier"], "B");
        assert_eq!(value["degraded"], true);
        assert_eq!(value["degrade_events"][0]["action"], "disable_deep_edge_thread");
    }

    #[test]
    fn aggregator_keeps_three_maps_keyed_by_function_name() {
        let mut agg = TelemetryAggregator::new();
        agg.record_function(
            "foo",
            FunctionTelemetry::default(),
            PolicyOutcome::new("dev", Tier::A),
            HashMap::new(),
        );
        assert!(agg.midend_stats_by_function.contains_key("foo"));
        assert!(agg.midend_policy_outcomes_by_function.contains_key("foo"));
        assert!(agg.midend_pass_stats_by_function.contains_key("foo"));
    }
}
