//! Process-wide scenario registry (C10, §5 "Process-wide state").
//!
//! A small concurrent map keyed by scenario name. Each entry is guarded by
//! its own lock so unrelated scenarios never contend with each other; a
//! single [`std::sync::RwLock`] around the map itself plays the role of the
//! "global lock protecting lazy lock creation" from §5 and §9 — readers
//! (the common case, once every scenario has run at least once) never block
//! each other, only the rare first-touch insert takes the write path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// A scenario's three flags, as read by the progress-polling endpoint this
/// crate's caller exposes (§5, §6 "Control surface").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScenarioStatus {
    pub active: bool,
    /// 0..=100 while running, -1 after an unexpected fault (§5, §7).
    pub progress: i32,
    pub cancel_requested: bool,
}

/// Returned by [`ScenarioRegistry::try_start`] when a scenario already has a
/// run in flight (§5 "a second concurrent request... must be rejected").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioBusy;

#[derive(Default)]
pub struct ScenarioRegistry {
    entries: RwLock<HashMap<String, Arc<Mutex<ScenarioStatus>>>>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, scenario: &str) -> Arc<Mutex<ScenarioStatus>> {
        if let Some(existing) = self.entries.read().unwrap().get(scenario) {
            return existing.clone();
        }
        self.entries
            .write()
            .unwrap()
            .entry(scenario.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ScenarioStatus::default())))
            .clone()
    }

    /// Mark `scenario` active, or reject if a run is already in flight.
    /// Resets `progress` to 0 and clears any stale `cancel_requested` from a
    /// prior completed run.
    pub fn try_start(&self, scenario: &str) -> Result<ScenarioHandle, ScenarioBusy> {
        let cell = self.cell(scenario);
        {
            let mut status = cell.lock().unwrap();
            if status.active {
                return Err(ScenarioBusy);
            }
            status.active = true;
            status.progress = 0;
            status.cancel_requested = false;
        }
        Ok(ScenarioHandle { cell })
    }

    /// Request cooperative cancellation of `scenario`'s in-flight run, if
    /// any. A no-op (but not an error) if nothing is running.
    pub fn cancel(&self, scenario: &str) {
        self.cell(scenario).lock().unwrap().cancel_requested = true;
    }

    pub fn status(&self, scenario: &str) -> ScenarioStatus {
        *self.cell(scenario).lock().unwrap()
    }
}

/// Held by the one run currently in flight for a scenario; `run.rs` drives
/// progress and checks cancellation through this handle rather than the
/// registry directly, so a run can't accidentally touch another scenario's
/// state.
pub struct ScenarioHandle {
    cell: Arc<Mutex<ScenarioStatus>>,
}

impl ScenarioHandle {
    pub fn set_progress(&self, progress: u8) {
        self.cell.lock().unwrap().progress = progress as i32;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cell.lock().unwrap().cancel_requested
    }

    /// Run completed normally: progress 100, no longer active (§5).
    pub fn finish(self) {
        let mut status = self.cell.lock().unwrap();
        status.progress = 100;
        status.active = false;
    }

    /// Run was cancelled: no progress claim either way, just release the
    /// active flag (§5 "Cancellation... driver returns a cancelled sentinel
    /// without producing artifacts").
    pub fn finish_cancelled(self) {
        self.cell.lock().unwrap().active = false;
    }

    /// Unexpected fault at the driver boundary: progress -1, not active
    /// (§5, §7 "Unexpected fault").
    pub fn finish_failed(self) {
        let mut status = self.cell.lock().unwrap();
        status.progress = -1;
        status.active = false;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn second_start_is_rejected_while_first_is_active() {
        let registry = ScenarioRegistry::new();
        let handle = registry.try_start("s1").expect("first start ok");
        assert_eq!(registry.try_start("s1").unwrap_err(), ScenarioBusy);
        handle.finish();
        assert!(registry.try_start("s1").is_ok());
    }

    #[test]
    fn unrelated_scenarios_do_not_contend() {
        let registry = ScenarioRegistry::new();
        let a = registry.try_start("a").expect("a starts");
        let b = registry.try_start("b").expect("b starts independently");
        a.finish();
        b.finish();
    }

    #[test]
    fn cancel_is_observed_by_the_active_handle() {
        let registry = ScenarioRegistry::new();
        let handle = registry.try_start("s1").unwrap();
        assert!(!handle.is_cancelled());
        registry.cancel("s1");
        assert!(handle.is_cancelled());
        handle.finish_cancelled();
        assert!(!registry.status("s1").active);
    }

    #[test]
    fn failed_run_reports_negative_progress_and_clears_active() {
        let registry = ScenarioRegistry::new();
        let handle = registry.try_start("s1").unwrap();
        handle.set_progress(42);
        handle.finish_failed();
        let status = registry.status("s1");
        assert_eq!(status.progress, -1);
        assert!(!status.active);
    }

    #[test]
    fn cancelling_an_unknown_scenario_is_not_an_error() {
        let registry = ScenarioRegistry::new();
        registry.cancel("never-started");
        assert!(!registry.status("never-started").active);
    }
}
