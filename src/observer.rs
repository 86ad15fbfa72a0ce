//! Side channel for progress of the allocation and subsidy stages.
//!
//! Every stage takes `&mut dyn Observer`; all methods default to doing nothing.

use tracing::{debug, info, warn};

pub trait Observer {
    /// A matching round starts with `remaining` unallocated units.
    fn round_started(&mut self, _round: usize, _remaining: u64) {}
    /// `agent` won one unit of `item` in `round`; `value` is the weighted arc value.
    fn matched(&mut self, _round: usize, _agent: &str, _item: &str, _value: f64) {}
    fn round_finished(&mut self, _round: usize, _allocated: u64, _remaining: u64) {}
    fn positive_cycle(&mut self, _cycle: &[String], _weight: f64) {}
    fn subsidy_computed(&mut self, _agent: &str, _subsidy: f64) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Forwards every notification to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn round_started(&mut self, round: usize, remaining: u64) {
        debug!(round, remaining, "matching round started");
    }

    fn matched(&mut self, round: usize, agent: &str, item: &str, value: f64) {
        debug!(round, agent, item, value, "matched");
    }

    fn round_finished(&mut self, round: usize, allocated: u64, remaining: u64) {
        info!(round, allocated, remaining, "matching round finished");
    }

    fn positive_cycle(&mut self, cycle: &[String], weight: f64) {
        warn!(?cycle, weight, "positive-weight envy cycle");
    }

    fn subsidy_computed(&mut self, agent: &str, subsidy: f64) {
        info!(agent, subsidy, "subsidy");
    }
}
