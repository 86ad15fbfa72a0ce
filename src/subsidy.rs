//! Subsidies that remove all envy from an allocation.
//!
//! The subsidy of agent `i` is the heaviest path starting at `i` in the envy graph (at least 0).
//! Longest paths are shortest paths over negated weights, computed by Bellman-Ford. They exist
//! only if the envy graph has no positive-weight cycle, which is checked first.

use crate::allocation::Allocation;
use crate::cycle::positive_cycle;
use crate::envy::{EnvyEdge, EnvyGraph};
use crate::error::{ConfigError, Infeasible};
use crate::observer::Observer;
use crate::solver::toleration;
use crate::valuation::ValuationIndex;
use tracing::{debug, trace, warn};

/// Non-negative subsidy of every agent, in the agent order of the envy graph.
#[derive(Debug, Clone, PartialEq)]
pub struct SubsidyVector {
    agents: Vec<String>,
    amounts: Vec<f64>,
}

impl SubsidyVector {
    pub fn get(&self, agent: &str) -> Option<f64> {
        self.agents
            .iter()
            .position(|name| name == agent)
            .map(|i| self.amounts[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.agents
            .iter()
            .map(String::as_str)
            .zip(self.amounts.iter().copied())
    }

    pub fn amounts(&self) -> &[f64] {
        &self.amounts
    }

    pub fn len(&self) -> usize {
        self.amounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.amounts.iter().sum()
    }

    /// Largest single subsidy, 0 for no agents.
    pub fn max(&self) -> f64 {
        self.amounts.iter().fold(0_f64, |acc, amount| acc.max(*amount))
    }

    /// No agent needs a subsidy.
    pub fn is_zero(&self) -> bool {
        self.amounts.iter().all(|amount| *amount == 0.)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SubsidySolver {
    tolerance: Option<f64>,
}

impl SubsidySolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relaxations and cycles lighter than `tolerance` are ignored.
    pub fn with_tolerance(tolerance: f64) -> Self {
        SubsidySolver {
            tolerance: Some(tolerance.abs()),
        }
    }

    /// Tolerance used for `graph`: the rounding error of its largest weight, scaled by the
    /// number of edges a path can have.
    pub fn tolerance_for(&self, graph: &EnvyGraph) -> f64 {
        self.tolerance.unwrap_or_else(|| {
            toleration(graph.max_abs_weight()) * (graph.num_agents() as f64 + 1.) * 16.
        })
    }

    /// Subsidy of every agent of `graph`, or the positive cycle that makes it impossible.
    pub fn solve(
        &self,
        graph: &EnvyGraph,
        observer: &mut dyn Observer,
    ) -> Result<SubsidyVector, Infeasible> {
        if let Some(infeasible) = self.find_positive_cycle(graph) {
            warn!("{}", infeasible);
            observer.positive_cycle(&infeasible.cycle, infeasible.weight);
            return Err(infeasible);
        }

        let tolerance = self.tolerance_for(graph);
        let mut amounts = Vec::with_capacity(graph.num_agents());
        for source in 0..graph.num_agents() {
            let distances = shortest_paths(graph.num_agents(), graph.edges(), source, tolerance);
            let heaviest_path = -distances
                .iter()
                .filter(|dist| dist.is_finite())
                .fold(0_f64, |acc, dist| acc.min(*dist));
            let amount = if heaviest_path > tolerance {
                heaviest_path
            } else {
                0.
            };
            trace!("subsidy of {}: {}", graph.agents()[source], amount);
            observer.subsidy_computed(&graph.agents()[source], amount);
            amounts.push(amount);
        }
        debug!("subsidies {:?}", amounts);
        Ok(SubsidyVector {
            agents: graph.agents().to_vec(),
            amounts,
        })
    }

    /// Finds a positive-weight cycle of `graph`, if there is one.
    ///
    /// Every agent starts at distance 0 as if connected to a virtual source, so cycles in any
    /// part of the graph are found. The cycle comes from the predecessor chain of the last
    /// relaxed agent.
    pub fn find_positive_cycle(&self, graph: &EnvyGraph) -> Option<Infeasible> {
        let tolerance = self.tolerance_for(graph);
        let cycle = positive_cycle(
            graph.num_agents(),
            graph.edges(),
            |edge| (edge.from, edge.to, edge.weight),
            tolerance,
        )?;
        Some(self.describe(graph, &cycle))
    }

    fn describe(&self, graph: &EnvyGraph, cycle: &[usize]) -> Infeasible {
        let edges = graph.edges();
        Infeasible {
            cycle: cycle
                .iter()
                .map(|e| graph.agents()[edges[*e].from].clone())
                .collect(),
            weight: cycle.iter().map(|e| edges[*e].weight).sum(),
        }
    }
}

/// Bellman-Ford over negated weights; unreachable agents stay at infinity.
fn shortest_paths(n: usize, edges: &[EnvyEdge], source: usize, tolerance: f64) -> Vec<f64> {
    let mut dist = vec![f64::INFINITY; n];
    dist[source] = 0.;
    for _ in 0..n.saturating_sub(1) {
        let mut changed = false;
        for edge in edges.iter() {
            if dist[edge.from] == f64::INFINITY {
                continue;
            }
            let alternative = dist[edge.from] - edge.weight;
            if alternative < dist[edge.to] - tolerance {
                dist[edge.to] = alternative;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    dist
}

/// Subsidies of [`SubsidySolver::new`].
pub fn compute_subsidies(
    graph: &EnvyGraph,
    observer: &mut dyn Observer,
) -> Result<SubsidyVector, Infeasible> {
    SubsidySolver::new().solve(graph, observer)
}

/// Checks `v_i(A_i) + p_i >= v_i(A_k) + p_k - eps` for every pair of agents.
pub fn is_envy_free_with_subsidy(
    index: &ValuationIndex,
    allocation: &Allocation,
    subsidies: &SubsidyVector,
    eps: f64,
) -> Result<bool, ConfigError> {
    let mut paid = Vec::with_capacity(allocation.agents().len());
    for agent in allocation.agents() {
        paid.push(
            subsidies
                .get(agent)
                .ok_or_else(|| ConfigError::UnknownAgent(agent.clone()))?,
        );
    }
    let bundles = allocation.bundles_in(index)?;
    for (i, agent) in allocation.agents().iter().enumerate() {
        let agent_id = index.agent_id(agent)?;
        let own = index.bundle_value_of(agent_id, &bundles[i]) + paid[i];
        for k in (0..paid.len()).filter(|k| *k != i) {
            let other = index.bundle_value_of(agent_id, &bundles[k]) + paid[k];
            if own < other - eps {
                debug!("{} envies {} by {}", agent, allocation.agents()[k], other - own);
                return Ok(false);
            }
        }
    }
    Ok(true)
}
