//! Directed envy graph over the agents of a finished allocation.

use crate::allocation::Allocation;
use crate::error::ConfigError;
use crate::valuation::ValuationIndex;
use std::collections::HashMap;

/// `from` values the bundle of `to` by `weight` more than its own bundle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvyEdge {
    pub from: usize,
    pub to: usize,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvyGraph {
    agents: Vec<String>,
    edges: Vec<EnvyEdge>,
}

impl EnvyGraph {
    /// One edge per ordered pair of distinct agents, `weight(i, k) = v_i(A_k) - v_i(A_i)`.
    ///
    /// Values are the unweighted entries of `index`; agent weights of the matching rounds play no
    /// part here.
    pub fn build(index: &ValuationIndex, allocation: &Allocation) -> Result<Self, ConfigError> {
        let agents = allocation
            .agents()
            .iter()
            .map(|name| index.agent_id(name))
            .collect::<Result<Vec<_>, _>>()?;
        let bundles = allocation.bundles_in(index)?;

        let n = agents.len();
        let mut edges = Vec::with_capacity(n * n.saturating_sub(1));
        for (i, agent) in agents.iter().enumerate() {
            let own_value = index.bundle_value_of(*agent, &bundles[i]);
            for (k, bundle) in bundles.iter().enumerate() {
                if i == k {
                    continue;
                }
                edges.push(EnvyEdge {
                    from: i,
                    to: k,
                    weight: index.bundle_value_of(*agent, bundle) - own_value,
                });
            }
        }
        Ok(EnvyGraph {
            agents: allocation.agents().to_vec(),
            edges,
        })
    }

    /// A graph with arbitrary edges between named agents.
    pub fn from_edges<A, S>(
        agents: impl IntoIterator<Item = A>,
        edges: impl IntoIterator<Item = (S, S, f64)>,
    ) -> Result<Self, ConfigError>
    where
        A: Into<String>,
        S: AsRef<str>,
    {
        let agents: Vec<String> = agents.into_iter().map(Into::into).collect();
        let edges = {
            let mut lookup = HashMap::with_capacity(agents.len());
            for (i, agent) in agents.iter().enumerate() {
                if lookup.insert(agent.as_str(), i).is_some() {
                    return Err(ConfigError::DuplicateAgent(agent.clone()));
                }
            }
            let position = |agent: &str| {
                lookup
                    .get(agent)
                    .copied()
                    .ok_or_else(|| ConfigError::UnknownAgent(agent.to_string()))
            };
            edges
                .into_iter()
                .map(|(from, to, weight)| {
                    Ok::<_, ConfigError>(EnvyEdge {
                        from: position(from.as_ref())?,
                        to: position(to.as_ref())?,
                        weight,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(EnvyGraph { agents, edges })
    }

    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    pub fn edges(&self) -> &[EnvyEdge] {
        &self.edges
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Weight of the first edge `from -> to`.
    pub fn weight(&self, from: &str, to: &str) -> Option<f64> {
        let from = self.agents.iter().position(|agent| agent == from)?;
        let to = self.agents.iter().position(|agent| agent == to)?;
        self.edges
            .iter()
            .find(|edge| edge.from == from && edge.to == to)
            .map(|edge| edge.weight)
    }

    /// Largest absolute edge weight, 0 without edges.
    pub fn max_abs_weight(&self) -> f64 {
        self.edges
            .iter()
            .fold(0_f64, |acc, edge| acc.max(edge.weight.abs()))
    }

    /// No agent prefers another bundle to its own.
    pub fn is_envy_free(&self) -> bool {
        self.edges.iter().all(|edge| edge.weight <= 0.)
    }
}
