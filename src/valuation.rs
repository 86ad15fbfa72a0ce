//! Normalized valuation table: agents, items and each agent's value for each item.
//!
//! Inputs of any shape are converted once, at the boundary, by [`ValuationIndex::from_table`]
//! or [`ValuationIndex::from_matrix`]. Everything downstream works with [`AgentId`] and
//! [`ItemId`] indices into this table.

use crate::error::ConfigError;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub usize);

/// How the allocation engine treats (agent, item) pairs that have no declared value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingValues {
    /// Fail with [`ConfigError::MissingValue`].
    Reject,
    /// Count them as value 0.
    Zero,
    /// The agent can't be matched to the item.
    Exclude,
}

impl Default for MissingValues {
    fn default() -> Self {
        MissingValues::Reject
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValuationIndex {
    agents: Vec<String>,
    items: Vec<String>,
    agent_lookup: HashMap<String, AgentId>,
    item_lookup: HashMap<String, ItemId>,
    // row-major, agents x items; the items vector can grow while rows are added
    rows: Vec<Vec<Option<f64>>>,
}

impl ValuationIndex {
    /// Builds the index from `agent -> [(item, value)]` entries.
    ///
    /// Agents and items keep the order in which they are first seen. An item declared by one
    /// agent only is still part of the item set; the other agents have no value for it.
    pub fn from_table<A, R, T>(table: impl IntoIterator<Item = (A, R)>) -> Result<Self, ConfigError>
    where
        A: Into<String>,
        R: IntoIterator<Item = (T, f64)>,
        T: Into<String>,
    {
        let mut index = ValuationIndex::default();
        for (agent, values) in table {
            let agent = agent.into();
            if index.agent_lookup.contains_key(&agent) {
                return Err(ConfigError::DuplicateAgent(agent));
            }
            let agent_id = AgentId(index.agents.len());
            index.agent_lookup.insert(agent.clone(), agent_id);
            index.agents.push(agent);
            index.rows.push(Vec::new());

            for (item, value) in values {
                let item = item.into();
                if !value.is_finite() {
                    return Err(ConfigError::NonFiniteValue {
                        agent: index.agents[agent_id.0].clone(),
                        item,
                        value,
                    });
                }
                let item_id = index.intern_item(item);
                let row = &mut index.rows[agent_id.0];
                if row.len() <= item_id.0 {
                    row.resize(item_id.0 + 1, None);
                }
                row[item_id.0] = Some(value);
            }
        }
        let num_items = index.items.len();
        index.rows.iter_mut().for_each(|row| row.resize(num_items, None));
        Ok(index)
    }

    /// Builds the index from a dense matrix, one row per agent.
    ///
    /// Agents are named `Agent #i` and items by their column number.
    pub fn from_matrix<R>(matrix: impl IntoIterator<Item = R>) -> Result<Self, ConfigError>
    where
        R: AsRef<[f64]>,
    {
        let rows: Vec<R> = matrix.into_iter().collect();
        Self::from_table(rows.iter().enumerate().map(|(i, row)| {
            (
                format!("Agent #{}", i),
                row.as_ref()
                    .iter()
                    .enumerate()
                    .map(|(j, value)| (j.to_string(), *value))
                    .collect::<Vec<_>>(),
            )
        }))
    }

    fn intern_item(&mut self, item: String) -> ItemId {
        if let Some(id) = self.item_lookup.get(&item) {
            return *id;
        }
        let id = ItemId(self.items.len());
        self.item_lookup.insert(item.clone(), id);
        self.items.push(item);
        id
    }

    /// Value of `item` for `agent`.
    pub fn value(&self, agent: &str, item: &str) -> Result<f64, ConfigError> {
        let agent_id = self.agent_id(agent)?;
        let item_id = self.item_id(item)?;
        self.value_of(agent_id, item_id)
            .ok_or_else(|| ConfigError::MissingValue {
                agent: agent.to_string(),
                item: item.to_string(),
            })
    }

    /// Sum of the values of `items` for `agent`; items without a declared value count as 0.
    pub fn bundle_value<S: AsRef<str>>(
        &self,
        agent: &str,
        items: &[S],
    ) -> Result<f64, ConfigError> {
        let agent_id = self.agent_id(agent)?;
        items.iter().try_fold(0., |acc, item| {
            let item_id = self.item_id(item.as_ref())?;
            Ok(acc + self.value_or_zero(agent_id, item_id))
        })
    }

    pub fn all_items(&self) -> &[String] {
        &self.items
    }

    pub fn all_agents(&self) -> &[String] {
        &self.agents
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn agent_id(&self, agent: &str) -> Result<AgentId, ConfigError> {
        self.agent_lookup
            .get(agent)
            .copied()
            .ok_or_else(|| ConfigError::UnknownAgent(agent.to_string()))
    }

    pub fn item_id(&self, item: &str) -> Result<ItemId, ConfigError> {
        self.item_lookup
            .get(item)
            .copied()
            .ok_or_else(|| ConfigError::UnknownItem(item.to_string()))
    }

    pub fn agent_name(&self, agent: AgentId) -> &str {
        &self.agents[agent.0]
    }

    pub fn item_name(&self, item: ItemId) -> &str {
        &self.items[item.0]
    }

    #[inline]
    pub fn value_of(&self, agent: AgentId, item: ItemId) -> Option<f64> {
        self.rows[agent.0][item.0]
    }

    #[inline]
    pub fn value_or_zero(&self, agent: AgentId, item: ItemId) -> f64 {
        self.value_of(agent, item).unwrap_or(0.)
    }

    /// Value of a bundle of item indices for `agent`, items without a value count as 0.
    pub fn bundle_value_of(&self, agent: AgentId, items: &[ItemId]) -> f64 {
        items.iter().map(|item| self.value_or_zero(agent, *item)).sum()
    }

    pub fn agent_ids(&self) -> impl Iterator<Item = AgentId> + '_ {
        (0..self.agents.len()).map(AgentId)
    }

    pub fn item_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        (0..self.items.len()).map(ItemId)
    }

    /// First (agent, item) pair without a declared value.
    pub fn first_missing(&self) -> Option<(AgentId, ItemId)> {
        self.agent_ids().find_map(|agent| {
            self.item_ids()
                .find(|item| self.value_of(agent, *item).is_none())
                .map(|item| (agent, item))
        })
    }
}

impl fmt::Display for ValuationIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for agent in self.agent_ids() {
            write!(f, "{}:", self.agent_name(agent))?;
            for item in self.item_ids() {
                if let Some(value) = self.value_of(agent, item) {
                    write!(f, " {}={}", self.item_name(item), value)?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AgentId, ItemId, ValuationIndex};
    use crate::error::ConfigError;

    fn alice_and_bob() -> ValuationIndex {
        ValuationIndex::from_table(vec![
            ("Alice", vec![("a", 4.), ("b", 10.), ("c", 8.), ("d", 7.)]),
            ("Bob", vec![("a", 5.), ("b", 9.), ("c", 5.), ("d", 10.)]),
        ])
        .unwrap()
    }

    #[test]
    fn test_lookup_and_order() {
        let index = alice_and_bob();
        assert_eq!(index.all_agents(), ["Alice", "Bob"]);
        assert_eq!(index.all_items(), ["a", "b", "c", "d"]);
        assert_eq!(index.value("Bob", "d").unwrap(), 10.);
        assert_eq!(index.bundle_value("Alice", &["b", "c"]).unwrap(), 18.);
        assert_eq!(index.bundle_value::<&str>("Alice", &[]).unwrap(), 0.);
    }

    #[test]
    fn test_unknown_names_fail() {
        let index = alice_and_bob();
        assert_eq!(
            index.value("Carol", "a"),
            Err(ConfigError::UnknownAgent("Carol".to_string()))
        );
        assert_eq!(
            index.value("Alice", "z"),
            Err(ConfigError::UnknownItem("z".to_string()))
        );
    }

    #[test]
    fn test_sparse_rows_and_missing_values() {
        let index = ValuationIndex::from_table(vec![
            ("avi", vec![("x", 5.)]),
            ("beni", vec![("y", 3.), ("x", 2.)]),
        ])
        .unwrap();
        assert_eq!(index.all_items(), ["x", "y"]);
        assert_eq!(index.value_of(AgentId(0), ItemId(1)), None);
        assert_eq!(index.first_missing(), Some((AgentId(0), ItemId(1))));
        assert!(matches!(
            index.value("avi", "y"),
            Err(ConfigError::MissingValue { .. })
        ));
        assert_eq!(index.bundle_value("avi", &["x", "y"]).unwrap(), 5.);
    }

    #[test]
    fn test_duplicate_agent_and_non_finite_value() {
        let duplicate =
            ValuationIndex::from_table(vec![("avi", vec![("x", 1.)]), ("avi", vec![("x", 2.)])]);
        assert_eq!(
            duplicate.unwrap_err(),
            ConfigError::DuplicateAgent("avi".to_string())
        );
        let nan = ValuationIndex::from_table(vec![("avi", vec![("x", f64::NAN)])]);
        assert!(matches!(nan, Err(ConfigError::NonFiniteValue { .. })));
    }

    #[test]
    fn test_from_matrix_names() {
        let index = ValuationIndex::from_matrix(vec![vec![5., 4.], vec![2., 3.]]).unwrap();
        assert_eq!(index.all_agents(), ["Agent #0", "Agent #1"]);
        assert_eq!(index.all_items(), ["0", "1"]);
        assert_eq!(index.value("Agent #1", "1").unwrap(), 3.);
        assert_eq!(index.first_missing(), None);
    }
}
