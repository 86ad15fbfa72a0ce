//! One round of maximum-weight bipartite matching between agents and available item units.
//!
//! The round is reduced to an asymmetric assignment problem for an [`AuctionSolver`]:
//! rows are agent slots, columns are item units followed by one private "no item" column per
//! row. Taking the private column means the slot is left unmatched in this round.

use crate::error::{AllocationError, ConfigError};
use crate::observer::Observer;
use crate::solution::Assignment;
use crate::solver::AuctionSolver;
use crate::symmetric::ForwardAuctionSolver;
use crate::valuation::{AgentId, ItemId, MissingValues, ValuationIndex};
use anyhow::anyhow;
use tracing::{debug, trace};

/// Solver used when the caller doesn't pick one.
pub type DefaultSolver = ForwardAuctionSolver<u32>;

/// Which units of an item take part in one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemUnits {
    /// One unit of every item with residual capacity; an item goes to one agent per round at most.
    Single,
    /// Every residual unit is a separate column.
    Residual,
}

impl Default for ItemUnits {
    fn default() -> Self {
        ItemUnits::Single
    }
}

/// Validated per-agent parameters of the matching rounds, indexed by [`AgentId`].
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingSettings {
    pub weights: Vec<f64>,
    pub slots: Vec<usize>,
    pub item_units: ItemUnits,
    pub force_cardinality: bool,
    pub missing_values: MissingValues,
    pub eps: Option<f64>,
    pub max_iterations: Option<u32>,
}

impl MatchingSettings {
    /// Weight 1 and one slot for every agent of `index`.
    pub fn uniform(index: &ValuationIndex) -> Self {
        MatchingSettings {
            weights: vec![1.; index.num_agents()],
            slots: vec![1; index.num_agents()],
            item_units: ItemUnits::default(),
            force_cardinality: false,
            missing_values: MissingValues::default(),
            eps: None,
            max_iterations: None,
        }
    }
}

/// Result of one round: at most one item unit per agent slot, at most one slot per unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Matching {
    pairs: Vec<(AgentId, ItemId)>,
    weight: f64,
}

impl Matching {
    /// Matched pairs in agent order.
    pub fn pairs(&self) -> &[(AgentId, ItemId)] {
        &self.pairs
    }

    /// Sum of the weighted values of the matched pairs.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

pub struct MatchingEngine<'a, S: AuctionSolver<u32, S>> {
    index: &'a ValuationIndex,
    settings: MatchingSettings,
    // slots in the next round, an agent without slots sits the round out
    slots: Vec<usize>,
    // agent-major flags and value adjustments
    excluded: Vec<bool>,
    bonus: Vec<f64>,
    solver: S,
    assignment: Assignment<u32>,
    row_agent: Vec<AgentId>,
    column_item: Vec<ItemId>,
}

impl<'a, S: AuctionSolver<u32, S>> MatchingEngine<'a, S> {
    pub fn new(index: &'a ValuationIndex, settings: MatchingSettings) -> Self {
        let num_rows: usize = settings.slots.iter().sum();
        let num_cols = index.num_items() + num_rows;
        let (mut solver, assignment) = S::new(num_rows, num_cols, num_rows * num_cols);
        if let Some(max_iterations) = settings.max_iterations {
            solver.set_max_iterations(max_iterations);
        }
        let num_pairs = index.num_agents() * index.num_items();
        MatchingEngine {
            index,
            slots: settings.slots.clone(),
            settings,
            excluded: vec![false; num_pairs],
            bonus: vec![0.; num_pairs],
            solver,
            assignment,
            row_agent: Vec::with_capacity(num_rows),
            column_item: Vec::with_capacity(num_cols),
        }
    }

    pub fn settings(&self) -> &MatchingSettings {
        &self.settings
    }

    pub fn slots(&self, agent: AgentId) -> usize {
        self.slots[agent.0]
    }

    /// Slots of `agent` from the next round on. Zero leaves the agent out.
    pub fn set_slots(&mut self, agent: AgentId, slots: usize) {
        self.slots[agent.0] = slots;
    }

    pub fn has_active_agents(&self) -> bool {
        self.slots.iter().any(|slots| *slots > 0)
    }

    /// `agent` can't be matched to `item` any more.
    pub fn exclude(&mut self, agent: AgentId, item: ItemId) {
        let pair = self.pair(agent, item);
        self.excluded[pair] = true;
    }

    /// Raises the matching value of `item` for `agent` by `amount` from the next round on.
    pub fn add_bonus(&mut self, agent: AgentId, item: ItemId, amount: f64) {
        let pair = self.pair(agent, item);
        self.bonus[pair] += amount;
    }

    #[inline]
    fn pair(&self, agent: AgentId, item: ItemId) -> usize {
        agent.0 * self.index.num_items() + item.0
    }

    /// Weighted and adjusted value of `item` for `agent`, `None` if there is no arc.
    pub fn arc_value(&self, agent: AgentId, item: ItemId) -> Result<Option<f64>, ConfigError> {
        let pair = self.pair(agent, item);
        if self.excluded[pair] {
            return Ok(None);
        }
        let weight = self.settings.weights[agent.0];
        match self.index.value_of(agent, item) {
            Some(value) => Ok(Some(value * weight + self.bonus[pair])),
            None => match self.settings.missing_values {
                MissingValues::Zero => Ok(Some(self.bonus[pair])),
                MissingValues::Exclude => Ok(None),
                MissingValues::Reject => Err(ConfigError::MissingValue {
                    agent: self.index.agent_name(agent).to_string(),
                    item: self.index.item_name(item).to_string(),
                }),
            },
        }
    }

    /// Item with the highest [`arc_value`](Self::arc_value) among those with units left, the
    /// first one on ties.
    pub fn best_value(
        &self,
        agent: AgentId,
        residual: &[u32],
    ) -> Result<Option<(ItemId, f64)>, ConfigError> {
        let mut best: Option<(ItemId, f64)> = None;
        for item in self.index.item_ids().filter(|item| residual[item.0] > 0) {
            if let Some(value) = self.arc_value(agent, item)? {
                if best.map_or(true, |(_, best_value)| value > best_value) {
                    best = Some((item, value));
                }
            }
        }
        Ok(best)
    }

    /// Computes a maximum-weight matching of agent slots to the units in `residual`.
    ///
    /// `residual[j]` is the number of units of item `j` left; items at zero don't take part.
    pub fn match_round(
        &mut self,
        residual: &[u32],
        round: usize,
        observer: &mut dyn Observer,
    ) -> Result<Matching, AllocationError> {
        debug_assert_eq!(residual.len(), self.index.num_items());

        self.row_agent.clear();
        for agent in self.index.agent_ids() {
            let slots = self.slots[agent.0];
            self.row_agent
                .extend(std::iter::repeat(agent).take(slots));
        }

        self.column_item.clear();
        for (item, units) in residual.iter().enumerate() {
            let units = match self.settings.item_units {
                ItemUnits::Single => (*units).min(1),
                ItemUnits::Residual => *units,
            };
            self.column_item
                .extend(std::iter::repeat(ItemId(item)).take(units as usize));
        }

        let num_real = self.column_item.len();
        let num_rows = self.row_agent.len();
        if num_real == 0 || num_rows == 0 {
            return Ok(Matching::default());
        }

        // arcs of every row: real columns first, the private column last
        let mut rows: Vec<(Vec<u32>, Vec<f64>)> = Vec::with_capacity(num_rows);
        for agent in self.row_agent.iter() {
            let mut columns = Vec::with_capacity(num_real + 1);
            let mut values = Vec::with_capacity(num_real + 1);
            for (column, item) in self.column_item.iter().enumerate() {
                if let Some(value) = self.arc_value(*agent, *item)? {
                    columns.push(column_index(column)?);
                    values.push(value);
                }
            }
            rows.push((columns, values));
        }

        let no_item_value = if self.settings.force_cardinality {
            // any matching with one more real pair beats every matching without it
            let sum_of_row_maxima: f64 = rows
                .iter()
                .map(|(_, values)| values.iter().fold(0_f64, |acc, v| acc.max(v.abs())))
                .sum();
            -(2. * sum_of_row_maxima + 1.)
        } else {
            0.
        };

        let num_cols = num_real + num_rows;
        self.solver
            .init(column_index(num_rows)?, column_index(num_cols)?)?;
        for (row, (mut columns, mut values)) in rows.into_iter().enumerate() {
            columns.push(column_index(num_real + row)?);
            values.push(no_item_value);
            self.solver
                .extend_from_values(column_index(row)?, &columns, &values)?;
        }
        trace!(
            "round {}: {} rows, {} columns, {} arcs",
            round,
            num_rows,
            num_cols,
            self.solver.num_of_arcs()
        );

        self.solver.solve(&mut self.assignment, self.settings.eps)?;
        if !self.assignment.is_complete() {
            return Err(AllocationError::Solver(anyhow!(
                "{} slots left unassigned in round {}",
                self.assignment.num_unassigned,
                round
            )));
        }

        let mut matching = Matching::default();
        for (row, agent) in self.row_agent.iter().enumerate() {
            let column = match self.assignment.column_of(row) {
                Some(column) => column as usize,
                None => continue,
            };
            if column >= num_real {
                continue;
            }
            let item = self.column_item[column];
            let value = self
                .solver
                .arc_value(column_index(row)?, column_index(column)?)
                .unwrap_or(0.);
            observer.matched(
                round,
                self.index.agent_name(*agent),
                self.index.item_name(item),
                value,
            );
            matching.pairs.push((*agent, item));
            matching.weight += value;
        }
        debug!(
            "round {}: matched {} of {} slots, weight {}, {} auction iterations",
            round,
            matching.len(),
            num_rows,
            matching.weight,
            self.solver.nits()
        );
        Ok(matching)
    }
}

fn column_index(index: usize) -> Result<u32, AllocationError> {
    u32::try_from(index)
        .map_err(|_| AllocationError::Solver(anyhow!("index {} doesn't fit into u32", index)))
}
