//! Iterated maximum matching: one maximum-weight matching per round over a shrinking pool of
//! residual item units, until every unit is allocated.

use crate::error::{AllocationError, ConfigError};
use crate::matching::{DefaultSolver, ItemUnits, MatchingEngine, MatchingSettings};
use crate::observer::Observer;
use crate::solver::AuctionSolver;
use crate::valuation::{AgentId, ItemId, MissingValues, ValuationIndex};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Options of the allocation engine. Everything is optional, see the builder methods.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationConfig {
    item_capacities: Vec<(String, i64)>,
    agent_weights: Vec<(String, i64)>,
    agent_slots: Vec<(String, usize)>,
    agent_capacities: Vec<(String, usize)>,
    default_agent_capacity: Option<usize>,
    adjust_utilities: bool,
    item_units: ItemUnits,
    force_cardinality: bool,
    missing_values: MissingValues,
    eps: Option<f64>,
    max_iterations: Option<u32>,
}

impl AllocationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults of [`utilitarian_matching`]: forced cardinality, every residual unit takes part.
    pub fn utilitarian() -> Self {
        Self::default()
            .force_cardinality(true)
            .item_units(ItemUnits::Residual)
    }

    /// Number of units of `item`. Unlisted items have one unit, zero removes the item.
    pub fn item_capacity(mut self, item: impl Into<String>, units: i64) -> Self {
        self.item_capacities.push((item.into(), units));
        self
    }

    pub fn item_capacities<S: Into<String>>(
        mut self,
        capacities: impl IntoIterator<Item = (S, i64)>,
    ) -> Self {
        self.item_capacities
            .extend(capacities.into_iter().map(|(item, units)| (item.into(), units)));
        self
    }

    /// Positive multiplier of the agent's values in the matching rounds.
    pub fn agent_weight(mut self, agent: impl Into<String>, weight: i64) -> Self {
        self.agent_weights.push((agent.into(), weight));
        self
    }

    pub fn agent_weights<S: Into<String>>(
        mut self,
        weights: impl IntoIterator<Item = (S, i64)>,
    ) -> Self {
        self.agent_weights
            .extend(weights.into_iter().map(|(agent, weight)| (agent.into(), weight)));
        self
    }

    /// Number of items `agent` may win in a single round.
    pub fn agent_slots(mut self, agent: impl Into<String>, slots: usize) -> Self {
        self.agent_slots.push((agent.into(), slots));
        self
    }

    /// Total number of items `agent` may receive. A full agent leaves the remaining rounds.
    pub fn agent_capacity(mut self, agent: impl Into<String>, capacity: usize) -> Self {
        self.agent_capacities.push((agent.into(), capacity));
        self
    }

    pub fn agent_capacities<S: Into<String>>(
        mut self,
        capacities: impl IntoIterator<Item = (S, usize)>,
    ) -> Self {
        self.agent_capacities
            .extend(capacities.into_iter().map(|(agent, units)| (agent.into(), units)));
        self
    }

    /// Capacity of every agent without an [`agent_capacity`](Self::agent_capacity) of its own.
    /// Without it such agents are unlimited.
    pub fn default_agent_capacity(mut self, capacity: usize) -> Self {
        self.default_agent_capacity = Some(capacity);
        self
    }

    /// In [`iterated_maximum_matching_courses`], an agent that got less than the best value it
    /// could have had in a round is compensated on its best remaining item.
    pub fn adjust_utilities(mut self, adjust_utilities: bool) -> Self {
        self.adjust_utilities = adjust_utilities;
        self
    }

    pub fn item_units(mut self, item_units: ItemUnits) -> Self {
        self.item_units = item_units;
        self
    }

    pub fn force_cardinality(mut self, force_cardinality: bool) -> Self {
        self.force_cardinality = force_cardinality;
        self
    }

    pub fn missing_values(mut self, missing_values: MissingValues) -> Self {
        self.missing_values = missing_values;
        self
    }

    /// Final ε of the auction. Results are refined to the optimum whatever the ε, a smaller one
    /// only shortens the refinement.
    pub fn eps(mut self, eps: f64) -> Self {
        self.eps = Some(eps);
        self
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Validates the configuration against `index`.
    ///
    /// Returns the initial capacity of every item and the settings of the matching rounds.
    pub fn resolve(
        &self,
        index: &ValuationIndex,
    ) -> Result<(Vec<u32>, MatchingSettings), ConfigError> {
        let mut capacities = vec![1_u32; index.num_items()];
        for (item, units) in self.item_capacities.iter() {
            let item_id = index.item_id(item)?;
            if *units < 0 {
                return Err(ConfigError::NegativeCapacity {
                    item: item.clone(),
                    capacity: *units,
                });
            }
            capacities[item_id.0] =
                u32::try_from(*units).map_err(|_| ConfigError::CapacityOverflow {
                    item: item.clone(),
                    capacity: *units,
                })?;
        }

        let mut settings = MatchingSettings::uniform(index);
        for (agent, weight) in self.agent_weights.iter() {
            let agent_id = index.agent_id(agent)?;
            if *weight <= 0 {
                return Err(ConfigError::InvalidAgentWeight {
                    agent: agent.clone(),
                    weight: *weight,
                });
            }
            settings.weights[agent_id.0] = *weight as f64;
        }
        for (agent, slots) in self.agent_slots.iter() {
            let agent_id = index.agent_id(agent)?;
            if *slots == 0 {
                return Err(ConfigError::InvalidAgentSlots {
                    agent: agent.clone(),
                    slots: *slots,
                });
            }
            settings.slots[agent_id.0] = *slots;
        }
        if let Some(eps) = self.eps {
            if !(eps > 0. && eps.is_finite()) {
                return Err(ConfigError::InvalidEps(eps));
            }
        }

        if self.missing_values == MissingValues::Reject {
            for agent in index.agent_ids() {
                for item in index.item_ids().filter(|item| capacities[item.0] > 0) {
                    if index.value_of(agent, item).is_none() {
                        return Err(ConfigError::MissingValue {
                            agent: index.agent_name(agent).to_string(),
                            item: index.item_name(item).to_string(),
                        });
                    }
                }
            }
        }

        settings.item_units = self.item_units;
        settings.force_cardinality = self.force_cardinality;
        settings.missing_values = self.missing_values;
        settings.eps = self.eps;
        settings.max_iterations = self.max_iterations;
        Ok((capacities, settings))
    }

    /// Total capacity of every agent of `index`, `None` if unlimited.
    pub fn resolve_agent_capacities(
        &self,
        index: &ValuationIndex,
    ) -> Result<Vec<Option<usize>>, ConfigError> {
        let mut capacities = vec![self.default_agent_capacity; index.num_agents()];
        for (agent, capacity) in self.agent_capacities.iter() {
            capacities[index.agent_id(agent)?.0] = Some(*capacity);
        }
        Ok(capacities)
    }
}

/// Residual units of every item, owned by one allocation run.
#[derive(Debug, Clone)]
struct ResidualPool {
    units: Vec<u32>,
    total: u64,
}

impl ResidualPool {
    fn new(units: Vec<u32>) -> Self {
        let total = units.iter().map(|u| *u as u64).sum();
        ResidualPool { units, total }
    }

    fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn take(&mut self, item: ItemId) {
        debug_assert!(self.units[item.0] > 0, "no units of item {} left", item.0);
        self.units[item.0] -= 1;
        self.total -= 1;
    }
}

/// Final bundles, in the agent order of the valuation index.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    agents: Vec<String>,
    items: Vec<String>,
    // items in the order they were won
    bundles: Vec<Vec<ItemId>>,
    num_rounds: usize,
}

impl Allocation {
    fn empty(index: &ValuationIndex) -> Self {
        Allocation {
            agents: index.all_agents().to_vec(),
            items: index.all_items().to_vec(),
            bundles: vec![Vec::new(); index.num_agents()],
            num_rounds: 0,
        }
    }

    /// A hand-made allocation. Agents that aren't listed get an empty bundle.
    pub fn from_bundles<A, B, T>(
        index: &ValuationIndex,
        bundles: impl IntoIterator<Item = (A, B)>,
    ) -> Result<Self, ConfigError>
    where
        A: AsRef<str>,
        B: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut allocation = Allocation::empty(index);
        let mut seen = vec![false; index.num_agents()];
        for (agent, items) in bundles {
            let agent_id = index.agent_id(agent.as_ref())?;
            if seen[agent_id.0] {
                return Err(ConfigError::DuplicateAgent(agent.as_ref().to_string()));
            }
            seen[agent_id.0] = true;
            for item in items {
                let item_id = index.item_id(item.as_ref())?;
                allocation.bundles[agent_id.0].push(item_id);
            }
        }
        Ok(allocation)
    }

    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    /// Number of matching rounds that produced this allocation.
    pub fn num_rounds(&self) -> usize {
        self.num_rounds
    }

    pub fn bundle(&self, agent: &str) -> Option<Vec<&str>> {
        let position = self.agents.iter().position(|name| name == agent)?;
        Some(self.names(&self.bundles[position]))
    }

    /// Bundle of the agent at position `agent` of this allocation, with ids of the index it was
    /// made from. See [`bundles_in`](Self::bundles_in) for another index.
    pub fn bundle_of(&self, agent: AgentId) -> &[ItemId] {
        &self.bundles[agent.0]
    }

    fn names(&self, bundle: &[ItemId]) -> Vec<&str> {
        bundle
            .iter()
            .map(|item| self.items[item.0].as_str())
            .collect()
    }

    /// Agents with their bundles, in agent order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Vec<&str>)> + '_ {
        self.agents
            .iter()
            .zip(self.bundles.iter())
            .map(move |(agent, bundle)| (agent.as_str(), self.names(bundle)))
    }

    pub fn map_agent_to_bundle(&self) -> BTreeMap<String, Vec<String>> {
        self.iter()
            .map(|(agent, bundle)| {
                (
                    agent.to_string(),
                    bundle.into_iter().map(str::to_string).collect(),
                )
            })
            .collect()
    }

    /// Agents holding a unit of each allocated item, once per unit.
    pub fn map_item_to_agents(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (agent, bundle) in self.iter() {
            for item in bundle {
                map.entry(item.to_string())
                    .or_default()
                    .push(agent.to_string());
            }
        }
        map
    }

    /// Number of allocated units of every item, indexed by [`ItemId`].
    pub fn units_per_item(&self) -> Vec<u32> {
        let mut units = vec![0; self.items.len()];
        for item in self.bundles.iter().flatten() {
            units[item.0] += 1;
        }
        units
    }

    /// Bundles in allocation order, with items translated to the ids of `index` by name.
    pub fn bundles_in(&self, index: &ValuationIndex) -> Result<Vec<Vec<ItemId>>, ConfigError> {
        if self.items == index.all_items() {
            return Ok(self.bundles.clone());
        }
        self.bundles
            .iter()
            .map(|bundle| {
                bundle
                    .iter()
                    .map(|item| index.item_id(&self.items[item.0]))
                    .collect()
            })
            .collect()
    }

    /// Unweighted value of every agent's own bundle, in allocation order.
    pub fn utilities(&self, index: &ValuationIndex) -> Result<Vec<f64>, ConfigError> {
        let bundles = self.bundles_in(index)?;
        self.agents
            .iter()
            .zip(bundles.iter())
            .map(|(agent, bundle)| {
                index
                    .agent_id(agent)
                    .map(|agent| index.bundle_value_of(agent, bundle))
            })
            .collect()
    }

    /// Unweighted value of the agent's own bundle.
    pub fn utility(&self, index: &ValuationIndex, agent: &str) -> Result<f64, ConfigError> {
        let bundle = self
            .bundle(agent)
            .ok_or_else(|| ConfigError::UnknownAgent(agent.to_string()))?;
        index.bundle_value(agent, &bundle)
    }

    pub fn utilitarian_welfare(&self, index: &ValuationIndex) -> Result<f64, ConfigError> {
        Ok(self.utilities(index)?.iter().sum())
    }

    /// Renders one `<agent> gets {<items>} with value <v>.` line per agent.
    pub fn display(&self, index: &ValuationIndex) -> Result<AllocationDisplay<'_>, ConfigError> {
        Ok(AllocationDisplay {
            allocation: self,
            values: self.utilities(index)?,
        })
    }
}

pub struct AllocationDisplay<'a> {
    allocation: &'a Allocation,
    values: Vec<f64>,
}

impl fmt::Display for AllocationDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ((agent, bundle), value) in self.allocation.iter().zip(self.values.iter()) {
            write!(f, "{} gets ", agent)?;
            if bundle.is_empty() {
                write!(f, "None")?;
            } else {
                write!(f, "{{{}}}", bundle.join(","))?;
            }
            writeln!(f, " with value {}.", value)?;
        }
        Ok(())
    }
}

/// Runs [`iterated_maximum_matching_with`] with the forward auction.
pub fn iterated_maximum_matching(
    index: &ValuationIndex,
    config: &AllocationConfig,
    observer: &mut dyn Observer,
) -> Result<Allocation, AllocationError> {
    iterated_maximum_matching_with::<DefaultSolver>(index, config, observer)
}

/// Allocates every unit of every item by repeated maximum-weight matchings.
///
/// Each round matches agent slots to the units left over by the previous rounds. Agents that
/// reached their capacity sit out, and the loop ends early once all of them are full. A round
/// that matches nothing while units are left fails with [`AllocationError::Stalled`].
pub fn iterated_maximum_matching_with<S: AuctionSolver<u32, S>>(
    index: &ValuationIndex,
    config: &AllocationConfig,
    observer: &mut dyn Observer,
) -> Result<Allocation, AllocationError> {
    let (capacities, settings) = config.resolve(index)?;
    let agent_capacities = config.resolve_agent_capacities(index)?;
    let mut allocation = Allocation::empty(index);
    if index.num_agents() == 0 {
        return Ok(allocation);
    }

    let mut pool = ResidualPool::new(capacities);
    let mut engine = MatchingEngine::<S>::new(index, settings);
    let mut round = 0;
    loop {
        limit_slots(&mut engine, &agent_capacities, &allocation);
        if pool.is_empty() || !engine.has_active_agents() {
            break;
        }
        round += 1;
        let remaining = pool.total;
        observer.round_started(round, remaining);

        let matching = engine.match_round(&pool.units, round, observer)?;
        if matching.is_empty() {
            warn!("round {} allocated nothing, {} units left", round, remaining);
            return Err(AllocationError::Stalled { round, remaining });
        }
        for (agent, item) in matching.pairs() {
            allocation.bundles[agent.0].push(*item);
            pool.take(*item);
        }
        observer.round_finished(round, remaining - pool.total, pool.total);
    }
    allocation.num_rounds = round;
    if pool.is_empty() {
        info!("allocated all items in {} rounds", round);
    } else {
        info!(
            "every agent is full after {} rounds, {} units left",
            round, pool.total
        );
    }
    Ok(allocation)
}

/// Caps the slots of every agent with a capacity by the items it may still receive.
fn limit_slots<S: AuctionSolver<u32, S>>(
    engine: &mut MatchingEngine<'_, S>,
    capacities: &[Option<usize>],
    allocation: &Allocation,
) {
    for (agent, capacity) in capacities.iter().enumerate() {
        if let Some(capacity) = capacity {
            let left = capacity.saturating_sub(allocation.bundles[agent].len());
            let slots = engine.settings().slots[agent].min(left);
            engine.set_slots(AgentId(agent), slots);
        }
    }
}

/// Runs [`iterated_maximum_matching_courses_with`] with the forward auction.
pub fn iterated_maximum_matching_courses(
    index: &ValuationIndex,
    config: &AllocationConfig,
    observer: &mut dyn Observer,
) -> Result<Allocation, AllocationError> {
    iterated_maximum_matching_courses_with::<DefaultSolver>(index, config, observer)
}

/// Iterated maximum matching for course allocation: every round gives each remaining agent at
/// most one item, and never a second seat of an item it already holds.
///
/// Every residual unit takes part in a round. Agents leave when they reach their capacity or
/// when a round gives them nothing, and the loop ends when no units or no agents are left. With
/// [`AllocationConfig::adjust_utilities`], an agent that got less than the best value available
/// to it gets the difference added to its best remaining item, if that item isn't worth less
/// than zero.
pub fn iterated_maximum_matching_courses_with<S: AuctionSolver<u32, S>>(
    index: &ValuationIndex,
    config: &AllocationConfig,
    observer: &mut dyn Observer,
) -> Result<Allocation, AllocationError> {
    let (capacities, mut settings) = config.resolve(index)?;
    let agent_capacities = config.resolve_agent_capacities(index)?;
    settings.slots = vec![1; index.num_agents()];
    settings.item_units = ItemUnits::Residual;
    let mut allocation = Allocation::empty(index);
    if index.num_agents() == 0 {
        return Ok(allocation);
    }

    let mut pool = ResidualPool::new(capacities);
    let mut engine = MatchingEngine::<S>::new(index, settings);
    limit_slots(&mut engine, &agent_capacities, &allocation);
    let mut round = 0;
    while !pool.is_empty() && engine.has_active_agents() {
        round += 1;
        let remaining = pool.total;
        observer.round_started(round, remaining);

        let mut best_possible = vec![None; index.num_agents()];
        if config.adjust_utilities {
            for agent in index.agent_ids().filter(|agent| engine.slots(*agent) > 0) {
                best_possible[agent.0] = engine
                    .best_value(agent, &pool.units)?
                    .map(|(_, value)| value);
            }
        }

        let matching = engine.match_round(&pool.units, round, observer)?;
        let mut matched = vec![false; index.num_agents()];
        let mut received = Vec::with_capacity(matching.len());
        for (agent, item) in matching.pairs() {
            let value = engine.arc_value(*agent, *item)?.unwrap_or(0.);
            matched[agent.0] = true;
            received.push((*agent, value));
            allocation.bundles[agent.0].push(*item);
            pool.take(*item);
            engine.exclude(*agent, *item);
            let full = agent_capacities[agent.0]
                .map_or(false, |capacity| allocation.bundles[agent.0].len() >= capacity);
            if full {
                engine.set_slots(*agent, 0);
            }
        }
        for agent in index.agent_ids() {
            if engine.slots(agent) > 0 && !matched[agent.0] {
                debug!(
                    "{} got nothing in round {} and leaves",
                    index.agent_name(agent),
                    round
                );
                engine.set_slots(agent, 0);
            }
        }

        if config.adjust_utilities && !pool.is_empty() {
            for (agent, value) in received {
                if engine.slots(agent) == 0 {
                    continue;
                }
                let shortfall = best_possible[agent.0].unwrap_or(value) - value;
                if let Some((item, next_value)) = engine.best_value(agent, &pool.units)? {
                    if next_value >= 0. && shortfall > 0. {
                        debug!(
                            "{} is compensated by {} on {}",
                            index.agent_name(agent),
                            shortfall,
                            index.item_name(item)
                        );
                        engine.add_bonus(agent, item, shortfall);
                    }
                }
            }
        }
        observer.round_finished(round, remaining - pool.total, pool.total);
    }
    allocation.num_rounds = round;
    info!(
        "course allocation done after {} rounds, {} units left",
        round, pool.total
    );
    Ok(allocation)
}

/// A single maximum-weight matching over all units, see [`AllocationConfig::utilitarian`].
pub fn utilitarian_matching(
    index: &ValuationIndex,
    config: &AllocationConfig,
    observer: &mut dyn Observer,
) -> Result<Allocation, AllocationError> {
    let (capacities, settings) = config.resolve(index)?;
    let mut allocation = Allocation::empty(index);
    if index.num_agents() == 0 || capacities.iter().all(|units| *units == 0) {
        return Ok(allocation);
    }

    let remaining = capacities.iter().map(|units| *units as u64).sum();
    observer.round_started(1, remaining);
    let mut engine = MatchingEngine::<DefaultSolver>::new(index, settings);
    limit_slots(&mut engine, &config.resolve_agent_capacities(index)?, &allocation);
    let matching = engine.match_round(&capacities, 1, observer)?;
    for (agent, item) in matching.pairs() {
        allocation.bundles[agent.0].push(*item);
    }
    let allocated = matching.len() as u64;
    observer.round_finished(1, allocated, remaining - allocated);
    allocation.num_rounds = 1;
    Ok(allocation)
}

/// One forced-cardinality round per category; every agent gets at most one item of a category.
///
/// All units of a category's items take part in its round, so an item with two units can go to
/// two agents. Agent capacities hold across categories. Items outside every category stay
/// unallocated, an item listed in two categories is rejected.
pub fn iterated_maximum_matching_categories<C, T>(
    index: &ValuationIndex,
    categories: impl IntoIterator<Item = C>,
    config: &AllocationConfig,
    observer: &mut dyn Observer,
) -> Result<Allocation, AllocationError>
where
    C: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let (capacities, mut settings) = config.resolve(index)?;
    let agent_capacities = config.resolve_agent_capacities(index)?;
    settings.force_cardinality = true;
    settings.item_units = ItemUnits::Residual;
    settings.slots = vec![1; index.num_agents()];

    let mut allocation = Allocation::empty(index);
    if index.num_agents() == 0 {
        return Ok(allocation);
    }
    let categories = {
        let mut listed = vec![false; index.num_items()];
        let mut resolved = Vec::new();
        for category in categories {
            let mut units = vec![0_u32; index.num_items()];
            for item in category {
                let id = index.item_id(item.as_ref())?;
                if listed[id.0] {
                    return Err(ConfigError::DuplicateItem(item.as_ref().to_string()).into());
                }
                listed[id.0] = true;
                units[id.0] = capacities[id.0];
            }
            resolved.push(units);
        }
        resolved
    };

    let mut engine = MatchingEngine::<DefaultSolver>::new(index, settings);
    for (round, units) in categories.into_iter().enumerate().map(|(i, u)| (i + 1, u)) {
        limit_slots(&mut engine, &agent_capacities, &allocation);
        let remaining = units.iter().map(|u| *u as u64).sum();
        observer.round_started(round, remaining);
        let matching = engine.match_round(&units, round, observer)?;
        for (agent, item) in matching.pairs() {
            allocation.bundles[agent.0].push(*item);
        }
        let allocated = matching.len() as u64;
        observer.round_finished(round, allocated, remaining - allocated);
        allocation.num_rounds = round;
    }
    Ok(allocation)
}

#[cfg(test)]
mod tests {
    use super::{
        iterated_maximum_matching, iterated_maximum_matching_categories,
        iterated_maximum_matching_courses, utilitarian_matching, Allocation, AllocationConfig,
    };
    use crate::error::{AllocationError, ConfigError};
    use crate::matching::ItemUnits;
    use crate::observer::{NoopObserver, Observer};
    use crate::valuation::{MissingValues, ValuationIndex};
    use test_env_log::test;

    #[derive(Default)]
    struct RoundLog {
        started: Vec<(usize, u64)>,
        finished: Vec<(usize, u64, u64)>,
        matched: Vec<(usize, String, String)>,
    }

    impl Observer for RoundLog {
        fn round_started(&mut self, round: usize, remaining: u64) {
            self.started.push((round, remaining));
        }
        fn matched(&mut self, round: usize, agent: &str, item: &str, _value: f64) {
            self.matched.push((round, agent.to_string(), item.to_string()));
        }
        fn round_finished(&mut self, round: usize, allocated: u64, remaining: u64) {
            self.finished.push((round, allocated, remaining));
        }
    }

    fn avi_and_beni() -> ValuationIndex {
        ValuationIndex::from_table(vec![
            ("avi", vec![("x", 5.), ("y", 4.), ("z", 3.), ("w", 2.)]),
            ("beni", vec![("x", 2.), ("y", 3.), ("z", 4.), ("w", 5.)]),
        ])
        .unwrap()
    }

    #[test]
    fn test_two_rounds_of_favourites() {
        let index = avi_and_beni();
        let mut log = RoundLog::default();
        let allocation =
            iterated_maximum_matching(&index, &AllocationConfig::new(), &mut log).unwrap();
        assert_eq!(allocation.bundle("avi").unwrap(), ["x", "y"]);
        assert_eq!(allocation.bundle("beni").unwrap(), ["w", "z"]);
        assert_eq!(allocation.num_rounds(), 2);
        assert_eq!(log.started, [(1, 4), (2, 2)]);
        assert_eq!(log.finished, [(1, 2, 2), (2, 2, 0)]);
        assert_eq!(log.matched.len(), 4);
    }

    #[test]
    fn test_matrix_input() {
        let index = ValuationIndex::from_matrix(vec![[5., 4., 3., 2.], [2., 3., 4., 5.]]).unwrap();
        let allocation =
            iterated_maximum_matching(&index, &AllocationConfig::new(), &mut NoopObserver)
                .unwrap();
        let map = allocation.map_agent_to_bundle();
        assert_eq!(map["Agent #0"], ["0", "1"]);
        assert_eq!(map["Agent #1"], ["3", "2"]);
    }

    #[test]
    fn test_two_units_take_two_rounds() {
        let index =
            ValuationIndex::from_table(vec![("A", vec![("x", 5.)]), ("B", vec![("x", 3.)])])
                .unwrap();
        let config = AllocationConfig::new().item_capacity("x", 2);
        let allocation = iterated_maximum_matching(&index, &config, &mut NoopObserver).unwrap();
        assert_eq!(allocation.num_rounds(), 2);
        assert_eq!(allocation.units_per_item(), [2]);
        assert_eq!(allocation.map_item_to_agents()["x"].len(), 2);

        let residual = config.item_units(ItemUnits::Residual);
        let allocation = iterated_maximum_matching(&index, &residual, &mut NoopObserver).unwrap();
        assert_eq!(allocation.num_rounds(), 1);
        assert_eq!(allocation.bundle("A").unwrap(), ["x"]);
        assert_eq!(allocation.bundle("B").unwrap(), ["x"]);
    }

    #[test]
    fn test_zero_capacity_removes_item() {
        let index = avi_and_beni();
        let config = AllocationConfig::new()
            .item_capacities(vec![("x", 0), ("w", 0)]);
        let allocation = iterated_maximum_matching(&index, &config, &mut NoopObserver).unwrap();
        assert_eq!(allocation.bundle("avi").unwrap(), ["y"]);
        assert_eq!(allocation.bundle("beni").unwrap(), ["z"]);
        assert_eq!(allocation.units_per_item(), [0, 1, 1, 0]);
    }

    #[test]
    fn test_agent_weight_changes_the_winner() {
        let index =
            ValuationIndex::from_table(vec![("A", vec![("x", 5.)]), ("B", vec![("x", 3.)])])
                .unwrap();
        let config = AllocationConfig::new().agent_weight("B", 2);
        let allocation = iterated_maximum_matching(&index, &config, &mut NoopObserver).unwrap();
        assert_eq!(allocation.bundle("B").unwrap(), ["x"]);
        // weights only steer the matching
        assert_eq!(allocation.utility(&index, "B").unwrap(), 3.);
    }

    #[test]
    fn test_slots_per_round() {
        let index = avi_and_beni();
        let config = AllocationConfig::new().agent_slots("avi", 3);
        let allocation = iterated_maximum_matching(&index, &config, &mut NoopObserver).unwrap();
        assert_eq!(allocation.num_rounds(), 1);
        let mut avi = allocation.bundle("avi").unwrap();
        avi.sort_unstable();
        assert_eq!(avi, ["x", "y", "z"]);
        assert_eq!(allocation.bundle("beni").unwrap(), ["w"]);
    }

    #[test]
    fn test_chores_stall_unless_cardinality_is_forced() {
        let index = ValuationIndex::from_table(vec![
            ("avi", vec![("x", 5.), ("y", -2.)]),
            ("beni", vec![("x", 2.), ("y", -3.)]),
        ])
        .unwrap();
        let stalled =
            iterated_maximum_matching(&index, &AllocationConfig::new(), &mut NoopObserver);
        assert!(matches!(
            stalled,
            Err(AllocationError::Stalled {
                round: 2,
                remaining: 1
            })
        ));

        let forced = AllocationConfig::new().force_cardinality(true);
        let allocation = iterated_maximum_matching(&index, &forced, &mut NoopObserver).unwrap();
        assert_eq!(allocation.num_rounds(), 1);
        assert_eq!(allocation.bundle("avi").unwrap(), ["x"]);
        assert_eq!(allocation.bundle("beni").unwrap(), ["y"]);
    }

    #[test]
    fn test_utilitarian_matching() {
        let index = ValuationIndex::from_table(vec![
            ("avi", vec![("x", 5.), ("y", -2.)]),
            ("beni", vec![("x", 2.), ("y", -3.)]),
        ])
        .unwrap();
        let forced =
            utilitarian_matching(&index, &AllocationConfig::utilitarian(), &mut NoopObserver)
                .unwrap();
        assert_eq!(
            forced.display(&index).unwrap().to_string(),
            "avi gets {x} with value 5.\nbeni gets {y} with value -3.\n"
        );

        let free = utilitarian_matching(
            &index,
            &AllocationConfig::utilitarian().force_cardinality(false),
            &mut NoopObserver,
        )
        .unwrap();
        assert_eq!(
            free.display(&index).unwrap().to_string(),
            "avi gets {x} with value 5.\nbeni gets None with value 0.\n"
        );
        assert_eq!(free.utilitarian_welfare(&index).unwrap(), 5.);
    }

    #[test]
    fn test_categories() {
        let index = ValuationIndex::from_matrix(vec![
            vec![55., 44., 33., 22.],
            vec![22., 33., 44., 55.],
        ])
        .unwrap();
        let by_parity = iterated_maximum_matching_categories(
            &index,
            vec![vec!["0", "1"], vec!["2", "3"]],
            &AllocationConfig::new(),
            &mut NoopObserver,
        )
        .unwrap();
        assert_eq!(by_parity.bundle("Agent #0").unwrap(), ["0", "2"]);
        assert_eq!(by_parity.bundle("Agent #1").unwrap(), ["1", "3"]);

        let by_half = iterated_maximum_matching_categories(
            &index,
            vec![vec!["0", "2"], vec!["1", "3"]],
            &AllocationConfig::new(),
            &mut NoopObserver,
        )
        .unwrap();
        assert_eq!(by_half.bundle("Agent #0").unwrap(), ["0", "1"]);
        assert_eq!(by_half.bundle("Agent #1").unwrap(), ["2", "3"]);

        // two seats of item 0 and none of item 1
        let capacities = AllocationConfig::new()
            .item_capacity("0", 2)
            .item_capacity("1", 0);
        let shared = iterated_maximum_matching_categories(
            &index,
            vec![vec!["0", "1"], vec!["2", "3"]],
            &capacities,
            &mut NoopObserver,
        )
        .unwrap();
        assert_eq!(shared.bundle("Agent #0").unwrap(), ["0", "2"]);
        assert_eq!(shared.bundle("Agent #1").unwrap(), ["0", "3"]);
        assert_eq!(shared.units_per_item(), [2, 0, 1, 1]);

        let one_item_each = iterated_maximum_matching_categories(
            &index,
            vec![vec!["0", "1"], vec!["2", "3"]],
            &AllocationConfig::new().default_agent_capacity(1),
            &mut NoopObserver,
        )
        .unwrap();
        assert_eq!(one_item_each.units_per_item(), [1, 1, 0, 0]);

        let repeated = iterated_maximum_matching_categories(
            &index,
            vec![vec!["0", "1"], vec!["1", "2"]],
            &AllocationConfig::new(),
            &mut NoopObserver,
        );
        assert!(matches!(
            repeated,
            Err(AllocationError::Config(ConfigError::DuplicateItem(item))) if item == "1"
        ));
    }

    #[test]
    fn test_agent_capacities_end_the_loop() {
        let index = avi_and_beni();
        let avi_once = AllocationConfig::new().agent_capacity("avi", 1);
        let allocation = iterated_maximum_matching(&index, &avi_once, &mut NoopObserver).unwrap();
        assert_eq!(allocation.bundle("avi").unwrap(), ["x"]);
        assert_eq!(allocation.bundle("beni").unwrap(), ["w", "z", "y"]);
        assert_eq!(allocation.num_rounds(), 3);

        let everyone_once = AllocationConfig::new().default_agent_capacity(1);
        let allocation =
            iterated_maximum_matching(&index, &everyone_once, &mut NoopObserver).unwrap();
        assert_eq!(allocation.num_rounds(), 1);
        assert_eq!(allocation.units_per_item(), [1, 0, 0, 1]);

        assert_eq!(
            AllocationConfig::new()
                .default_agent_capacity(2)
                .agent_capacity("beni", 5)
                .resolve_agent_capacities(&index)
                .unwrap(),
            [Some(2), Some(5)]
        );
        assert!(AllocationConfig::new()
            .agent_capacity("gadi", 1)
            .resolve_agent_capacities(&index)
            .is_err());
    }

    fn sorted_bundles(allocation: &Allocation) -> Vec<(String, Vec<String>)> {
        allocation
            .map_agent_to_bundle()
            .into_iter()
            .map(|(agent, mut bundle)| {
                bundle.sort_unstable();
                (agent, bundle)
            })
            .collect()
    }

    #[test]
    fn test_courses_with_agent_and_item_capacities() {
        let index = avi_and_beni();
        let cases: [(usize, i64, &[&str], &[&str]); 4] = [
            (1, 1, &["x"], &["w"]),
            (2, 1, &["x", "y"], &["w", "z"]),
            (3, 2, &["x", "y", "z"], &["w", "y", "z"]),
            (4, 2, &["w", "x", "y", "z"], &["w", "x", "y", "z"]),
        ];
        for &(agent_capacity, item_capacity, avi, beni) in cases.iter() {
            let config = AllocationConfig::new()
                .default_agent_capacity(agent_capacity)
                .item_capacities(
                    index
                        .all_items()
                        .iter()
                        .map(|item| (item.clone(), item_capacity)),
                );
            let allocation =
                iterated_maximum_matching_courses(&index, &config, &mut NoopObserver).unwrap();
            let bundles = sorted_bundles(&allocation);
            assert_eq!(bundles[0].1, avi, "avi with capacity {}", agent_capacity);
            assert_eq!(bundles[1].1, beni, "beni with capacity {}", agent_capacity);
        }
    }

    #[test]
    fn test_courses_never_repeat_an_item() {
        let index =
            ValuationIndex::from_table(vec![("A", vec![("x", 5.), ("y", 1.)])]).unwrap();
        let config = AllocationConfig::new().item_capacity("x", 3);
        let allocation =
            iterated_maximum_matching_courses(&index, &config, &mut NoopObserver).unwrap();
        assert_eq!(allocation.bundle("A").unwrap(), ["x", "y"]);
        assert_eq!(allocation.units_per_item(), [1, 1]);
    }

    #[test]
    fn test_courses_drop_agents_that_get_nothing() {
        let index = ValuationIndex::from_table(vec![
            ("avi", vec![("x", 5.), ("y", 4.)]),
            ("beni", vec![("x", -1.), ("y", -2.)]),
        ])
        .unwrap();
        let mut log = RoundLog::default();
        let allocation =
            iterated_maximum_matching_courses(&index, &AllocationConfig::new(), &mut log).unwrap();
        assert_eq!(allocation.bundle("avi").unwrap(), ["x", "y"]);
        assert_eq!(allocation.bundle("beni").unwrap(), Vec::<&str>::new());
        assert_eq!(allocation.num_rounds(), 2);
        assert_eq!(log.finished, [(1, 1, 1), (2, 1, 0)]);
    }

    #[test]
    fn test_courses_compensate_the_runner_up() {
        let index = ValuationIndex::from_table(vec![
            ("avi", vec![("x", 5.), ("y", 1.), ("z", 2.)]),
            ("beni", vec![("x", 4.), ("y", 2.), ("z", 1.)]),
        ])
        .unwrap();
        let config = AllocationConfig::new().default_agent_capacity(2);
        let plain = iterated_maximum_matching_courses(&index, &config, &mut NoopObserver).unwrap();
        assert_eq!(plain.bundle("avi").unwrap(), ["x", "z"]);
        assert_eq!(plain.bundle("beni").unwrap(), ["y"]);

        // beni could have had 4 but got 2, so z is worth 1 + 2 to beni in the next round
        let adjusted = iterated_maximum_matching_courses(
            &index,
            &config.adjust_utilities(true),
            &mut NoopObserver,
        )
        .unwrap();
        assert_eq!(adjusted.bundle("avi").unwrap(), ["x"]);
        assert_eq!(adjusted.bundle("beni").unwrap(), ["y", "z"]);
        // compensation only steers the matching
        assert_eq!(adjusted.utility(&index, "beni").unwrap(), 3.);
    }

    #[test]
    fn test_views_across_indexes() {
        let index = avi_and_beni();
        let allocation =
            Allocation::from_bundles(&index, vec![("avi", vec!["z"]), ("beni", vec!["y"])])
                .unwrap();
        let reordered = ValuationIndex::from_table(vec![
            ("avi", vec![("y", 1.), ("z", 2.)]),
            ("beni", vec![("y", 3.), ("z", 4.)]),
        ])
        .unwrap();
        assert_eq!(allocation.utilities(&reordered).unwrap(), [2., 3.]);
        assert_eq!(allocation.utilitarian_welfare(&reordered).unwrap(), 5.);
        assert_eq!(
            allocation.display(&reordered).unwrap().to_string(),
            "avi gets {z} with value 2.\nbeni gets {y} with value 3.\n"
        );
        let without_y = ValuationIndex::from_table(vec![
            ("avi", vec![("z", 2.)]),
            ("beni", vec![("z", 4.)]),
        ])
        .unwrap();
        assert_eq!(
            allocation.bundles_in(&without_y).unwrap_err(),
            ConfigError::UnknownItem("y".to_string())
        );
    }

    #[test]
    fn test_invalid_configuration() {
        let index = avi_and_beni();
        let run = |config: AllocationConfig| {
            match iterated_maximum_matching(&index, &config, &mut NoopObserver) {
                Err(AllocationError::Config(err)) => err,
                other => panic!("expected a configuration error, got {:?}", other),
            }
        };
        assert_eq!(
            run(AllocationConfig::new().item_capacity("x", -1)),
            ConfigError::NegativeCapacity {
                item: "x".to_string(),
                capacity: -1
            }
        );
        assert_eq!(
            run(AllocationConfig::new().item_capacity("q", 1)),
            ConfigError::UnknownItem("q".to_string())
        );
        assert_eq!(
            run(AllocationConfig::new().agent_weight("avi", 0)),
            ConfigError::InvalidAgentWeight {
                agent: "avi".to_string(),
                weight: 0
            }
        );
        assert_eq!(
            run(AllocationConfig::new().agent_weight("gadi", 1)),
            ConfigError::UnknownAgent("gadi".to_string())
        );
        assert_eq!(
            run(AllocationConfig::new().agent_slots("beni", 0)),
            ConfigError::InvalidAgentSlots {
                agent: "beni".to_string(),
                slots: 0
            }
        );
        assert_eq!(
            run(AllocationConfig::new().eps(-1.)),
            ConfigError::InvalidEps(-1.)
        );
    }

    #[test]
    fn test_missing_values() {
        let index =
            ValuationIndex::from_table(vec![("avi", vec![("x", 1.)]), ("beni", vec![("y", 1.)])])
                .unwrap();
        let rejected =
            iterated_maximum_matching(&index, &AllocationConfig::new(), &mut NoopObserver);
        assert!(matches!(
            rejected,
            Err(AllocationError::Config(ConfigError::MissingValue { .. }))
        ));

        let excluded = AllocationConfig::new().missing_values(MissingValues::Exclude);
        let allocation = iterated_maximum_matching(&index, &excluded, &mut NoopObserver).unwrap();
        assert_eq!(allocation.bundle("avi").unwrap(), ["x"]);
        assert_eq!(allocation.bundle("beni").unwrap(), ["y"]);

        // missing entries count as zero
        let index = ValuationIndex::from_table(vec![
            ("avi", vec![("x", 1.)]),
            ("beni", vec![("x", 1.), ("y", 1.)]),
        ])
        .unwrap();
        let config = AllocationConfig::new()
            .missing_values(MissingValues::Zero)
            .item_capacity("y", 2);
        let allocation = iterated_maximum_matching(&index, &config, &mut NoopObserver).unwrap();
        assert_eq!(allocation.units_per_item(), [1, 2]);
    }

    #[test]
    fn test_empty_inputs() {
        let nobody = ValuationIndex::from_table(Vec::<(&str, Vec<(&str, f64)>)>::new()).unwrap();
        let allocation =
            iterated_maximum_matching(&nobody, &AllocationConfig::new(), &mut NoopObserver)
                .unwrap();
        assert_eq!(allocation.iter().count(), 0);

        let nothing =
            ValuationIndex::from_table(vec![("avi", Vec::<(&str, f64)>::new())]).unwrap();
        let allocation =
            iterated_maximum_matching(&nothing, &AllocationConfig::new(), &mut NoopObserver)
                .unwrap();
        assert_eq!(allocation.bundle("avi").unwrap(), Vec::<&str>::new());
        assert_eq!(allocation.num_rounds(), 0);
    }

    #[test]
    fn test_from_bundles() {
        let index = avi_and_beni();
        let allocation =
            Allocation::from_bundles(&index, vec![("beni", vec!["w", "z"])]).unwrap();
        assert_eq!(allocation.bundle("avi").unwrap(), Vec::<&str>::new());
        assert_eq!(allocation.utility(&index, "beni").unwrap(), 9.);
        assert_eq!(allocation.bundle("gadi"), None);

        let twice = Allocation::from_bundles(&index, vec![("avi", vec!["x"]), ("avi", vec!["y"])]);
        assert_eq!(
            twice.unwrap_err(),
            ConfigError::DuplicateAgent("avi".to_string())
        );
        let unknown = Allocation::from_bundles(&index, vec![("avi", vec!["q"])]);
        assert_eq!(unknown.unwrap_err(), ConfigError::UnknownItem("q".to_string()));
    }
}
