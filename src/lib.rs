//! Fair allocation of indivisible items by iterated maximum matching, with subsidies that remove
//! the remaining envy.
//!
//! Every round solves a maximum-weight matching between agents and the item units that are still
//! available, until all units are allocated. The envy graph of the result has no positive-weight
//! cycle, so paying every agent the heaviest envy path that starts at it makes the allocation
//! envy-free.
//!
//! Matchings are computed with auction algorithms over sparse (CSR) assignment problems: the
//! forward auction by default and the Gauss-Seidel variant of Khosla behind the `khosla` feature.
//!
//! ```
//! use subsidy_matching::{allocate_with_subsidy, AllocationConfig, NoopObserver, ValuationIndex};
//!
//! let index = ValuationIndex::from_table(vec![
//!     ("Alice", vec![("a", 3.), ("b", 5.)]),
//!     ("Bob", vec![("a", 6.), ("b", 7.)]),
//! ])?;
//! let result = allocate_with_subsidy(&index, &AllocationConfig::new(), &mut NoopObserver)?;
//! assert_eq!(result.allocation.bundle("Alice").unwrap(), ["b"]);
//! assert_eq!(result.subsidies.get("Bob"), Some(1.));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod allocation;
mod cycle;
pub mod envy;
pub mod error;
#[cfg(feature = "khosla")]
pub mod ksparse;
pub mod matching;
pub mod observer;
pub mod solution;
pub mod solver;
pub mod subsidy;
pub mod symmetric;
pub mod valuation;

pub use crate::allocation::{
    iterated_maximum_matching, iterated_maximum_matching_categories,
    iterated_maximum_matching_courses, iterated_maximum_matching_courses_with,
    iterated_maximum_matching_with, utilitarian_matching, Allocation, AllocationConfig,
    AllocationDisplay,
};
pub use crate::envy::{EnvyEdge, EnvyGraph};
pub use crate::error::{AllocationError, ConfigError, Infeasible, PipelineError};
pub use crate::matching::{DefaultSolver, ItemUnits, Matching, MatchingEngine, MatchingSettings};
pub use crate::observer::{NoopObserver, Observer, TracingObserver};
pub use crate::solution::{Assignment, UnsignedInt};
pub use crate::solver::{ArcTable, AuctionSolver};
pub use crate::subsidy::{
    compute_subsidies, is_envy_free_with_subsidy, SubsidySolver, SubsidyVector,
};
pub use crate::valuation::{AgentId, ItemId, MissingValues, ValuationIndex};

use tracing::debug;

/// Allocation together with its envy graph and the subsidies that remove the envy.
#[derive(Debug, Clone, PartialEq)]
pub struct SubsidizedAllocation {
    pub allocation: Allocation,
    pub envy_graph: EnvyGraph,
    pub subsidies: SubsidyVector,
}

/// Iterated maximum matching followed by the subsidy computation.
pub fn allocate_with_subsidy(
    index: &ValuationIndex,
    config: &AllocationConfig,
    observer: &mut dyn Observer,
) -> Result<SubsidizedAllocation, PipelineError> {
    let allocation = iterated_maximum_matching(index, config, observer)?;
    let envy_graph = EnvyGraph::build(index, &allocation)?;
    debug!(
        "envy graph of {} agents, {} edges",
        envy_graph.num_agents(),
        envy_graph.edge_count()
    );
    let subsidies = SubsidySolver::new().solve(&envy_graph, observer)?;
    Ok(SubsidizedAllocation {
        allocation,
        envy_graph,
        subsidies,
    })
}
