use thiserror::Error;

/// Malformed input, reported before any matching work starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unknown agent {0:?}")]
    UnknownAgent(String),
    #[error("unknown item {0:?}")]
    UnknownItem(String),
    #[error("agent {0:?} is declared twice")]
    DuplicateAgent(String),
    #[error("item {0:?} is listed twice")]
    DuplicateItem(String),
    #[error("agent {agent:?} has no value for item {item:?}")]
    MissingValue { agent: String, item: String },
    #[error("value of item {item:?} for agent {agent:?} is not finite ({value})")]
    NonFiniteValue {
        agent: String,
        item: String,
        value: f64,
    },
    #[error("item {item:?} has capacity {capacity}, capacities can't be negative")]
    NegativeCapacity { item: String, capacity: i64 },
    #[error("item {item:?} has capacity {capacity}, which is too large")]
    CapacityOverflow { item: String, capacity: i64 },
    #[error("agent {agent:?} has weight {weight}, weights have to be positive")]
    InvalidAgentWeight { agent: String, weight: i64 },
    #[error("agent {agent:?} has {slots} slots per round, at least one is required")]
    InvalidAgentSlots { agent: String, slots: usize },
    #[error("ε has to be positive and finite, got {0}")]
    InvalidEps(f64),
}

/// Failure of the iterated allocation loop.
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A round matched nothing while units were left, the loop would never finish.
    #[error("round {round} allocated nothing, {remaining} units left unallocated")]
    Stalled { round: usize, remaining: u64 },
    #[error("matching solver failed: {0}")]
    Solver(#[from] anyhow::Error),
}

/// The envy graph has a positive-weight directed cycle, no subsidy vector removes the envy.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("positive-weight envy cycle {} with weight {weight}", .cycle.join(" -> "))]
pub struct Infeasible {
    /// Agents along the cycle, the last one envies the first.
    pub cycle: Vec<String>,
    pub weight: f64,
}

/// Failure of the allocation followed by the subsidy computation.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Infeasible(#[from] Infeasible),
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        PipelineError::Allocation(AllocationError::Config(err))
    }
}
