use crate::solution::{Assignment, UnsignedInt};
use crate::solver::{ArcTable, AuctionSolver};
use anyhow::{bail, Result};
use num_integer::Integer;
use num_iter;
use tracing::trace;

/// Gauss-Seidel auction after Khosla.
///
/// One row bids at a time, taken from a stack of unassigned rows. A row whose best column got
/// more expensive than the price threshold gives up, which fails the solve. A complete result is
/// refined to the optimum.
#[derive(Clone)]
pub struct KhoslaSolver<I: UnsignedInt + Integer> {
    arcs: ArcTable<I>,
    max_iterations: u32,
    pub nits: u32,
}

impl<I: UnsignedInt + Integer> AuctionSolver<I, KhoslaSolver<I>> for KhoslaSolver<I> {
    fn new(
        row_capacity: usize,
        column_capacity: usize,
        arcs_capacity: usize,
    ) -> (Self, Assignment<I>) {
        (
            Self {
                arcs: ArcTable::with_capacity(row_capacity, column_capacity, arcs_capacity),
                max_iterations: Self::MAX_ITERATIONS,
                nits: 0,
            },
            Assignment::<I>::new(row_capacity, column_capacity),
        )
    }

    fn arcs(&self) -> &ArcTable<I> {
        &self.arcs
    }
    fn arcs_mut(&mut self) -> &mut ArcTable<I> {
        &mut self.arcs
    }

    fn nits(&self) -> u32 {
        self.nits
    }
    fn set_max_iterations(&mut self, max_iterations: u32) {
        self.max_iterations = max_iterations;
    }

    fn solve(&mut self, assignment: &mut Assignment<I>, eps: Option<f64>) -> Result<()> {
        let eps = self.prepare(assignment, eps)?;
        let price_threshold = self.price_threshold(eps);
        trace!("price threshold: {}", price_threshold);

        self.nits = 0;
        let mut stack: Vec<I> = num_iter::range(I::zero(), self.arcs.num_rows())
            .rev()
            .collect();

        while let Some(row) = stack.pop() {
            if self.nits >= self.max_iterations {
                bail!(
                    "auction stopped after {} iterations with {} unassigned rows",
                    self.nits,
                    assignment.num_unassigned
                );
            }
            self.nits += 1;

            let choice = self.arcs.best_choice(row);
            let price = self.arcs.price(choice.column);
            trace!("row {} wants column {} at {}", row, choice.column, price);
            if price > price_threshold {
                continue;
            }
            self.arcs.set_price(choice.column, choice.bid(price, eps));
            if let Some(displaced) = assignment.assign(row, choice.column) {
                debug_assert!(displaced != row);
                trace!("row {} is displaced", displaced);
                stack.push(displaced);
            }
        }
        self.settle(assignment)?;
        trace!("objective: {}", self.get_objective(assignment));
        trace!("row_to_column: {:?}", assignment.row_to_column);
        Ok(())
    }
}

impl<I: UnsignedInt + Integer> KhoslaSolver<I> {
    pub const MAX_ITERATIONS: u32 = 1_000_000;

    /// Price above which no row can gain anything from a column.
    fn price_threshold(&self, eps: f64) -> f64 {
        let (min_value, max_value) = self.arcs.value_range();
        let two = I::one() + I::one();
        let half_cols: f64 = self.arcs.num_cols().div_ceil(&two).as_();
        half_cols * (max_value - min_value + eps)
    }
}
