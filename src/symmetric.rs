use crate::solution::{Assignment, UnsignedInt};
use crate::solver::{ArcTable, AuctionSolver};
use anyhow::{bail, Result};
use num_iter;
use tracing::{debug, trace};

/// Forward auction with Jacobi bidding and ε-scaling.
///
/// In every iteration each unassigned row bids for its best column at once and every column goes
/// to its highest bidder. Prices start at zero and only grow, so columns nobody bid on keep the
/// minimum price and the result is ε-optimal for asymmetric problems (rows < columns).
///
/// ε starts at a fraction of the value range and shrinks by [`Self::SCALING_FACTOR`] per phase.
/// Every phase starts from the prices of the previous one, which keeps price wars short for
/// large values. The ε-optimal result of the last phase is refined to the optimum.
#[derive(Clone)]
pub struct ForwardAuctionSolver<I: UnsignedInt> {
    arcs: ArcTable<I>,

    max_iterations: u32,

    pub nits: u32,
    pub optimal_soln_found: bool,

    // highest bid per column in the current iteration
    best_bids: Vec<f64>,
    best_bidders: Vec<I>,
    contested: Vec<I>,

    unassigned: Vec<I>,
    bidders: Vec<I>,
}

impl<I: UnsignedInt> AuctionSolver<I, ForwardAuctionSolver<I>> for ForwardAuctionSolver<I> {
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
                optimal_soln_found: false,
                best_bids: Vec::with_capacity(column_capacity),
                best_bidders: Vec::with_capacity(column_capacity),
                contested: Vec::with_capacity(row_capacity),
                unassigned: Vec::with_capacity(row_capacity),
                bidders: Vec::with_capacity(row_capacity),
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

    #[inline]
    fn solve(&mut self, assignment: &mut Assignment<I>, eps: Option<f64>) -> Result<()> {
        self.solve_with_params(assignment, eps, None)
    }
}

impl<I: UnsignedInt> ForwardAuctionSolver<I> {
    pub const MAX_ITERATIONS: u32 = 100000;
    pub const SCALING_FACTOR: f64 = 4.;

    /// Solves with at most `max_iterations` bidding iterations over all phases.
    ///
    /// Running out of iterations is an error, an incomplete assignment is never returned as a
    /// result.
    #[inline]
    pub fn solve_with_params(
        &mut self,
        assignment: &mut Assignment<I>,
        eps: Option<f64>,
        max_iterations: Option<u32>,
    ) -> Result<()> {
        let eps = self.prepare(assignment, eps)?;
        if let Some(iterations) = max_iterations {
            self.max_iterations = iterations;
        }
        self.optimal_soln_found = false;
        self.nits = 0;

        let (min, max) = self.arcs.value_range();
        let mut phase_eps = eps.max((max - min) / Self::SCALING_FACTOR);
        loop {
            self.run_phase(assignment, phase_eps)?;
            debug!(
                "phase with eps {} done after {} iterations",
                phase_eps, self.nits
            );
            if phase_eps <= eps {
                break;
            }
            phase_eps = eps.max(phase_eps / Self::SCALING_FACTOR);
        }

        // prices reach a few multiples of the largest value
        let toleration = self.get_toleration() * 1024.;
        debug_assert!(self.arcs.ecs_satisfied(assignment, eps, toleration));
        self.settle(assignment)?;
        self.optimal_soln_found = true;
        trace!("objective: {}", self.get_objective(assignment));
        Ok(())
    }

    /// Bidding from the current prices until every row holds a column.
    fn run_phase(&mut self, assignment: &mut Assignment<I>, eps: f64) -> Result<()> {
        let num_cols: usize = self.arcs.num_cols().as_();
        assignment.reset(self.arcs.num_rows(), self.arcs.num_cols());
        self.best_bids.clear();
        self.best_bids.resize(num_cols, f64::NEG_INFINITY);
        self.best_bidders.clear();
        self.best_bidders.resize(num_cols, I::max_value());
        self.contested.clear();
        self.unassigned.clear();
        self.unassigned
            .extend(num_iter::range(I::zero(), self.arcs.num_rows()));

        while !self.unassigned.is_empty() {
            if self.nits >= self.max_iterations {
                bail!(
                    "auction stopped after {} iterations with {} unassigned rows",
                    self.nits,
                    assignment.num_unassigned
                );
            }
            self.collect_bids(eps);
            self.award_columns(assignment);
            self.nits += 1;
        }
        Ok(())
    }

    fn get_toleration(&self) -> f64 {
        crate::solver::toleration(self.arcs.max_abs_value())
    }

    /// Every unassigned row bids on its best column, only the highest bid per column is kept.
    fn collect_bids(&mut self, eps: f64) {
        std::mem::swap(&mut self.unassigned, &mut self.bidders);
        self.unassigned.clear();

        for n in 0..self.bidders.len() {
            let row = self.bidders[n];
            let choice = self.arcs.best_choice(row);
            let bid = choice.bid(self.arcs.price(choice.column), eps);
            let column: usize = choice.column.as_();
            // ties keep the earlier bidder
            if bid > self.best_bids[column] {
                if self.best_bidders[column] == I::max_value() {
                    self.contested.push(choice.column);
                }
                self.best_bids[column] = bid;
                self.best_bidders[column] = row;
            }
        }
        trace!("contested columns: {:?}", self.contested);
    }

    /// Columns go to their highest bidders; displaced and outbid rows bid again next iteration.
    fn award_columns(&mut self, assignment: &mut Assignment<I>) {
        for column in self.contested.drain(..) {
            let column_usize: usize = column.as_();
            let winner = self.best_bidders[column_usize];
            self.arcs.set_price(column, self.best_bids[column_usize]);
            if let Some(displaced) = assignment.assign(winner, column) {
                self.unassigned.push(displaced);
            }
            self.best_bidders[column_usize] = I::max_value();
            self.best_bids[column_usize] = f64::NEG_INFINITY;
        }
        for n in 0..self.bidders.len() {
            let row = self.bidders[n];
            let row_usize: usize = row.as_();
            if assignment.row_to_column[row_usize] == I::max_value() {
                self.unassigned.push(row);
            }
        }
        trace!("row_to_column: {:?}", assignment.row_to_column);
        trace!("prices: {:?}", self.arcs.prices());
    }
}
