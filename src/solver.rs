use crate::cycle::positive_cycle;
use crate::solution::{Assignment, UnsignedInt};
use anyhow::{anyhow, bail, ensure, Result};
use tracing::{debug, trace};

/// Sparse values of an assignment problem together with the current column prices.
///
/// Arcs are stored row after row (CSR): `row_starts[i]..row_starts[i + 1]` is the range of row
/// `i` inside `columns` and `values`. Rows have to be filled in order and a row can't be left
/// empty once the next one is started.
#[derive(Debug, Clone)]
pub struct ArcTable<I: UnsignedInt> {
    num_rows: I,
    num_cols: I,
    row_starts: Vec<usize>,
    columns: Vec<I>,
    values: Vec<f64>,
    prices: Vec<f64>,
}

/// Best column of a row at current prices and the profit of the runner-up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Choice<I> {
    pub column: I,
    pub value: f64,
    pub profit: f64,
    pub second_profit: f64,
}

impl<I> Choice<I> {
    /// Highest price of the chosen column at which the row still prefers it, raised by `eps`.
    ///
    /// A row with a single arc has no runner-up and outbids the current `price` by `eps`.
    #[inline]
    pub fn bid(&self, price: f64, eps: f64) -> f64 {
        if self.second_profit.is_finite() {
            self.value - self.second_profit + eps
        } else {
            price + eps
        }
    }
}

/// Edge of the reassignment graph: the row holding `from` moves to `to`.
#[derive(Debug, Clone, Copy)]
struct Move<I> {
    from: usize,
    to: usize,
    gain: f64,
    // row and its new column, none for the edges through the free vertex
    shift: Option<(I, I)>,
}

impl<I: UnsignedInt> ArcTable<I> {
    pub fn with_capacity(row_capacity: usize, column_capacity: usize, arcs: usize) -> Self {
        let mut row_starts = Vec::with_capacity(row_capacity + 1);
        row_starts.push(0);
        ArcTable {
            num_rows: I::zero(),
            num_cols: I::zero(),
            row_starts,
            columns: Vec::with_capacity(arcs),
            values: Vec::with_capacity(arcs),
            prices: Vec::with_capacity(column_capacity),
        }
    }

    /// Drops all arcs and sets the dimensions of the next problem.
    pub fn reset(&mut self, num_rows: I, num_cols: I) -> Result<()> {
        ensure!(
            num_rows <= num_cols,
            "{} rows don't fit into {} columns",
            num_rows,
            num_cols
        );
        ensure!(num_rows < I::max_value());
        self.num_rows = num_rows;
        self.num_cols = num_cols;
        self.row_starts.clear();
        self.row_starts.push(0);
        self.columns.clear();
        self.values.clear();
        self.prices.clear();
        Ok(())
    }

    /// Appends arcs to `row`, which is either the row filled last or the next one.
    pub fn extend_row(&mut self, row: I, columns: &[I], values: &[f64]) -> Result<()> {
        ensure!(columns.len() == values.len());
        ensure!(row < self.num_rows, "row {} is out of range", row);
        if let Some(column) = columns.iter().find(|j| **j >= self.num_cols) {
            bail!("column {} is out of range in row {}", column, row);
        }
        let end = self.columns.len() + columns.len();
        let max_arcs: usize = I::max_value().as_();
        ensure!(
            end < max_arcs,
            "number of arcs doesn't fit into the index type"
        );

        let row_usize: usize = row.as_();
        let started = self.row_starts.len() - 1;
        if row_usize == started {
            if started > 0 {
                ensure!(
                    self.row_len(started - 1) > 0,
                    "row {} has no arcs",
                    started - 1
                );
            }
            self.row_starts.push(end);
        } else if started > 0 && row_usize == started - 1 {
            self.row_starts[started] = end;
        } else {
            bail!("row {} is filled out of order", row);
        }
        self.columns.extend_from_slice(columns);
        self.values.extend_from_slice(values);
        Ok(())
    }

    pub fn num_rows(&self) -> I {
        self.num_rows
    }

    pub fn num_cols(&self) -> I {
        self.num_cols
    }

    pub fn num_arcs(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    fn row_len(&self, i: usize) -> usize {
        self.row_starts[i + 1] - self.row_starts[i]
    }

    /// Columns and values of row `i`.
    #[inline]
    pub fn row(&self, i: usize) -> (&[I], &[f64]) {
        let range = self.row_starts[i]..self.row_starts[i + 1];
        (&self.columns[range.clone()], &self.values[range])
    }

    /// Value of arc `i -> j`, if present.
    pub fn arc_value(&self, i: I, j: I) -> Option<f64> {
        let (columns, values) = self.row(i.as_());
        columns
            .iter()
            .position(|column| *column == j)
            .map(|arc| values[arc])
    }

    pub fn prices(&self) -> &[f64] {
        &self.prices
    }

    #[inline]
    pub(crate) fn price(&self, j: I) -> f64 {
        let j_usize: usize = j.as_();
        self.prices[j_usize]
    }

    #[inline]
    pub(crate) fn set_price(&mut self, j: I, price: f64) {
        let j_usize: usize = j.as_();
        self.prices[j_usize] = price;
    }

    pub(crate) fn reset_prices(&mut self) {
        self.prices.clear();
        self.prices.resize(self.num_cols.as_(), 0.);
    }

    /// Choice rule of the auction. Ties go to the arc stored first.
    pub(crate) fn best_choice(&self, i: I) -> Choice<I> {
        let (columns, values) = self.row(i.as_());
        let mut choice = Choice {
            column: I::max_value(),
            value: f64::NEG_INFINITY,
            profit: f64::NEG_INFINITY,
            second_profit: f64::NEG_INFINITY,
        };
        for (column, value) in columns.iter().zip(values) {
            let profit = value - self.price(*column);
            if profit > choice.profit {
                choice.second_profit = choice.profit;
                choice.profit = profit;
                choice.column = *column;
                choice.value = *value;
            } else if profit > choice.second_profit {
                choice.second_profit = profit;
            }
        }
        choice
    }

    pub fn max_abs_value(&self) -> f64 {
        self.values.iter().fold(0_f64, |acc, v| acc.max(v.abs()))
    }

    /// Smallest and largest arc value.
    pub fn value_range(&self) -> (f64, f64) {
        self.values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), v| {
                (min.min(*v), max.max(*v))
            })
    }

    /// Sum of the values of all assigned arcs.
    pub fn objective(&self, assignment: &Assignment<I>) -> f64 {
        (0..self.row_starts.len() - 1)
            .filter_map(|i| {
                let j = assignment.column_of(i)?;
                self.arc_value(I::from_usize(i)?, j)
            })
            .sum()
    }

    /// ε-complementary slackness: every assigned row is within `eps` of its best profit.
    ///
    /// The auction keeps it after every bid, so any state it produces passes. `toleration`
    /// absorbs rounding of the accumulated prices.
    pub fn ecs_satisfied(&self, assignment: &Assignment<I>, eps: f64, toleration: f64) -> bool {
        for i in 0..self.row_starts.len() - 1 {
            let j = match assignment.column_of(i) {
                Some(j) => j,
                None => continue,
            };
            let row = match I::from_usize(i) {
                Some(row) => row,
                None => return false,
            };
            let chosen = self.arc_value(row, j).unwrap_or(f64::NEG_INFINITY) - self.price(j);
            let best = self.best_choice(row).profit;
            if chosen + toleration < best - eps {
                trace!("row {} violates eCS: {} < {} - {}", i, chosen, best, eps);
                return false;
            }
        }
        true
    }

    /// Cancels value-increasing reassignment cycles until the complete `assignment` is a
    /// maximum-weight one. Returns the number of cycles canceled.
    ///
    /// Vertices are the columns plus one vertex standing for all free columns. An edge `b -> a`
    /// moves the row holding `b` to `a` and gains the value difference. Free columns lead to the
    /// extra vertex and the extra vertex leads to every held column. A complete assignment is
    /// optimal iff no cycle of this graph gains more than `tolerance`.
    pub fn refine(&self, assignment: &mut Assignment<I>, tolerance: f64) -> Result<usize> {
        ensure!(
            assignment.is_complete(),
            "{} rows are unassigned",
            assignment.num_unassigned
        );
        let num_cols: usize = self.num_cols.as_();
        let max_cycles = 4 * (self.num_arcs() + num_cols);
        let mut moves = Vec::with_capacity(self.num_arcs() + num_cols);
        for canceled in 0..max_cycles {
            self.reassignment_moves(assignment, &mut moves)?;
            let cycle = match positive_cycle(
                num_cols + 1,
                moves.as_slice(),
                |edge| (edge.from, edge.to, edge.gain),
                tolerance,
            ) {
                Some(cycle) => cycle,
                None => {
                    if canceled > 0 {
                        debug!("canceled {} reassignment cycles", canceled);
                    }
                    return Ok(canceled);
                }
            };
            let shifts: Vec<(I, I)> = cycle.iter().filter_map(|e| moves[*e].shift).collect();
            trace!(
                "reassignment cycle {:?} gains {}",
                shifts,
                cycle.iter().map(|e| moves[*e].gain).sum::<f64>()
            );
            assignment.reassign(&shifts);
        }
        bail!(
            "assignment didn't settle after {} reassignment cycles",
            max_cycles
        )
    }

    fn reassignment_moves(
        &self,
        assignment: &Assignment<I>,
        moves: &mut Vec<Move<I>>,
    ) -> Result<()> {
        moves.clear();
        let num_cols: usize = self.num_cols.as_();
        let free = num_cols;
        for i in 0..self.row_starts.len() - 1 {
            let held = match assignment.column_of(i) {
                Some(j) => j,
                None => continue,
            };
            let row = I::from_usize(i).ok_or_else(|| anyhow!("row {} overflows", i))?;
            let held_value = self
                .arc_value(row, held)
                .ok_or_else(|| anyhow!("row {} holds column {} without an arc", row, held))?;
            let (columns, values) = self.row(i);
            for (column, value) in columns.iter().zip(values) {
                if *column != held {
                    moves.push(Move {
                        from: held.as_(),
                        to: column.as_(),
                        gain: value - held_value,
                        shift: Some((row, *column)),
                    });
                }
            }
        }
        for (j, holder) in assignment.column_to_row.iter().enumerate() {
            let (from, to) = if *holder == I::max_value() {
                (j, free)
            } else {
                (free, j)
            };
            moves.push(Move {
                from,
                to,
                gain: 0.,
                shift: None,
            });
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.num_arcs() > 0, "no arcs to solve");
        ensure!(self.num_rows > I::zero() && self.num_cols > I::zero());
        let filled = self.row_starts.len() - 1;
        let num_rows: usize = self.num_rows.as_();
        ensure!(
            filled == num_rows && (0..filled).all(|i| self.row_len(i) > 0),
            "every row needs at least one arc"
        );
        ensure!(
            self.values.iter().all(|v| v.is_finite()),
            "arc values have to be finite"
        );
        Ok(())
    }
}

/// Entry points shared by the auction solvers. All of them maximize the sum of arc values.
pub trait AuctionSolver<I: UnsignedInt, T: AuctionSolver<I, T>> {
    fn new(row_capacity: usize, column_capacity: usize, arcs_capacity: usize)
        -> (T, Assignment<I>);

    fn arcs(&self) -> &ArcTable<I>;
    fn arcs_mut(&mut self) -> &mut ArcTable<I>;

    /// Number of bidding iterations made by the last `solve` call.
    fn nits(&self) -> u32;
    fn set_max_iterations(&mut self, max_iterations: u32);

    fn solve(&mut self, assignment: &mut Assignment<I>, eps: Option<f64>) -> Result<()>;

    #[inline]
    fn init(&mut self, num_rows: I, num_cols: I) -> Result<()> {
        self.arcs_mut().reset(num_rows, num_cols)
    }

    #[inline]
    fn add_value(&mut self, row: I, column: I, value: f64) -> Result<()> {
        self.arcs_mut().extend_row(row, &[column], &[value])
    }

    #[inline]
    fn extend_from_values(&mut self, row: I, columns: &[I], values: &[f64]) -> Result<()> {
        self.arcs_mut().extend_row(row, columns, values)
    }

    #[inline]
    fn num_of_arcs(&self) -> usize {
        self.arcs().num_arcs()
    }

    fn arc_value(&self, i: I, j: I) -> Option<f64> {
        self.arcs().arc_value(i, j)
    }

    /// Returns current objective value of assignments.
    fn get_objective(&self, assignment: &Assignment<I>) -> f64 {
        self.arcs().objective(assignment)
    }

    /// Checks the input, zeroes prices, empties `assignment` and returns the ε in use.
    ///
    /// Without an explicit value ε is `1/(rows + 1)`, which already makes the auction optimal
    /// for integer values. [`settle`](AuctionSolver::settle) takes care of the rest.
    fn prepare(&mut self, assignment: &mut Assignment<I>, eps: Option<f64>) -> Result<f64> {
        self.arcs().validate()?;
        let eps = match eps {
            Some(eps) if eps > 0. && eps.is_finite() => eps,
            Some(eps) => return Err(anyhow!("eps has to be positive, got {}", eps)),
            None => {
                let num_rows: f64 = self.arcs().num_rows().as_();
                1.0 / (num_rows + 1.0)
            }
        };
        let (num_rows, num_cols) = (self.arcs().num_rows(), self.arcs().num_cols());
        self.arcs_mut().reset_prices();
        assignment.reset(num_rows, num_cols);
        assignment.eps = eps;
        Ok(eps)
    }

    /// Turns the ε-optimal auction result into a maximum-weight assignment.
    fn settle(&self, assignment: &mut Assignment<I>) -> Result<()> {
        let arcs = self.arcs();
        let num_cols: f64 = arcs.num_cols().as_();
        let tolerance = toleration(arcs.max_abs_value()) * (num_cols + 2.) * 16.;
        arcs.refine(assignment, tolerance)?;
        Ok(())
    }
}

/// Float precision left over after representing `max_abs_cost` in f64.
pub(crate) fn toleration(max_abs_cost: f64) -> f64 {
    let magnitude = (max_abs_cost + 1e-7).log2().max(0.) as u32;
    1.0 / 2_u64.pow(f64::MANTISSA_DIGITS.saturating_sub(magnitude)) as f64
}
