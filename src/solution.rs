use num_traits::{AsPrimitive, FromPrimitive, NumAssign, PrimInt, Unsigned};
use std::fmt::{Debug, Display};

/// Index type of rows and columns. `MAX` is reserved as the "nothing" marker.
pub trait UnsignedInt:
    PrimInt
    + Unsigned
    + Display
    + Debug
    + AsPrimitive<usize>
    + AsPrimitive<f64>
    + FromPrimitive
    + NumAssign
{
}

impl UnsignedInt for u16 {}
impl UnsignedInt for u32 {}
impl UnsignedInt for u64 {}
impl UnsignedInt for usize {}

/// Row to column assignment produced by an auction.
#[derive(Debug, Clone)]
pub struct Assignment<I>
where
    I: UnsignedInt,
{
    /// `row_to_column[i]` is the column held by row `i`, `I::max_value()` if none.
    pub row_to_column: Vec<I>,
    /// `column_to_row[j]` is the row holding column `j`, `I::max_value()` if none.
    pub column_to_row: Vec<I>,
    /// Rows left without a column. Solvers fail instead of returning an incomplete assignment.
    pub num_unassigned: I,
    /// Final ε of the auction. Solvers refine the auction result until it is optimal, so this
    /// only tells how close the bidding got by itself.
    pub eps: f64,
}

impl<I> Assignment<I>
where
    I: UnsignedInt,
{
    pub fn new(row_capacity: usize, column_capacity: usize) -> Assignment<I> {
        Assignment::<I> {
            row_to_column: Vec::with_capacity(row_capacity),
            column_to_row: Vec::with_capacity(column_capacity),
            num_unassigned: I::max_value(),
            eps: f64::NAN,
        }
    }

    /// Forgets every pair and sizes the maps for a new problem.
    pub(crate) fn reset(&mut self, num_rows: I, num_cols: I) {
        self.row_to_column.clear();
        self.row_to_column.resize(num_rows.as_(), I::max_value());
        self.column_to_row.clear();
        self.column_to_row.resize(num_cols.as_(), I::max_value());
        self.num_unassigned = num_rows;
    }

    /// Gives `column` to `row` and returns the row that held it before.
    pub(crate) fn assign(&mut self, row: I, column: I) -> Option<I> {
        let column_usize: usize = column.as_();
        let previous = self.column_to_row[column_usize];
        let displaced = if previous != I::max_value() {
            let previous_usize: usize = previous.as_();
            self.row_to_column[previous_usize] = I::max_value();
            Some(previous)
        } else {
            self.num_unassigned -= I::one();
            None
        };
        let row_usize: usize = row.as_();
        self.row_to_column[row_usize] = column;
        self.column_to_row[column_usize] = row;
        displaced
    }

    /// Moves every listed row to its new column at once. Columns given up and not taken again
    /// become free.
    pub(crate) fn reassign(&mut self, moves: &[(I, I)]) {
        for (row, _) in moves {
            let row_usize: usize = row.as_();
            let previous = self.row_to_column[row_usize];
            if previous != I::max_value() {
                let previous_usize: usize = previous.as_();
                self.column_to_row[previous_usize] = I::max_value();
            } else {
                self.num_unassigned -= I::one();
            }
        }
        for (row, column) in moves {
            let (row_usize, column_usize): (usize, usize) = (row.as_(), column.as_());
            self.row_to_column[row_usize] = *column;
            self.column_to_row[column_usize] = *row;
        }
    }

    /// Column assigned to row `i`, if any.
    #[inline]
    pub fn column_of(&self, i: usize) -> Option<I> {
        match self.row_to_column.get(i) {
            Some(j) if *j != I::max_value() => Some(*j),
            _ => None,
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.num_unassigned.is_zero()
    }
}
