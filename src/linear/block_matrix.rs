//! Dense matrix partitioned into vertical column blocks.

use nalgebra::{DMatrix, DMatrixView, DMatrixViewMut};

/// Column-partitioned dense matrix.
///
/// Block `i` spans columns `column_starts[i]..column_starts[i + 1]` over all
/// rows. Linear factors store `[A₁ | A₂ | … | b]` this way, one block per key
/// plus a trailing single-column block for the right-hand side.
#[derive(Debug, Clone, PartialEq)]
pub struct VerticalBlockMatrix {
    matrix: DMatrix<f64>,
    column_starts: Vec<usize>,
}

impl VerticalBlockMatrix {
    /// Zero matrix with `rows` rows and one block per entry of `dims`.
    pub fn new(dims: impl IntoIterator<Item = usize>, rows: usize) -> Self {
        let mut column_starts = vec![0];
        let mut total = 0;
        for dim in dims {
            total += dim;
            column_starts.push(total);
        }
        VerticalBlockMatrix {
            matrix: DMatrix::zeros(rows, total),
            column_starts,
        }
    }

    pub fn n_blocks(&self) -> usize {
        self.column_starts.len() - 1
    }

    pub fn rows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn cols(&self) -> usize {
        self.matrix.ncols()
    }

    /// First column of block `block`.
    pub fn offset(&self, block: usize) -> usize {
        self.column_starts[block]
    }

    /// Width of block `block`.
    pub fn block_dim(&self, block: usize) -> usize {
        self.column_starts[block + 1] - self.column_starts[block]
    }

    /// Block widths, in order.
    pub fn dims(&self) -> Vec<usize> {
        self.column_starts.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn block(&self, block: usize) -> DMatrixView<'_, f64> {
        let (start, width) = (self.offset(block), self.block_dim(block));
        self.matrix.columns(start, width)
    }

    pub fn block_mut(&mut self, block: usize) -> DMatrixViewMut<'_, f64> {
        let (start, width) = (self.offset(block), self.block_dim(block));
        self.matrix.columns_mut(start, width)
    }

    /// Columns of blocks `first..last`.
    pub fn range(&self, first: usize, last: usize) -> DMatrixView<'_, f64> {
        let start = self.offset(first);
        self.matrix.columns(start, self.column_starts[last] - start)
    }

    pub fn full(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn full_mut(&mut self) -> &mut DMatrix<f64> {
        &mut self.matrix
    }

    pub fn set_zero(&mut self) {
        self.matrix.fill(0.0);
    }
}
