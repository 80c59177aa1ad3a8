//! # Matrix Views
//!
//! Borrowed, bounds-checked row-major views over regions of a flat buffer.
//! Views never own memory; they are handed out by a [`crate::Layout`] or a
//! [`crate::Theta`] and live as long as the borrow of the underlying buffer.

use crate::Real;

/// Immutable `rows x cols` row-major view.
#[derive(Debug, Clone, Copy)]
pub struct MatrixRef<'a> {
    data: &'a [Real],
    rows: usize,
    cols: usize,
}

impl<'a> MatrixRef<'a> {
    /// Wrap `data` as a `rows x cols` matrix.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() != rows * cols`.
    pub fn new(data: &'a [Real], rows: usize, cols: usize) -> Self {
        assert_eq!(
            data.len(),
            rows * cols,
            "Matrix view of {}x{} needs {} values, got {}",
            rows,
            cols,
            rows * cols,
            data.len()
        );
        Self { data, rows, cols }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn as_slice(&self) -> &'a [Real] {
        self.data
    }

    /// Row `i` as a slice.
    pub fn row(&self, i: usize) -> &'a [Real] {
        assert!(i < self.rows, "Row {} out of range ({} rows)", i, self.rows);
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// `out += M x`
    pub fn mul_vec_add(&self, x: &[Real], out: &mut [Real]) {
        assert_eq!(x.len(), self.cols, "Input length must match columns");
        assert_eq!(out.len(), self.rows, "Output length must match rows");
        for (i, o) in out.iter_mut().enumerate() {
            *o += dot(self.row(i), x);
        }
    }

    /// `out += M^T y`
    pub fn transpose_mul_add(&self, y: &[Real], out: &mut [Real]) {
        assert_eq!(y.len(), self.rows, "Input length must match rows");
        assert_eq!(out.len(), self.cols, "Output length must match columns");
        for (i, &yi) in y.iter().enumerate() {
            if yi == 0.0 {
                continue;
            }
            for (o, &m) in out.iter_mut().zip(self.row(i)) {
                *o += m * yi;
            }
        }
    }
}

/// Mutable `rows x cols` row-major view.
#[derive(Debug)]
pub struct MatrixMut<'a> {
    data: &'a mut [Real],
    rows: usize,
    cols: usize,
}

impl<'a> MatrixMut<'a> {
    /// Wrap `data` as a mutable `rows x cols` matrix.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() != rows * cols`.
    pub fn new(data: &'a mut [Real], rows: usize, cols: usize) -> Self {
        assert_eq!(
            data.len(),
            rows * cols,
            "Matrix view of {}x{} needs {} values, got {}",
            rows,
            cols,
            rows * cols,
            data.len()
        );
        Self { data, rows, cols }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Reborrow as an immutable view.
    pub fn view(&self) -> MatrixRef<'_> {
        MatrixRef::new(&*self.data, self.rows, self.cols)
    }

    pub fn as_slice(&self) -> &[Real] {
        &*self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [Real] {
        &mut *self.data
    }

    pub fn row(&self, i: usize) -> &[Real] {
        assert!(i < self.rows, "Row {} out of range ({} rows)", i, self.rows);
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [Real] {
        assert!(i < self.rows, "Row {} out of range ({} rows)", i, self.rows);
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// `row(i) += scale * v`
    pub fn add_to_row(&mut self, i: usize, scale: Real, v: &[Real]) {
        axpy(scale, v, self.row_mut(i));
    }

    /// `M += scale * u v^T`
    pub fn add_outer(&mut self, scale: Real, u: &[Real], v: &[Real]) {
        assert_eq!(u.len(), self.rows, "Left factor must match rows");
        assert_eq!(v.len(), self.cols, "Right factor must match columns");
        for (i, &ui) in u.iter().enumerate() {
            if ui == 0.0 {
                continue;
            }
            axpy(scale * ui, v, self.row_mut(i));
        }
    }

    pub fn fill(&mut self, value: Real) {
        self.data.fill(value);
    }
}

/// Inner product.
pub fn dot(a: &[Real], b: &[Real]) -> Real {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `y += alpha * x`
pub fn axpy(alpha: Real, x: &[Real], y: &mut [Real]) {
    assert_eq!(x.len(), y.len(), "axpy length mismatch");
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

pub fn squared_norm(a: &[Real]) -> Real {
    dot(a, a)
}

/// `‖a - b‖²`
pub fn squared_distance(a: &[Real], b: &[Real]) -> Real {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Element-wise `a + b` into `out`.
pub fn add_into(a: &[Real], b: &[Real], out: &mut [Real]) {
    for ((o, x), y) in out.iter_mut().zip(a).zip(b) {
        *o = x + y;
    }
}

/// Element-wise `a - b` into `out`.
pub fn sub_into(a: &[Real], b: &[Real], out: &mut [Real]) {
    for ((o, x), y) in out.iter_mut().zip(a).zip(b) {
        *o = x - y;
    }
}
