//! Dense constrained least-squares wrapper around Clarabel.
//!
//! Solves
//!
//! ```text
//! minimize    |A x - b|^2
//! subject to  bl_var  <= x     <= bu_var
//!             bl_cons <= C x   <= bu_cons
//! ```
//!
//! with `bl = [bl_var; bl_cons]` and `bu = [bu_var; bu_cons]` stacked the way
//! dense active-set least-squares solvers take them. Rows with equal lower
//! and upper bounds become equality constraints. Bounds with magnitude at or
//! above [`UNBOUNDED`] are treated as absent.
//!
//! This is the only solver surface the walking controller depends on; any
//! bounded-time dense QP or least-squares solver satisfying this contract
//! could back it.

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{NonnegativeConeT, ZeroConeT},
};
use nalgebra::{DMatrix, DVector};

use crate::error::SolverError;

/// Bound magnitude treated as "no bound".
pub const UNBOUNDED: f64 = 1e5;

const EQUALITY_GAP: f64 = 1e-12;

/// Dense constrained least-squares solver.
#[derive(Clone, Debug)]
pub struct LeastSquares {
    max_iter: u32,
}

impl Default for LeastSquares {
    fn default() -> Self {
        Self { max_iter: 200 }
    }
}

impl LeastSquares {
    pub fn new(max_iter: u32) -> Self {
        Self { max_iter }
    }

    /// Solve the bounded least-squares problem. See the module docs for the
    /// bound stacking convention.
    pub fn solve(
        &self,
        a: &DMatrix<f64>,
        b: &DVector<f64>,
        c: &DMatrix<f64>,
        bl: &DVector<f64>,
        bu: &DVector<f64>,
    ) -> Result<DVector<f64>, SolverError> {
        let n_var = a.ncols();
        let n_cons = c.nrows();
        if a.nrows() != b.len() || (n_cons > 0 && c.ncols() != n_var) {
            return Err(SolverError::DimensionMismatch {
                message: format!(
                    "cost {}x{} vs target {}, constraints {}x{}",
                    a.nrows(),
                    a.ncols(),
                    b.len(),
                    c.nrows(),
                    c.ncols()
                ),
            });
        }
        if bl.len() != n_var + n_cons || bu.len() != n_var + n_cons {
            return Err(SolverError::DimensionMismatch {
                message: format!(
                    "bounds of length {} / {}, expected {}",
                    bl.len(),
                    bu.len(),
                    n_var + n_cons
                ),
            });
        }

        // Quadratic form of the least-squares cost.
        let p = a.transpose() * a;
        let q = -(a.transpose() * b);

        // Gather equality rows first (ZeroCone), then one-sided inequality
        // rows (NonnegativeCone), as Clarabel expects the cones ordered.
        // Each source row is a variable bound (i < n_var) or a row of C.
        let source_row = |i: usize| -> DVector<f64> {
            if i < n_var {
                let mut row = DVector::zeros(n_var);
                row[i] = 1.0;
                row
            } else {
                c.row(i - n_var).transpose()
            }
        };

        let mut eq_rows: Vec<(DVector<f64>, f64)> = Vec::new();
        let mut ineq_rows: Vec<(DVector<f64>, f64)> = Vec::new();

        for i in 0..n_var + n_cons {
            let (lo, hi) = (bl[i], bu[i]);
            if (hi - lo).abs() <= EQUALITY_GAP {
                eq_rows.push((source_row(i), hi));
                continue;
            }
            if hi < UNBOUNDED {
                ineq_rows.push((source_row(i), hi));
            }
            if lo > -UNBOUNDED {
                ineq_rows.push((-source_row(i), -lo));
            }
        }

        let n_eq = eq_rows.len();
        let n_ineq = ineq_rows.len();
        let n_rows = n_eq + n_ineq;

        let mut cons = DMatrix::zeros(n_rows, n_var);
        let mut rhs = DVector::zeros(n_rows);
        for (out, (row, bound)) in eq_rows.iter().chain(ineq_rows.iter()).enumerate() {
            cons.row_mut(out).copy_from(&row.transpose());
            rhs[out] = *bound;
        }

        let p_csc = dmatrix_to_csc_upper_tri(&p);
        let a_csc = dmatrix_to_csc(&cons);
        let cones = vec![ZeroConeT(n_eq), NonnegativeConeT(n_ineq)];

        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.max_iter)
            .verbose(false)
            .build()
            .expect("valid solver settings");

        let q_slice: Vec<f64> = q.iter().copied().collect();
        let rhs_slice: Vec<f64> = rhs.iter().copied().collect();

        let mut solver = DefaultSolver::new(&p_csc, &q_slice, &a_csc, &rhs_slice, &cones, settings)
            .map_err(|e| SolverError::Infeasible {
                status: format!("setup failure: {e:?}"),
            })?;
        solver.solve();

        if !matches!(
            solver.solution.status,
            SolverStatus::Solved | SolverStatus::AlmostSolved
        ) {
            return Err(SolverError::Infeasible {
                status: format!("{:?}", solver.solution.status),
            });
        }

        Ok(DVector::from_iterator(
            n_var,
            solver.solution.x.iter().copied(),
        ))
    }
}

/// Convert a nalgebra `DMatrix<f64>` to a Clarabel `CscMatrix<f64>`.
fn dmatrix_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

/// Convert a symmetric `DMatrix<f64>` to upper-triangular CSC form.
fn dmatrix_to_csc_upper_tri(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..=j.min(nrows.saturating_sub(1)) {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}
