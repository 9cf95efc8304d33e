//! Conditional multinomial logit log-likelihood.
//!
//! For group `g` with utilities `xb_g = X_g β`, the choice probability of
//! alternative `j` is `exp(xb_gj - lse(xb_g))`, where `lse` is the
//! max-stabilised log-sum-exp. The log-likelihood is
//!
//! ```text
//! ℓ(β) = Σ_g [ xb_{g,c_g} - lse(xb_g) ] = yᵀXβ - Σ_g lse(xb_g)
//! ```
//!
//! with `c_g` the chosen alternative. Because every group has the same size
//! `J`, `xb` is reshaped to a `(groups, J)` grid and normalised with one
//! row-wise reduction instead of a loop over groups.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::dataset::ChoiceDataset;
use crate::error::{ChoiceError, ChoiceResult};

/// `log Σ exp(values)` with the maximum subtracted before exponentiating.
///
/// Returns `-inf` for an empty slice or when every value is `-inf`.
pub fn log_sum_exp(values: ArrayView1<'_, f64>) -> f64 {
    let max = values.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    if !max.is_finite() {
        return max;
    }
    max + values.fold(0.0, |acc, &v| acc + (v - max).exp()).ln()
}

/// Choice probabilities for one menu of alternatives.
///
/// `alternatives` is `(J, K)`, encoded with the same layout as the estimation data.
pub fn predict_shares(
    beta: ArrayView1<'_, f64>,
    alternatives: ArrayView2<'_, f64>,
) -> ChoiceResult<Array1<f64>> {
    if beta.len() != alternatives.ncols() {
        return Err(ChoiceError::InvalidParameter {
            expected: alternatives.ncols(),
            found: beta.len(),
        });
    }
    let xb = alternatives.dot(&beta);
    let lse = log_sum_exp(xb.view());
    Ok(xb.mapv(|u| (u - lse).exp()))
}

/// Evaluates `ℓ(β)` and its derivatives on a borrowed dataset.
#[derive(Debug, Clone, Copy)]
pub struct LogLikelihoodEngine<'a> {
    data: &'a ChoiceDataset,
}

impl<'a> LogLikelihoodEngine<'a> {
    pub fn new(data: &'a ChoiceDataset) -> Self {
        Self { data }
    }

    pub fn dataset(&self) -> &'a ChoiceDataset {
        self.data
    }

    /// Reject a parameter vector whose length differs from the covariate count.
    pub fn check(&self, beta: ArrayView1<'_, f64>) -> ChoiceResult<()> {
        let expected = self.data.n_covariates();
        if beta.len() != expected {
            return Err(ChoiceError::InvalidParameter { expected, found: beta.len() });
        }
        Ok(())
    }

    /// Linear predictor `Xβ`, one entry per stored row.
    pub fn utilities(&self, beta: ArrayView1<'_, f64>) -> ChoiceResult<Array1<f64>> {
        self.check(beta)?;
        Ok(self.data.design_matrix().dot(&beta))
    }

    /// Per-group log normaliser `lse(xb_g)`.
    fn log_normalizers(&self, xb: &Array1<f64>) -> ChoiceResult<Array1<f64>> {
        let grid = self.grid(xb)?;
        Ok(grid.map_axis(Axis(1), log_sum_exp))
    }

    fn grid(&self, xb: &Array1<f64>) -> ChoiceResult<Array2<f64>> {
        let shape = (self.data.n_groups(), self.data.n_alternatives());
        xb.to_shape(shape)
            .map(|g| g.into_owned())
            .map_err(|e| ChoiceError::Linalg(e.to_string()))
    }

    /// Total log-likelihood `ℓ(β)`.
    ///
    /// # Errors
    /// [`ChoiceError::InvalidParameter`] if `beta` has the wrong length.
    pub fn log_likelihood(&self, beta: ArrayView1<'_, f64>) -> ChoiceResult<f64> {
        let xb = self.utilities(beta)?;
        let lse = self.log_normalizers(&xb)?;
        Ok(self.data.chosen().dot(&xb) - lse.sum())
    }

    /// `-ℓ(β)`, the minimisation objective.
    pub fn neg_log_likelihood(&self, beta: ArrayView1<'_, f64>) -> ChoiceResult<f64> {
        self.log_likelihood(beta).map(|ll| -ll)
    }

    /// Per-row log choice probability `xb_r - lse(xb_{group(r)})`.
    pub fn log_probabilities(&self, beta: ArrayView1<'_, f64>) -> ChoiceResult<Array1<f64>> {
        let xb = self.utilities(beta)?;
        let lse = self.log_normalizers(&xb)?;
        let mut grid = self.grid(&xb)?;
        grid -= &lse.insert_axis(Axis(1));
        Ok(grid.into_iter().collect())
    }

    /// Per-row choice probabilities; each group sums to one.
    pub fn probabilities(&self, beta: ArrayView1<'_, f64>) -> ChoiceResult<Array1<f64>> {
        Ok(self.log_probabilities(beta)?.mapv(f64::exp))
    }

    /// Score `∇ℓ(β) = Xᵀ(y - p)`.
    pub fn gradient(&self, beta: ArrayView1<'_, f64>) -> ChoiceResult<Array1<f64>> {
        let p = self.probabilities(beta)?;
        let residual = &self.data.chosen() - &p;
        Ok(self.data.design_matrix().t().dot(&residual))
    }

    /// Hessian `∇²ℓ(β) = -Σ_g X_gᵀ (diag p_g - p_g p_gᵀ) X_g`.
    ///
    /// Negative semi-definite; its negation is the observed information.
    pub fn hessian(&self, beta: ArrayView1<'_, f64>) -> ChoiceResult<Array2<f64>> {
        let p = self.probabilities(beta)?;
        let x = self.data.design_matrix();
        let (_, k) = x.dim();
        let weighted = &x * &p.view().insert_axis(Axis(1));
        let second_moment = x.t().dot(&weighted);
        let group_means = weighted
            .to_shape((self.data.n_groups(), self.data.n_alternatives(), k))
            .map_err(|e| ChoiceError::Linalg(e.to_string()))?
            .sum_axis(Axis(1));
        let outer = group_means.t().dot(&group_means);
        Ok(outer - second_moment)
    }
}
