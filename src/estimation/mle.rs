//! Maximum-likelihood estimation with BFGS.
//!
//! The optimiser minimises `c(β) = -ℓ(β)` using the analytic score. The
//! covariance of `β̂` is, by default, the inverse-Hessian approximation BFGS
//! carries at its final iterate; the exact observed-information inverse is
//! available through [`CovarianceSource::ObservedInformation`].
//!
//! Non-convergence is not an error. Every attempt that stops without meeting a
//! tolerance is retried from a perturbed start according to [`RetryPolicy`];
//! if no attempt converges, the best attempt is returned with
//! `converged == false` and the solver's termination message.

use std::str::FromStr;

use argmin::core::{
    CostFunction, Executor, Gradient, IterState, Solver, State, TerminationReason,
    TerminationStatus,
};
use argmin::solver::linesearch::{HagerZhangLineSearch, MoreThuenteLineSearch};
use argmin::solver::quasinewton::BFGS;
use log::{debug, warn};
use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView1};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::dataset::ChoiceDataset;
use crate::error::{ChoiceError, ChoiceResult};
use crate::likelihood::LogLikelihoodEngine;
use crate::rng::{BaseDraws, RngDraw};

type Param = Vec<f64>;
type InvHessian = Vec<Vec<f64>>;
type BfgsState = IterState<Param, Param, (), InvHessian, (), f64>;
type BfgsMoreThuente = BFGS<MoreThuenteLineSearch<Param, Param, f64>, f64>;
type BfgsHagerZhang = BFGS<HagerZhangLineSearch<Param, Param, f64>, f64>;

/// Smallest curvature used when scaling the initial inverse Hessian.
const MIN_CURVATURE: f64 = 1e-8;

/// Stopping rules. `max_iter` is a hard budget per attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    pub tol_grad: Option<f64>,
    pub tol_cost: Option<f64>,
    pub max_iter: u64,
}

impl Tolerances {
    /// # Errors
    /// [`ChoiceError::InvalidConfig`] for a non-finite or negative tolerance,
    /// or a zero iteration budget.
    pub fn new(tol_grad: Option<f64>, tol_cost: Option<f64>, max_iter: u64) -> ChoiceResult<Self> {
        for (field, tol) in [("tol_grad", tol_grad), ("tol_cost", tol_cost)] {
            if let Some(t) = tol {
                if !t.is_finite() || t < 0.0 {
                    return Err(ChoiceError::config(field, format!("must be finite and >= 0, got {t}")));
                }
            }
        }
        if max_iter == 0 {
            return Err(ChoiceError::config("max_iter", "must be greater than zero"));
        }
        Ok(Self { tol_grad, tol_cost, max_iter })
    }
}

impl Default for Tolerances {
    fn default() -> Self {
        Self { tol_grad: Some(1e-6), tol_cost: None, max_iter: 500 }
    }
}

/// Line search used inside BFGS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineSearcher {
    #[default]
    MoreThuente,
    HagerZhang,
}

impl FromStr for LineSearcher {
    type Err = ChoiceError;

    /// Case-insensitive `"MoreThuente"` or `"HagerZhang"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "morethuente" => Ok(LineSearcher::MoreThuente),
            "hagerzhang" => Ok(LineSearcher::HagerZhang),
            _ => Err(ChoiceError::config(
                "line_searcher",
                format!("unknown line search `{s}`, expected MoreThuente or HagerZhang"),
            )),
        }
    }
}

/// How a restart point is derived from the best iterate so far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Perturbation {
    /// Restart from the same point.
    None,
    /// Add independent `N(0, scale^2)` noise to every coordinate.
    Gaussian { scale: f64 },
}

/// Restart policy for attempts that do not converge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub perturbation: Perturbation,
    pub seed: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, perturbation: Perturbation::Gaussian { scale: 0.5 }, seed: 0 }
    }
}

impl RetryPolicy {
    /// Single attempt, no restarts.
    pub fn none() -> Self {
        Self { max_retries: 0, perturbation: Perturbation::None, seed: 0 }
    }

    fn validate(&self) -> ChoiceResult<()> {
        if let Perturbation::Gaussian { scale } = self.perturbation {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(ChoiceError::config(
                    "perturbation",
                    format!("Gaussian scale must be finite and > 0, got {scale}"),
                ));
            }
        }
        Ok(())
    }

    fn restart_point(&self, base: &Array1<f64>, draws: &BaseDraws, rng: &mut ChaCha8Rng) -> Array1<f64> {
        match self.perturbation {
            Perturbation::None => base.clone(),
            Perturbation::Gaussian { scale } => {
                let scales = Array1::from_elem(base.len(), scale);
                base + &draws.sample_scaled_norm(rng, scales.view())
            }
        }
    }
}

/// Where the reported covariance comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CovarianceSource {
    /// Final BFGS inverse-Hessian approximation.
    #[default]
    InverseBfgs,
    /// Inverse of the analytic observed information at `β̂`.
    ObservedInformation,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MleOptions {
    pub tolerances: Tolerances,
    pub line_searcher: LineSearcher,
    pub retry: RetryPolicy,
    pub covariance: CovarianceSource,
}

/// Result of [`MleOptimizer::fit`].
#[derive(Debug, Clone, PartialEq)]
pub struct MleFit {
    /// Estimated coefficients, in design-matrix column order.
    pub beta_hat: Array1<f64>,
    /// Covariance of `beta_hat`, from the source chosen in [`MleOptions::covariance`].
    pub covariance: Array2<f64>,
    /// Square roots of the covariance diagonal.
    pub std_errors: Array1<f64>,
    /// Whether the reported attempt met a convergence tolerance.
    pub converged: bool,
    /// `true` when `covariance` is a BFGS inverse Hessian built from fewer
    /// curvature updates than coefficients; its standard errors are then
    /// unreliable and [`CovarianceSource::ObservedInformation`] should be used.
    pub approximate_covariance: bool,
    /// Solver termination status of the reported attempt.
    pub message: String,
    /// `-ℓ(β̂)`.
    pub neg_log_likelihood: f64,
    /// Iterations used by the reported attempt.
    pub iterations: u64,
    /// Attempts made, including the first.
    pub attempts: usize,
    /// Coefficient names taken from the dataset, if it has them.
    pub column_names: Option<Vec<String>>,
}

impl MleFit {
    /// Willingness to pay for `column`, in units of the price column:
    /// `-β_column / β_price`.
    pub fn willingness_to_pay(&self, column: usize, price_column: usize) -> Option<f64> {
        let beta = self.beta_hat.get(column)?;
        let price = self.beta_hat.get(price_column)?;
        (*price != 0.0).then(|| -beta / price)
    }

    /// Wald interval `β̂ ± z·se` for every coefficient.
    pub fn confidence_intervals(&self, z: f64) -> Vec<(f64, f64)> {
        self.beta_hat
            .iter()
            .zip(&self.std_errors)
            .map(|(b, se)| (b - z * se, b + z * se))
            .collect()
    }

    /// Print a summary of the fit
    pub fn summary(&self) {
        println!(
            "MNL maximum likelihood (converged: {}, -logL = {:.4}, {} iterations, {} attempt(s))",
            self.converged, self.neg_log_likelihood, self.iterations, self.attempts
        );
        println!("{:<16} {:<12} {:<12} {:<12}", "Parameter", "Estimate", "Std. Err.", "z");
        println!("{}", "-".repeat(52));
        for (i, (b, se)) in self.beta_hat.iter().zip(&self.std_errors).enumerate() {
            println!("{:<16} {:<12.4} {:<12.4} {:<12.2}", self.column_name(i), b, se, b / se);
        }
        if self.approximate_covariance {
            println!("note: BFGS covariance built from {} updates; standard errors are approximate", self.iterations);
        }
    }

    fn column_name(&self, i: usize) -> String {
        self.column_names
            .as_ref()
            .and_then(|names| names.get(i).cloned())
            .unwrap_or_else(|| format!("β{i}"))
    }
}

/// Exposes `-ℓ(β)` and its gradient to argmin.
struct NegLogLikelihood<'a> {
    engine: LogLikelihoodEngine<'a>,
}

impl CostFunction for NegLogLikelihood<'_> {
    type Param = Param;
    type Output = f64;

    fn cost(&self, beta: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(self.engine.neg_log_likelihood(ArrayView1::from(beta.as_slice()))?)
    }
}

impl Gradient for NegLogLikelihood<'_> {
    type Param = Param;
    type Gradient = Param;

    fn gradient(&self, beta: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let score = self.engine.gradient(ArrayView1::from(beta.as_slice()))?;
        Ok(score.iter().map(|g| -g).collect())
    }
}

/// Outcome of one BFGS run.
struct Attempt {
    beta: Array1<f64>,
    inv_hessian: Option<InvHessian>,
    cost: f64,
    converged: bool,
    message: String,
    iterations: u64,
}

/// Quasi-Newton maximum-likelihood estimator.
#[derive(Debug, Clone, Default)]
pub struct MleOptimizer {
    options: MleOptions,
}

impl MleOptimizer {
    pub fn new(options: MleOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MleOptions {
        &self.options
    }

    /// Maximise `ℓ(β)` starting from `initial_guess`.
    ///
    /// # Errors
    /// - [`ChoiceError::InvalidParameter`] if `initial_guess` has the wrong length.
    /// - [`ChoiceError::InvalidConfig`] for an invalid retry policy.
    /// - [`ChoiceError::Optimizer`] if every attempt failed inside argmin.
    /// - [`ChoiceError::Linalg`] if the observed information is singular.
    pub fn fit(
        &self,
        data: &ChoiceDataset,
        initial_guess: ArrayView1<'_, f64>,
    ) -> ChoiceResult<MleFit> {
        let engine = LogLikelihoodEngine::new(data);
        engine.check(initial_guess)?;
        self.options.retry.validate()?;

        let retry = self.options.retry;
        let draws = BaseDraws::new();
        let mut rng = ChaCha8Rng::seed_from_u64(retry.seed);
        let mut start = initial_guess.to_owned();
        let mut best: Option<Attempt> = None;
        let mut last_error = None;
        let mut attempts = 0;

        for attempt in 0..=retry.max_retries {
            attempts = attempt + 1;
            match self.run_attempt(engine, start.clone()) {
                Ok(outcome) if outcome.converged => {
                    debug!(
                        "BFGS converged on attempt {attempts} after {} iterations, -logL = {:.6}",
                        outcome.iterations, outcome.cost
                    );
                    best = Some(outcome);
                    break;
                }
                Ok(outcome) => {
                    warn!(
                        "BFGS attempt {attempts} did not converge ({}), -logL = {:.6}",
                        outcome.message, outcome.cost
                    );
                    if best.as_ref().is_none_or(|b| outcome.cost < b.cost) {
                        best = Some(outcome);
                    }
                }
                Err(err) => {
                    warn!("BFGS attempt {attempts} failed: {err}");
                    last_error = Some(err);
                }
            }
            let base = best.as_ref().map_or_else(|| initial_guess.to_owned(), |b| b.beta.clone());
            start = retry.restart_point(&base, &draws, &mut rng);
        }

        let attempt = match (best, last_error) {
            (Some(attempt), _) => attempt,
            (None, Some(err)) => return Err(err),
            (None, None) => return Err(ChoiceError::Optimizer("no optimisation attempt ran".into())),
        };
        self.finish(engine, attempt, attempts)
    }

    fn run_attempt(&self, engine: LogLikelihoodEngine<'_>, start: Array1<f64>) -> ChoiceResult<Attempt> {
        let problem = NegLogLikelihood { engine };
        let inv_hessian0 = initial_inverse_hessian(&engine, start.view())?;
        let tols = &self.options.tolerances;
        match self.options.line_searcher {
            LineSearcher::MoreThuente => {
                let solver = configure_bfgs(BfgsMoreThuente::new(MoreThuenteLineSearch::new()), tols)?;
                run_bfgs(problem, solver, start, inv_hessian0, tols.max_iter)
            }
            LineSearcher::HagerZhang => {
                let solver = configure_bfgs(BfgsHagerZhang::new(HagerZhangLineSearch::new()), tols)?;
                run_bfgs(problem, solver, start, inv_hessian0, tols.max_iter)
            }
        }
    }

    fn finish(&self, engine: LogLikelihoodEngine<'_>, attempt: Attempt, attempts: usize) -> ChoiceResult<MleFit> {
        let k = attempt.beta.len();
        let (covariance, approximate_covariance) = match self.options.covariance {
            CovarianceSource::InverseBfgs => {
                let inv = attempt.inv_hessian.ok_or_else(|| {
                    ChoiceError::Optimizer("solver state carries no inverse Hessian".into())
                })?;
                let few_updates = attempt.iterations < k as u64;
                if few_updates {
                    warn!(
                        "BFGS stopped after {} iterations for {k} coefficients; \
                         inverse-Hessian standard errors are unreliable",
                        attempt.iterations
                    );
                }
                let cov = Array2::from_shape_fn((k, k), |(i, j)| 0.5 * (inv[i][j] + inv[j][i]));
                (cov, few_updates)
            }
            CovarianceSource::ObservedInformation => {
                (observed_information_inverse(&engine, attempt.beta.view())?, false)
            }
        };
        let std_errors = covariance.diag().mapv(f64::sqrt);
        Ok(MleFit {
            beta_hat: attempt.beta,
            covariance,
            std_errors,
            converged: attempt.converged,
            approximate_covariance,
            message: attempt.message,
            neg_log_likelihood: attempt.cost,
            iterations: attempt.iterations,
            attempts,
            column_names: engine.dataset().column_names().map(<[String]>::to_vec),
        })
    }
}

fn configure_bfgs<L>(solver: BFGS<L, f64>, tols: &Tolerances) -> ChoiceResult<BFGS<L, f64>> {
    let mut solver = solver;
    if let Some(tol) = tols.tol_grad {
        solver = solver.with_tolerance_grad(tol)?;
    }
    if let Some(tol) = tols.tol_cost {
        solver = solver.with_tolerance_cost(tol)?;
    }
    Ok(solver)
}

fn run_bfgs<'a, S>(
    problem: NegLogLikelihood<'a>,
    solver: S,
    start: Array1<f64>,
    inv_hessian0: InvHessian,
    max_iter: u64,
) -> ChoiceResult<Attempt>
where
    S: Solver<NegLogLikelihood<'a>, BfgsState>,
{
    let mut state = Executor::new(problem, solver)
        .configure(|state| state.param(start.to_vec()).inv_hessian(inv_hessian0).max_iters(max_iter))
        .run()?
        .state;

    let status = state.get_termination_status().clone();
    let converged = matches!(
        status,
        TerminationStatus::Terminated(
            TerminationReason::SolverConverged | TerminationReason::TargetCostReached
        )
    );
    let beta = state
        .take_best_param()
        .or_else(|| state.take_param())
        .ok_or_else(|| ChoiceError::Optimizer("solver returned no parameter vector".into()))?;
    Ok(Attempt {
        beta: Array1::from(beta),
        inv_hessian: state.take_inv_hessian(),
        cost: state.get_best_cost(),
        converged,
        message: format!("{status:?}"),
        iterations: state.get_iter(),
    })
}

/// Diagonal start `diag(1 / I_kk)` from the observed information at `beta`,
/// so the first step is scaled per coordinate.
fn initial_inverse_hessian(
    engine: &LogLikelihoodEngine<'_>,
    beta: ArrayView1<'_, f64>,
) -> ChoiceResult<InvHessian> {
    let information = -engine.hessian(beta)?;
    let k = information.nrows();
    Ok((0..k)
        .map(|i| {
            let curvature = information[[i, i]].max(MIN_CURVATURE);
            (0..k).map(|j| if i == j { 1.0 / curvature } else { 0.0 }).collect()
        })
        .collect())
}

fn observed_information_inverse(
    engine: &LogLikelihoodEngine<'_>,
    beta: ArrayView1<'_, f64>,
) -> ChoiceResult<Array2<f64>> {
    let information = -engine.hessian(beta)?;
    let k = information.nrows();
    let information = DMatrix::from_fn(k, k, |i, j| information[[i, j]]);
    let inverse = information
        .cholesky()
        .ok_or_else(|| ChoiceError::Linalg("observed information is not positive definite".into()))?
        .inverse();
    Ok(Array2::from_shape_fn((k, k), |(i, j)| inverse[(i, j)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ChoiceRecord;
    use approx::assert_relative_eq;
    use ndarray::array;

    /// Two alternatives per task, one covariate: a binary logit in `x_1 - x_2`.
    fn binary_data() -> ChoiceDataset {
        let mut records = Vec::new();
        let pattern = [(1.0, true), (1.0, true), (1.0, false), (-1.0, true), (-1.0, false), (-1.0, false)];
        for (task, &(dx, first_chosen)) in pattern.iter().enumerate() {
            for alt in 0..2u64 {
                records.push(ChoiceRecord {
                    respondent: 1,
                    task: task as u64,
                    alternative: alt,
                    covariates: vec![if alt == 0 { dx } else { 0.0 }],
                    chosen: (alt == 0) == first_chosen,
                });
            }
        }
        ChoiceDataset::from_records(&records).unwrap()
    }

    #[test]
    fn matches_closed_form_binary_logit() {
        // P(first | dx=+1) = 2/3 and P(first | dx=-1) = 1/3 give β̂ = ln 2.
        let data = binary_data();
        let fit = MleOptimizer::default().fit(&data, array![0.0].view()).unwrap();
        assert!(fit.converged, "{}", fit.message);
        assert_relative_eq!(fit.beta_hat[0], 2.0f64.ln(), epsilon = 1e-5);

        // Observed information at β̂: 6 · p(1-p) with p = 2/3.
        let engine = LogLikelihoodEngine::new(&data);
        let exact = observed_information_inverse(&engine, fit.beta_hat.view()).unwrap();
        assert_relative_eq!(exact[[0, 0]], 1.0 / (6.0 * 2.0 / 9.0), epsilon = 1e-6);
        assert!(fit.std_errors[0] > 0.0);
    }

    #[test]
    fn both_line_searches_agree() {
        let data = binary_data();
        let options = MleOptions {
            line_searcher: "hagerzhang".parse().unwrap(),
            covariance: CovarianceSource::ObservedInformation,
            ..MleOptions::default()
        };
        let hz = MleOptimizer::new(options).fit(&data, array![1.5].view()).unwrap();
        let mt = MleOptimizer::default().fit(&data, array![1.5].view()).unwrap();
        assert!(hz.converged && mt.converged);
        assert_relative_eq!(hz.beta_hat[0], mt.beta_hat[0], epsilon = 1e-5);
        assert_relative_eq!(
            hz.neg_log_likelihood,
            -LogLikelihoodEngine::new(&data).log_likelihood(hz.beta_hat.view()).unwrap(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn exhausted_budget_reports_non_convergence() {
        let data = binary_data();
        let options = MleOptions {
            tolerances: Tolerances::new(Some(1e-14), None, 1).unwrap(),
            retry: RetryPolicy { max_retries: 1, perturbation: Perturbation::None, seed: 0 },
            ..MleOptions::default()
        };
        let fit = MleOptimizer::new(options).fit(&data, array![5.0].view()).unwrap();
        assert!(!fit.converged);
        assert_eq!(fit.attempts, 2);
        assert!(fit.message.contains("MaxItersReached"), "{}", fit.message);
        assert!(fit.neg_log_likelihood.is_finite());
    }

    #[test]
    fn rejects_bad_inputs_before_optimising() {
        let data = binary_data();
        let err = MleOptimizer::default().fit(&data, array![0.0, 1.0].view()).unwrap_err();
        assert_eq!(err, ChoiceError::InvalidParameter { expected: 1, found: 2 });

        assert!(Tolerances::new(Some(-1.0), None, 10).is_err());
        assert!(Tolerances::new(None, None, 0).is_err());
        assert!("bisection".parse::<LineSearcher>().is_err());

        let options = MleOptions {
            retry: RetryPolicy { perturbation: Perturbation::Gaussian { scale: 0.0 }, ..RetryPolicy::default() },
            ..MleOptions::default()
        };
        let err = MleOptimizer::new(options).fit(&data, array![0.0].view()).unwrap_err();
        assert!(matches!(err, ChoiceError::InvalidConfig { field: "perturbation", .. }));
    }

    #[test]
    fn willingness_to_pay_and_intervals() {
        let fit = MleFit {
            beta_hat: array![1.0, -0.1],
            covariance: Array2::eye(2),
            std_errors: array![0.1, 0.01],
            converged: true,
            approximate_covariance: false,
            message: String::new(),
            neg_log_likelihood: 0.0,
            iterations: 0,
            attempts: 1,
            column_names: None,
        };
        assert_relative_eq!(fit.willingness_to_pay(0, 1).unwrap(), 10.0);
        assert_eq!(fit.willingness_to_pay(5, 1), None);
        let ci = fit.confidence_intervals(1.96);
        assert_relative_eq!(ci[0].0, 1.0 - 0.196);
        assert_relative_eq!(ci[1].1, -0.1 + 0.0196);
    }

    #[test]
    fn summary_tolerates_short_column_names() {
        let fit = MleFit {
            beta_hat: array![1.0, -0.1],
            covariance: Array2::eye(2),
            std_errors: array![0.1, 0.01],
            converged: true,
            approximate_covariance: true,
            message: String::new(),
            neg_log_likelihood: 0.0,
            iterations: 1,
            attempts: 1,
            column_names: Some(vec!["ads=true".to_string()]),
        };
        assert_eq!(fit.column_name(0), "ads=true");
        assert_eq!(fit.column_name(1), "β1");
        fit.summary();
    }

    #[test]
    fn exact_covariance_is_never_flagged_approximate() {
        let data = binary_data();
        let options = MleOptions { covariance: CovarianceSource::ObservedInformation, ..MleOptions::default() };
        let fit = MleOptimizer::new(options).fit(&data, array![0.0].view()).unwrap();
        assert!(!fit.approximate_covariance);
    }
}
