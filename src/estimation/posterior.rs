//! Posterior summaries of Metropolis–Hastings chains.

use ndarray::{Array1, Array2, Axis, concatenate};
use statrs::statistics::{Data, OrderStatistics};

use crate::error::{ChoiceError, ChoiceResult};
use crate::estimation::metropolis::{AcceptanceDiagnostic, Chain};

/// Fewest post burn-in draws accepted for percentile intervals.
pub const MIN_POSTERIOR_DRAWS: usize = 100;

/// Point estimates, 95% credible intervals and diagnostics of a posterior sample.
#[derive(Debug, Clone)]
pub struct PosteriorSummary {
    /// Posterior mean of each coefficient.
    pub posterior_means: Array1<f64>,
    /// Posterior standard deviation of each coefficient (ddof 1).
    pub posterior_sds: Array1<f64>,
    /// `(2.5th, 97.5th)` percentiles per coefficient.
    pub credible_intervals: Vec<(f64, f64)>,
    /// Pooled acceptance rate over every iteration, burn-in included.
    pub acceptance_rate: f64,
    /// Post burn-in draws, `(n_draws, dim)`.
    pub samples: Array2<f64>,
    /// Coefficient names, one per column of `samples`.
    pub column_names: Option<Vec<String>>,
}

impl PosteriorSummary {
    /// Drop the first `burn_in` draws of `chain` and summarise the rest.
    ///
    /// # Errors
    /// [`ChoiceError::InsufficientSamples`] if fewer than
    /// [`MIN_POSTERIOR_DRAWS`] draws remain.
    pub fn new(chain: &Chain, burn_in: usize) -> ChoiceResult<Self> {
        Self::from_chains(std::slice::from_ref(chain), burn_in)
    }

    /// Pool several chains after dropping `burn_in` draws from each.
    pub fn from_chains(chains: &[Chain], burn_in: usize) -> ChoiceResult<Self> {
        let Some(first) = chains.first() else {
            return Err(ChoiceError::InsufficientSamples { required: MIN_POSTERIOR_DRAWS, available: 0 });
        };
        let dim = first.dim();
        if let Some(other) = chains.iter().find(|c| c.dim() != dim) {
            return Err(ChoiceError::config(
                "chains",
                format!("cannot pool a {}-dimensional chain with a {dim}-dimensional one", other.dim()),
            ));
        }

        let parts: Vec<Array2<f64>> = chains.iter().map(|c| c.to_array(burn_in)).collect();
        let views: Vec<_> = parts.iter().map(Array2::view).collect();
        let samples = concatenate(Axis(0), &views).map_err(|e| ChoiceError::Linalg(e.to_string()))?;
        let available = samples.nrows();
        if available < MIN_POSTERIOR_DRAWS {
            return Err(ChoiceError::InsufficientSamples { required: MIN_POSTERIOR_DRAWS, available });
        }

        let posterior_means = samples
            .mean_axis(Axis(0))
            .ok_or(ChoiceError::InsufficientSamples { required: MIN_POSTERIOR_DRAWS, available })?;
        let posterior_sds = samples.std_axis(Axis(0), 1.0);
        let credible_intervals = samples
            .columns()
            .into_iter()
            .map(|col| {
                let mut data = Data::new(col.to_vec());
                (data.quantile(0.025), data.quantile(0.975))
            })
            .collect();

        let accepted: usize = chains.iter().map(Chain::accepted).sum();
        let iterations: usize = chains.iter().map(Chain::len).sum();

        Ok(Self {
            posterior_means,
            posterior_sds,
            credible_intervals,
            acceptance_rate: accepted as f64 / iterations as f64,
            samples,
            column_names: None,
        })
    }

    /// Attach coefficient names; ignored unless there is one name per coefficient.
    pub fn with_column_names(mut self, names: Option<&[String]>) -> Self {
        self.column_names = names
            .filter(|names| names.len() == self.posterior_means.len())
            .map(<[String]>::to_vec);
        self
    }

    fn column_name(&self, i: usize) -> String {
        self.column_names
            .as_ref()
            .and_then(|names| names.get(i).cloned())
            .unwrap_or_else(|| format!("β{i}"))
    }

    pub fn n_draws(&self) -> usize {
        self.samples.nrows()
    }

    pub fn diagnostic(&self) -> AcceptanceDiagnostic {
        AcceptanceDiagnostic::from_rate(self.acceptance_rate)
    }

    /// Post burn-in draws of one coefficient, for trace plots.
    pub fn get_posterior_samples(&self, param_idx: usize) -> Option<Vec<f64>> {
        if param_idx >= self.samples.ncols() {
            return None;
        }
        Some(self.samples.column(param_idx).to_vec())
    }

    /// Print a summary of the posterior
    pub fn summary(&self) {
        println!(
            "MNL posterior ({} draws, acceptance rate {:.3})",
            self.n_draws(),
            self.acceptance_rate
        );
        println!(
            "{:<16} {:<12} {:<12} {:<12} {:<12}",
            "Parameter", "Mean", "Std. Dev.", "2.5%", "97.5%"
        );
        println!("{}", "-".repeat(64));
        for (i, ((mean, sd), (lo, hi))) in self
            .posterior_means
            .iter()
            .zip(&self.posterior_sds)
            .zip(&self.credible_intervals)
            .enumerate()
        {
            println!(
                "{:<16} {:<12.4} {:<12.4} {:<12.4} {:<12.4}",
                self.column_name(i),
                mean,
                sd,
                lo,
                hi
            );
        }
    }
}
