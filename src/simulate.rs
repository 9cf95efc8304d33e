//! Synthetic conjoint surveys drawn from a known parameter vector.
//!
//! Each task shows `n_alternatives` streaming offers with a uniformly drawn
//! brand, a fair coin for ads and a uniformly drawn price. The chosen offer is
//! sampled from the MNL choice probabilities under the true `β`.

use ndarray::{Array2, ArrayView1};
use rand::Rng;

use crate::dataset::{ChoiceDataset, RawAlternative};
use crate::design::{AttributeValue, DesignLayout};
use crate::error::{ChoiceError, ChoiceResult};
use crate::likelihood::predict_shares;
use crate::rng::{BaseDraws, RngDraw};

/// Monthly prices offered in the streaming survey.
pub const STREAMING_PRICES: [f64; 8] = [4.0, 8.0, 12.0, 16.0, 20.0, 24.0, 28.0, 32.0];

/// Raw rows and the validated dataset built from them.
#[derive(Debug, Clone)]
pub struct SimulatedConjoint {
    pub records: Vec<RawAlternative>,
    pub dataset: ChoiceDataset,
}

/// Draws conjoint menus and choices for the streaming layout.
#[derive(Debug, Clone)]
pub struct ConjointSimulator {
    layout: DesignLayout,
    brands: Vec<String>,
    prices: Vec<f64>,
    n_alternatives: usize,
}

impl ConjointSimulator {
    /// Netflix/Prime/Hulu, ads yes/no, prices 4 to 32 in steps of 4, three offers per task.
    pub fn streaming() -> Self {
        Self {
            layout: DesignLayout::streaming(),
            brands: ["Netflix", "Prime", "Hulu"].map(String::from).to_vec(),
            prices: STREAMING_PRICES.to_vec(),
            n_alternatives: 3,
        }
    }

    /// Change the number of offers per task.
    ///
    /// # Errors
    /// [`ChoiceError::InvalidConfig`] if fewer than two offers are requested.
    pub fn with_alternatives(mut self, n_alternatives: usize) -> ChoiceResult<Self> {
        if n_alternatives < 2 {
            return Err(ChoiceError::config(
                "n_alternatives",
                format!("a choice task needs at least 2 offers, got {n_alternatives}"),
            ));
        }
        self.n_alternatives = n_alternatives;
        Ok(self)
    }

    pub fn layout(&self) -> &DesignLayout {
        &self.layout
    }

    pub fn n_alternatives(&self) -> usize {
        self.n_alternatives
    }

    fn draw_offer<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<AttributeValue> {
        let brand = &self.brands[rng.gen_range(0..self.brands.len())];
        let ads = rng.r#gen::<bool>();
        let price = self.prices[rng.gen_range(0..self.prices.len())];
        vec![brand.as_str().into(), ads.into(), price.into()]
    }

    /// Simulate `n_respondents × n_tasks` choice tasks under `beta`.
    ///
    /// Respondents, tasks and alternatives are numbered from 1. All randomness
    /// comes from `rng`.
    ///
    /// # Errors
    /// - [`ChoiceError::InvalidParameter`] if `beta` does not match the layout.
    /// - Any [`crate::DataError`] raised while building the dataset, e.g.
    ///   [`crate::DataError::Empty`] for zero respondents or tasks.
    pub fn simulate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        n_respondents: usize,
        n_tasks: usize,
        beta: ArrayView1<'_, f64>,
    ) -> ChoiceResult<SimulatedConjoint> {
        let k = self.layout.n_covariates();
        if beta.len() != k {
            return Err(ChoiceError::InvalidParameter { expected: k, found: beta.len() });
        }
        let draws = BaseDraws::new();
        let j = self.n_alternatives;
        let mut records = Vec::with_capacity(n_respondents * n_tasks * j);

        for respondent in 1..=n_respondents as u64 {
            for task in 1..=n_tasks as u64 {
                let offers: Vec<Vec<AttributeValue>> = (0..j).map(|_| self.draw_offer(rng)).collect();
                let mut menu = Array2::zeros((j, k));
                for (mut row, offer) in menu.rows_mut().into_iter().zip(&offers) {
                    row.assign(&ArrayView1::from(self.layout.encode(offer)?.as_slice()));
                }
                let shares = predict_shares(beta, menu.view())?;

                let u = draws.sample_unif(rng);
                let mut cumulative = 0.0;
                let chosen = shares
                    .iter()
                    .position(|&p| {
                        cumulative += p;
                        u < cumulative
                    })
                    .unwrap_or(j - 1);

                records.extend(offers.into_iter().enumerate().map(|(a, attributes)| RawAlternative {
                    respondent,
                    task,
                    alternative: a as u64 + 1,
                    attributes,
                    chosen: a == chosen,
                }));
            }
        }

        let dataset = ChoiceDataset::from_raw(&self.layout, &records)?;
        Ok(SimulatedConjoint { records, dataset })
    }
}
