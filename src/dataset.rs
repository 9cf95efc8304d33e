//! Long-format choice tables grouped by (respondent, task).
//!
//! Rows are stored contiguously per choice group, groups in order of first
//! appearance in the input table. Every group holds the same number of
//! alternatives `J`, so the row-wise linear predictor can be viewed as a
//! `(groups, J)` grid and normalised with one segmented reduction.

use std::collections::{HashMap, HashSet};

use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::design::{AttributeValue, DesignLayout};
use crate::error::{ChoiceError, ChoiceResult, DataError};

/// Relative singular-value cutoff for the identification check.
const RANK_TOL: f64 = 1e-12;

/// One alternative of one choice task, covariates already encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceRecord {
    /// Respondent id.
    pub respondent: u64,
    /// Task id, unique within a respondent.
    pub task: u64,
    /// Alternative id, unique within a task.
    pub alternative: u64,
    /// Encoded covariates, one per design column.
    pub covariates: Vec<f64>,
    /// Whether this alternative was picked.
    pub chosen: bool,
}

/// One alternative of one choice task, attributes still in raw form.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAlternative {
    /// Respondent id.
    pub respondent: u64,
    /// Task id, unique within a respondent.
    pub task: u64,
    /// Alternative id, unique within a task.
    pub alternative: u64,
    /// One value per attribute of the [`DesignLayout`], in layout order.
    pub attributes: Vec<AttributeValue>,
    /// Whether this alternative was picked.
    pub chosen: bool,
}

/// Identity of a choice group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub respondent: u64,
    pub task: u64,
}

/// Immutable, validated choice data.
#[derive(Debug, Clone)]
pub struct ChoiceDataset {
    x: Array2<f64>,
    chosen: Array1<f64>,
    group_ids: Vec<usize>,
    chosen_positions: Vec<usize>,
    groups: Vec<GroupKey>,
    row_order: Vec<usize>,
    n_alternatives: usize,
    column_names: Option<Vec<String>>,
}

impl ChoiceDataset {
    /// Build from encoded records.
    ///
    /// # Errors
    /// Any [`DataError`]: empty table, ragged or non-finite covariates, a group
    /// without exactly one chosen alternative, uneven group sizes, a repeated
    /// alternative id inside a group, or a design whose parameters are not
    /// identified from within-task variation.
    pub fn from_records(records: &[ChoiceRecord]) -> ChoiceResult<Self> {
        let first = records.first().ok_or(DataError::Empty)?;
        let k = first.covariates.len();
        let mut x = Array2::zeros((records.len(), k));
        for (row, record) in records.iter().enumerate() {
            if record.covariates.len() != k {
                return Err(DataError::RaggedRow { row, expected: k, found: record.covariates.len() }
                    .into());
            }
            x.row_mut(row).assign(&ArrayView1::from(record.covariates.as_slice()));
        }
        let keys: Vec<GroupKey> = records
            .iter()
            .map(|r| GroupKey { respondent: r.respondent, task: r.task })
            .collect();
        let alternatives: Vec<u64> = records.iter().map(|r| r.alternative).collect();
        let chosen: Vec<bool> = records.iter().map(|r| r.chosen).collect();
        Self::build(&keys, Some(&alternatives), x, &chosen)
    }

    /// Encode raw attributes with `layout`, then build as [`Self::from_records`].
    ///
    /// Column names are taken from the layout.
    pub fn from_raw(layout: &DesignLayout, rows: &[RawAlternative]) -> ChoiceResult<Self> {
        let records = rows
            .iter()
            .map(|r| {
                Ok(ChoiceRecord {
                    respondent: r.respondent,
                    task: r.task,
                    alternative: r.alternative,
                    covariates: layout.encode(&r.attributes)?,
                    chosen: r.chosen,
                })
            })
            .collect::<ChoiceResult<Vec<_>>>()?;
        Ok(Self::from_records(&records)?.with_column_names(layout.column_names()))
    }

    /// Build from columns: ids per row, a `(rows, K)` design matrix and a 0/1
    /// chosen indicator.
    pub fn from_columns(
        respondent: &[u64],
        task: &[u64],
        x: ArrayView2<'_, f64>,
        chosen: &[f64],
    ) -> ChoiceResult<Self> {
        let n = x.nrows();
        if n == 0 {
            return Err(DataError::Empty.into());
        }
        for found in [respondent.len(), task.len(), chosen.len()] {
            if found != n {
                return Err(ChoiceError::config(
                    "columns",
                    format!("column has {found} rows, design matrix has {n}"),
                ));
            }
        }
        let flags = chosen
            .iter()
            .enumerate()
            .map(|(row, &value)| match value {
                v if v == 1.0 => Ok(true),
                v if v == 0.0 => Ok(false),
                _ => Err(DataError::InvalidChosenFlag { row, value }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let keys: Vec<GroupKey> = respondent
            .iter()
            .zip(task)
            .map(|(&respondent, &task)| GroupKey { respondent, task })
            .collect();
        Self::build(&keys, None, x.to_owned(), &flags)
    }

    /// Attach names to the covariate columns.
    pub fn with_column_names(mut self, names: Vec<String>) -> Self {
        if names.len() == self.n_covariates() {
            self.column_names = Some(names);
        }
        self
    }

    fn build(
        keys: &[GroupKey],
        alternatives: Option<&[u64]>,
        x: Array2<f64>,
        chosen: &[bool],
    ) -> ChoiceResult<Self> {
        let (n, k) = x.dim();
        if n == 0 || k == 0 {
            return Err(DataError::Empty.into());
        }
        if let Some(((row, col), &value)) = x.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(DataError::NonFiniteCovariate { row, col, value }.into());
        }

        // Group rows by key, groups numbered by first appearance.
        let mut index: HashMap<GroupKey, usize> = HashMap::new();
        let mut groups: Vec<GroupKey> = Vec::new();
        let mut members: Vec<Vec<usize>> = Vec::new();
        for (row, key) in keys.iter().enumerate() {
            let g = *index.entry(*key).or_insert_with(|| {
                groups.push(*key);
                members.push(Vec::new());
                groups.len() - 1
            });
            members[g].push(row);
        }

        let n_alternatives = members[0].len();
        let mut chosen_positions = Vec::with_capacity(groups.len());
        for (key, rows) in groups.iter().zip(&members) {
            if rows.len() != n_alternatives {
                return Err(DataError::UnevenGroups {
                    respondent: key.respondent,
                    task: key.task,
                    expected: n_alternatives,
                    found: rows.len(),
                }
                .into());
            }
            let picked: Vec<usize> = (0..rows.len()).filter(|&j| chosen[rows[j]]).collect();
            if picked.len() != 1 {
                return Err(DataError::ChosenCount {
                    respondent: key.respondent,
                    task: key.task,
                    count: picked.len(),
                }
                .into());
            }
            if let Some(alternatives) = alternatives {
                let mut seen = HashSet::with_capacity(rows.len());
                if let Some(&row) = rows.iter().find(|&&r| !seen.insert(alternatives[r])) {
                    return Err(DataError::DuplicateAlternative {
                        respondent: key.respondent,
                        task: key.task,
                        alternative: alternatives[row],
                    }
                    .into());
                }
            }
            chosen_positions.push(picked[0]);
        }

        let row_order: Vec<usize> = members.concat();
        let group_ids: Vec<usize> = (0..groups.len())
            .flat_map(|g| std::iter::repeat_n(g, n_alternatives))
            .collect();
        let x = x.select(Axis(0), &row_order);
        let chosen = row_order.iter().map(|&r| if chosen[r] { 1.0 } else { 0.0 }).collect();

        let dataset = Self {
            x,
            chosen,
            group_ids,
            chosen_positions,
            groups,
            row_order,
            n_alternatives,
            column_names: None,
        };
        let rank = dataset.within_task_rank()?;
        if rank < k {
            return Err(DataError::RankDeficient { rank, expected: k }.into());
        }
        Ok(dataset)
    }

    /// Column rank of the design after removing each group's mean row.
    ///
    /// MNL probabilities only depend on within-group utility differences, so
    /// this is the rank that identifies `beta`.
    fn within_task_rank(&self) -> ChoiceResult<usize> {
        let (n, k) = self.x.dim();
        let grid = self
            .x
            .to_shape((self.n_groups(), self.n_alternatives, k))
            .map_err(|e| ChoiceError::Linalg(e.to_string()))?;
        let means = grid
            .mean_axis(Axis(1))
            .ok_or_else(|| ChoiceError::Linalg("empty choice group".to_string()))?;
        let centered = &grid - &means.insert_axis(Axis(1));
        let centered = centered
            .to_shape((n, k))
            .map_err(|e| ChoiceError::Linalg(e.to_string()))?;
        let gram = centered.t().dot(&centered);
        let gram = DMatrix::from_fn(k, k, |i, j| gram[[i, j]]);
        let singular = gram.svd(false, false).singular_values;
        let largest = singular.max();
        if largest <= 0.0 {
            return Ok(0);
        }
        Ok(singular.iter().filter(|&&s| s > largest * RANK_TOL).count())
    }

    /// Design matrix, rows grouped contiguously.
    pub fn design_matrix(&self) -> ArrayView2<'_, f64> {
        self.x.view()
    }

    /// 0/1 chosen indicator aligned with [`Self::design_matrix`].
    pub fn chosen(&self) -> ArrayView1<'_, f64> {
        self.chosen.view()
    }

    /// Group index of every stored row.
    pub fn group_ids(&self) -> &[usize] {
        &self.group_ids
    }

    /// Position of the chosen alternative within each group.
    pub fn chosen_positions(&self) -> &[usize] {
        &self.chosen_positions
    }

    /// (respondent, task) of each group, in first-appearance order.
    pub fn groups(&self) -> &[GroupKey] {
        &self.groups
    }

    /// Input row index of every stored row.
    pub fn row_order(&self) -> &[usize] {
        &self.row_order
    }

    pub fn column_names(&self) -> Option<&[String]> {
        self.column_names.as_deref()
    }

    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    /// Alternatives per group, `J`.
    pub fn n_alternatives(&self) -> usize {
        self.n_alternatives
    }

    /// Covariates per row, `K`.
    pub fn n_covariates(&self) -> usize {
        self.x.ncols()
    }

    pub fn n_rows(&self) -> usize {
        self.x.nrows()
    }
}
