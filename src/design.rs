//! Attribute coding for linear-in-parameters utilities.
//!
//! A [`DesignLayout`] fixes the order of covariate columns. That order is the
//! parameter index contract: column `k` of the design matrix is multiplied by
//! `beta[k]`, both during estimation and when the fitted vector is later used
//! to predict shares for new menus.
//!
//! Categorical attributes are one-hot expanded with their reference level
//! dropped, so the reference level has utility zero.

use crate::error::{ChoiceResult, DataError};

/// Value of a single attribute for one alternative.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Level(String),
    Flag(bool),
    Number(f64),
}

impl From<&str> for AttributeValue {
    fn from(level: &str) -> Self {
        AttributeValue::Level(level.to_string())
    }
}

impl From<bool> for AttributeValue {
    fn from(flag: bool) -> Self {
        AttributeValue::Flag(flag)
    }
}

impl From<f64> for AttributeValue {
    fn from(x: f64) -> Self {
        AttributeValue::Number(x)
    }
}

/// One attribute of the choice design.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    /// Nominal attribute, one indicator column per non-reference level.
    Categorical {
        name: String,
        levels: Vec<String>,
        reference: String,
    },
    /// Two-level attribute; `reference` is the flag value coded as zero.
    Binary { name: String, reference: bool },
    /// Attribute entered linearly, e.g. price.
    Numeric { name: String },
}

impl Attribute {
    pub fn categorical(name: &str, levels: &[&str], reference: &str) -> Self {
        Attribute::Categorical {
            name: name.to_string(),
            levels: levels.iter().map(|l| l.to_string()).collect(),
            reference: reference.to_string(),
        }
    }

    pub fn binary(name: &str, reference: bool) -> Self {
        Attribute::Binary { name: name.to_string(), reference }
    }

    pub fn numeric(name: &str) -> Self {
        Attribute::Numeric { name: name.to_string() }
    }

    pub fn name(&self) -> &str {
        match self {
            Attribute::Categorical { name, .. }
            | Attribute::Binary { name, .. }
            | Attribute::Numeric { name } => name,
        }
    }

    fn width(&self) -> usize {
        match self {
            Attribute::Categorical { levels, reference, .. } => {
                levels.iter().filter(|l| *l != reference).count()
            }
            Attribute::Binary { .. } | Attribute::Numeric { .. } => 1,
        }
    }

    fn column_names(&self) -> Vec<String> {
        match self {
            Attribute::Categorical { name, levels, reference } => levels
                .iter()
                .filter(|l| *l != reference)
                .map(|l| format!("{name}={l}"))
                .collect(),
            Attribute::Binary { name, reference } => vec![format!("{name}={}", !reference)],
            Attribute::Numeric { name } => vec![name.clone()],
        }
    }

    fn encode_into(&self, value: &AttributeValue, out: &mut Vec<f64>) -> ChoiceResult<()> {
        match (self, value) {
            (Attribute::Categorical { name, levels, reference }, AttributeValue::Level(level)) => {
                if !levels.contains(level) {
                    return Err(DataError::UnknownLevel {
                        attribute: name.clone(),
                        level: level.clone(),
                    }
                    .into());
                }
                out.extend(
                    levels
                        .iter()
                        .filter(|l| *l != reference)
                        .map(|l| if l == level { 1.0 } else { 0.0 }),
                );
            }
            (Attribute::Binary { reference, .. }, AttributeValue::Flag(flag)) => {
                out.push(if flag != reference { 1.0 } else { 0.0 });
            }
            (Attribute::Numeric { .. }, AttributeValue::Number(x)) => out.push(*x),
            _ => {
                return Err(DataError::AttributeKind { attribute: self.name().to_string() }.into());
            }
        }
        Ok(())
    }
}

/// Ordered attribute list defining the covariate columns.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignLayout {
    attributes: Vec<Attribute>,
}

impl DesignLayout {
    pub fn new(attributes: Vec<Attribute>) -> Self {
        Self { attributes }
    }

    /// Brand (Hulu reference), ads (ad-free reference) and monthly price.
    ///
    /// Columns: `brand=Netflix`, `brand=Prime`, `ads=true`, `price`.
    pub fn streaming() -> Self {
        Self::new(vec![
            Attribute::categorical("brand", &["Netflix", "Prime", "Hulu"], "Hulu"),
            Attribute::binary("ads", false),
            Attribute::numeric("price"),
        ])
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Number of covariate columns K.
    pub fn n_covariates(&self) -> usize {
        self.attributes.iter().map(Attribute::width).sum()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.attributes.iter().flat_map(Attribute::column_names).collect()
    }

    /// Index of the column called `name`, if any.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names().iter().position(|c| c == name)
    }

    /// Encode one alternative's attribute values into its covariate vector.
    ///
    /// # Errors
    /// - [`DataError::AttributeMismatch`] if `values` does not carry one value per attribute.
    /// - [`DataError::UnknownLevel`] for an undeclared categorical level.
    /// - [`DataError::AttributeKind`] if a value has the wrong kind.
    pub fn encode(&self, values: &[AttributeValue]) -> ChoiceResult<Vec<f64>> {
        if values.len() != self.attributes.len() {
            return Err(DataError::AttributeMismatch {
                expected: self.attributes.len(),
                found: values.len(),
            }
            .into());
        }
        let mut out = Vec::with_capacity(self.n_covariates());
        for (attribute, value) in self.attributes.iter().zip(values) {
            attribute.encode_into(value, &mut out)?;
        }
        Ok(out)
    }
}
