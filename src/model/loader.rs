//! Model artifact parsing
//!
//! The external trainer writes four CSVs per symbol:
//! `<SYM>_map_weights.csv` (N rows of D values), `<SYM>_expectancy.csv`
//! (one value per line), `<SYM>_risk_map.csv` (one value per line, optional),
//! and `<SYM>_scaling_params.csv` (header, then `feature,min,max` rows).

use std::io::ErrorKind;
use std::path::Path;

/// Errors raised while loading or validating model artifacts
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read model artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse model artifact: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid numeric value in model artifact: {0}")]
    Num(#[from] std::num::ParseFloatError),
    #[error("codebook shape mismatch: {0}")]
    Shape(String),
}

/// Parsed candidate tables, not yet validated or published
#[derive(Debug, Clone)]
pub struct CodebookTables {
    pub weights: Vec<Vec<f64>>,
    pub expectancy: Vec<f64>,
    pub risk: Vec<f64>,
    pub mins: Vec<f64>,
    pub maxs: Vec<f64>,
}

impl CodebookTables {
    /// Load all artifacts for a symbol from a directory
    pub fn from_dir(dir: &Path, symbol: &str) -> Result<Self, ModelError> {
        let weights = read_matrix(&dir.join(format!("{symbol}_map_weights.csv")))?;
        let expectancy = read_column(&dir.join(format!("{symbol}_expectancy.csv")))?;

        // The trainer only writes the risk table once it has enough closed
        // trades; fall back to an empty table until then
        let risk = match read_column(&dir.join(format!("{symbol}_risk_map.csv"))) {
            Ok(values) => values,
            Err(ModelError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(symbol = %symbol, "risk table missing, default risk will be used");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let (mins, maxs) = read_scaling(&dir.join(format!("{symbol}_scaling_params.csv")))?;

        Ok(Self {
            weights,
            expectancy,
            risk,
            mins,
            maxs,
        })
    }

    /// Check the size-consistency invariant against the deployment shape
    ///
    /// Must be called before any stored state is touched; a candidate that
    /// fails here is rejected wholesale.
    pub fn validate(&self, node_count: usize, feature_dim: usize) -> Result<(), ModelError> {
        if self.weights.len() != node_count {
            return Err(ModelError::Shape(format!(
                "expected {} weight rows, got {}",
                node_count,
                self.weights.len()
            )));
        }
        if let Some((row, _)) = self
            .weights
            .iter()
            .enumerate()
            .find(|(_, w)| w.len() != feature_dim)
        {
            return Err(ModelError::Shape(format!(
                "weight row {} does not have {} columns",
                row, feature_dim
            )));
        }
        if self.expectancy.len() != node_count {
            return Err(ModelError::Shape(format!(
                "expected {} expectancy values, got {}",
                node_count,
                self.expectancy.len()
            )));
        }
        if !self.risk.is_empty() && self.risk.len() != node_count {
            return Err(ModelError::Shape(format!(
                "expected 0 or {} risk values, got {}",
                node_count,
                self.risk.len()
            )));
        }
        if self.mins.len() != feature_dim || self.maxs.len() != feature_dim {
            return Err(ModelError::Shape(format!(
                "expected {} scaling bounds, got {} mins / {} maxs",
                feature_dim,
                self.mins.len(),
                self.maxs.len()
            )));
        }
        Ok(())
    }
}

/// Read a headerless CSV of f64 rows
fn read_matrix(path: &Path) -> Result<Vec<Vec<f64>>, ModelError> {
    let file = std::fs::File::open(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Vec<f64> = record
            .iter()
            .map(|field| field.trim().parse::<f64>())
            .collect::<Result<_, _>>()?;
        if !row.is_empty() {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Read a single-column file of f64 values, one per line
fn read_column(path: &Path) -> Result<Vec<f64>, ModelError> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.parse::<f64>().map_err(ModelError::from))
        .collect()
}

/// Read the `feature,min,max` scaling table (header skipped)
fn read_scaling(path: &Path) -> Result<(Vec<f64>, Vec<f64>), ModelError> {
    let file = std::fs::File::open(path)?;
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);

    let mut mins = Vec::new();
    let mut maxs = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() < 3 {
            return Err(ModelError::Shape(format!(
                "scaling row has {} fields, expected feature,min,max",
                record.len()
            )));
        }
        mins.push(record[1].trim().parse::<f64>()?);
        maxs.push(record[2].trim().parse::<f64>()?);
    }
    Ok((mins, maxs))
}
