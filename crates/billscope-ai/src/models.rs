//! Model evaluators.
//!
//! Trained models ship as JSON artifacts that are evaluated natively:
//! linear models (one coefficient row per output) and tree ensembles
//! (flat node arrays, gradient-boosted or forest). ONNX exports are
//! supported behind the `onnx` feature, see [`crate::onnx`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{InferenceError, ModelLoadError};

/// Predicts one continuous outcome from a feature vector.
pub trait Regressor: Send + Sync {
    fn n_features(&self) -> usize;
    fn predict(&self, features: &[f64]) -> Result<f64, InferenceError>;
}

/// Predicts a class index from a feature vector.
pub trait Classifier: Send + Sync {
    fn n_features(&self) -> usize;
    fn n_classes(&self) -> usize;
    fn predict_class(&self, features: &[f64]) -> Result<usize, InferenceError>;
}

/// On-disk model artifact, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Linear(LinearModel),
    TreeEnsemble(TreeEnsemble),
}

impl Artifact {
    pub fn from_file(path: &Path) -> Result<Self, ModelLoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ModelLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate as a regressor over `n_features` inputs.
    pub fn into_regressor(
        self,
        name: &str,
        n_features: usize,
    ) -> Result<Box<dyn Regressor>, ModelLoadError> {
        match self {
            Self::Linear(m) => {
                m.validate(name, n_features, 1)?;
                Ok(Box::new(m))
            }
            Self::TreeEnsemble(m) => {
                m.validate(name, n_features, None)?;
                Ok(Box::new(m))
            }
        }
    }

    /// Validate as a classifier over `n_features` inputs and `n_classes` labels.
    pub fn into_classifier(
        self,
        name: &str,
        n_features: usize,
        n_classes: usize,
    ) -> Result<Box<dyn Classifier>, ModelLoadError> {
        match self {
            Self::Linear(m) => {
                m.validate(name, n_features, n_classes)?;
                Ok(Box::new(m))
            }
            Self::TreeEnsemble(m) => {
                m.validate(name, n_features, Some(n_classes))?;
                Ok(Box::new(m))
            }
        }
    }
}

fn check_arity(expected: usize, features: &[f64]) -> Result<(), InferenceError> {
    if features.len() != expected {
        return Err(InferenceError::Arity {
            expected,
            got: features.len(),
        });
    }
    Ok(())
}

/// Index of the largest value; ties go to the lowest index.
pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

// ── Linear ──

/// `y_k = intercept_k + coefficients_k · x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub intercept: Vec<f64>,
    pub coefficients: Vec<Vec<f64>>,
}

impl LinearModel {
    fn validate(&self, name: &str, n_features: usize, outputs: usize) -> Result<(), ModelLoadError> {
        if self.coefficients.len() != outputs || self.intercept.len() != outputs {
            return Err(ModelLoadError::invalid(
                name,
                format!(
                    "expected {outputs} coefficient rows and intercepts, got {} and {}",
                    self.coefficients.len(),
                    self.intercept.len()
                ),
            ));
        }
        if let Some(row) = self.coefficients.iter().find(|r| r.len() != n_features) {
            return Err(ModelLoadError::invalid(
                name,
                format!("expects {} features, schema has {n_features}", row.len()),
            ));
        }
        Ok(())
    }

    fn scores(&self, features: &[f64]) -> Vec<f64> {
        self.coefficients
            .iter()
            .zip(&self.intercept)
            .map(|(row, b)| b + row.iter().zip(features).map(|(w, x)| w * x).sum::<f64>())
            .collect()
    }

    fn width(&self) -> usize {
        self.coefficients.first().map_or(0, Vec::len)
    }
}

impl Regressor for LinearModel {
    fn n_features(&self) -> usize {
        self.width()
    }

    fn predict(&self, features: &[f64]) -> Result<f64, InferenceError> {
        check_arity(self.width(), features)?;
        Ok(self.scores(features).first().copied().unwrap_or_default())
    }
}

impl Classifier for LinearModel {
    fn n_features(&self) -> usize {
        self.width()
    }

    fn n_classes(&self) -> usize {
        self.coefficients.len()
    }

    fn predict_class(&self, features: &[f64]) -> Result<usize, InferenceError> {
        check_arity(self.width(), features)?;
        Ok(argmax(&self.scores(features)))
    }
}

// ── Tree ensemble ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Gradient boosting: `base_score + Σ leaves`.
    #[default]
    Sum,
    /// Random forest: `base_score + mean(leaves)`.
    Mean,
}

/// One node of a flattened decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    /// `x[feature] < threshold` goes left. A NaN input follows `default_left`.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        #[serde(default)]
        default_left: bool,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
    /// Class the tree votes for (classifiers only).
    #[serde(default)]
    pub class: usize,
}

impl Tree {
    fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("empty tree".into());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(format!("node {i} splits on feature {feature}"));
                    }
                    if threshold.is_nan() {
                        return Err(format!("node {i} has a NaN threshold"));
                    }
                    // Children after parents rules out cycles.
                    for child in [*left, *right] {
                        if child <= i || child >= self.nodes.len() {
                            return Err(format!("node {i} has invalid child {child}"));
                        }
                    }
                }
                Node::Leaf { value } => {
                    if !value.is_finite() {
                        return Err(format!("leaf {i} is not finite"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Leaf value reached by `features`. Assumes a validated tree.
    fn evaluate(&self, features: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    default_left,
                } => {
                    let x = features[*feature];
                    let go_left = if x.is_nan() { *default_left } else { x < *threshold };
                    idx = if go_left { *left } else { *right };
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub n_features: usize,
    /// Present for classifiers: one margin per class, argmax wins.
    #[serde(default)]
    pub n_classes: Option<usize>,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default)]
    pub base_score: f64,
    pub trees: Vec<Tree>,
}

impl TreeEnsemble {
    fn validate(
        &self,
        name: &str,
        n_features: usize,
        n_classes: Option<usize>,
    ) -> Result<(), ModelLoadError> {
        if self.n_features != n_features {
            return Err(ModelLoadError::invalid(
                name,
                format!(
                    "expects {} features, schema has {n_features}",
                    self.n_features
                ),
            ));
        }
        if self.trees.is_empty() {
            return Err(ModelLoadError::invalid(name, "no trees"));
        }
        match (self.n_classes, n_classes) {
            (None, None) => {}
            (Some(got), Some(want)) if got == want => {
                if let Some(t) = self.trees.iter().find(|t| t.class >= want) {
                    return Err(ModelLoadError::invalid(
                        name,
                        format!("tree votes for class {} of {want}", t.class),
                    ));
                }
            }
            (got, want) => {
                return Err(ModelLoadError::invalid(
                    name,
                    format!("expected {want:?} classes, artifact declares {got:?}"),
                ));
            }
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(n_features)
                .map_err(|detail| ModelLoadError::invalid(name, format!("tree {i}: {detail}")))?;
        }
        Ok(())
    }

    fn margins(&self, features: &[f64], n_outputs: usize) -> Vec<f64> {
        let mut sums = vec![0.0; n_outputs];
        let mut counts = vec![0usize; n_outputs];
        for tree in &self.trees {
            let slot = if n_outputs == 1 { 0 } else { tree.class };
            sums[slot] += tree.evaluate(features);
            counts[slot] += 1;
        }
        sums.iter()
            .zip(&counts)
            .map(|(sum, n)| match self.aggregation {
                Aggregation::Sum => self.base_score + sum,
                Aggregation::Mean if *n > 0 => self.base_score + sum / *n as f64,
                Aggregation::Mean => self.base_score,
            })
            .collect()
    }
}

impl Regressor for TreeEnsemble {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict(&self, features: &[f64]) -> Result<f64, InferenceError> {
        check_arity(self.n_features, features)?;
        Ok(self.margins(features, 1)[0])
    }
}

impl Classifier for TreeEnsemble {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn n_classes(&self) -> usize {
        self.n_classes.unwrap_or(1)
    }

    fn predict_class(&self, features: &[f64]) -> Result<usize, InferenceError> {
        check_arity(self.n_features, features)?;
        Ok(argmax(&self.margins(features, Classifier::n_classes(self))))
    }
}
