//! The four-model bundle and the ensemble runner.
//!
//! A bundle directory holds `manifest.json` plus one artifact per model:
//!
//! ```text
//! models/
//!   manifest.json          version, features, encoders, scaler, flags, equity_labels
//!   tuition_model.json     regressor (or tuition_model.onnx)
//!   enrollment_model.json  regressor
//!   grad_rate_model.json   regressor
//!   equity_model.json      classifier
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use billscope_core::{EquityRiskClass, FeatureSchemaError, RawPrediction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ImpactError, InferenceError, ModelLoadError};
use crate::features::{FeatureSchema, FeatureVector};
use crate::models::{Artifact, Classifier, Regressor};
use crate::preprocessing::{Categorical, FlagThresholds, LabelEncoder, Preprocessing, StandardScaler};

const MANIFEST: &str = "manifest.json";

/// Which of the four models an artifact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSlot {
    Tuition,
    Enrollment,
    GradRate,
    Equity,
}

impl ModelSlot {
    pub const ALL: [ModelSlot; 4] = [Self::Tuition, Self::Enrollment, Self::GradRate, Self::Equity];

    pub fn stem(&self) -> &'static str {
        match self {
            Self::Tuition => "tuition_model",
            Self::Enrollment => "enrollment_model",
            Self::GradRate => "grad_rate_model",
            Self::Equity => "equity_model",
        }
    }
}

/// Bundle metadata persisted at training time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    /// Ordered feature names.
    pub features: Vec<String>,
    /// Categorical column → sorted class list.
    #[serde(default)]
    pub encoders: BTreeMap<String, Vec<String>>,
    /// Absent means the models were trained on unscaled features.
    #[serde(default)]
    pub scaler: Option<StandardScaler>,
    #[serde(default)]
    pub flags: FlagThresholds,
    /// Classifier output index → risk label.
    pub equity_labels: Vec<String>,
}

impl Manifest {
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

    /// Parse feature names and preprocessing into a schema.
    pub fn schema(&self) -> Result<FeatureSchema, ModelLoadError> {
        let mut encoders = BTreeMap::new();
        for (column, classes) in &self.encoders {
            let cat = Categorical::from_name(column).ok_or_else(|| {
                ModelLoadError::invalid(MANIFEST, format!("encoder for unknown column '{column}'"))
            })?;
            encoders.insert(cat, LabelEncoder::new(classes.clone())?);
        }
        let scaler = self
            .scaler
            .clone()
            .unwrap_or_else(|| StandardScaler::identity(self.features.len()));
        FeatureSchema::new(
            self.features.clone(),
            Preprocessing {
                encoders,
                scaler,
                flags: self.flags.clone(),
            },
        )
    }

    pub fn labels(&self) -> Result<Vec<EquityRiskClass>, ModelLoadError> {
        if self.equity_labels.is_empty() {
            return Err(ModelLoadError::invalid(MANIFEST, "no equity labels"));
        }
        self.equity_labels
            .iter()
            .map(|l| {
                l.parse::<EquityRiskClass>()
                    .map_err(|e| ModelLoadError::invalid(MANIFEST, format!("{e}")))
            })
            .collect()
    }
}

/// Four trained models plus the schema they share. Read-only after load.
pub struct ModelBundle {
    version: String,
    schema: FeatureSchema,
    tuition: Box<dyn Regressor>,
    enrollment: Box<dyn Regressor>,
    grad_rate: Box<dyn Regressor>,
    equity: Box<dyn Classifier>,
    equity_labels: Vec<EquityRiskClass>,
}

impl std::fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBundle")
            .field("version", &self.version)
            .field("features", &self.schema.len())
            .field("equity_labels", &self.equity_labels)
            .finish_non_exhaustive()
    }
}

impl ModelBundle {
    /// Load `manifest.json` and the four model artifacts from `dir`.
    pub fn load(dir: &Path) -> Result<Self, ModelLoadError> {
        let manifest_path = dir.join(MANIFEST);
        if !manifest_path.exists() {
            return Err(ModelLoadError::Missing {
                artifact: MANIFEST.into(),
                dir: dir.to_path_buf(),
            });
        }
        let manifest = Manifest::from_file(&manifest_path)?;
        let n_features = manifest.features.len();
        let n_classes = manifest.equity_labels.len();

        let tuition = load_regressor(dir, ModelSlot::Tuition, n_features)?;
        let enrollment = load_regressor(dir, ModelSlot::Enrollment, n_features)?;
        let grad_rate = load_regressor(dir, ModelSlot::GradRate, n_features)?;
        let equity = load_classifier(dir, n_features, n_classes)?;

        let bundle = Self::from_parts(manifest, tuition, enrollment, grad_rate, equity)?;
        info!(
            dir = %dir.display(),
            version = %bundle.version,
            features = bundle.schema.len(),
            "loaded model bundle"
        );
        Ok(bundle)
    }

    /// Assemble a bundle from already-loaded models.
    pub fn from_parts(
        manifest: Manifest,
        tuition: Box<dyn Regressor>,
        enrollment: Box<dyn Regressor>,
        grad_rate: Box<dyn Regressor>,
        equity: Box<dyn Classifier>,
    ) -> Result<Self, ModelLoadError> {
        let schema = manifest.schema()?;
        let equity_labels = manifest.labels()?;

        let regressors = [
            (ModelSlot::Tuition, &tuition),
            (ModelSlot::Enrollment, &enrollment),
            (ModelSlot::GradRate, &grad_rate),
        ];
        for (slot, model) in regressors {
            if model.n_features() != schema.len() {
                return Err(ModelLoadError::invalid(
                    slot.stem(),
                    format!("expects {} features, schema has {}", model.n_features(), schema.len()),
                ));
            }
        }
        if equity.n_features() != schema.len() {
            return Err(ModelLoadError::invalid(
                ModelSlot::Equity.stem(),
                format!("expects {} features, schema has {}", equity.n_features(), schema.len()),
            ));
        }
        if equity.n_classes() != equity_labels.len() {
            return Err(ModelLoadError::invalid(
                ModelSlot::Equity.stem(),
                format!(
                    "{} classes but {} equity labels",
                    equity.n_classes(),
                    equity_labels.len()
                ),
            ));
        }

        Ok(Self {
            version: manifest.version,
            schema,
            tuition,
            enrollment,
            grad_rate,
            equity,
            equity_labels,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Run all four models on one feature vector.
    ///
    /// A vector whose names differ from the schema is a hard
    /// [`ImpactError::SchemaMismatch`]; a failing model is
    /// [`ImpactError::Inference`], scoped to the institution.
    pub fn run(&self, vector: &FeatureVector) -> Result<RawPrediction, ImpactError> {
        vector.check(&self.schema).map_err(ImpactError::SchemaMismatch)?;
        let x = vector.values();
        let inference = |source: InferenceError| ImpactError::Inference {
            institution_id: vector.institution_id().to_string(),
            source,
        };

        let tuition = finite("tuition", self.tuition.predict(x)).map_err(inference)?;
        let enrollment = finite("enrollment", self.enrollment.predict(x)).map_err(inference)?;
        let grad_rate = finite("grad_rate", self.grad_rate.predict(x)).map_err(inference)?;
        let index = self.equity.predict_class(x).map_err(inference)?;
        let equity_class = *self
            .equity_labels
            .get(index)
            .ok_or(InferenceError::UnknownClass { index })
            .map_err(inference)?;

        debug!(
            institution = vector.institution_id(),
            tuition, enrollment, grad_rate, equity = %equity_class,
            "ensemble prediction"
        );
        Ok(RawPrediction {
            institution_id: vector.institution_id().to_string(),
            tuition_change_pct: tuition,
            enrollment_change_pct: enrollment,
            grad_rate_change: grad_rate,
            equity_class,
        })
    }
}

/// Contract form of [`ModelBundle::run`].
pub fn run(vector: &FeatureVector, models: &ModelBundle) -> Result<RawPrediction, ImpactError> {
    models.run(vector)
}

fn finite(
    model: &'static str,
    value: Result<f64, InferenceError>,
) -> Result<f64, InferenceError> {
    match value {
        Ok(v) if v.is_finite() => Ok(v),
        Ok(_) => Err(InferenceError::NonFinite { model }),
        Err(e) => Err(e),
    }
}

// ── Artifact discovery ──

enum ArtifactFile {
    Json(std::path::PathBuf),
    Onnx(std::path::PathBuf),
}

fn locate(dir: &Path, slot: ModelSlot) -> Result<ArtifactFile, ModelLoadError> {
    let json = dir.join(format!("{}.json", slot.stem()));
    if json.exists() {
        return Ok(ArtifactFile::Json(json));
    }
    let onnx = dir.join(format!("{}.onnx", slot.stem()));
    if onnx.exists() {
        return Ok(ArtifactFile::Onnx(onnx));
    }
    Err(ModelLoadError::Missing {
        artifact: slot.stem().to_string(),
        dir: dir.to_path_buf(),
    })
}

fn load_regressor(
    dir: &Path,
    slot: ModelSlot,
    n_features: usize,
) -> Result<Box<dyn Regressor>, ModelLoadError> {
    match locate(dir, slot)? {
        ArtifactFile::Json(path) => Artifact::from_file(&path)?.into_regressor(slot.stem(), n_features),
        ArtifactFile::Onnx(path) => load_onnx(&path, n_features, 1).map(|m| m as Box<dyn Regressor>),
    }
}

fn load_classifier(
    dir: &Path,
    n_features: usize,
    n_classes: usize,
) -> Result<Box<dyn Classifier>, ModelLoadError> {
    let slot = ModelSlot::Equity;
    match locate(dir, slot)? {
        ArtifactFile::Json(path) => {
            Artifact::from_file(&path)?.into_classifier(slot.stem(), n_features, n_classes)
        }
        ArtifactFile::Onnx(path) => {
            load_onnx(&path, n_features, n_classes).map(|m| m as Box<dyn Classifier>)
        }
    }
}

#[cfg(feature = "onnx")]
fn load_onnx(
    path: &Path,
    n_features: usize,
    n_classes: usize,
) -> Result<Box<crate::onnx::OnnxModel>, ModelLoadError> {
    crate::onnx::OnnxModel::load(path, n_features, n_classes).map(Box::new)
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(
    path: &Path,
    _n_features: usize,
    _n_classes: usize,
) -> Result<Box<NoOnnx>, ModelLoadError> {
    Err(ModelLoadError::Onnx {
        artifact: path.display().to_string(),
        detail: "built without the `onnx` feature".into(),
    })
}

/// Placeholder model type when ONNX support is compiled out; never constructed.
#[cfg(not(feature = "onnx"))]
enum NoOnnx {}

#[cfg(not(feature = "onnx"))]
impl Regressor for NoOnnx {
    fn n_features(&self) -> usize {
        match *self {}
    }
    fn predict(&self, _: &[f64]) -> Result<f64, InferenceError> {
        match *self {}
    }
}

#[cfg(not(feature = "onnx"))]
impl Classifier for NoOnnx {
    fn n_features(&self) -> usize {
        match *self {}
    }
    fn n_classes(&self) -> usize {
        match *self {}
    }
    fn predict_class(&self, _: &[f64]) -> Result<usize, InferenceError> {
        match *self {}
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use billscope_core::{InstitutionRecord, PolicyParameters};

    use super::*;
    use crate::models::LinearModel;

    fn fixture_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures")
            .join("models")
    }

    fn copy_fixtures() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for entry in std::fs::read_dir(fixture_dir()).unwrap() {
            let entry = entry.unwrap();
            std::fs::copy(entry.path(), dir.path().join(entry.file_name())).unwrap();
        }
        dir
    }

    fn college(pct_low_income: f64) -> InstitutionRecord {
        InstitutionRecord::new("1", "CA", "public")
            .with_column("enrollment", 10_000.0)
            .with_column("net_price", 8_000.0)
            .with_column("grad_rate", 60.0)
            .with_column("pct_low_income", pct_low_income)
            .with_column("pct_minority", 40.0)
    }

    #[test]
    fn loads_fixture_bundle() {
        let bundle = ModelBundle::load(&fixture_dir()).unwrap();
        assert_eq!(bundle.schema().len(), 18);
        assert_eq!(bundle.schema().names()[0], "funding_change_pct");
        assert!(!bundle.version().is_empty());
    }

    #[test]
    fn runs_all_four_models() {
        let bundle = ModelBundle::load(&fixture_dir()).unwrap();
        let params = PolicyParameters {
            funding_change_pct: Some(-10.0),
            ..PolicyParameters::empty()
        };
        let vector = bundle.schema().build(&params, &college(80.0)).unwrap();
        let raw = run(&vector, &bundle).unwrap();
        assert!((raw.tuition_change_pct - 6.0).abs() < 1e-9);
        assert!((raw.enrollment_change_pct + 3.0).abs() < 1e-9);
        assert!((raw.grad_rate_change + 1.5).abs() < 1e-9);
        assert_eq!(raw.equity_class, EquityRiskClass::High);

        let low = bundle.schema().build(&params, &college(20.0)).unwrap();
        assert_eq!(bundle.run(&low).unwrap().equity_class, EquityRiskClass::Low);
        let medium = bundle.schema().build(&params, &college(45.0)).unwrap();
        assert_eq!(bundle.run(&medium).unwrap().equity_class, EquityRiskClass::Medium);
    }

    #[test]
    fn inference_is_order_independent() {
        let bundle = ModelBundle::load(&fixture_dir()).unwrap();
        let params = PolicyParameters::empty();
        let a = bundle.schema().build(&params, &college(80.0)).unwrap();
        let b = bundle.schema().build(&params, &college(20.0)).unwrap();
        let first = bundle.run(&a).unwrap();
        let _ = bundle.run(&b).unwrap();
        assert_eq!(bundle.run(&a).unwrap(), first);
    }

    #[test]
    fn mismatched_vector_is_a_hard_error() {
        let bundle = ModelBundle::load(&fixture_dir()).unwrap();
        let mut names = bundle.schema().names().to_vec();
        names.swap(0, 1);
        let vector = FeatureVector::new("1", names, vec![0.0; 18]).unwrap();
        let err = bundle.run(&vector).unwrap_err();
        assert!(matches!(
            err,
            ImpactError::SchemaMismatch(FeatureSchemaError::Mismatch { .. })
        ));
    }

    #[test]
    fn missing_artifact_fails_load() {
        let dir = copy_fixtures();
        std::fs::remove_file(dir.path().join("grad_rate_model.json")).unwrap();
        let err = ModelBundle::load(dir.path()).unwrap_err();
        match err {
            ModelLoadError::Missing { artifact, .. } => assert_eq!(artifact, "grad_rate_model"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_manifest_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelBundle::load(dir.path()).unwrap_err();
        assert!(matches!(err, ModelLoadError::Missing { .. }));
    }

    #[test]
    fn corrupt_artifact_fails_load() {
        let dir = copy_fixtures();
        std::fs::write(dir.path().join("tuition_model.json"), "{not json").unwrap();
        let err = ModelBundle::load(dir.path()).unwrap_err();
        assert!(matches!(err, ModelLoadError::Parse { .. }));
    }

    #[test]
    fn unknown_equity_label_fails_load() {
        let dir = copy_fixtures();
        let path = dir.path().join(MANIFEST);
        let mut manifest = Manifest::from_file(&path).unwrap();
        manifest.equity_labels[2] = "Severe".into();
        std::fs::write(&path, serde_json::to_string(&manifest).unwrap()).unwrap();
        let err = ModelBundle::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Severe"), "{err}");
    }

    #[test]
    fn feature_count_mismatch_fails_load() {
        let dir = copy_fixtures();
        let path = dir.path().join(MANIFEST);
        let mut manifest = Manifest::from_file(&path).unwrap();
        manifest.features.pop();
        std::fs::write(&path, serde_json::to_string(&manifest).unwrap()).unwrap();
        let err = ModelBundle::load(dir.path()).unwrap_err();
        assert!(matches!(err, ModelLoadError::Invalid { .. }), "{err}");
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn onnx_artifact_needs_the_feature() {
        let dir = copy_fixtures();
        std::fs::remove_file(dir.path().join("tuition_model.json")).unwrap();
        std::fs::write(dir.path().join("tuition_model.onnx"), b"onnx").unwrap();
        let err = ModelBundle::load(dir.path()).unwrap_err();
        assert!(matches!(err, ModelLoadError::Onnx { .. }));
    }

    #[test]
    fn from_parts_checks_class_count() {
        let manifest = Manifest {
            version: "test".into(),
            features: vec!["funding_change_pct".into()],
            encoders: BTreeMap::new(),
            scaler: None,
            flags: FlagThresholds::default(),
            equity_labels: vec!["Low".into(), "High".into()],
        };
        let reg = || -> Box<dyn Regressor> {
            Box::new(LinearModel {
                intercept: vec![0.0],
                coefficients: vec![vec![1.0]],
            })
        };
        let three_way: Box<dyn Classifier> = Box::new(LinearModel {
            intercept: vec![0.0; 3],
            coefficients: vec![vec![1.0]; 3],
        });
        let err = ModelBundle::from_parts(manifest.clone(), reg(), reg(), reg(), three_way)
            .unwrap_err();
        assert!(err.to_string().contains("equity labels"), "{err}");

        let two_way: Box<dyn Classifier> = Box::new(LinearModel {
            intercept: vec![0.0, 0.5],
            coefficients: vec![vec![1.0], vec![-1.0]],
        });
        let bundle = ModelBundle::from_parts(manifest, reg(), reg(), reg(), two_way).unwrap();
        let params = PolicyParameters {
            funding_change_pct: Some(-2.0),
            ..PolicyParameters::empty()
        };
        let vector = bundle.schema().build(&params, &college(10.0)).unwrap();
        let raw = bundle.run(&vector).unwrap();
        assert_eq!(raw.tuition_change_pct, -2.0);
        assert_eq!(raw.equity_class, EquityRiskClass::High);
    }
}
