//! Model catalog: records trained estimators with their metrics and hands
//! back the best one
//!
//! The catalog is an explicitly constructed client passed by reference to the
//! trainer and predictor. [`RetryingCatalog`] adds bounded retries around any
//! implementation.

use crate::config::RetryPolicy;
use crate::error::{ForecastError, Result};
use crate::models::{FittedRegressor, ModelArtifact};
use crate::utils::write_atomically;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;

/// Identifier the catalog assigns to a recorded run
pub type RunId = String;

/// Opaque reference to a stored model artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef(pub String);

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A trained estimator about to be recorded
#[derive(Debug, Clone)]
pub struct NewRun {
    pub run_name: String,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub artifact: ModelArtifact,
}

/// A recorded run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub run_id: RunId,
    pub run_name: String,
    pub params: BTreeMap<String, String>,
    pub feature_subset: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
    pub artifact: ArtifactRef,
    pub recorded_at: DateTime<Utc>,
}

impl ModelRecord {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// Model registry consumed by training and prediction
pub trait Catalog {
    /// Store a trained estimator with its parameters and metrics
    fn record(&self, run: &NewRun) -> Result<RunId>;

    /// Every recorded run in recording order
    fn runs(&self) -> Result<Vec<ModelRecord>>;

    /// Rehydrate a stored estimator
    fn load(&self, artifact: &ArtifactRef) -> Result<Box<dyn FittedRegressor>>;

    /// Run with the lowest (or highest) value of `metric`
    fn best(&self, metric: &str, ascending: bool) -> Result<(RunId, ArtifactRef)> {
        let runs = self.runs()?;
        let record = select_best(&runs, metric, ascending)?;
        Ok((record.run_id.clone(), record.artifact.clone()))
    }
}

/// Pick the record with the best finite value of `metric`
pub fn select_best<'a>(
    records: &'a [ModelRecord],
    metric: &str,
    ascending: bool,
) -> Result<&'a ModelRecord> {
    records
        .iter()
        .filter_map(|record| {
            record
                .metric(metric)
                .filter(|value| value.is_finite())
                .map(|value| (record, value))
        })
        .min_by(|(_, a), (_, b)| {
            if ascending {
                a.total_cmp(b)
            } else {
                b.total_cmp(a)
            }
        })
        .map(|(record, _)| record)
        .ok_or_else(|| {
            ForecastError::CatalogNotFound(format!("No recorded run has metric '{}'", metric))
        })
}

/// Catalog stored in a local directory: `runs.json` plus one JSON artifact per run
#[derive(Debug, Clone)]
pub struct LocalCatalog {
    root: PathBuf,
}

impl LocalCatalog {
    /// Open (and create if needed) a catalog directory
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("artifacts")).map_err(|e| {
            ForecastError::CatalogUnavailable(format!(
                "Cannot open catalog at {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn runs_file(&self) -> PathBuf {
        self.root.join("runs.json")
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        write_atomically(path, |file| {
            file.write_all(json.as_bytes())?;
            Ok(())
        })
        .map_err(unavailable)
    }
}

fn unavailable(err: ForecastError) -> ForecastError {
    match err {
        ForecastError::IoError(e) => ForecastError::CatalogUnavailable(e.to_string()),
        other => other,
    }
}

impl Catalog for LocalCatalog {
    fn record(&self, run: &NewRun) -> Result<RunId> {
        let mut records = self.runs()?;
        let run_id = format!("run-{:04}", records.len() + 1);
        let artifact = ArtifactRef(format!("artifacts/{}.json", run_id));

        self.write_json(&self.root.join(&artifact.0), &run.artifact)?;

        records.push(ModelRecord {
            run_id: run_id.clone(),
            run_name: run.run_name.clone(),
            params: run.params.clone(),
            feature_subset: run.artifact.feature_names().to_vec(),
            metrics: run.metrics.clone(),
            artifact,
            recorded_at: Utc::now(),
        });
        self.write_json(&self.runs_file(), &records)?;

        info!("Recorded run {} ({})", run_id, run.run_name);
        Ok(run_id)
    }

    fn runs(&self) -> Result<Vec<ModelRecord>> {
        match fs::read_to_string(self.runs_file()) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(ForecastError::CatalogUnavailable(format!(
                "Cannot read {}: {}",
                self.runs_file().display(),
                e
            ))),
        }
    }

    fn load(&self, artifact: &ArtifactRef) -> Result<Box<dyn FittedRegressor>> {
        let path = self.root.join(&artifact.0);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ForecastError::CatalogNotFound(format!(
                    "Artifact {} does not exist",
                    artifact
                )))
            }
            Err(e) => {
                return Err(ForecastError::CatalogUnavailable(format!(
                    "Cannot read artifact {}: {}",
                    artifact, e
                )))
            }
        };

        let model: ModelArtifact = serde_json::from_str(&contents)?;
        debug!("Loaded artifact {}", artifact);
        Ok(model.into_estimator())
    }
}

/// Retries transient failures of the wrapped catalog a bounded number of times
#[derive(Debug, Clone)]
pub struct RetryingCatalog<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: Catalog> RetryingCatalog<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn retry<T, F>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut(&C) -> Result<T>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call(&self.inner) {
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    warn!(
                        "Catalog {} failed (attempt {}/{}): {}",
                        operation, attempt, max_attempts, err
                    );
                    thread::sleep(self.policy.backoff());
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    return Err(ForecastError::CatalogUnavailable(format!(
                        "{} failed after {} attempts: {}",
                        operation, attempt, err
                    )));
                }
                other => return other,
            }
        }
    }
}

impl<C: Catalog> Catalog for RetryingCatalog<C> {
    fn record(&self, run: &NewRun) -> Result<RunId> {
        self.retry("record", |catalog| catalog.record(run))
    }

    fn runs(&self) -> Result<Vec<ModelRecord>> {
        self.retry("runs", |catalog| catalog.runs())
    }

    fn load(&self, artifact: &ArtifactRef) -> Result<Box<dyn FittedRegressor>> {
        self.retry("load", |catalog| catalog.load(artifact))
    }

    fn best(&self, metric: &str, ascending: bool) -> Result<(RunId, ArtifactRef)> {
        self.retry("best", |catalog| catalog.best(metric, ascending))
    }
}
