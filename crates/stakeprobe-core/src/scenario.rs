//! Scenario outcomes and the continuation policy of the runner.

use std::future::Future;
use thiserror::Error;
use tracing::{error, info};

use crate::error::{Mismatch, WorkflowError};

/// Why a scenario did not pass.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// Observed state disagrees with the reference; the run continues
    #[error("assertion failed: {0}")]
    Assertion(#[from] Mismatch),

    /// Setup or infrastructure failure; the run stops
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

impl ScenarioError {
    /// Whether the run must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScenarioError::Workflow(_))
    }
}

/// Outcome of one scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioResult {
    pub name: String,
    pub passed: bool,
    pub error: Option<String>,
}

impl ScenarioResult {
    pub fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: Option<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            error,
        }
    }
}

/// Run one scenario and classify its outcome.
///
/// `Ok(false)` and non-fatal errors become a failed [`ScenarioResult`];
/// fatal errors are returned so the caller can stop the run.
pub async fn run_scenario<F, E>(name: &str, scenario: F) -> Result<ScenarioResult, ScenarioError>
where
    F: Future<Output = Result<bool, E>>,
    E: Into<ScenarioError>,
{
    info!(scenario = name, "running scenario");
    match scenario.await.map_err(Into::into) {
        Ok(true) => {
            info!(scenario = name, "scenario passed");
            Ok(ScenarioResult::passed(name))
        }
        Ok(false) => {
            error!(scenario = name, "scenario failed");
            Ok(ScenarioResult::failed(name, None))
        }
        Err(e) if !e.is_fatal() => {
            error!(scenario = name, error = %e, "scenario failed");
            Ok(ScenarioResult::failed(name, Some(e.to_string())))
        }
        Err(e) => {
            error!(scenario = name, error = %e, "scenario aborted the run");
            Err(e)
        }
    }
}

/// Results collected over a run.
#[derive(Debug, Default, Clone)]
pub struct RunReport {
    results: Vec<ScenarioResult>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: ScenarioResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[ScenarioResult] {
        &self.results
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &ScenarioResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}
