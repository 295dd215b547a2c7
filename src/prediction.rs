//! Product-propensity prediction oracle.
//!
//! The scoring model is opaque: it receives lead attributes and answers with a score per
//! product code. Two transports are supported, an HTTP scoring service and a local program
//! speaking JSON over stdin/stdout. Failures surface as
//! [`LeadError::PredictionUnavailable`] and are never retried here.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::circuit_breaker::{create_prediction_circuit_breaker, PredictionBreaker};
use crate::config::PredictionMode;
use crate::errors::LeadError;
use crate::models::{ActivityLevel, NewLead};

/// Score per product code.
pub type Scores = HashMap<String, f64>;

#[async_trait]
pub trait PredictionOracle: Send + Sync {
    async fn predict(&self, lead: &NewLead) -> Result<Scores, LeadError>;
}

/// Request body understood by the scoring model.
#[derive(Debug, Serialize)]
pub struct PredictionPayload<'a> {
    pub cif: &'a str,
    pub name: &'a str,
    pub company_name: &'a str,
    pub nomor_rekening: &'a str,
    pub nomor_hp: &'a str,
    pub address: &'a str,
    pub occupation: &'a str,
    pub email: &'a str,
    pub umur: i32,
    pub income: i64,
    pub payroll: bool,
    pub gender: &'a str,
    pub marital_status: bool,
    pub category_segmen: &'a str,
    pub existing_product: &'a [String],
    pub transaction_activity: &'static str,
}

impl<'a> From<&'a NewLead> for PredictionPayload<'a> {
    fn from(lead: &'a NewLead) -> Self {
        Self {
            cif: &lead.cif,
            name: &lead.name,
            company_name: lead.company_name.as_deref().unwrap_or(""),
            nomor_rekening: &lead.account_number,
            nomor_hp: lead.phone.as_deref().unwrap_or(""),
            address: lead.address.as_deref().unwrap_or(""),
            occupation: lead.job.as_deref().unwrap_or(""),
            email: lead.email.as_deref().unwrap_or(""),
            umur: lead.age,
            income: lead.monthly_income,
            payroll: lead.payroll,
            gender: lead.gender.as_deref().unwrap_or(""),
            marital_status: lead.married.unwrap_or(false),
            category_segmen: lead.segment.as_deref().unwrap_or(""),
            existing_product: &lead.existing_products,
            transaction_activity: match lead.transaction_activity {
                Some(ActivityLevel::Inactive) => "Inactive",
                _ => "Active",
            },
        }
    }
}

/// Rejects NaN, infinite and negative scores.
fn checked(scores: Scores) -> Result<Scores, LeadError> {
    if let Some((code, score)) = scores.iter().find(|(_, s)| !s.is_finite() || **s < 0.0) {
        return Err(LeadError::PredictionUnavailable(format!(
            "invalid score {} for product '{}'",
            score, code
        )));
    }
    Ok(scores)
}

/// Orders scores by (score desc, code asc), drops zero scores and keeps the first `limit`.
pub fn rank_scores(scores: &Scores, limit: usize) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = scores
        .iter()
        .filter(|(_, score)| **score > 0.0)
        .map(|(code, score)| (code.trim().to_ascii_lowercase(), *score))
        .collect();

    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let mut seen = HashSet::new();
    ranked.retain(|(code, _)| seen.insert(code.clone()));
    ranked.truncate(limit);
    ranked
}

// ============ HTTP oracle ============

/// Scoring service reached with `POST {base_url}/predict`.
#[derive(Clone)]
pub struct HttpPredictionOracle {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPredictionOracle {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LeadError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                LeadError::PredictionUnavailable(format!("Failed to create scoring client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl PredictionOracle for HttpPredictionOracle {
    async fn predict(&self, lead: &NewLead) -> Result<Scores, LeadError> {
        let url = format!("{}/predict", self.base_url);
        tracing::info!("Requesting prediction for CIF {} from {}", lead.cif, url);

        let response = self
            .client
            .post(&url)
            .json(&PredictionPayload::from(lead))
            .send()
            .await
            .map_err(|e| LeadError::PredictionUnavailable(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LeadError::PredictionUnavailable(format!(
                "scoring service returned {}: {}",
                status, error_text
            )));
        }

        let scores: Scores = response.json().await.map_err(|e| {
            LeadError::PredictionUnavailable(format!("Failed to parse scores: {}", e))
        })?;

        checked(scores)
    }
}

// ============ Subprocess oracle ============

/// Local model program: lead JSON on stdin, `{"code": score}` on stdout.
#[derive(Debug, Clone)]
pub struct CommandPredictionOracle {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandPredictionOracle {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    async fn run(&self, input: Vec<u8>) -> Result<Vec<u8>, String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("cannot start '{}': {}", self.program, e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| "child stdin unavailable".to_string())?;
        stdin
            .write_all(&input)
            .await
            .map_err(|e| format!("cannot write lead to model: {}", e))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("model did not finish: {}", e))?;

        if !output.status.success() {
            return Err(format!(
                "model exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl PredictionOracle for CommandPredictionOracle {
    async fn predict(&self, lead: &NewLead) -> Result<Scores, LeadError> {
        let input = serde_json::to_vec(&PredictionPayload::from(lead))
            .map_err(|e| LeadError::PredictionUnavailable(e.to_string()))?;

        tracing::info!("Running prediction model for CIF {}", lead.cif);

        let stdout = tokio::time::timeout(self.timeout, self.run(input))
            .await
            .map_err(|_| {
                LeadError::PredictionUnavailable(format!(
                    "model timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(LeadError::PredictionUnavailable)?;

        let scores: Scores = serde_json::from_slice(&stdout).map_err(|e| {
            LeadError::PredictionUnavailable(format!("Failed to parse scores: {}", e))
        })?;

        checked(scores)
    }
}

// ============ Circuit breaker ============

/// Wraps an oracle so repeated failures fail fast instead of piling up requests.
pub struct GuardedOracle<O> {
    inner: O,
    breaker: PredictionBreaker,
}

impl<O: PredictionOracle> GuardedOracle<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            breaker: create_prediction_circuit_breaker(),
        }
    }
}

#[async_trait]
impl<O: PredictionOracle> PredictionOracle for GuardedOracle<O> {
    async fn predict(&self, lead: &NewLead) -> Result<Scores, LeadError> {
        use failsafe::futures::CircuitBreaker;

        match self.breaker.call(self.inner.predict(lead)).await {
            Ok(scores) => Ok(scores),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("Prediction circuit open, rejecting CIF {}", lead.cif);
                Err(LeadError::PredictionUnavailable(
                    "scoring temporarily disabled after repeated failures".to_string(),
                ))
            }
        }
    }
}

/// Builds the configured oracle behind a circuit breaker.
pub fn oracle_from_config(
    mode: &PredictionMode,
    timeout: Duration,
) -> Result<Box<dyn PredictionOracle>, LeadError> {
    let oracle: Box<dyn PredictionOracle> = match mode {
        PredictionMode::Http { url } => {
            Box::new(GuardedOracle::new(HttpPredictionOracle::new(url.clone(), timeout)?))
        }
        PredictionMode::Command { program, args } => Box::new(GuardedOracle::new(
            CommandPredictionOracle::new(program.clone(), args.clone(), timeout),
        )),
    };
    Ok(oracle)
}
