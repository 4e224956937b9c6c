//! Extraction driver: rules first, the language model only when the rule
//! result is not confident enough.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

use billscope_core::{
    ExtractionConfig, ExtractionMethod, LlmConfig, PipelineConfig, PolicyField, PolicyParameters,
    normalize_institution_type,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ExternalServiceError, ExtractionError};
use crate::llm::{AnthropicClient, LlmClient, LlmParameters};
use crate::normalize::{normalize, sample};
use crate::rules;

/// How the final parameters were reached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "params", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    /// Rule confidence met the threshold.
    RuleOnly(PolicyParameters),
    /// The language model filled at least one field the rules left empty.
    RuleThenLlm(PolicyParameters),
    /// Below threshold and the fallback was unavailable, failed, or added nothing.
    RuleOnlyLowConfidence(PolicyParameters),
}

impl ExtractionOutcome {
    pub fn params(&self) -> &PolicyParameters {
        match self {
            Self::RuleOnly(p) | Self::RuleThenLlm(p) | Self::RuleOnlyLowConfidence(p) => p,
        }
    }

    pub fn into_params(self) -> PolicyParameters {
        match self {
            Self::RuleOnly(p) | Self::RuleThenLlm(p) | Self::RuleOnlyLowConfidence(p) => p,
        }
    }
}

/// Non-fatal conditions attached to an extraction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionWarning {
    LowConfidence { confidence: f64, threshold: f64 },
    ContradictoryValues { field: PolicyField },
    FallbackUnavailable { reason: String },
    ExternalService { service: String, error: String },
}

impl fmt::Display for ExtractionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowConfidence {
                confidence,
                threshold,
            } => write!(f, "low confidence {confidence:.2} (threshold {threshold:.2})"),
            Self::ContradictoryValues { field } => {
                write!(f, "conflicting values found for {field}")
            }
            Self::FallbackUnavailable { reason } => {
                write!(f, "language-model fallback unavailable: {reason}")
            }
            Self::ExternalService { service, error } => write!(f, "{service} call failed: {error}"),
        }
    }
}

/// Audit record of one external extraction call (including its retry).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalCallRecord {
    pub service: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub attempts: u32,
    pub latency_ms: u64,
    pub succeeded: bool,
    pub error: Option<String>,
    /// Fields the reply filled in.
    pub filled: Vec<PolicyField>,
}

/// Result of one extraction run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    pub outcome: ExtractionOutcome,
    pub warnings: Vec<ExtractionWarning>,
    pub external_calls: Vec<ExternalCallRecord>,
}

impl Extraction {
    pub fn params(&self) -> &PolicyParameters {
        self.outcome.params()
    }

    pub fn into_params(self) -> PolicyParameters {
        self.outcome.into_params()
    }

    /// Final confidence fell below the threshold, with or without a fallback merge.
    pub fn is_low_confidence(&self) -> bool {
        matches!(self.outcome, ExtractionOutcome::RuleOnlyLowConfidence(_))
            || self
                .warnings
                .iter()
                .any(|w| matches!(w, ExtractionWarning::LowConfidence { .. }))
    }
}

/// Rule parameters combined with a language-model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    pub params: PolicyParameters,
    /// Numeric fields taken from the reply.
    pub filled: Vec<PolicyField>,
    /// Whether the reply supplied the institution types.
    pub types_filled: bool,
}

impl Merged {
    pub fn contributed(&self) -> bool {
        !self.filled.is_empty() || self.types_filled
    }
}

/// Fill fields the rule engine left null with values from the reply.
///
/// Rule values always win. When the reply filled a numeric field the
/// confidence rises to at least `llm_confidence`.
pub fn merge_llm(rule: &PolicyParameters, reply: &LlmParameters, llm_confidence: f64) -> Merged {
    let mut params = rule.clone();

    let mut filled = Vec::new();
    for field in PolicyField::ALL {
        if params.field(field).is_some() {
            continue;
        }
        if let Some(value) = reply_field(reply, field).filter(|v| v.is_finite()) {
            params.set_field(field, Some(value));
            filled.push(field);
        }
    }

    let mut types_filled = false;
    if params.affected_institution_types.is_empty() {
        let types: BTreeSet<String> = reply
            .affected_types
            .iter()
            .flatten()
            .map(|t| normalize_institution_type(t))
            .filter(|t| !t.is_empty())
            .collect();
        types_filled = !types.is_empty();
        params.affected_institution_types = types;
    }

    if !filled.is_empty() || types_filled {
        params.extraction_method = if rule.numeric_field_count() == 0 {
            ExtractionMethod::Llm
        } else {
            ExtractionMethod::RuleLlm
        };
    }
    if !filled.is_empty() {
        params = params.with_confidence(rule.confidence.max(llm_confidence));
    }

    Merged {
        params,
        filled,
        types_filled,
    }
}

fn reply_field(reply: &LlmParameters, field: PolicyField) -> Option<f64> {
    match field {
        PolicyField::FundingChangePct => reply.funding_change_pct,
        PolicyField::MinWageChange => reply.min_wage_change,
        PolicyField::ChildcareSubsidy => reply.childcare_subsidy,
        PolicyField::TuitionCapPct => reply.tuition_cap_pct,
    }
}

enum Fallback {
    Disabled,
    Unavailable(String),
    Client {
        client: Box<dyn LlmClient>,
        config: LlmConfig,
    },
}

/// Parameter extractor with an optional language-model fallback.
pub struct Extractor {
    config: ExtractionConfig,
    fallback: Fallback,
}

impl Extractor {
    /// Rule-only extractor.
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            config,
            fallback: Fallback::Disabled,
        }
    }

    /// Build from pipeline config, wiring the Anthropic client when `llm` is set.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let extractor = Self::new(config.extraction.clone());
        match &config.llm {
            Some(llm) => extractor.with_llm_config(llm.clone()),
            None => extractor,
        }
    }

    /// Use the Anthropic client described by `config` as fallback.
    ///
    /// A client that cannot be built (e.g. no API key) leaves the fallback
    /// unavailable; extraction still runs and reports why.
    pub fn with_llm_config(self, config: LlmConfig) -> Self {
        match AnthropicClient::new(&config) {
            Ok(client) => self.with_client(Box::new(client), config),
            Err(e) => {
                warn!(error = %e, "language-model fallback unavailable");
                Self {
                    fallback: Fallback::Unavailable(e.to_string()),
                    ..self
                }
            }
        }
    }

    /// Use any [`LlmClient`] as fallback. `config` supplies timeout,
    /// attempt limit and the confidence assigned to model values.
    pub fn with_client(self, client: Box<dyn LlmClient>, config: LlmConfig) -> Self {
        Self {
            fallback: Fallback::Client { client, config },
            ..self
        }
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.config.confidence_threshold
    }

    /// Rule-only extraction. Never fails: empty text gives zero confidence.
    pub fn extract(&self, raw_text: &str) -> PolicyParameters {
        let normalized = normalize(raw_text);
        let mut params = rules::extract(&normalized);
        params.text_sample = sample(&normalized, self.config.text_sample_chars);
        params
    }

    /// Full extraction: rules, then the fallback if confidence is below threshold.
    pub async fn run(&self, raw_text: &str) -> Result<Extraction, ExtractionError> {
        let normalized = normalize(raw_text);
        if normalized.is_empty() {
            return Err(ExtractionError::NoText);
        }

        let evidence = rules::scan(&normalized);
        let mut params = evidence.to_parameters();
        params.text_sample = sample(&normalized, self.config.text_sample_chars);

        let mut warnings: Vec<ExtractionWarning> = evidence
            .contradictory_fields()
            .into_iter()
            .map(|field| ExtractionWarning::ContradictoryValues { field })
            .collect();
        for w in &warnings {
            warn!(warning = %w, "rule extraction");
        }

        let threshold = self.config.confidence_threshold;
        info!(
            chars = normalized.len(),
            confidence = params.confidence,
            numeric_fields = params.numeric_field_count(),
            types = params.affected_institution_types.len(),
            "rule extraction complete"
        );
        if params.confidence >= threshold {
            return Ok(Extraction {
                outcome: ExtractionOutcome::RuleOnly(params),
                warnings,
                external_calls: Vec::new(),
            });
        }

        let mut external_calls = Vec::new();
        match &self.fallback {
            Fallback::Client { client, config } => {
                let (mut record, result) = call_with_retry(client.as_ref(), &normalized, config).await;
                match result {
                    Ok(reply) => {
                        let merged = merge_llm(&params, &reply, config.confidence);
                        record.filled = merged.filled.clone();
                        external_calls.push(record);
                        if merged.contributed() {
                            info!(
                                method = %merged.params.extraction_method,
                                filled = merged.filled.len(),
                                confidence = merged.params.confidence,
                                "language-model fallback merged"
                            );
                            if merged.params.confidence < threshold {
                                warn!(
                                    confidence = merged.params.confidence,
                                    threshold, "merged result still below confidence threshold"
                                );
                                warnings.push(ExtractionWarning::LowConfidence {
                                    confidence: merged.params.confidence,
                                    threshold,
                                });
                            }
                            return Ok(Extraction {
                                outcome: ExtractionOutcome::RuleThenLlm(merged.params),
                                warnings,
                                external_calls,
                            });
                        }
                        warn!("language-model reply added no fields");
                    }
                    Err(e) => {
                        warnings.push(ExtractionWarning::ExternalService {
                            service: record.service.clone(),
                            error: e.to_string(),
                        });
                        external_calls.push(record);
                    }
                }
            }
            Fallback::Unavailable(reason) => {
                warnings.push(ExtractionWarning::FallbackUnavailable {
                    reason: reason.clone(),
                });
            }
            Fallback::Disabled => {}
        }

        warn!(
            confidence = params.confidence,
            threshold, "proceeding with low-confidence rule result"
        );
        warnings.push(ExtractionWarning::LowConfidence {
            confidence: params.confidence,
            threshold,
        });
        Ok(Extraction {
            outcome: ExtractionOutcome::RuleOnlyLowConfidence(params),
            warnings,
            external_calls,
        })
    }
}

/// Call the service, retrying once on a transient failure.
async fn call_with_retry(
    client: &dyn LlmClient,
    text: &str,
    config: &LlmConfig,
) -> (ExternalCallRecord, Result<LlmParameters, ExternalServiceError>) {
    let started_at = Utc::now();
    let clock = Instant::now();
    let limit = Duration::from_secs(config.timeout_secs);
    let max_attempts = config.max_attempts.clamp(1, 2);

    let mut attempts = 0;
    let result = loop {
        attempts += 1;
        let result = match tokio::time::timeout(limit, client.extract(text)).await {
            Ok(r) => r,
            Err(_) => Err(ExternalServiceError::Timeout {
                secs: config.timeout_secs,
            }),
        };
        match result {
            Err(e) if e.is_transient() && attempts < max_attempts => {
                warn!(attempt = attempts, error = %e, "transient language-model failure, retrying");
            }
            other => break other,
        }
    };

    let latency_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
    match &result {
        Ok(_) => info!(
            service = client.service(),
            model = client.model(),
            attempts,
            latency_ms,
            "language-model extraction call succeeded"
        ),
        Err(e) => warn!(
            service = client.service(),
            model = client.model(),
            attempts,
            latency_ms,
            error = %e,
            "language-model extraction call failed"
        ),
    }

    let record = ExternalCallRecord {
        service: client.service().to_string(),
        model: client.model().to_string(),
        started_at,
        attempts,
        latency_ms,
        succeeded: result.is_ok(),
        error: result.as_ref().err().map(ToString::to_string),
        filled: Vec::new(),
    };
    (record, result)
}

/// Rule-only extraction with default settings.
pub fn extract(text: &str) -> PolicyParameters {
    Extractor::new(ExtractionConfig::default()).extract(text)
}

/// Extract parameters from raw bill text.
///
/// With `llm_config`, the Anthropic fallback is attempted when rule
/// confidence falls below the default threshold. Fails only when the text
/// is empty after normalization.
pub async fn extract_parameters(
    raw_text: &str,
    llm_config: Option<LlmConfig>,
) -> Result<Extraction, ExtractionError> {
    let extractor = Extractor::new(ExtractionConfig::default());
    let extractor = match llm_config {
        Some(config) => extractor.with_llm_config(config),
        None => extractor,
    };
    extractor.run(raw_text).await
}
