//! Promotion of registered candidates
//!
//! A candidate replaces the active version only when its score metric beats
//! the incumbent's by at least `min_improvement` and, when a drawdown metric
//! is configured, its drawdown is no worse than the incumbent's. Larger
//! drawdown values are worse.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::errors::RegistryResult;
use super::store::ModelRegistry;
use super::types::ModelVersion;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionPolicy {
    /// Higher-is-better metric compared between candidate and incumbent
    pub metric: String,
    /// Minimum `candidate - incumbent` required to promote
    #[serde(default)]
    pub min_improvement: f64,
    /// Optional lower-is-better drawdown metric the candidate must not worsen
    #[serde(default)]
    pub max_drawdown_metric: Option<String>,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            metric: "sharpe".to_string(),
            min_improvement: 0.0,
            max_drawdown_metric: None,
        }
    }
}

/// Outcome of a promotion evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionDecision {
    pub candidate: String,
    pub incumbent: Option<String>,
    pub promote: bool,
    pub reason: String,
}

impl PromotionPolicy {
    /// Compare `candidate` against the optional active `incumbent`
    pub fn evaluate(&self, candidate: &ModelVersion, incumbent: Option<&ModelVersion>) -> PromotionDecision {
        let decide = |promote: bool, reason: String| PromotionDecision {
            candidate: candidate.version.clone(),
            incumbent: incumbent.map(|v| v.version.clone()),
            promote,
            reason,
        };

        let Some(score) = candidate.metric(&self.metric) else {
            return decide(false, format!("candidate has no '{}' metric", self.metric));
        };
        let Some(incumbent) = incumbent else {
            return decide(true, "no active version".to_string());
        };
        if incumbent.version == candidate.version {
            return decide(false, "candidate is already active".to_string());
        }

        if let Some(current) = incumbent.metric(&self.metric) {
            let improvement = score - current;
            if improvement < self.min_improvement {
                return decide(
                    false,
                    format!(
                        "{} improvement {:.6} below required {:.6}",
                        self.metric, improvement, self.min_improvement
                    ),
                );
            }
        }

        if let Some(dd_metric) = &self.max_drawdown_metric {
            let Some(candidate_dd) = candidate.metric(dd_metric) else {
                return decide(false, format!("candidate has no '{}' metric", dd_metric));
            };
            if let Some(incumbent_dd) = incumbent.metric(dd_metric) {
                if candidate_dd > incumbent_dd {
                    return decide(
                        false,
                        format!(
                            "{} worsens from {:.6} to {:.6}",
                            dd_metric, incumbent_dd, candidate_dd
                        ),
                    );
                }
            }
        }

        decide(true, format!("{} = {:.6} passes policy", self.metric, score))
    }
}

/// Evaluate `version` against the active one and activate it on success
///
/// The active pointer is read without the write lock; a concurrent
/// activation between evaluation and promotion is overwritten.
pub fn promote(
    registry: &ModelRegistry,
    version: &str,
    policy: &PromotionPolicy,
) -> RegistryResult<PromotionDecision> {
    let candidate = registry.metadata(version)?;
    let incumbent = match registry.active_version()? {
        Some(active) => Some(registry.metadata(&active)?),
        None => None,
    };

    let decision = policy.evaluate(&candidate, incumbent.as_ref());
    info!(
        candidate = %decision.candidate,
        incumbent = ?decision.incumbent,
        promote = decision.promote,
        reason = %decision.reason,
        "[PROMOTION] Evaluated"
    );

    if decision.promote {
        registry.activate(version)?;
    }
    Ok(decision)
}
