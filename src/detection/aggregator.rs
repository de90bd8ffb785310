//! Confidence-weighted combination of the seven module scores into one verdict.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    detection::ModuleKind,
    error::{ForensicsError, Result},
};

/// Base weight per module. Normalized before use, so they need not sum to exactly 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleWeights {
    pub metadata: f64,
    pub ela: f64,
    pub fft: f64,
    pub color: f64,
    pub edge: f64,
    pub noise: f64,
    pub texture: f64,
}

impl Default for ModuleWeights {
    fn default() -> Self {
        Self {
            metadata: 0.10,
            ela: 0.20,
            fft: 0.15,
            color: 0.15,
            edge: 0.15,
            noise: 0.15,
            texture: 0.10,
        }
    }
}

impl ModuleWeights {
    pub fn get(&self, kind: ModuleKind) -> f64 {
        match kind {
            ModuleKind::Metadata => self.metadata,
            ModuleKind::Ela => self.ela,
            ModuleKind::Fft => self.fft,
            ModuleKind::Color => self.color,
            ModuleKind::Edge => self.edge,
            ModuleKind::Noise => self.noise,
            ModuleKind::Texture => self.texture,
        }
    }

    pub fn as_array(&self) -> [f64; ModuleKind::COUNT] {
        ModuleKind::ALL.map(|kind| self.get(kind))
    }

    pub fn validate(&self) -> Result<()> {
        let weights = self.as_array();

        if let Some(kind) = ModuleKind::ALL
            .iter()
            .find(|kind| !(weights[kind.index()].is_finite() && weights[kind.index()] >= 0.0))
        {
            return Err(ForensicsError::InvalidParameter(format!(
                "weight for {kind} must be a non-negative number"
            )));
        }

        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(ForensicsError::InvalidParameter(
                "at least one module weight must be positive".into(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    LikelyReal,
    Suspicious,
    #[serde(rename = "LikelyAI")]
    LikelyAi,
}

impl Verdict {
    pub fn classify(overall_score: f64, confidence: f64, thresholds: &VerdictThresholds) -> Self {
        let verdict = if overall_score > thresholds.likely_ai {
            Verdict::LikelyAi
        } else if overall_score > thresholds.suspicious {
            Verdict::Suspicious
        } else {
            Verdict::LikelyReal
        };

        if verdict == Verdict::LikelyAi && confidence < thresholds.min_ai_confidence {
            Verdict::Suspicious
        } else {
            verdict
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::LikelyReal => "Likely Real",
            Verdict::Suspicious => "Suspicious",
            Verdict::LikelyAi => "Likely AI-Generated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerdictThresholds {
    pub likely_ai: f64,
    pub suspicious: f64,
    /// Below this confidence a `LikelyAi` verdict is downgraded to `Suspicious`.
    pub min_ai_confidence: f64,
}

impl Default for VerdictThresholds {
    fn default() -> Self {
        Self {
            likely_ai: 0.65,
            suspicious: 0.40,
            min_ai_confidence: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub weights: ModuleWeights,
    /// Maximum relative weight increase for a fully confident module.
    pub confidence_boost: f64,
    /// A module "agrees" when its score is within this distance of the overall score.
    pub agreement_tolerance: f64,
    /// Share of agreement in the final confidence; the rest is mean module confidence.
    pub agreement_weight: f64,
    pub thresholds: VerdictThresholds,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            weights: ModuleWeights::default(),
            confidence_boost: 0.5,
            agreement_tolerance: 0.3,
            agreement_weight: 0.6,
            thresholds: VerdictThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub overall_score: f64,
    pub confidence: f64,
    pub verdict: Verdict,
    /// Final weights in [`ModuleKind::ALL`] order; they sum to 1.
    pub weights: [f64; ModuleKind::COUNT],
    pub module_confidences: [f64; ModuleKind::COUNT],
    pub agreement: f64,
    pub avg_confidence: f64,
}

pub struct Aggregator {
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::with_config(AggregatorConfig::default())
    }

    pub fn with_config(config: AggregatorConfig) -> Self {
        Self { config }
    }

    /// `scores` are in [`ModuleKind::ALL`] order and must each lie in `[0, 1]`.
    pub fn aggregate(&self, scores: &[f64; ModuleKind::COUNT]) -> Result<Aggregation> {
        self.config.weights.validate()?;

        if let Some(kind) = ModuleKind::ALL
            .iter()
            .find(|kind| !(0.0..=1.0).contains(&scores[kind.index()]))
        {
            return Err(ForensicsError::AnalysisFailed(format!(
                "{kind} score {} is outside [0, 1]",
                scores[kind.index()]
            )));
        }

        let module_confidences = (*scores).map(|s| (s - 0.5).abs() * 2.0);
        let weights = self.adjusted_weights(&module_confidences);

        let overall_score = scores
            .iter()
            .zip(weights.iter())
            .map(|(s, w)| s * w)
            .sum::<f64>()
            .clamp(0.0, 1.0);

        let agreeing = scores
            .iter()
            .filter(|&&s| (s - overall_score).abs() <= self.config.agreement_tolerance)
            .count();
        let agreement = agreeing as f64 / ModuleKind::COUNT as f64;
        let avg_confidence = module_confidences.iter().sum::<f64>() / ModuleKind::COUNT as f64;

        let confidence = (agreement * self.config.agreement_weight
            + avg_confidence * (1.0 - self.config.agreement_weight))
            .clamp(0.0, 1.0);

        let verdict = Verdict::classify(overall_score, confidence, &self.config.thresholds);

        debug!(
            "aggregated scores {:?} with weights {:?} (agreement {:.2}, avg confidence {:.2})",
            scores, weights, agreement, avg_confidence
        );
        info!(
            "verdict {:?}: overall score {:.3}, confidence {:.3}",
            verdict, overall_score, confidence
        );

        Ok(Aggregation {
            overall_score,
            confidence,
            verdict,
            weights,
            module_confidences,
            agreement,
            avg_confidence,
        })
    }

    fn adjusted_weights(
        &self,
        confidences: &[f64; ModuleKind::COUNT],
    ) -> [f64; ModuleKind::COUNT] {
        let base = normalize(self.config.weights.as_array());

        // All scores at exactly 0.5: nothing to boost
        if confidences.iter().sum::<f64>() == 0.0 {
            return base;
        }

        let mut adjusted = base;
        for (w, c) in adjusted.iter_mut().zip(confidences.iter()) {
            *w *= 1.0 + c * self.config.confidence_boost;
        }

        normalize(adjusted)
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(mut weights: [f64; ModuleKind::COUNT]) -> [f64; ModuleKind::COUNT] {
    let total = weights.iter().sum::<f64>();
    if total > 0.0 {
        for w in weights.iter_mut() {
            *w /= total;
        }
    }
    weights
}
