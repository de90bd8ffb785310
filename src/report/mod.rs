use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    AnalysisResult, FileInfo,
    detection::{Diagnostics, ModuleKind, aggregator::Verdict},
    error::Result,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonReport {
    pub file: FileInfo,
    pub verdict: Verdict,
    pub verdict_label: &'static str,
    pub overall_score: f64,
    pub confidence: f64,
    pub agreement: f64,
    pub modules: BTreeMap<ModuleKind, ModuleReportSection>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleReportSection {
    pub score: f64,
    pub weight: f64,
    pub confidence: f64,
    pub diagnostics: Diagnostics,
    pub has_visualization: bool,
}

impl From<&AnalysisResult> for JsonReport {
    fn from(result: &AnalysisResult) -> Self {
        let aggregation = &result.aggregation;
        let modules = result
            .modules
            .iter()
            .map(|(kind, module)| {
                let section = ModuleReportSection {
                    score: module.score,
                    weight: aggregation.weights[kind.index()],
                    confidence: aggregation.module_confidences[kind.index()],
                    diagnostics: module.diagnostics.clone(),
                    has_visualization: !module.visualization.is_empty(),
                };
                (kind, section)
            })
            .collect();

        Self {
            file: result.file.clone(),
            verdict: result.verdict,
            verdict_label: result.verdict.label(),
            overall_score: result.overall_score,
            confidence: result.confidence,
            agreement: aggregation.agreement,
            modules,
        }
    }
}

impl JsonReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
