//! Output bundle of one analysis run.
//!
//! Every map is a `BTreeMap` and every list has a fixed order, so the same
//! input always renders to the same bytes.

use crate::{
    error::AnalysisResult,
    features::DerivedMetrics,
    indicators::{CorpusBaseline, IndicatorVector},
    kpi::KpiReport,
    mining::MiningOutcome,
    normalizer::{DataQualityReport, StocktakeRecord},
    recommendations::Recommendation,
    risk::{RecordRisk, RiskAssessment},
};
use serde::Serialize;

pub const CLEANED_DATASET_FILE: &str = "cleaned_dataset.json";
pub const KPI_REPORT_FILE: &str = "kpi_report.json";
pub const FRAUD_REPORT_FILE: &str = "fraud_report.json";
pub const RECOMMENDATIONS_FILE: &str = "recommendations.json";

/// One valid record with everything derived from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysedRecord {
    pub record: StocktakeRecord,
    pub metrics: DerivedMetrics,
    pub indicators: IndicatorVector,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanedDataset {
    pub quality: DataQualityReport,
    pub baseline: CorpusBaseline,
    pub records: Vec<AnalysedRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FraudReport {
    pub mining: MiningOutcome,
    pub assessment: RiskAssessment,
    /// Highest score first, ties by row index.
    pub high_risk_records: Vec<RecordRisk>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisOutput {
    pub cleaned: CleanedDataset,
    pub kpi: KpiReport,
    pub fraud: FraudReport,
    pub recommendations: Vec<Recommendation>,
}

impl AnalysisOutput {
    /// The whole bundle as one JSON document.
    pub fn to_json_pretty(&self) -> AnalysisResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// One pretty JSON document per report, keyed by file name.
    pub fn report_files(&self) -> AnalysisResult<Vec<(&'static str, String)>> {
        Ok(vec![
            (CLEANED_DATASET_FILE, serde_json::to_string_pretty(&self.cleaned)?),
            (KPI_REPORT_FILE, serde_json::to_string_pretty(&self.kpi)?),
            (FRAUD_REPORT_FILE, serde_json::to_string_pretty(&self.fraud)?),
            (
                RECOMMENDATIONS_FILE,
                serde_json::to_string_pretty(&self.recommendations)?,
            ),
        ])
    }
}
