//! The analysis engine: one batch pass over a stocktake corpus.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Normalizer          raw rows → validated records + quality report
//!   2. Feature Deriver     records → derived metrics
//!   3. Indicator Encoder   records + metrics + history → indicator vectors
//!   4. Pattern Miner       indicator vectors → itemsets and rules
//!   5. Risk Aggregator     vectors + rules → scores and aggregates
//!   6. KPI Reporter        records + metrics → KPI report
//!   7. Recommendations     KPI + risk → action items
//!
//! RULES:
//!   - The configuration is validated once, before any record is read.
//!   - Stages 2 and 3 are per-record pure functions; input order is kept.
//!   - Mining sees the complete corpus; nothing after it runs until it ends.
//!   - A rejected row never aborts the run.

use crate::{
    config::{AnalysisConfig, TransactionGrain},
    error::AnalysisResult,
    features::derive_metrics,
    indicators::{build_store_histories, encode, CorpusBaseline, EncodingContext, IndicatorVector},
    kpi::build_kpi_report,
    mining::{mine_patterns, TransactionSet},
    normalizer::{normalize_batch, DataQualityReport, RawRecord},
    recommendations::build_recommendations,
    report::{AnalysedRecord, AnalysisOutput, CleanedDataset, FraudReport},
    risk::assess,
};

pub struct AnalysisEngine {
    config: AnalysisConfig,
}

impl AnalysisEngine {
    /// Build an engine. Fails on the first out-of-domain configuration value.
    pub fn new(config: AnalysisConfig) -> AnalysisResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run every stage over `raw` in the documented order.
    pub fn run(&self, raw: &[RawRecord]) -> AnalysisOutput {
        let config = &self.config;

        // 1. Normalize
        let batch = normalize_batch(raw, &config.normalization);
        let quality = DataQualityReport::build(&batch, &config.normalization);
        log::info!(
            "normalizer: {} of {} rows valid",
            quality.valid_rows,
            quality.total_rows
        );
        let records = batch.records;

        // 2. Derive
        let metrics: Vec<_> = records
            .iter()
            .map(|r| derive_metrics(r, &config.health))
            .collect();
        log::info!("features: derived metrics for {} records", metrics.len());

        // 3. Encode
        let baseline = CorpusBaseline::build(&records, &config.indicators);
        let histories = build_store_histories(&records, &metrics);
        let vectors: Vec<IndicatorVector> = records
            .iter()
            .zip(&metrics)
            .zip(&histories)
            .map(|((record, m), history)| {
                let context = EncodingContext {
                    history,
                    baseline: &baseline,
                };
                encode(record, m, context, &config.indicators)
            })
            .collect();
        log::info!("indicators: encoded {} records", vectors.len());

        // 4. Mine
        let transactions = match config.mining.transaction_grain {
            TransactionGrain::Record => TransactionSet::from_vectors(&vectors),
            TransactionGrain::StoreMonth => TransactionSet::by_store_month(&records, &vectors),
        };
        log::debug!(
            "mining: {:?} grain, {} transactions",
            config.mining.transaction_grain,
            transactions.len()
        );
        let mining = mine_patterns(&transactions, &config.mining);

        // 5. Score
        let assessment = assess(&records, &vectors, mining.rules(), &config.risk);
        let high_risk_records = assessment.high_risk_records();
        log::info!(
            "risk: {} high-risk records, mean score {:.3}",
            high_risk_records.len(),
            assessment.summary.mean_score
        );

        // 6. KPIs
        let kpi = build_kpi_report(&records, &metrics, &config.reporting);
        log::info!("kpi: {} stores, {} anomalies", kpi.stores.len(), kpi.anomalies.len());

        // 7. Recommendations
        let recommendations = build_recommendations(&kpi, &assessment, &config.reporting);
        log::info!("recommendations: {} items", recommendations.len());

        let analysed = records
            .into_iter()
            .zip(metrics)
            .zip(vectors)
            .map(|((record, metrics), indicators)| AnalysedRecord {
                record,
                metrics,
                indicators,
            })
            .collect();

        AnalysisOutput {
            cleaned: CleanedDataset {
                quality,
                baseline,
                records: analysed,
            },
            kpi,
            fraud: FraudReport {
                mining,
                assessment,
                high_risk_records,
            },
            recommendations,
        }
    }
}
