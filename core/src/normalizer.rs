//! Raw stocktake rows → canonical records.
//!
//! Each row either becomes a `StocktakeRecord` or a `ValidationFailure`
//! naming the field and the reason. Failures never abort a batch; they are
//! tallied into the `DataQualityReport`.

use crate::{
    config::{NormalizationConfig, NumberConvention},
    types::{RowIndex, StoreId, YearMonth},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use thiserror::Error;

// ── Input ────────────────────────────────────────────────────────────────────

/// One input row, still as text. Accepts snake_case keys and the column
/// headers of the stocktake export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(alias = "Store")]
    pub store: String,
    #[serde(alias = "Period Start")]
    pub period_start: String,
    #[serde(default, alias = "Period End")]
    pub period_end: Option<String>,
    #[serde(alias = "Beginning Inventory")]
    pub beginning_inventory: String,
    #[serde(default, alias = "Shipment")]
    pub shipment: Option<String>,
    #[serde(alias = "Transfer In")]
    pub transfer_in: String,
    #[serde(alias = "Transfer Out")]
    pub transfer_out: String,
    #[serde(alias = "RTV")]
    pub rtv: String,
    #[serde(alias = "Sales")]
    pub sales: String,
    #[serde(alias = "Ending Inventory")]
    pub ending_inventory: String,
}

// ── Output ───────────────────────────────────────────────────────────────────

/// A validated stocktake observation. All quantities are non-negative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StocktakeRecord {
    pub row: RowIndex,
    pub store: StoreId,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub beginning_inventory: f64,
    /// `None` when the input carried no shipment value.
    pub shipment: Option<f64>,
    pub transfer_in: f64,
    pub transfer_out: f64,
    pub rtv: f64,
    pub sales: f64,
    pub ending_inventory: f64,
}

impl StocktakeRecord {
    /// Ending inventory implied by the recorded movements. An absent
    /// shipment reconciles as no shipment.
    pub fn expected_ending(&self) -> f64 {
        self.beginning_inventory + self.shipment.unwrap_or(0.0) + self.transfer_in
            - self.transfer_out
            - self.rtv
            - self.sales
    }

    /// Signed residual: counted minus expected. Negative means units missing.
    pub fn discrepancy(&self) -> f64 {
        self.ending_inventory - self.expected_ending()
    }

    pub fn period(&self) -> YearMonth {
        YearMonth::of(self.period_start)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Store,
    PeriodStart,
    PeriodEnd,
    BeginningInventory,
    Shipment,
    TransferIn,
    TransferOut,
    Rtv,
    Sales,
    EndingInventory,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::PeriodStart => "period_start",
            Self::PeriodEnd => "period_end",
            Self::BeginningInventory => "beginning_inventory",
            Self::Shipment => "shipment",
            Self::TransferIn => "transfer_in",
            Self::TransferOut => "transfer_out",
            Self::Rtv => "rtv",
            Self::Sales => "sales",
            Self::EndingInventory => "ending_inventory",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    MissingValue,
    NonNumeric,
    AmbiguousNumber,
    ConflictingSeparators,
    NegativeQuantity,
    UnparseableDate,
    PeriodEndBeforeStart,
    EmptyStoreId,
    DuplicatePeriod,
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MissingValue => "missing value",
            Self::NonNumeric => "non-numeric value",
            Self::AmbiguousNumber => "ambiguous number format",
            Self::ConflictingSeparators => "conflicting decimal separators",
            Self::NegativeQuantity => "negative quantity where non-negative expected",
            Self::UnparseableDate => "unparseable date",
            Self::PeriodEndBeforeStart => "period end precedes period start",
            Self::EmptyStoreId => "empty store identifier",
            Self::DuplicatePeriod => "duplicate period for store",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("row {row}: {field}: {reason} ({value:?})")]
pub struct ValidationFailure {
    pub row: RowIndex,
    pub field: Field,
    pub value: String,
    pub reason: ValidationReason,
}

// ── Field parsing ────────────────────────────────────────────────────────────

fn clean(raw: &str) -> &str {
    raw.trim().trim_matches('"').trim()
}

/// Parse a non-negative quantity under the given convention.
pub fn parse_quantity(raw: &str, convention: NumberConvention) -> Result<f64, ValidationReason> {
    let s = clean(raw);
    if s.is_empty() {
        return Err(ValidationReason::MissingValue);
    }
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    if !body.starts_with(|c: char| c.is_ascii_digit())
        || !body.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',')
    {
        return Err(ValidationReason::NonNumeric);
    }

    let value = match convention {
        NumberConvention::European => parse_european(body)?,
        NumberConvention::Plain => parse_plain(body)?,
        NumberConvention::Auto => parse_auto(body)?,
    };

    if !value.is_finite() {
        return Err(ValidationReason::NonNumeric);
    }
    if negative && value != 0.0 {
        return Err(ValidationReason::NegativeQuantity);
    }
    Ok(value)
}

fn parse_auto(body: &str) -> Result<f64, ValidationReason> {
    if let Some(comma) = body.find(',') {
        if body.rfind('.').is_some_and(|dot| dot > comma) {
            return Err(ValidationReason::ConflictingSeparators);
        }
        return parse_european(body);
    }
    match body.matches('.').count() {
        0 => parse_plain(body),
        1 => {
            let fraction = body.len() - body.find('.').map_or(0, |i| i + 1);
            if fraction == 3 {
                // "1.234": a thousands group or three decimals.
                Err(ValidationReason::AmbiguousNumber)
            } else {
                parse_plain(body)
            }
        }
        _ => parse_european(body),
    }
}

fn parse_european(body: &str) -> Result<f64, ValidationReason> {
    let mut parts = body.split(',');
    let integer = parts.next().unwrap_or_default();
    let fraction = parts.next();
    if parts.next().is_some() {
        return Err(ValidationReason::NonNumeric);
    }

    let mut digits = String::with_capacity(body.len());
    if integer.contains('.') {
        for (i, group) in integer.split('.').enumerate() {
            let ok = if i == 0 {
                (1..=3).contains(&group.len())
            } else {
                group.len() == 3
            };
            if !ok || !group.chars().all(|c| c.is_ascii_digit()) {
                return Err(ValidationReason::NonNumeric);
            }
            digits.push_str(group);
        }
    } else {
        digits.push_str(integer);
    }

    if let Some(fraction) = fraction {
        if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationReason::NonNumeric);
        }
        digits.push('.');
        digits.push_str(fraction);
    }
    digits.parse().map_err(|_| ValidationReason::NonNumeric)
}

fn parse_plain(body: &str) -> Result<f64, ValidationReason> {
    if body.contains(',') {
        return Err(ValidationReason::NonNumeric);
    }
    let mut parts = body.split('.');
    let integer = parts.next().unwrap_or_default();
    let fraction = parts.next();
    if parts.next().is_some() || integer.is_empty() || fraction.is_some_and(str::is_empty) {
        return Err(ValidationReason::NonNumeric);
    }
    body.parse().map_err(|_| ValidationReason::NonNumeric)
}

pub fn parse_date(raw: &str, formats: &[String]) -> Result<NaiveDate, ValidationReason> {
    let s = clean(raw);
    if s.is_empty() {
        return Err(ValidationReason::MissingValue);
    }
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .ok_or(ValidationReason::UnparseableDate)
}

// ── Records ──────────────────────────────────────────────────────────────────

/// Normalize a single row. Pure: no state outside the return value.
pub fn normalize_record(
    row: RowIndex,
    raw: &RawRecord,
    config: &NormalizationConfig,
) -> Result<StocktakeRecord, ValidationFailure> {
    let fail = |field: Field, value: &str, reason: ValidationReason| ValidationFailure {
        row,
        field,
        value: value.to_string(),
        reason,
    };
    let quantity = |field: Field, value: &str| {
        parse_quantity(value, config.number_convention).map_err(|reason| fail(field, value, reason))
    };
    let optional_quantity = |field: Field, value: &Option<String>| match value.as_deref() {
        Some(v) if !clean(v).is_empty() => quantity(field, v).map(Some),
        _ => Ok(None),
    };

    let store = clean(&raw.store);
    if store.is_empty() {
        return Err(fail(Field::Store, &raw.store, ValidationReason::EmptyStoreId));
    }

    let period_start = parse_date(&raw.period_start, &config.date_formats)
        .map_err(|reason| fail(Field::PeriodStart, &raw.period_start, reason))?;
    let period_end = match raw.period_end.as_deref() {
        Some(v) if !clean(v).is_empty() => parse_date(v, &config.date_formats)
            .map_err(|reason| fail(Field::PeriodEnd, v, reason))?,
        _ => period_start,
    };
    if period_end < period_start {
        return Err(fail(
            Field::PeriodEnd,
            raw.period_end.as_deref().unwrap_or_default(),
            ValidationReason::PeriodEndBeforeStart,
        ));
    }

    Ok(StocktakeRecord {
        row,
        store: store.to_string(),
        period_start,
        period_end,
        beginning_inventory: quantity(Field::BeginningInventory, &raw.beginning_inventory)?,
        shipment: optional_quantity(Field::Shipment, &raw.shipment)?,
        transfer_in: quantity(Field::TransferIn, &raw.transfer_in)?,
        transfer_out: quantity(Field::TransferOut, &raw.transfer_out)?,
        rtv: quantity(Field::Rtv, &raw.rtv)?,
        sales: quantity(Field::Sales, &raw.sales)?,
        ending_inventory: quantity(Field::EndingInventory, &raw.ending_inventory)?,
    })
}

/// Valid records in input order, and every rejected row.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub records: Vec<StocktakeRecord>,
    pub failures: Vec<ValidationFailure>,
}

/// Normalize a whole input. A second row for the same store and period start
/// is rejected; the first one is kept.
pub fn normalize_batch(raw: &[RawRecord], config: &NormalizationConfig) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    let mut seen: HashSet<(StoreId, NaiveDate)> = HashSet::new();

    for (row, raw_record) in raw.iter().enumerate() {
        match normalize_record(row, raw_record, config) {
            Ok(record) => {
                if seen.insert((record.store.clone(), record.period_start)) {
                    batch.records.push(record);
                } else {
                    let failure = ValidationFailure {
                        row,
                        field: Field::PeriodStart,
                        value: raw_record.period_start.clone(),
                        reason: ValidationReason::DuplicatePeriod,
                    };
                    log::warn!("normalizer: rejected {failure}");
                    batch.failures.push(failure);
                }
            }
            Err(failure) => {
                log::warn!("normalizer: rejected {failure}");
                batch.failures.push(failure);
            }
        }
    }
    batch
}

// ── Data quality ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataQualityReport {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub invalid_rows: usize,
    pub failures_by_reason: BTreeMap<String, usize>,
    pub failures_by_field: BTreeMap<String, usize>,
    pub failures: Vec<ValidationFailure>,
    pub store_coverage: BTreeMap<StoreId, usize>,
    pub date_range: Option<DateRange>,
    /// Valid records whose |discrepancy| exceeds the imbalance tolerance.
    pub inventory_imbalances: usize,
}

impl DataQualityReport {
    pub fn build(batch: &NormalizedBatch, config: &NormalizationConfig) -> Self {
        let mut failures_by_reason = BTreeMap::new();
        let mut failures_by_field = BTreeMap::new();
        for failure in &batch.failures {
            *failures_by_reason.entry(failure.reason.to_string()).or_insert(0) += 1;
            *failures_by_field.entry(failure.field.name().to_string()).or_insert(0) += 1;
        }

        let mut store_coverage = BTreeMap::new();
        for record in &batch.records {
            *store_coverage.entry(record.store.clone()).or_insert(0) += 1;
        }

        let date_range = batch
            .records
            .iter()
            .map(|r| r.period_start)
            .min()
            .zip(batch.records.iter().map(|r| r.period_end).max())
            .map(|(start, end)| DateRange { start, end });

        let inventory_imbalances = batch
            .records
            .iter()
            .filter(|r| r.discrepancy().abs() > config.imbalance_tolerance)
            .count();

        Self {
            total_rows: batch.records.len() + batch.failures.len(),
            valid_rows: batch.records.len(),
            invalid_rows: batch.failures.len(),
            failures_by_reason,
            failures_by_field,
            failures: batch.failures.clone(),
            store_coverage,
            date_range,
            inventory_imbalances,
        }
    }
}
