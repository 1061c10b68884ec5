//! Demand table ingestion using Polars
//!
//! The core consumes a columnar table of daily demand records and groups it
//! into one [`DemandSeries`] per item-location entity. Reading the table is the
//! only I/O the crate performs; a failed read is reported, never papered over
//! with generated data.

use crate::error::SegmentError;
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Item-location combination, the unit of classification and clustering.
///
/// Ordering is by item first, then location; every batch output follows it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub item_id: String,
    pub store_id: String,
}

impl EntityKey {
    pub fn new(item_id: impl Into<String>, store_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            store_id: store_id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.item_id, self.store_id)
    }
}

/// One period of demand for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DemandObservation {
    pub date: NaiveDate,
    pub quantity: f64,
    pub revenue: Option<f64>,
}

impl DemandObservation {
    pub fn new(date: NaiveDate, quantity: f64) -> Self {
        Self {
            date,
            quantity,
            revenue: None,
        }
    }

    pub fn with_revenue(mut self, revenue: f64) -> Self {
        self.revenue = Some(revenue);
        self
    }
}

/// Date-ordered demand history of one entity, read-only to the core.
#[derive(Debug, Clone, PartialEq)]
pub struct DemandSeries {
    key: EntityKey,
    observations: Vec<DemandObservation>,
    supplier_reliability: Option<f64>,
}

impl DemandSeries {
    /// Build a series, sorting observations by date.
    ///
    /// Quantities must be finite and non-negative. An empty series is
    /// accepted here; the statistics stage rejects it.
    pub fn new(key: EntityKey, mut observations: Vec<DemandObservation>) -> crate::Result<Self> {
        if let Some(bad) = observations
            .iter()
            .find(|o| !o.quantity.is_finite() || o.quantity < 0.0)
        {
            return Err(SegmentError::data(format!(
                "entity {} has invalid quantity {} on {}",
                key, bad.quantity, bad.date
            )));
        }
        observations.sort_by_key(|o| o.date);

        Ok(Self {
            key,
            observations,
            supplier_reliability: None,
        })
    }

    /// Convenience constructor for consecutive daily quantities starting at `start`
    pub fn daily(key: EntityKey, start: NaiveDate, quantities: &[f64]) -> crate::Result<Self> {
        let observations = start
            .iter_days()
            .zip(quantities)
            .map(|(date, &quantity)| DemandObservation::new(date, quantity))
            .collect();
        Self::new(key, observations)
    }

    pub fn with_supplier_reliability(mut self, reliability: Option<f64>) -> Self {
        self.supplier_reliability = reliability;
        self
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn observations(&self) -> &[DemandObservation] {
        &self.observations
    }

    pub fn quantities(&self) -> impl Iterator<Item = f64> + '_ {
        self.observations.iter().map(|o| o.quantity)
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Supplier reliability supplied alongside the demand records, if any
    pub fn supplier_reliability(&self) -> Option<f64> {
        self.supplier_reliability
    }

    /// Sum of revenue over the window, `None` when no observation carries revenue
    pub fn total_revenue(&self) -> Option<f64> {
        self.observations
            .iter()
            .filter_map(|o| o.revenue)
            .fold(None, |acc, r| Some(acc.unwrap_or(0.0) + r))
    }
}

/// Column names of the demand table, with accepted aliases.
///
/// The first alias present in the table wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub date: String,
    pub item_id: String,
    pub location: Vec<String>,
    pub quantity: Vec<String>,
    pub revenue: String,
    pub supplier_reliability: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            date: "date".to_string(),
            item_id: "item_id".to_string(),
            location: vec!["store_id".to_string(), "location_id".to_string()],
            quantity: vec!["total_sales".to_string(), "sales".to_string()],
            revenue: "revenue".to_string(),
            supplier_reliability: "supplier_reliability".to_string(),
        }
    }
}

impl ColumnMapping {
    fn resolve<'a>(df: &DataFrame, role: &str, aliases: &'a [String]) -> crate::Result<&'a str> {
        aliases
            .iter()
            .find(|name| df.get_column_index(name).is_some())
            .map(String::as_str)
            .ok_or_else(|| {
                SegmentError::data(format!(
                    "missing required {} column (expected one of {:?})",
                    role, aliases
                ))
            })
    }

    fn optional<'a>(df: &DataFrame, name: &'a str) -> Option<&'a str> {
        df.get_column_index(name).map(|_| name)
    }
}

/// Load a CSV demand table
///
/// # Arguments
/// * `path` - Path to a CSV file with a header row
///
/// # Returns
/// * The raw table, or `SourceUnavailable` when it cannot be read
pub fn load_demand_table(path: impl AsRef<Path>) -> crate::Result<DataFrame> {
    let path = path.as_ref();
    let unavailable = |e: PolarsError| SegmentError::SourceUnavailable {
        location: path.display().to_string(),
        reason: e.to_string(),
    };

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .map_err(unavailable)?
        .finish()
        .map_err(unavailable)?;

    tracing::info!(path = %path.display(), rows = df.height(), "Loaded demand table");
    Ok(df)
}

/// Group a demand table into one series per entity
///
/// # Arguments
/// * `df` - Table with date, item, location and quantity columns
/// * `mapping` - Column names to read
///
/// # Returns
/// * Series in ascending entity order, each sorted by date
pub fn series_from_dataframe(
    df: &DataFrame,
    mapping: &ColumnMapping,
) -> crate::Result<Vec<DemandSeries>> {
    if df.height() == 0 {
        return Err(SegmentError::data("demand table has no rows"));
    }

    let date_col = ColumnMapping::resolve(df, "date", std::slice::from_ref(&mapping.date))?;
    let item_col = ColumnMapping::resolve(df, "item", std::slice::from_ref(&mapping.item_id))?;
    let location_col = ColumnMapping::resolve(df, "location", &mapping.location)?;
    let quantity_col = ColumnMapping::resolve(df, "quantity", &mapping.quantity)?;

    let dates = date_values(df, date_col)?;
    let items = string_values(df, item_col)?;
    let locations = string_values(df, location_col)?;
    let quantities = float_values(df, quantity_col)?;

    let revenues = match ColumnMapping::optional(df, &mapping.revenue) {
        Some(name) => float_values(df, name)?,
        None => {
            tracing::warn!(
                column = %mapping.revenue,
                "No revenue column; revenue contribution will be 0 for every entity"
            );
            vec![None; df.height()]
        }
    };
    let reliabilities = match ColumnMapping::optional(df, &mapping.supplier_reliability) {
        Some(name) => float_values(df, name)?,
        None => vec![None; df.height()],
    };

    let mut grouped: BTreeMap<EntityKey, (Vec<DemandObservation>, Option<f64>)> = BTreeMap::new();
    for row in 0..df.height() {
        let quantity = quantities[row].ok_or_else(|| {
            SegmentError::data(format!("null value in column '{}' at row {}", quantity_col, row))
        })?;
        let key = EntityKey::new(items[row].clone(), locations[row].clone());
        let entry = grouped.entry(key).or_default();
        entry.0.push(DemandObservation {
            date: dates[row],
            quantity,
            revenue: revenues[row],
        });
        if let Some(r) = reliabilities[row] {
            entry.1 = Some(r);
        }
    }

    let series = grouped
        .into_iter()
        .map(|(key, (observations, reliability))| {
            DemandSeries::new(key, observations).map(|s| s.with_supplier_reliability(reliability))
        })
        .collect::<crate::Result<Vec<_>>>()?;

    tracing::info!(
        rows = df.height(),
        entities = series.len(),
        "Grouped demand records by item and location"
    );
    Ok(series)
}

fn string_values(df: &DataFrame, name: &str) -> crate::Result<Vec<String>> {
    let series = df
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::String)?;

    series
        .str()?
        .into_iter()
        .enumerate()
        .map(|(row, value)| {
            value.map(str::to_owned).ok_or_else(|| {
                SegmentError::data(format!("null value in column '{}' at row {}", name, row))
            })
        })
        .collect()
}

fn float_values(df: &DataFrame, name: &str) -> crate::Result<Vec<Option<f64>>> {
    let series = df
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    let values = series.f64()?.into_iter().collect();
    Ok(values)
}

fn date_values(df: &DataFrame, name: &str) -> crate::Result<Vec<NaiveDate>> {
    let series = df.column(name)?.as_materialized_series();
    let null_at = |row: usize| {
        SegmentError::data(format!("null value in column '{}' at row {}", name, row))
    };

    match series.dtype() {
        DataType::String => series
            .str()?
            .into_iter()
            .enumerate()
            .map(|(row, value)| value.ok_or_else(|| null_at(row)).and_then(parse_date))
            .collect(),
        DataType::Date | DataType::Datetime(_, _) => {
            let days = series.cast(&DataType::Date)?.cast(&DataType::Int32)?;
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
                .ok_or_else(|| SegmentError::data("invalid epoch"))?;
            days.i32()?
                .into_iter()
                .enumerate()
                .map(|(row, value)| {
                    let value = value.ok_or_else(|| null_at(row))?;
                    epoch
                        .checked_add_signed(chrono::Duration::days(i64::from(value)))
                        .ok_or_else(|| SegmentError::data(format!("date out of range at row {}", row)))
                })
                .collect()
        }
        other => Err(SegmentError::data(format!(
            "column '{}' has unsupported date type {}",
            name, other
        ))),
    }
}

/// Parse `YYYY-MM-DD`, ignoring any time-of-day suffix
fn parse_date(text: &str) -> crate::Result<NaiveDate> {
    let day = text.get(..10).unwrap_or(text);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|e| SegmentError::data(format!("unparsable date '{}': {}", text, e)))
}
