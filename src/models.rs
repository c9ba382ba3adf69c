use std::{collections::BTreeMap, str::FromStr};

use getset::{CopyGetters, Getters};
use rust_decimal::prelude::*;
use serde::{
    Serialize, Serializer,
    ser::{SerializeMap, SerializeSeq},
};

use crate::{
    errors::ReportError,
    plan::{AggregationPlan, Column},
    schema::Role,
};

pub const ZERO: Decimal = dec!(0);
pub const ALL_CURRENCIES: &str = "All";

/// A numeric cell after cleaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellValue {
    Blank,
    Number(Decimal),
    Invalid,
}

impl CellValue {
    /// Parses a money or volume cell. Thousands separators are dropped,
    /// scientific notation is accepted and `(12.50)` reads as `-12.50`.
    pub fn parse(cell: &str) -> Self {
        let trimmed = cell.trim();
        let (negated, body) = match trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
            Some(inner) => (true, inner),
            None => (false, trimmed),
        };
        let cleaned: String = body
            .chars()
            .filter(|c| !matches!(c, ',' | '_' | ' ' | '\u{a0}'))
            .collect();
        if cleaned.is_empty() {
            return CellValue::Blank;
        }

        match Decimal::from_str(&cleaned).or_else(|_| Decimal::from_scientific(&cleaned)) {
            Ok(value) if negated => CellValue::Number(-value),
            Ok(value) => CellValue::Number(value),
            Err(_) => CellValue::Invalid,
        }
    }

    pub fn or_zero(self) -> Decimal {
        match self {
            CellValue::Number(value) => value,
            CellValue::Blank | CellValue::Invalid => ZERO,
        }
    }
}

pub fn round_half_away(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
}

pub fn format_decimal(value: &Decimal, decimals: u32) -> String {
    format!("{:.*}", decimals as usize, value)
}

/// One output group.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters)]
pub struct SummaryRow {
    #[getset(get = "pub")]
    keys: Vec<String>,
    #[getset(get = "pub")]
    values: Vec<Decimal>,
    #[getset(get_copy = "pub")]
    count: u64,
}

impl SummaryRow {
    pub fn new(keys: Vec<String>, values: Vec<Decimal>, count: u64) -> Self {
        Self {
            keys,
            values,
            count,
        }
    }

    /// Identifier shown on chart axes: every key joined with ` / `.
    pub fn display_key(&self) -> String {
        self.keys
            .iter()
            .map(|k| if k.is_empty() { "(blank)" } else { k.as_str() })
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

/// The finished aggregation, ordered by the plan's primary measure.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters)]
pub struct Summary {
    #[getset(get = "pub")]
    plan: AggregationPlan,
    #[getset(get = "pub")]
    rows: Vec<SummaryRow>,
    #[getset(get_copy = "pub")]
    skipped_cells: u64,
}

impl Summary {
    pub fn new(plan: AggregationPlan, rows: Vec<SummaryRow>, skipped_cells: u64) -> Self {
        Self {
            plan,
            rows,
            skipped_cells,
        }
    }

    pub fn primary_value(&self, row: &SummaryRow) -> Decimal {
        row.values
            .get(self.plan.primary())
            .copied()
            .unwrap_or(ZERO)
    }

    /// Number of distinct values of the first key.
    pub fn distinct_ids(&self) -> usize {
        let mut ids: Vec<&str> = self
            .rows
            .iter()
            .filter_map(|row| row.keys.first().map(String::as_str))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    pub fn total_rows(&self) -> u64 {
        self.rows.iter().map(|row| row.count).sum()
    }

    /// Position of the key a row's colour and totals are split by: the
    /// currency when present, otherwise the second key.
    pub fn series_key(&self) -> Option<usize> {
        let keys = self.plan.keys();
        keys.iter()
            .position(|k| k.role() == Role::Currency)
            .or(if keys.len() > 1 { Some(1) } else { None })
    }

    /// Primary measure totals per currency, or a single `All` entry.
    pub fn totals_by_currency(&self) -> Result<BTreeMap<String, Decimal>, ReportError> {
        let currency = self
            .plan
            .keys()
            .iter()
            .position(|k| k.role() == Role::Currency);
        let mut totals = BTreeMap::new();
        for row in &self.rows {
            let name = currency
                .and_then(|idx| row.keys.get(idx))
                .cloned()
                .unwrap_or_else(|| ALL_CURRENCIES.to_string());
            let total = totals.entry(name).or_insert(ZERO);
            *total = total
                .checked_add(self.primary_value(row))
                .ok_or(ReportError::ValueOverflow(self.plan.primary_measure().label()))?;
        }
        Ok(totals)
    }

    /// A row as text cells in `labels()` order.
    pub fn format_row(&self, row: &SummaryRow) -> Vec<String> {
        let decimals = self.plan.decimals();
        self.plan
            .layout()
            .iter()
            .map(|column| match *column {
                Column::Key(idx) => row.keys.get(idx).cloned().unwrap_or_default(),
                Column::Measure(idx) => row
                    .values
                    .get(idx)
                    .map(|v| format_decimal(v, decimals))
                    .unwrap_or_default(),
                Column::Count => row.count.to_string(),
            })
            .collect()
    }
}

struct RowView<'a> {
    summary: &'a Summary,
    row: &'a SummaryRow,
}

impl Serialize for RowView<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let plan = self.summary.plan();
        let decimals = plan.decimals();
        let mut map = s.serialize_map(Some(plan.layout().len()))?;
        for column in plan.layout() {
            let label = plan.column_label(*column);
            match *column {
                Column::Key(idx) => {
                    map.serialize_entry(label, self.row.keys.get(idx).map_or("", String::as_str))?
                }
                Column::Measure(idx) => {
                    let value = self.row.values.get(idx).copied().unwrap_or(ZERO);
                    map.serialize_entry(label, &format_decimal(&value, decimals))?
                }
                Column::Count => map.serialize_entry(label, &self.row.count)?,
            }
        }
        map.end()
    }
}

impl Serialize for Summary {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = s.serialize_seq(Some(self.rows.len()))?;
        for row in &self.rows {
            seq.serialize_element(&RowView { summary: self, row })?;
        }
        seq.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnMap, SchemaKind};
    use anyhow::Result;

    fn commission_summary() -> Summary {
        let columns = ColumnMap::resolve(&["receiver_id", "commission", "currency"]);
        let plan = AggregationPlan::for_inputs(SchemaKind::Commission, [&columns]);
        Summary::new(
            plan,
            vec![
                SummaryRow::new(vec!["7".into(), "USD".into()], vec![dec!(30.5)], 3),
                SummaryRow::new(vec!["8".into(), "THB".into()], vec![dec!(12)], 1),
                SummaryRow::new(vec!["7".into(), "THB".into()], vec![dec!(1.25)], 2),
            ],
            0,
        )
    }

    #[test]
    fn test_parse_cleans_separators_and_notation() {
        assert_eq!(CellValue::parse(" 1,234.50 "), CellValue::Number(dec!(1234.50)));
        assert_eq!(CellValue::parse("1_000"), CellValue::Number(dec!(1000)));
        assert_eq!(CellValue::parse("2.5e2"), CellValue::Number(dec!(250)));
        assert_eq!(CellValue::parse("(12.50)"), CellValue::Number(dec!(-12.50)));
        assert_eq!(CellValue::parse("-3"), CellValue::Number(dec!(-3)));
        assert_eq!(CellValue::parse("   "), CellValue::Blank);
        assert_eq!(CellValue::parse("n/a"), CellValue::Invalid);
        assert_eq!(CellValue::parse("n/a").or_zero(), ZERO);
    }

    #[test]
    fn test_rounding_is_half_away_from_zero() {
        assert_eq!(round_half_away(dec!(2.345), 2), dec!(2.35));
        assert_eq!(round_half_away(dec!(-2.345), 2), dec!(-2.35));
        assert_eq!(format_decimal(&dec!(2.5), 4), "2.5000");
    }

    #[test]
    fn test_summary_metrics() -> Result<()> {
        let summary = commission_summary();
        assert_eq!(summary.distinct_ids(), 2);
        assert_eq!(summary.total_rows(), 6);
        let totals = summary.totals_by_currency()?;
        assert_eq!(totals.get("USD"), Some(&dec!(30.5)));
        assert_eq!(totals.get("THB"), Some(&dec!(13.25)));
        assert_eq!(summary.series_key(), Some(1));
        Ok(())
    }

    #[test]
    fn test_currency_totals_overflow_is_an_error() {
        let columns = ColumnMap::resolve(&["receiver_id", "commission"]);
        let plan = AggregationPlan::for_inputs(SchemaKind::Commission, [&columns]);
        let summary = Summary::new(
            plan,
            vec![
                SummaryRow::new(vec!["1".into()], vec![Decimal::MAX], 1),
                SummaryRow::new(vec!["2".into()], vec![Decimal::MAX], 1),
            ],
            0,
        );
        assert!(matches!(
            summary.totals_by_currency(),
            Err(ReportError::ValueOverflow("Total_Commission"))
        ));
    }

    #[test]
    fn test_format_row_uses_plan_decimals() {
        let summary = commission_summary();
        assert_eq!(
            summary.format_row(&summary.rows()[0]),
            vec!["7", "30.50", "USD", "3"]
        );
    }

    #[test]
    fn test_summary_serializes_as_json_objects() -> Result<()> {
        let summary = commission_summary();
        let json: serde_json::Value = serde_json::to_value(&summary)?;
        assert_eq!(json[0]["ID"], "7");
        assert_eq!(json[0]["Currency"], "USD");
        assert_eq!(json[0]["Total_Commission"], "30.50");
        assert_eq!(json[0]["Total_Orders"], 3);
        assert_eq!(json.as_array().map(Vec::len), Some(3));
        Ok(())
    }

    #[test]
    fn test_display_key_marks_blank_keys() {
        let row = SummaryRow::new(vec!["".into(), "Bob".into()], vec![ZERO], 1);
        assert_eq!(row.display_key(), "(blank) / Bob");
    }
}
