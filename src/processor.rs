use crate::{
    errors::ReportError,
    models::{CellValue, Summary, SummaryRow, ZERO, round_half_away},
    plan::{AggregationPlan, CENT_DIVISOR, CENT_SYMBOL_SUFFIX, Measure, MeasureExpr},
    schema::{ColumnMap, Role},
    traits::Aggregating,
};
use anyhow::Result;
use csv::StringRecord;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{trace, warn};

#[derive(Debug, Clone)]
struct GroupState {
    values: Vec<Decimal>,
    count: u64,
}

/// Executes an `AggregationPlan` row by row.
pub struct Aggregator {
    plan: AggregationPlan,
    numeric_roles: Vec<Role>,
    groups: HashMap<Vec<String>, GroupState>,
    skipped_cells: u64,
}

impl Aggregator {
    pub fn new(plan: AggregationPlan) -> Self {
        let mut numeric_roles: Vec<Role> = plan
            .measures()
            .iter()
            .flat_map(|m| match m.expr() {
                MeasureExpr::Sum(role) => vec![role],
                MeasureExpr::ContractAdjusted { volume, .. } => vec![volume],
                MeasureExpr::Net { plus, minus } => vec![plus, minus],
            })
            .collect();
        numeric_roles.sort();
        numeric_roles.dedup();

        Self {
            plan,
            numeric_roles,
            groups: HashMap::new(),
            skipped_cells: 0,
        }
    }

    fn text<'r>(columns: &ColumnMap, record: &'r StringRecord, role: Role) -> &'r str {
        columns
            .index(role)
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .unwrap_or("")
    }

    /// Parses each numeric column once, so a bad cell is counted once even
    /// when several measures read it.
    fn parse_cells(&mut self, columns: &ColumnMap, record: &StringRecord) -> Vec<(Role, Decimal)> {
        let mut cells = Vec::with_capacity(self.numeric_roles.len());
        for role in &self.numeric_roles {
            let cell = CellValue::parse(Self::text(columns, record, *role));
            if cell == CellValue::Invalid {
                self.skipped_cells += 1;
                trace!(%role, value = Self::text(columns, record, *role), "non-numeric cell");
            }
            cells.push((*role, cell.or_zero()));
        }
        cells
    }

    fn evaluate(
        measure: &Measure,
        cells: &[(Role, Decimal)],
        columns: &ColumnMap,
        record: &StringRecord,
    ) -> Result<Decimal> {
        let value = |role: Role| {
            cells
                .iter()
                .find(|(r, _)| *r == role)
                .map(|(_, v)| *v)
                .unwrap_or(ZERO)
        };
        let evaluated = match measure.expr() {
            MeasureExpr::Sum(role) => value(role),
            MeasureExpr::ContractAdjusted { volume, symbol } => {
                let volume = value(volume);
                if Self::text(columns, record, symbol).ends_with(CENT_SYMBOL_SUFFIX) {
                    volume / Decimal::from(CENT_DIVISOR)
                } else {
                    volume
                }
            }
            MeasureExpr::Net { plus, minus } => value(plus)
                .checked_sub(value(minus))
                .ok_or(ReportError::ValueOverflow(measure.label()))?,
        };
        Ok(evaluated)
    }

    fn add_values(measures: &[Measure], state: &mut GroupState, values: &[Decimal]) -> Result<()> {
        for ((total, value), measure) in state.values.iter_mut().zip(values).zip(measures) {
            *total = total
                .checked_add(*value)
                .ok_or(ReportError::ValueOverflow(measure.label()))?;
        }
        state.count += 1;
        Ok(())
    }
}

impl Aggregating for Aggregator {
    fn ingest(&mut self, columns: &ColumnMap, record: &StringRecord) -> Result<()> {
        let key: Vec<String> = self
            .plan
            .keys()
            .iter()
            .map(|k| Self::text(columns, record, k.role()).to_string())
            .collect();

        let cells = self.parse_cells(columns, record);
        let values: Vec<Decimal> = self
            .plan
            .measures()
            .iter()
            .map(|m| Self::evaluate(m, &cells, columns, record))
            .collect::<Result<_>>()?;

        let width = values.len();
        let state = self.groups.entry(key).or_insert_with(|| GroupState {
            values: vec![ZERO; width],
            count: 0,
        });
        Self::add_values(self.plan.measures(), state, &values)
    }

    fn finish(self) -> Summary {
        let decimals = self.plan.decimals();
        let primary = self.plan.primary();

        let mut rows: Vec<SummaryRow> = self
            .groups
            .into_iter()
            .map(|(keys, state)| {
                let values = state
                    .values
                    .into_iter()
                    .map(|v| round_half_away(v, decimals))
                    .collect();
                SummaryRow::new(keys, values, state.count)
            })
            .collect();

        rows.sort_by(|a, b| {
            let (left, right) = (a.values().get(primary), b.values().get(primary));
            right.cmp(&left).then_with(|| a.keys().cmp(b.keys()))
        });

        if self.skipped_cells > 0 {
            warn!(
                skipped = self.skipped_cells,
                "non-numeric cells were counted as zero"
            );
        }

        Summary::new(self.plan, rows, self.skipped_cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaKind, detect};
    use rust_decimal::prelude::*;

    fn aggregate(input: &str) -> Result<Summary> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(input.as_bytes());
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let detection = detect("inline", headers.as_slice(), None)?;
        let plan = AggregationPlan::for_inputs(*detection.kind(), [detection.columns()]);

        let mut aggregator = Aggregator::new(plan);
        for record in reader.records() {
            aggregator.ingest(detection.columns(), &record?)?;
        }
        Ok(aggregator.finish())
    }

    #[test]
    fn test_commission_groups_by_receiver_and_currency() -> Result<()> {
        let summary = aggregate(
            "receiver_id,commission,currency\n\
             1,10.005,USD\n\
             2,3,USD\n\
             1,5,USD\n\
             1,7,THB\n",
        )?;
        assert_eq!(summary.plan().kind(), SchemaKind::Commission);
        assert_eq!(summary.rows().len(), 3);

        let top = &summary.rows()[0];
        assert_eq!(top.keys(), &vec!["1", "USD"]);
        assert_eq!(top.values()[0], dec!(15.01));
        assert_eq!(top.count(), 2);

        assert_eq!(summary.rows()[1].keys(), &vec!["1", "THB"]);
        assert_eq!(summary.rows()[2].keys(), &vec!["2", "USD"]);
        Ok(())
    }

    #[test]
    fn test_ties_are_ordered_by_key() -> Result<()> {
        let summary = aggregate("receiver_id,commission\nb,1\na,1\nc,2\n")?;
        let ids: Vec<&str> = summary.rows().iter().map(|r| r.keys()[0].as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        Ok(())
    }

    #[test]
    fn test_ledger_net_deposit() -> Result<()> {
        let summary = aggregate(
            "User ID,Deposit,Withdraw\n\
             10,100,\n\
             10,,40\n\
             11,50,0\n",
        )?;
        let labels = summary.plan().labels();
        assert_eq!(labels, vec!["ID", "Total_Deposit", "Total_Withdraw", "Net_Deposit", "Transactions"]);

        let first = &summary.rows()[0];
        assert_eq!(first.keys(), &vec!["10"]);
        assert_eq!(first.values(), &vec![dec!(100), dec!(40), dec!(60)]);
        assert_eq!(first.count(), 2);
        assert_eq!(summary.skipped_cells(), 0);
        Ok(())
    }

    #[test]
    fn test_invalid_cells_count_once_as_zero() -> Result<()> {
        let summary = aggregate("user id,deposit,withdraw\n1,abc,5\n1,10,1\n")?;
        assert_eq!(summary.skipped_cells(), 1);
        assert_eq!(summary.rows()[0].values(), &vec![dec!(10), dec!(6), dec!(4)]);
        Ok(())
    }

    #[test]
    fn test_volume_divides_cent_symbols() -> Result<()> {
        let summary = aggregate(
            "Name,Referrer,Symbol,Volume\n\
             Ann,Bob,EURUSD.c,150\n\
             Ann,Bob,XAUUSD.s,0.5\n\
             Ann,Bob, GBPUSD.c ,1\n\
             Cid,,EURUSD.p,2\n",
        )?;
        let ann = &summary.rows()[0];
        assert_eq!(ann.keys(), &vec!["Ann", "Bob"]);
        assert_eq!(ann.values()[0], dec!(2.01));
        assert_eq!(ann.count(), 3);

        let cid = &summary.rows()[1];
        assert_eq!(cid.keys(), &vec!["Cid", ""]);
        assert_eq!(cid.values()[0], dec!(2));
        Ok(())
    }

    #[test]
    fn test_keys_are_trimmed() -> Result<()> {
        let summary = aggregate("receiver_id,commission\n 5 ,1\n5,2\n")?;
        assert_eq!(summary.rows().len(), 1);
        assert_eq!(summary.rows()[0].values()[0], dec!(3));
        Ok(())
    }

    #[test]
    fn test_missing_role_in_second_table_contributes_zero() -> Result<()> {
        let first = ColumnMap::resolve(&["user id", "deposit"]);
        let second = ColumnMap::resolve(&["user id", "withdraw"]);
        let plan = AggregationPlan::for_inputs(SchemaKind::Ledger, [&first, &second]);
        let mut aggregator = Aggregator::new(plan);

        aggregator.ingest(&first, &StringRecord::from(vec!["1", "100"]))?;
        aggregator.ingest(&second, &StringRecord::from(vec!["1", "30"]))?;

        let summary = aggregator.finish();
        assert_eq!(summary.rows()[0].values(), &vec![dec!(100), dec!(30), dec!(70)]);
        assert_eq!(summary.rows()[0].count(), 2);
        Ok(())
    }

    #[test]
    fn test_overflow_is_reported() -> Result<()> {
        let columns = ColumnMap::resolve(&["receiver_id", "commission"]);
        let plan = AggregationPlan::for_inputs(SchemaKind::Commission, [&columns]);
        let mut aggregator = Aggregator::new(plan);
        let max = Decimal::MAX.to_string();

        aggregator.ingest(&columns, &StringRecord::from(vec!["1", max.as_str()]))?;
        let res = aggregator.ingest(&columns, &StringRecord::from(vec!["1", max.as_str()]));
        assert!(res.is_err());
        Ok(())
    }

    #[test]
    fn test_net_overflow_is_reported() -> Result<()> {
        let columns = ColumnMap::resolve(&["user id", "deposit", "withdraw"]);
        let plan = AggregationPlan::for_inputs(SchemaKind::Ledger, [&columns]);
        let mut aggregator = Aggregator::new(plan);
        let (max, min) = (Decimal::MAX.to_string(), Decimal::MIN.to_string());

        let err = aggregator
            .ingest(&columns, &StringRecord::from(vec!["1", max.as_str(), min.as_str()]))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReportError>(),
            Some(ReportError::ValueOverflow("Net_Deposit"))
        ));
        Ok(())
    }

    #[test]
    fn test_sums_are_exact_beyond_float_precision() -> Result<()> {
        let summary = aggregate(
            "receiver_id,commission\n\
             1,12345678901234567.89\n\
             1,0.01\n\
             2,0.1\n\
             2,0.2\n",
        )?;
        assert_eq!(summary.rows()[0].values()[0], dec!(12345678901234567.90));
        assert_eq!(summary.rows()[1].values()[0], dec!(0.30));
        Ok(())
    }
}
