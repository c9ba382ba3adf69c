use std::path::PathBuf;

use crate::{
    models::Summary,
    plan::AggregationPlan,
    processor::Aggregator,
    schema::{Detection, SchemaKind, detect_all},
    source::{LoadOptions, Table, load_all},
    traits::Aggregating,
};
use anyhow::Result;
use getset::Getters;
use tracing::info;

/// Detection results plus the plan they imply, before any row is read.
#[derive(Debug, Clone, Getters)]
pub struct Prepared {
    #[getset(get = "pub")]
    detections: Vec<Detection>,
    #[getset(get = "pub")]
    plan: AggregationPlan,
}

/// Read → detect → aggregate over one or more concatenated inputs.
pub struct Engine {
    tables: Vec<Table>,
    forced: Option<SchemaKind>,
}

impl Engine {
    pub fn new(tables: Vec<Table>, forced: Option<SchemaKind>) -> Self {
        Self { tables, forced }
    }

    pub fn load(paths: &[PathBuf], options: &LoadOptions, forced: Option<SchemaKind>) -> Result<Self> {
        Ok(Self::new(load_all(paths, options)?, forced))
    }

    pub fn prepare(&self) -> Result<Prepared> {
        let detections = detect_all(&self.tables, self.forced)?;
        let kind = *detections[0].kind();
        let plan = AggregationPlan::for_inputs(kind, detections.iter().map(|d| d.columns()));
        Ok(Prepared { detections, plan })
    }

    pub fn run(&self) -> Result<Summary> {
        let Prepared { detections, plan } = self.prepare()?;
        self.feed(Aggregator::new(plan), &detections)
    }

    fn feed<A: Aggregating>(&self, mut accountant: A, detections: &[Detection]) -> Result<Summary> {
        for (table, detection) in self.tables.iter().zip(detections) {
            for record in table.rows() {
                accountant.ingest(detection.columns(), record)?;
            }
        }

        let summary = accountant.finish();
        info!(
            groups = summary.rows().len(),
            rows = summary.total_rows(),
            "aggregation finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ReportError;
    use csv::StringRecord;
    use rust_decimal::prelude::*;

    fn table(origin: &str, headers: &[&str], rows: &[&[&str]]) -> Table {
        Table::new(
            origin,
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter().map(|r| StringRecord::from(r.to_vec())).collect(),
        )
    }

    #[test]
    fn test_concatenates_inputs_with_different_column_order() -> Result<()> {
        let engine = Engine::new(
            vec![
                table("jan.csv", &["receiver_id", "commission", "currency"], &[&["1", "2.5", "USD"]]),
                table("feb.csv", &["Currency", "Commission", "Receiver ID"], &[&["USD", "1.5", "1"]]),
            ],
            None,
        );
        let summary = engine.run()?;
        assert_eq!(summary.rows().len(), 1);
        assert_eq!(summary.rows()[0].values()[0], dec!(4.00));
        assert_eq!(summary.rows()[0].count(), 2);
        Ok(())
    }

    #[test]
    fn test_prepare_exposes_plan_and_mapping() -> Result<()> {
        let engine = Engine::new(
            vec![table("x.csv", &["User ID", "Deposit", "Withdrawal"], &[])],
            None,
        );
        let prepared = engine.prepare()?;
        assert_eq!(prepared.plan().kind(), SchemaKind::Ledger);
        assert_eq!(prepared.plan().primary_measure().label(), "Net_Deposit");
        assert_eq!(prepared.detections().len(), 1);
        Ok(())
    }

    #[test]
    fn test_mixed_schemas_are_rejected() {
        let engine = Engine::new(
            vec![
                table("a.csv", &["receiver_id", "commission"], &[]),
                table("b.csv", &["name", "volume"], &[]),
            ],
            None,
        );
        let err = engine.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReportError>(),
            Some(ReportError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_no_tables_is_an_error() {
        let engine = Engine::new(vec![], None);
        let err = engine.prepare().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReportError>(),
            Some(ReportError::NoInput)
        ));
    }

    #[test]
    fn test_forced_schema_is_applied() -> Result<()> {
        let engine = Engine::new(
            vec![table(
                "x.csv",
                &["user id", "receiver_id", "commission"],
                &[&["u1", "r1", "3"], &["u1", "r2", "4"]],
            )],
            Some(SchemaKind::Ledger),
        );
        let summary = engine.run()?;
        assert_eq!(summary.rows().len(), 1);
        assert_eq!(summary.rows()[0].keys(), &vec!["u1"]);
        assert_eq!(summary.rows()[0].values()[0], dec!(7));
        Ok(())
    }
}
