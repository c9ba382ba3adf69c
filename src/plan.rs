use std::collections::BTreeSet;

use getset::{CopyGetters, Getters};
use tracing::debug;

use crate::schema::{ColumnMap, Role, SchemaKind};

/// Symbol suffix of cent accounts whose volume is quoted in hundredths.
pub const CENT_SYMBOL_SUFFIX: &str = ".c";
pub const CENT_DIVISOR: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
pub struct GroupKey {
    #[getset(get_copy = "pub")]
    role: Role,
    #[getset(get_copy = "pub")]
    label: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureExpr {
    /// Plain sum of one column.
    Sum(Role),
    /// Volume sum where cent-account symbols count for one hundredth.
    ContractAdjusted { volume: Role, symbol: Role },
    /// Row-wise `plus - minus`, missing cells counting as zero.
    Net { plus: Role, minus: Role },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
pub struct Measure {
    #[getset(get_copy = "pub")]
    label: &'static str,
    #[getset(get_copy = "pub")]
    expr: MeasureExpr,
}

/// One output column, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Key(usize),
    Measure(usize),
    Count,
}

/// The single GROUP BY an input is summarized with.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct AggregationPlan {
    #[getset(get_copy = "pub")]
    kind: SchemaKind,
    #[getset(get = "pub")]
    keys: Vec<GroupKey>,
    #[getset(get = "pub")]
    measures: Vec<Measure>,
    #[getset(get = "pub")]
    layout: Vec<Column>,
    #[getset(get_copy = "pub")]
    primary: usize,
    #[getset(get_copy = "pub")]
    count_label: &'static str,
    #[getset(get_copy = "pub")]
    decimals: u32,
}

// Ordering measure candidates, first present wins.
const COMMISSION_PRIMARY: &[&str] = &["Total_Commission"];
const LEDGER_PRIMARY: &[&str] = &[
    "Net_Deposit",
    "Total_Amount",
    "Total_Deposit",
    "Total_Commission",
    "Total_Withdraw",
];
const VOLUME_PRIMARY: &[&str] = &["Final_Vol"];

const fn key(role: Role, label: &'static str) -> GroupKey {
    GroupKey { role, label }
}

const fn measure(label: &'static str, expr: MeasureExpr) -> Measure {
    Measure { label, expr }
}

impl AggregationPlan {
    /// Builds the aggregation for `kind`, adding optional keys and measures
    /// only for the roles found in the input.
    pub fn synthesize(kind: SchemaKind, present: &BTreeSet<Role>) -> Self {
        let has = |role: Role| present.contains(&role);
        let mut keys = Vec::new();
        let mut measures = Vec::new();

        let (count_label, decimals, primary_order, leading_keys) = match kind {
            SchemaKind::Commission => {
                keys.push(key(Role::ReceiverId, "ID"));
                if has(Role::Currency) {
                    keys.push(key(Role::Currency, "Currency"));
                }
                measures.push(measure("Total_Commission", MeasureExpr::Sum(Role::Commission)));
                // Commission reports list the currency after the total.
                ("Total_Orders", 2, COMMISSION_PRIMARY, 1)
            }
            SchemaKind::Ledger => {
                keys.push(key(Role::UserId, "ID"));
                if has(Role::Currency) {
                    keys.push(key(Role::Currency, "Currency"));
                }
                if has(Role::Amount) {
                    measures.push(measure("Total_Amount", MeasureExpr::Sum(Role::Amount)));
                }
                if has(Role::Deposit) {
                    measures.push(measure("Total_Deposit", MeasureExpr::Sum(Role::Deposit)));
                }
                if has(Role::Withdraw) {
                    measures.push(measure("Total_Withdraw", MeasureExpr::Sum(Role::Withdraw)));
                }
                if has(Role::Deposit) && has(Role::Withdraw) {
                    measures.push(measure(
                        "Net_Deposit",
                        MeasureExpr::Net {
                            plus: Role::Deposit,
                            minus: Role::Withdraw,
                        },
                    ));
                }
                if has(Role::Commission) {
                    measures.push(measure(
                        "Total_Commission",
                        MeasureExpr::Sum(Role::Commission),
                    ));
                }
                ("Transactions", 2, LEDGER_PRIMARY, keys.len())
            }
            SchemaKind::Volume => {
                keys.push(key(Role::Name, "Name"));
                if has(Role::Referrer) {
                    keys.push(key(Role::Referrer, "Referrer"));
                }
                let expr = if has(Role::Symbol) {
                    MeasureExpr::ContractAdjusted {
                        volume: Role::Volume,
                        symbol: Role::Symbol,
                    }
                } else {
                    MeasureExpr::Sum(Role::Volume)
                };
                measures.push(measure("Final_Vol", expr));
                ("Trades", 4, VOLUME_PRIMARY, keys.len())
            }
        };

        let primary = primary_order
            .iter()
            .find_map(|label| measures.iter().position(|m| m.label == *label))
            .unwrap_or(0);
        let layout = (0..leading_keys)
            .map(Column::Key)
            .chain((0..measures.len()).map(Column::Measure))
            .chain((leading_keys..keys.len()).map(Column::Key))
            .chain(std::iter::once(Column::Count))
            .collect();

        let plan = AggregationPlan {
            kind,
            keys,
            measures,
            layout,
            primary,
            count_label,
            decimals,
        };
        debug!(%kind, labels = ?plan.labels(), "aggregation plan synthesized");
        plan
    }

    /// Plans over the union of roles bound in any of `columns`.
    pub fn for_inputs<'a>(kind: SchemaKind, columns: impl IntoIterator<Item = &'a ColumnMap>) -> Self {
        let present: BTreeSet<Role> = columns
            .into_iter()
            .flat_map(|map| map.roles().map(|(role, _)| role))
            .collect();
        Self::synthesize(kind, &present)
    }

    pub fn primary_measure(&self) -> &Measure {
        &self.measures[self.primary]
    }

    pub fn column_label(&self, column: Column) -> &'static str {
        match column {
            Column::Key(idx) => self.keys[idx].label,
            Column::Measure(idx) => self.measures[idx].label,
            Column::Count => self.count_label,
        }
    }

    /// Output column labels in layout order.
    pub fn labels(&self) -> Vec<&'static str> {
        self.layout.iter().map(|c| self.column_label(*c)).collect()
    }

    /// Renders the plan as the equivalent SQL statement over `columns`.
    pub fn to_sql(&self, columns: &ColumnMap) -> String {
        let ident = |role: Role| quote_ident(columns.column_name(role).unwrap_or(role.label()));
        let cast = |role: Role| format!("CAST({} AS DOUBLE)", ident(role));

        let measure_sql = |m: &Measure| {
            let sum = match m.expr {
                MeasureExpr::Sum(role) => format!("SUM({})", cast(role)),
                MeasureExpr::ContractAdjusted { volume, symbol } => format!(
                    "SUM(CASE WHEN TRIM({}) LIKE '%{CENT_SYMBOL_SUFFIX}' THEN {} / {CENT_DIVISOR} ELSE {} END)",
                    ident(symbol),
                    cast(volume),
                    cast(volume),
                ),
                MeasureExpr::Net { plus, minus } => format!(
                    "SUM(COALESCE({}, 0) - COALESCE({}, 0))",
                    cast(plus),
                    cast(minus),
                ),
            };
            format!("ROUND({sum}, {}) AS {}", self.decimals, m.label)
        };

        let select: Vec<String> = self
            .layout
            .iter()
            .map(|column| match *column {
                Column::Key(idx) => {
                    let k = &self.keys[idx];
                    format!("{} AS {}", ident(k.role), k.label)
                }
                Column::Measure(idx) => measure_sql(&self.measures[idx]),
                Column::Count => format!("COUNT(*) AS {}", self.count_label),
            })
            .collect();

        let group_by: Vec<String> = self.keys.iter().map(|k| ident(k.role)).collect();

        format!(
            "SELECT\n    {}\nFROM source\nGROUP BY {}\nORDER BY {} DESC",
            select.join(",\n    "),
            group_by.join(", "),
            self.primary_measure().label,
        )
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_for(kind: SchemaKind, headers: &[&str]) -> (AggregationPlan, ColumnMap) {
        let columns = ColumnMap::resolve(headers);
        (AggregationPlan::for_inputs(kind, [&columns]), columns)
    }

    #[test]
    fn test_commission_plan_sql() {
        let (plan, columns) =
            plan_for(SchemaKind::Commission, &["receiver_id", "commission", "currency"]);
        assert_eq!(
            plan.to_sql(&columns),
            "SELECT\n    \"receiver_id\" AS ID,\n    \
             ROUND(SUM(CAST(\"commission\" AS DOUBLE)), 2) AS Total_Commission,\n    \
             \"currency\" AS Currency,\n    COUNT(*) AS Total_Orders\nFROM source\nGROUP BY \"receiver_id\", \"currency\"\n\
             ORDER BY Total_Commission DESC"
        );
        assert_eq!(
            plan.labels(),
            vec!["ID", "Total_Commission", "Currency", "Total_Orders"]
        );
        assert_eq!(
            plan.layout(),
            &vec![Column::Key(0), Column::Measure(0), Column::Key(1), Column::Count]
        );
    }

    #[test]
    fn test_commission_plan_without_currency() {
        let (plan, _) = plan_for(SchemaKind::Commission, &["receiver_id", "commission"]);
        assert_eq!(plan.labels(), vec!["ID", "Total_Commission", "Total_Orders"]);
    }

    #[test]
    fn test_ledger_plan_adds_only_present_fragments() {
        let (plan, _) = plan_for(SchemaKind::Ledger, &["user id", "amount"]);
        assert_eq!(plan.labels(), vec!["ID", "Total_Amount", "Transactions"]);
        assert_eq!(plan.primary_measure().label(), "Total_Amount");

        let (plan, _) = plan_for(SchemaKind::Ledger, &["user id", "withdraw", "commission"]);
        assert_eq!(
            plan.labels(),
            vec!["ID", "Total_Withdraw", "Total_Commission", "Transactions"]
        );
        assert_eq!(plan.primary_measure().label(), "Total_Commission");
    }

    #[test]
    fn test_ledger_plan_with_deposit_and_withdraw_orders_by_net() {
        let (plan, columns) = plan_for(
            SchemaKind::Ledger,
            &["User ID", "Deposit", "Withdraw", "Amount", "Currency"],
        );
        assert_eq!(
            plan.labels(),
            vec![
                "ID",
                "Currency",
                "Total_Amount",
                "Total_Deposit",
                "Total_Withdraw",
                "Net_Deposit",
                "Transactions"
            ]
        );
        assert_eq!(plan.primary_measure().label(), "Net_Deposit");
        let sql = plan.to_sql(&columns);
        assert!(sql.contains(
            "ROUND(SUM(COALESCE(CAST(\"Deposit\" AS DOUBLE), 0) - COALESCE(CAST(\"Withdraw\" AS DOUBLE), 0)), 2) AS Net_Deposit"
        ));
        assert!(sql.ends_with("ORDER BY Net_Deposit DESC"));
    }

    #[test]
    fn test_volume_plan_uses_cent_adjustment_when_symbol_present() {
        let (plan, columns) =
            plan_for(SchemaKind::Volume, &["Name", "Referrer", "Symbol", "Volume"]);
        assert_eq!(plan.labels(), vec!["Name", "Referrer", "Final_Vol", "Trades"]);
        assert_eq!(plan.decimals(), 4);
        assert!(plan.to_sql(&columns).contains(
            "SUM(CASE WHEN TRIM(\"Symbol\") LIKE '%.c' THEN CAST(\"Volume\" AS DOUBLE) / 100 ELSE CAST(\"Volume\" AS DOUBLE) END)"
        ));

        let (plan, _) = plan_for(SchemaKind::Volume, &["Name", "Volume"]);
        assert_eq!(
            plan.primary_measure().expr(),
            MeasureExpr::Sum(Role::Volume)
        );
    }

    #[test]
    fn test_plan_covers_roles_of_all_concatenated_inputs() {
        let first = ColumnMap::resolve(&["user id", "deposit"]);
        let second = ColumnMap::resolve(&["user id", "withdraw"]);
        let plan = AggregationPlan::for_inputs(SchemaKind::Ledger, [&first, &second]);
        assert_eq!(plan.primary_measure().label(), "Net_Deposit");
    }

    #[test]
    fn test_identifiers_are_quoted() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
