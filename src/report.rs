use std::io::Write;

use anyhow::Result;
use rust_decimal::prelude::*;

use crate::{
    models::{Summary, format_decimal},
    plan::Column,
};

const BAR_WIDTH: usize = 40;
const POSITIVE_BAR: char = '█';
const NEGATIVE_BAR: char = '▒';

/// Inserts `,` between thousands of the integer part of a plain number.
pub fn with_thousands(number: &str) -> String {
    let (sign, rest) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (int, frac) = match rest.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (rest, None),
    };

    let mut grouped = String::with_capacity(int.len() + int.len() / 3);
    for (idx, c) in int.chars().enumerate() {
        if idx > 0 && (int.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    match frac {
        Some(frac) => format!("{sign}{grouped}.{frac}"),
        None => format!("{sign}{grouped}"),
    }
}

fn metrics<W: Write>(summary: &Summary, out: &mut W) -> Result<()> {
    let plan = summary.plan();
    let measure = plan.primary_measure().label();

    writeln!(out, "Schema:        {}", plan.kind())?;
    writeln!(
        out,
        "Distinct IDs:  {}",
        with_thousands(&summary.distinct_ids().to_string())
    )?;
    writeln!(
        out,
        "Total rows:    {}",
        with_thousands(&summary.total_rows().to_string())
    )?;
    for (currency, total) in summary.totals_by_currency()? {
        writeln!(
            out,
            "{measure} {currency}: {}",
            with_thousands(&format_decimal(&total, plan.decimals()))
        )?;
    }
    if summary.skipped_cells() > 0 {
        writeln!(
            out,
            "Warning: {} non-numeric cells counted as zero",
            summary.skipped_cells()
        )?;
    }
    Ok(())
}

fn bar_chart<W: Write>(summary: &Summary, top: usize, out: &mut W) -> Result<()> {
    let rows = &summary.rows()[..top.min(summary.rows().len())];
    let decimals = summary.plan().decimals();
    let labels: Vec<String> = rows.iter().map(|row| row.display_key()).collect();
    let label_width = labels.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let largest = rows
        .iter()
        .map(|row| summary.primary_value(row).abs())
        .max()
        .unwrap_or(Decimal::ZERO);

    writeln!(
        out,
        "Top {} IDs by {}",
        rows.len(),
        summary.plan().primary_measure().label()
    )?;
    for (row, label) in rows.iter().zip(&labels) {
        let value = summary.primary_value(row);
        let length = if largest.is_zero() {
            0
        } else {
            (value.abs() / largest * Decimal::from(BAR_WIDTH))
                .round()
                .to_usize()
                .unwrap_or(0)
        };
        let glyph = if value.is_sign_negative() {
            NEGATIVE_BAR
        } else {
            POSITIVE_BAR
        };
        let bar: String = std::iter::repeat_n(glyph, length).collect();
        writeln!(
            out,
            "{label:<label_width$}  {bar:<width$} {}",
            with_thousands(&format_decimal(&value, decimals)),
            width = BAR_WIDTH,
        )?;
    }
    Ok(())
}

fn table<W: Write>(summary: &Summary, top: usize, out: &mut W) -> Result<()> {
    let plan = summary.plan();
    let labels = plan.labels();
    let cells: Vec<Vec<String>> = summary
        .rows()
        .iter()
        .take(top)
        .map(|row| summary.format_row(row))
        .collect();

    let widths: Vec<usize> = labels
        .iter()
        .enumerate()
        .map(|(idx, label)| {
            cells
                .iter()
                .filter_map(|row| row.get(idx))
                .map(|cell| cell.chars().count())
                .chain(std::iter::once(label.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |fields: Vec<&str>| -> String {
        fields
            .iter()
            .zip(&widths)
            .zip(plan.layout())
            .map(|((field, &width), column)| match column {
                Column::Key(_) => format!("{field:<width$}"),
                Column::Measure(_) | Column::Count => format!("{field:>width$}"),
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    writeln!(out, "{}", line(labels.clone()))?;
    writeln!(
        out,
        "{}",
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  ")
    )?;
    for row in &cells {
        writeln!(out, "{}", line(row.iter().map(String::as_str).collect()))?;
    }
    if summary.rows().len() > top {
        writeln!(out, "... {} more rows", summary.rows().len() - top)?;
    }
    Ok(())
}

/// Prints the dashboard: metrics, a text bar chart of the top groups and
/// the leading rows of the summary table.
pub fn render<W: Write>(summary: &Summary, top: usize, out: &mut W) -> Result<()> {
    metrics(summary, out)?;
    if summary.rows().is_empty() {
        writeln!(out, "\nNo data rows.")?;
        return Ok(());
    }
    writeln!(out)?;
    bar_chart(summary, top, out)?;
    writeln!(out)?;
    table(summary, top, out)?;
    Ok(())
}
