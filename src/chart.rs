//! SVG renderings of a summary: a grouped bar chart of the leading groups and
//! a squarified treemap of every positive group.

use std::{fmt::Write as _, fs, path::Path};

use anyhow::{Context, Result};
use rust_decimal::prelude::*;
use tracing::info;

use crate::models::{Summary, SummaryRow, format_decimal};

const WIDTH: f64 = 960.0;
const HEIGHT: f64 = 540.0;
const MARGIN_LEFT: f64 = 80.0;
const MARGIN_RIGHT: f64 = 140.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_BOTTOM: f64 = 110.0;
const FONT: &str = "font-family=\"sans-serif\"";

/// Plotly's default qualitative palette.
const PALETTE: [&str; 10] = [
    "#636EFA", "#EF553B", "#00CC96", "#AB63FA", "#FFA15A", "#19D3F3", "#FF6692", "#B6E880",
    "#FF97FF", "#FECB52",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn area(&self) -> f64 {
        self.w * self.h
    }
}

fn worst_ratio(row: &[f64], side: f64) -> f64 {
    let sum: f64 = row.iter().sum();
    let side2 = side * side;
    let sum2 = sum * sum;
    row.iter()
        .map(|&a| (side2 * a / sum2).max(sum2 / (side2 * a)))
        .fold(0.0, f64::max)
}

/// Squarified treemap layout. Returns one tile per value, in input order;
/// non-positive values get an empty tile.
pub fn squarify(values: &[f64], rect: Rect) -> Vec<Rect> {
    let empty = Rect {
        x: rect.x,
        y: rect.y,
        w: 0.0,
        h: 0.0,
    };
    let mut tiles = vec![empty; values.len()];
    let total: f64 = values.iter().filter(|v| **v > 0.0).sum();
    if total <= 0.0 || rect.area() <= 0.0 {
        return tiles;
    }

    let scale = rect.area() / total;
    let mut order: Vec<usize> = (0..values.len()).filter(|&i| values[i] > 0.0).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    let areas: Vec<f64> = order.iter().map(|&i| values[i] * scale).collect();

    let mut remaining = rect;
    let mut start = 0;
    while start < order.len() {
        let side = remaining.w.min(remaining.h);
        let mut end = start + 1;
        while end < order.len()
            && worst_ratio(&areas[start..=end], side) <= worst_ratio(&areas[start..end], side)
        {
            end += 1;
        }

        let row_area: f64 = areas[start..end].iter().sum();
        if remaining.w >= remaining.h {
            let width = row_area / remaining.h;
            let mut y = remaining.y;
            for (slot, area) in order[start..end].iter().zip(&areas[start..end]) {
                let h = area / width;
                tiles[*slot] = Rect {
                    x: remaining.x,
                    y,
                    w: width,
                    h,
                };
                y += h;
            }
            remaining.x += width;
            remaining.w -= width;
        } else {
            let height = row_area / remaining.w;
            let mut x = remaining.x;
            for (slot, area) in order[start..end].iter().zip(&areas[start..end]) {
                let w = area / height;
                tiles[*slot] = Rect {
                    x,
                    y: remaining.y,
                    w,
                    h: height,
                };
                x += w;
            }
            remaining.y += height;
            remaining.h -= height;
        }
        start = end;
    }
    tiles
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Series (colour) value of every row plus the distinct series in first-seen order.
fn series_of<'a>(summary: &Summary, rows: &'a [SummaryRow]) -> (Vec<&'a str>, Vec<&'a str>) {
    let key = summary.series_key();
    let per_row: Vec<&str> = rows
        .iter()
        .map(|row| {
            key.and_then(|idx| row.keys().get(idx))
                .map(String::as_str)
                .unwrap_or("")
        })
        .collect();
    let mut distinct: Vec<&str> = Vec::new();
    for s in &per_row {
        if !distinct.contains(s) {
            distinct.push(*s);
        }
    }
    (per_row, distinct)
}

fn colour(series: &[&str], name: &str) -> &'static str {
    let idx = series.iter().position(|s| *s == name).unwrap_or(0);
    PALETTE[idx % PALETTE.len()]
}

fn open_svg(out: &mut String, title: &str) -> std::fmt::Result {
    writeln!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}">"#
    )?;
    writeln!(out, r#"<rect width="100%" height="100%" fill="white"/>"#)?;
    writeln!(
        out,
        r#"<text x="{}" y="30" {FONT} font-size="18" text-anchor="middle">{}</text>"#,
        WIDTH / 2.0,
        escape(title)
    )
}

fn legend(out: &mut String, series: &[&str]) -> std::fmt::Result {
    if series.len() < 2 && series.first().is_none_or(|s| s.is_empty()) {
        return Ok(());
    }
    let x = WIDTH - MARGIN_RIGHT + 20.0;
    for (idx, name) in series.iter().enumerate() {
        let y = MARGIN_TOP + 20.0 * idx as f64;
        writeln!(
            out,
            r#"<rect x="{x}" y="{y}" width="12" height="12" fill="{}"/>"#,
            colour(series, name)
        )?;
        writeln!(
            out,
            r#"<text x="{}" y="{}" {FONT} font-size="12">{}</text>"#,
            x + 18.0,
            y + 10.0,
            escape(if name.is_empty() { "(blank)" } else { *name })
        )?;
    }
    Ok(())
}

/// Grouped bar chart of the `top` leading rows by the primary measure.
/// Bars sharing the first key sit side by side, coloured by currency.
pub fn bar_chart_svg(summary: &Summary, top: usize) -> Result<String> {
    let mut out = String::new();
    write_bar_chart(&mut out, summary, top).context("rendering bar chart")?;
    Ok(out)
}

fn write_bar_chart(out: &mut String, summary: &Summary, top: usize) -> std::fmt::Result {
    let measure = summary.plan().primary_measure().label();
    let decimals = summary.plan().decimals();
    let rows = &summary.rows()[..top.min(summary.rows().len())];
    let (row_series, series) = series_of(summary, rows);

    let mut categories: Vec<&str> = Vec::new();
    for row in rows {
        let id = row.keys().first().map(String::as_str).unwrap_or("");
        if !categories.contains(&id) {
            categories.push(id);
        }
    }

    let values: Vec<f64> = rows
        .iter()
        .map(|row| summary.primary_value(row).to_f64().unwrap_or(0.0))
        .collect();
    let max = values.iter().copied().fold(0.0, f64::max);
    let min = values.iter().copied().fold(0.0, f64::min);
    let span = if max - min > 0.0 { max - min } else { 1.0 };

    let plot_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let y_of = |v: f64| MARGIN_TOP + (max - v) / span * plot_h;
    let baseline = y_of(0.0);

    open_svg(out, &format!("Top {} IDs by {measure}", rows.len()))?;
    writeln!(
        out,
        r##"<line x1="{MARGIN_LEFT}" y1="{baseline:.2}" x2="{}" y2="{baseline:.2}" stroke="#444"/>"##,
        WIDTH - MARGIN_RIGHT
    )?;
    writeln!(
        out,
        r#"<text x="{MARGIN_LEFT}" y="{}" {FONT} font-size="11" text-anchor="end">{max:.2}</text>"#,
        MARGIN_TOP - 6.0,
    )?;

    if categories.is_empty() {
        return writeln!(out, "</svg>");
    }

    let band = plot_w / categories.len() as f64;
    let slot = band * 0.8 / series.len().max(1) as f64;
    for ((row, value), series_name) in rows.iter().zip(&values).zip(&row_series) {
        let id = row.keys().first().map(String::as_str).unwrap_or("");
        let cat = categories.iter().position(|c| *c == id).unwrap_or(0);
        let slot_idx = series.iter().position(|s| s == series_name).unwrap_or(0);
        let x = MARGIN_LEFT + band * cat as f64 + band * 0.1 + slot * slot_idx as f64;
        let top_y = y_of(value.max(0.0));
        let height = (y_of(value.min(0.0)) - top_y).max(0.0);
        writeln!(
            out,
            r#"<rect x="{x:.2}" y="{top_y:.2}" width="{:.2}" height="{height:.2}" fill="{}"><title>{}: {}</title></rect>"#,
            slot * 0.95,
            colour(&series, series_name),
            escape(&row.display_key()),
            format_decimal(&summary.primary_value(row), decimals)
        )?;
    }

    for (idx, id) in categories.iter().enumerate() {
        let x = MARGIN_LEFT + band * (idx as f64 + 0.5);
        let y = HEIGHT - MARGIN_BOTTOM + 14.0;
        writeln!(
            out,
            r#"<text x="{x:.2}" y="{y:.2}" {FONT} font-size="11" text-anchor="end" transform="rotate(-45 {x:.2} {y:.2})">{}</text>"#,
            escape(if id.is_empty() { "(blank)" } else { *id })
        )?;
    }

    legend(out, &series)?;
    writeln!(out, "</svg>")
}

/// Squarified treemap of every group with a positive primary value.
pub fn treemap_svg(summary: &Summary) -> Result<String> {
    let mut out = String::new();
    write_treemap(&mut out, summary).context("rendering treemap")?;
    Ok(out)
}

fn write_treemap(out: &mut String, summary: &Summary) -> std::fmt::Result {
    let measure = summary.plan().primary_measure().label();
    let decimals = summary.plan().decimals();
    let rows = summary.rows();
    let (row_series, series) = series_of(summary, rows);
    let values: Vec<f64> = rows
        .iter()
        .map(|row| summary.primary_value(row).to_f64().unwrap_or(0.0))
        .collect();

    let area = Rect {
        x: MARGIN_LEFT / 4.0,
        y: MARGIN_TOP,
        w: WIDTH - MARGIN_LEFT / 4.0 - MARGIN_RIGHT,
        h: HEIGHT - MARGIN_TOP - 20.0,
    };
    let tiles = squarify(&values, area);

    open_svg(out, &format!("{measure} by ID"))?;
    for ((row, tile), series_name) in rows.iter().zip(&tiles).zip(&row_series) {
        if tile.area() <= 0.0 {
            continue;
        }
        let label = row.display_key();
        let value = format_decimal(&summary.primary_value(row), decimals);
        writeln!(
            out,
            r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" fill="{}" stroke="white"><title>{}: {}</title></rect>"#,
            tile.x,
            tile.y,
            tile.w,
            tile.h,
            colour(&series, series_name),
            escape(&label),
            value
        )?;
        if tile.w > 60.0 && tile.h > 30.0 {
            writeln!(
                out,
                r#"<text x="{:.2}" y="{:.2}" {FONT} font-size="11" fill="white">{}</text>"#,
                tile.x + 4.0,
                tile.y + 14.0,
                escape(&label)
            )?;
            writeln!(
                out,
                r#"<text x="{:.2}" y="{:.2}" {FONT} font-size="10" fill="white">{value}</text>"#,
                tile.x + 4.0,
                tile.y + 27.0,
            )?;
        }
    }
    legend(out, &series)?;
    writeln!(out, "</svg>")
}

pub fn save_svg(path: &Path, svg: &str) -> Result<()> {
    fs::write(path, svg).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "chart written");
    Ok(())
}
