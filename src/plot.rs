//! Timeline charts for one region's metric.
//!
//! The terminal chart is a fixed-size character grid, oldest day on the left, points
//! `*` joined by `.`. The file chart is an SVG drawn with plotters. Days without the
//! metric are skipped rather than drawn as zero.

use chrono::{Duration, NaiveDate};
use plotters::prelude::*;
use std::path::Path;

use crate::error::{EtlError, Result};
use crate::schema::{Metric, StoredRecord};

pub const DEFAULT_WIDTH: usize = 60;
pub const DEFAULT_HEIGHT: usize = 15;
pub const SVG_SIZE: (u32, u32) = (960, 540);

/// (date, value) for every record carrying `metric`, oldest first.
fn plottable(records: &[StoredRecord], metric: Metric) -> Vec<(NaiveDate, i64)> {
    let mut points: Vec<(NaiveDate, i64)> = records
        .iter()
        .filter_map(|r| r.record.metric(metric).map(|v| (r.record.date(), v)))
        .collect();
    points.sort_by_key(|(date, _)| *date);
    points
}

/// Value bounds for the y axis; a flat series gets one unit of room on each side.
fn value_range(points: &[(NaiveDate, i64)]) -> (f64, f64) {
    let min = points.iter().map(|(_, v)| *v).min().unwrap_or(0);
    let max = points.iter().map(|(_, v)| *v).max().unwrap_or(0);
    if max > min {
        (min as f64, max as f64)
    } else {
        (min as f64 - 1.0, max as f64 + 1.0)
    }
}

fn region_code(records: &[StoredRecord]) -> String {
    records
        .first()
        .map(|r| r.record.region_code().to_string())
        .unwrap_or_default()
}

/// Render `records` (any order) as a chart of `metric`.
pub fn render_timeline(records: &[StoredRecord], metric: Metric, width: usize, height: usize) -> String {
    let points = plottable(records, metric);
    if points.is_empty() {
        return format!("no {} data to plot\n", metric.label());
    }

    let width = width.max(10);
    let height = height.max(5);

    let first = points[0].0;
    let last = points[points.len() - 1].0;
    let span_days = (last - first).num_days();

    let y_min = points.iter().map(|(_, v)| *v).min().unwrap_or(0);
    let y_max = points.iter().map(|(_, v)| *v).max().unwrap_or(0);
    let (lo, hi) = value_range(&points);

    let mut grid = vec![vec![' '; width]; height];
    let cells: Vec<(usize, usize)> = points
        .iter()
        .map(|(date, v)| {
            let offset = (*date - first).num_days();
            (map_x(offset, span_days, width), map_y(*v as f64, lo, hi, height))
        })
        .collect();

    for pair in cells.windows(2) {
        draw_line(&mut grid, pair[0], pair[1], '.');
    }
    for &(x, y) in &cells {
        grid[y][x] = '*';
    }

    let code = region_code(records);
    let top_label = y_max.to_string();
    let bottom_label = y_min.to_string();
    let label_width = top_label.len().max(bottom_label.len());

    let mut out = String::new();
    out.push_str(&format!(
        "{code} {} | {first} .. {last} | {} points\n",
        metric.label(),
        points.len()
    ));
    for (i, row) in grid.into_iter().enumerate() {
        let label = if i == 0 {
            top_label.as_str()
        } else if i == height - 1 {
            bottom_label.as_str()
        } else {
            ""
        };
        out.push_str(&format!("{label:>label_width$} |"));
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }
    out.push_str(&format!("{:label_width$} +{}\n", "", "-".repeat(width)));

    let first_label = first.to_string();
    let last_label = last.to_string();
    let gap = width.saturating_sub(first_label.len() + last_label.len());
    out.push_str(&format!(
        "{:label_width$}  {first_label}{}{last_label}\n",
        "",
        " ".repeat(gap)
    ));
    out
}

/// Draw `records` as an SVG line chart at `path`. Returns the number of points drawn;
/// nothing is written when no record carries `metric`.
pub fn render_timeline_svg(records: &[StoredRecord], metric: Metric, path: &Path) -> Result<usize> {
    let points = plottable(records, metric);
    if points.is_empty() {
        return Ok(0);
    }
    draw_svg(&points, metric, &region_code(records), path)
        .map_err(|e| EtlError::Chart(format!("{}: {e}", path.display())))?;
    Ok(points.len())
}

fn draw_svg(
    points: &[(NaiveDate, i64)],
    metric: Metric,
    code: &str,
    path: &Path,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let first = points[0].0;
    let span_days = (points[points.len() - 1].0 - first).num_days().max(1);
    let (lo, hi) = value_range(points);
    let series: Vec<(i64, f64)> = points
        .iter()
        .map(|(date, v)| ((*date - first).num_days(), *v as f64))
        .collect();

    let root = SVGBackend::new(path, SVG_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(format!("{code} {}", metric.label()), ("sans-serif", 24))
        .margin(16)
        .set_label_area_size(LabelAreaPosition::Left, 90)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(0i64..span_days, lo..hi)?;

    chart
        .configure_mesh()
        .x_desc("date")
        .y_desc(metric.label())
        .x_label_formatter(&|offset| (first + Duration::days(*offset)).to_string())
        .y_label_formatter(&|v| format!("{v:.0}"))
        .draw()?;

    chart.draw_series(LineSeries::new(series.iter().copied(), &BLUE))?;
    chart.draw_series(series.iter().map(|&point| Circle::new(point, 3, BLUE.filled())))?;

    root.present()?;
    Ok(())
}

fn map_x(offset_days: i64, span_days: i64, width: usize) -> usize {
    if span_days <= 0 {
        return 0;
    }
    let u = (offset_days as f64 / span_days as f64).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // row 0 is the top, i.e. the maximum
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

/// Integer line drawing (Bresenham); never overwrites a non-blank cell.
fn draw_line(grid: &mut [Vec<char>], from: (usize, usize), to: (usize, usize), ch: char) {
    let (mut x0, mut y0) = (from.0 as isize, from.1 as isize);
    let (x1, y1) = (to.0 as isize, to.1 as isize);

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        let (x, y) = (x0 as usize, y0 as usize);
        if y < grid.len() && x < grid[0].len() && grid[y][x] == ' ' {
            grid[y][x] = ch;
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CanonicalRecord, Metrics};

    fn stored(date: &str, cases: Option<i64>) -> StoredRecord {
        let metrics = Metrics {
            cases_total: cases,
            ..Default::default()
        };
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
        StoredRecord {
            record: CanonicalRecord::new("WA", None, date, metrics).unwrap(),
            loaded_at: date.and_hms_opt(0, 0, 0).unwrap(),
        }
    }

    fn grid_lines(chart: &str, height: usize) -> Vec<&str> {
        chart.lines().skip(1).take(height).collect()
    }

    #[test]
    fn plots_one_star_per_point_with_extremes_on_edges() {
        // newest first, as the store returns them
        let records = vec![
            stored("2021-03-07", Some(30)),
            stored("2021-03-06", Some(20)),
            stored("2021-03-05", Some(10)),
        ];
        let chart = render_timeline(&records, Metric::Cases, 30, 10);
        let rows = grid_lines(&chart, 10);

        assert!(chart.starts_with("WA cases | 2021-03-05 .. 2021-03-07 | 3 points"));
        assert_eq!(rows.len(), 10);
        let stars: usize = rows.iter().map(|r| r.matches('*').count()).sum();
        assert_eq!(stars, 3);
        // max value on the top row at the far right, min on the bottom row at the far left
        assert!(rows[0].starts_with("30 |") && rows[0].ends_with('*'));
        assert!(rows[9].starts_with("10 |*"));
        assert!(chart.trim_end().ends_with("2021-03-07"));
    }

    #[test]
    fn absent_values_are_skipped() {
        let records = vec![stored("2021-03-07", None), stored("2021-03-06", Some(5))];
        let chart = render_timeline(&records, Metric::Cases, 20, 5);
        assert!(chart.contains("| 1 points"));
        assert_eq!(render_timeline(&records, Metric::Deaths, 20, 5), "no deaths data to plot\n");
    }

    #[test]
    fn svg_chart_is_written_with_caption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timeline.svg");
        let records = vec![
            stored("2021-03-07", Some(30)),
            stored("2021-03-06", None),
            stored("2021-03-05", Some(10)),
        ];

        assert_eq!(render_timeline_svg(&records, Metric::Cases, &path).unwrap(), 2);
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("WA cases"));
    }

    #[test]
    fn svg_chart_skips_file_without_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timeline.svg");
        let records = vec![stored("2021-03-07", Some(30))];

        assert_eq!(render_timeline_svg(&records, Metric::Deaths, &path).unwrap(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn flat_series_renders() {
        let records = vec![stored("2021-03-06", Some(7)), stored("2021-03-07", Some(7))];
        let chart = render_timeline(&records, Metric::Cases, 12, 5);
        let stars: usize = grid_lines(&chart, 5).iter().map(|r| r.matches('*').count()).sum();
        assert_eq!(stars, 2);
    }
}
