//! Scatter-plot rendering for the regression diagnostics.

use std::path::Path;

use plotters::prelude::*;

use crate::shell::Res;

pub struct Scatter<'a> {
    pub title: String,
    pub x_label: &'a str,
    pub y_label: &'a str,
    /// (x, y) per point
    pub points: &'a [(f64, f64)],
    /// Fitted line, as its two endpoints
    pub line: Option<[(f64, f64); 2]>,
    pub x_range: (f64, f64),
}

/// Render a scatter of data points with an optional fitted line overlaid.
pub fn scatter_with_fit(path: &Path, plot: &Scatter) -> Res<()> {
    let y_max = plot.points.iter()
        .map(|&(_, y)| y)
        .fold(1.0f64, f64::max);

    let root = BitMapBackend::new(path, (900, 700)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(&plot.title, ("sans-serif", 18))
        .margin(12)
        .x_label_area_size(45)
        .y_label_area_size(55)
        .build_cartesian_2d(plot.x_range.0..plot.x_range.1, 0.0..y_max * 1.05)?;

    chart.configure_mesh()
        .x_desc(plot.x_label)
        .y_desc(plot.y_label)
        .draw()?;

    chart.draw_series(
        plot.points.iter().map(|&(x, y)| Circle::new((x, y), 2, BLUE.mix(0.5).filled()))
    )?;

    if let Some(endpoints) = plot.line {
        chart.draw_series(LineSeries::new(endpoints, &RED))?;
    }

    root.present()?;
    Ok(())
}
