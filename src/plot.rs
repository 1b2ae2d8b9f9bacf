use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use plotters::prelude::*;
use tracing::debug;

use crate::cvt::VoltageSeries;
use crate::fit::LinearFit;

/// Rendering defaults, passed explicitly to every render call instead of
/// living in shared mutable state.
#[derive(Debug, Clone)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub font_size: i32,
    pub background: RGBColor,
    pub point_color: RGBColor,
    pub fit_color: RGBColor,
    pub point_size: i32,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 900,
            height: 600,
            font_size: 24,
            background: WHITE,
            // navy points with a dark-orange fit line
            point_color: RGBColor(0, 0, 128),
            fit_color: RGBColor(255, 140, 0),
            point_size: 4,
        }
    }
}

/// Where a rendered chart ends up: a PNG at the given path, or a temporary
/// PNG opened in the system image viewer.
#[derive(Debug, Clone)]
pub enum PlotTarget {
    File(PathBuf),
    Preview,
}

impl PlotTarget {
    fn path(&self, default_name: &str) -> PathBuf {
        match self {
            PlotTarget::File(path) => path.clone(),
            PlotTarget::Preview => std::env::temp_dir().join(default_name),
        }
    }

    fn present(&self, path: &Path) -> Result<()> {
        debug!("chart written to {}", path.display());
        if matches!(self, PlotTarget::Preview) {
            opener::open(path)
                .with_context(|| format!("cannot open {} in the system viewer", path.display()))?;
        }
        Ok(())
    }
}

/// Scatter the IV data, optionally with the fitted line; the legend carries
/// the fit's R² and the resistance it implies.
pub fn render_iv(
    voltage: &[f64],
    current: &[f64],
    fit: Option<&LinearFit>,
    style: &PlotStyle,
    target: &PlotTarget,
) -> Result<PathBuf> {
    if voltage.is_empty() || voltage.len() != current.len() {
        return Err(anyhow!(
            "cannot plot {} voltages against {} currents",
            voltage.len(),
            current.len()
        ));
    }

    let path = target.path("iv_curve.png");
    {
        let root =
            BitMapBackend::new(&path, (style.width, style.height)).into_drawing_area();
        root.fill(&style.background)?;

        let x_range = padded_range(voltage);
        let y_range = padded_range(current);
        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .caption("IV Curve", ("sans-serif", style.font_size))
            .set_label_area_size(LabelAreaPosition::Left, 80)
            .set_label_area_size(LabelAreaPosition::Bottom, 45)
            .build_cartesian_2d(x_range.clone(), y_range)?;
        chart
            .configure_mesh()
            .x_desc("Voltage (V)")
            .y_desc("Current (A)")
            .draw()?;

        let point_color = style.point_color;
        chart
            .draw_series(
                voltage
                    .iter()
                    .zip(current)
                    .map(|(&v, &i)| Circle::new((v, i), style.point_size, point_color.filled())),
            )?
            .label("Datapoints")
            .legend(move |(x, y)| Circle::new((x + 10, y), 4, point_color.filled()));

        if let Some(fit) = fit {
            let fit_color = style.fit_color;
            let line = [x_range.start, x_range.end]
                .map(|x| (x, fit.slope * x + fit.intercept));
            chart
                .draw_series(LineSeries::new(line, &fit_color))?
                .label(format!(
                    "Fit: R² = {:.4}, R = {:.4e} Ω",
                    fit.r_squared(),
                    fit.resistance_ohms()
                ))
                .legend(move |(x, y)| {
                    PathElement::new(vec![(x, y), (x + 20, y)], fit_color)
                });
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK.mix(0.4))
            .draw()?;
        root.present()?;
    }
    target.present(&path)?;
    Ok(path)
}

/// One marker series per test voltage, colored by the voltage's position in
/// the configured range.
pub fn render_cvt(
    series: &[VoltageSeries],
    normalize: bool,
    style: &PlotStyle,
    target: &PlotTarget,
) -> Result<PathBuf> {
    if series.is_empty() {
        return Err(anyhow!("no series to plot"));
    }

    let values: Vec<Vec<f64>> = if normalize {
        series
            .iter()
            .map(VoltageSeries::normalized)
            .collect::<Result<_>>()?
    } else {
        series.iter().map(|s| s.currents_a.clone()).collect()
    };

    let mut volts_low = f64::INFINITY;
    let mut volts_high = f64::NEG_INFINITY;
    for s in series {
        volts_low = volts_low.min(s.volts);
        volts_high = volts_high.max(s.volts);
    }
    let volts_span = volts_high - volts_low;

    let all_times: Vec<f64> = series.iter().flat_map(|s| s.times_s.iter().copied()).collect();
    let all_values: Vec<f64> = values.iter().flatten().copied().collect();

    let path = target.path("cvt.png");
    {
        let root =
            BitMapBackend::new(&path, (style.width, style.height)).into_drawing_area();
        root.fill(&style.background)?;

        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .caption("Current vs Time", ("sans-serif", style.font_size))
            .set_label_area_size(LabelAreaPosition::Left, 80)
            .set_label_area_size(LabelAreaPosition::Bottom, 45)
            .build_cartesian_2d(padded_range(&all_times), padded_range(&all_values))?;
        chart
            .configure_mesh()
            .x_desc("Time [s]")
            .y_desc(if normalize { "Normalized Current" } else { "Current [A]" })
            .draw()?;

        for (s, value_column) in series.iter().zip(&values) {
            let position = if volts_span > 0.0 {
                (s.volts - volts_low) / volts_span
            } else {
                0.5
            };
            let color = viridis(position);
            chart
                .draw_series(
                    s.times_s
                        .iter()
                        .zip(value_column)
                        .map(|(&t, &v)| Circle::new((t, v), style.point_size, color.filled())),
                )?
                .label(format!("{} V", s.volts))
                .legend(move |(x, y)| Circle::new((x + 10, y), 4, color.filled()));
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK.mix(0.4))
            .draw()?;
        root.present()?;
    }
    target.present(&path)?;
    Ok(path)
}

/// Data range with a 5% margin so edge markers are not clipped.
fn padded_range(values: &[f64]) -> Range<f64> {
    let mut low = f64::INFINITY;
    let mut high = f64::NEG_INFINITY;
    for &value in values {
        low = low.min(value);
        high = high.max(value);
    }
    if !low.is_finite() || !high.is_finite() {
        return 0.0..1.0;
    }
    let span = high - low;
    let pad = if span > 0.0 {
        span * 0.05
    } else {
        low.abs().max(1.0) * 0.05
    };
    (low - pad)..(high + pad)
}

/// Viridis-like colormap over [0, 1], interpolated between a handful of
/// anchor colors.
fn viridis(position: f64) -> RGBColor {
    const ANCHORS: [(u8, u8, u8); 6] = [
        (68, 1, 84),
        (65, 68, 135),
        (42, 120, 142),
        (34, 168, 132),
        (122, 209, 81),
        (253, 231, 37),
    ];
    let scaled = position.clamp(0.0, 1.0) * (ANCHORS.len() - 1) as f64;
    let index = (scaled.floor() as usize).min(ANCHORS.len() - 2);
    let frac = scaled - index as f64;
    let (r0, g0, b0) = ANCHORS[index];
    let (r1, g1, b1) = ANCHORS[index + 1];
    let lerp = |a: u8, b: u8| (f64::from(a) + (f64::from(b) - f64::from(a)) * frac).round() as u8;
    RGBColor(lerp(r0, r1), lerp(g0, g1), lerp(b0, b1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_range_keeps_points_inside() {
        let range = padded_range(&[0.0, 1.0]);
        assert!(range.start < 0.0 && range.end > 1.0);

        // A single point still yields a non-empty range.
        let range = padded_range(&[3.0]);
        assert!(range.start < 3.0 && range.end > 3.0);

        let range = padded_range(&[]);
        assert!(range.start < range.end);
    }

    #[test]
    fn colormap_endpoints_match_the_anchors() {
        assert_eq!(viridis(0.0), RGBColor(68, 1, 84));
        assert_eq!(viridis(1.0), RGBColor(253, 231, 37));
        // Out-of-range positions clamp rather than wrap.
        assert_eq!(viridis(-2.0), viridis(0.0));
        assert_eq!(viridis(2.0), viridis(1.0));
    }

    #[test]
    fn mismatched_columns_are_rejected() {
        let style = PlotStyle::default();
        let target = PlotTarget::File(std::env::temp_dir().join("unused.png"));
        assert!(render_iv(&[1.0, 2.0], &[1.0], None, &style, &target).is_err());
        assert!(render_iv(&[], &[], None, &style, &target).is_err());
        assert!(render_cvt(&[], false, &style, &target).is_err());
    }
}
