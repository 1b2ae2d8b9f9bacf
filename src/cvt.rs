use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::instrument::Electrometer;
use crate::plot::{self, PlotStyle, PlotTarget};
use crate::storage;
use crate::sweep::{
    deinterleave, element_list_scpi, Element, DEFAULT_LINE_FREQUENCY_HZ, DEFAULT_NPLC,
    DEFAULT_RESOURCE,
};

const READ_TIMEOUT_MARGIN_S: f64 = 10.0;

/// Element list for time-series sampling; its length is the de-interleave
/// stride.
const ELEMENTS: [Element; 2] = [Element::Reading, Element::Timestamp];

pub const DEFAULT_SETTLE_S: f64 = 2.0;

/// Configuration for a current-vs-time run over a list of fixed test
/// voltages.
#[derive(Debug, Clone)]
pub struct CvtConfig {
    pub host: String,
    pub resource: String,
    /// Samples recorded at each test voltage.
    pub samples: u32,
    /// Test voltages, measured in the order given.
    pub volts: Vec<f64>,
    pub nplc: f64,
    /// Off time between voltages, letting the previous bias decay.
    pub settle_s: f64,
    pub line_frequency_hz: f64,
}

impl CvtConfig {
    pub fn new(host: impl Into<String>, volts: Vec<f64>, samples: u32) -> Self {
        Self {
            host: host.into(),
            resource: DEFAULT_RESOURCE.to_string(),
            samples,
            volts,
            nplc: DEFAULT_NPLC,
            settle_s: DEFAULT_SETTLE_S,
            line_frequency_hz: DEFAULT_LINE_FREQUENCY_HZ,
        }
    }

    /// Read-timeout budget for one voltage's burst of samples.
    pub fn read_timeout(&self) -> Duration {
        let acquisition = f64::from(self.samples) * self.nplc / self.line_frequency_hz;
        Duration::from_secs_f64(acquisition + READ_TIMEOUT_MARGIN_S)
    }
}

/// The (time, current) record taken at one test voltage. Times are re-based
/// so the first sample sits at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct VoltageSeries {
    pub volts: f64,
    pub times_s: Vec<f64>,
    pub currents_a: Vec<f64>,
}

impl VoltageSeries {
    /// Current rescaled into [0, 1]. Negative test voltages drive the
    /// current downward, so those sweeps are inverted to make every curve
    /// rise from 0 to 1; useful when reading off the time to steady state.
    pub fn normalized(&self) -> Result<Vec<f64>> {
        let mut low = f64::INFINITY;
        let mut high = f64::NEG_INFINITY;
        for &current in &self.currents_a {
            low = low.min(current);
            high = high.max(current);
        }
        let span = high - low;
        if !(span.is_finite() && span > 0.0) {
            return Err(anyhow!(
                "current series at {} V is constant; nothing to normalize",
                self.volts
            ));
        }
        Ok(self
            .currents_a
            .iter()
            .map(|current| {
                let unit = (current - low) / span;
                if self.volts < 0.0 { 1.0 - unit } else { unit }
            })
            .collect())
    }
}

/// Time-series current controller: steps through the configured voltages,
/// recording current against time at each.
pub struct CurrentVsTime {
    config: CvtConfig,
    session: Electrometer,
    series: Vec<VoltageSeries>,
}

impl CurrentVsTime {
    /// Validate the configuration and open one session for the whole run.
    pub async fn connect(config: CvtConfig) -> Result<Self> {
        ensure_cvt_config(&config)?;
        let mut session = Electrometer::connect(&config.host, &config.resource).await?;
        session.set_read_timeout(config.read_timeout());
        Ok(Self {
            config,
            session,
            series: Vec::new(),
        })
    }

    pub fn config(&self) -> &CvtConfig {
        &self.config
    }

    async fn program(&mut self, volts: f64) -> Result<()> {
        self.session.reset().await?;
        self.session.write(":SYST:ZCH OFF\n").await?;
        self.session.write(":SENS:FUNC 'CURR:DC'\n").await?;
        self.session.write(":SENS:CURR:RANG:AUTO ON\n").await?;
        self.session
            .write(&format!(":SENS:CURR:NPLC {}\n", self.config.nplc))
            .await?;
        self.session.write(":FORM:DATA ASC\n").await?;
        self.session
            .write(&format!(":FORM:ELEM {}\n", element_list_scpi(&ELEMENTS)))
            .await?;
        self.session.write(":TRIG:SOUR IMM\n").await?;
        self.session
            .write(&format!(":TRIG:COUN {}\n", self.config.samples))
            .await?;
        self.session
            .write(&format!(":SOUR:VOLT {volts}\n"))
            .await?;
        Ok(())
    }

    /// Run the full voltage list. Each voltage is sourced only for its own
    /// burst of samples, with the settling delay in between. Results from
    /// any previous run are discarded.
    pub async fn run(&mut self) -> Result<&[VoltageSeries]> {
        self.series.clear();

        let volts_list = self.config.volts.clone();
        let settle = Duration::from_secs_f64(self.config.settle_s);
        for (index, &volts) in volts_list.iter().enumerate() {
            debug!("sampling {} values at {volts} V", self.config.samples);
            self.program(volts).await?;
            self.session.write(":SOUR:VOLT:STAT ON\n").await?;
            self.session.query(":READ?\n").await?;
            let flat = self.session.query_values(":FETC?\n").await?;
            self.session.write(":SOUR:VOLT:STAT OFF\n").await?;

            if flat.is_empty() {
                return Err(anyhow!("device returned no samples at {volts} V"));
            }
            let mut channels = deinterleave(&flat, ELEMENTS.len())?;
            let times_s = rebase_times(&channels.remove(1));
            let currents_a = channels.remove(0);
            self.series.push(VoltageSeries {
                volts,
                times_s,
                currents_a,
            });

            if index + 1 < volts_list.len() {
                debug!("settling for {:?} before the next voltage", settle);
                tokio::time::sleep(settle).await;
            }
        }
        Ok(&self.series)
    }

    /// All recorded series, in the configured voltage order.
    pub fn series(&self) -> &[VoltageSeries] {
        &self.series
    }

    pub fn series_for(&self, volts: f64) -> Result<&VoltageSeries> {
        self.series
            .iter()
            .find(|series| series.volts == volts)
            .ok_or_else(|| anyhow!("no series recorded at {volts} V"))
    }

    /// Render every series on one chart, color-mapped by voltage.
    pub fn plot(
        &self,
        normalize: bool,
        style: &PlotStyle,
        target: &PlotTarget,
    ) -> Result<PathBuf> {
        if self.series.is_empty() {
            return Err(anyhow!("no series recorded yet; call run() first"));
        }
        plot::render_cvt(&self.series, normalize, style, target)
    }

    /// Write one voltage's record as headerless CSV: time, current.
    pub fn write_csv(&self, path: &Path, volts: f64) -> Result<()> {
        let series = self.series_for(volts)?;
        storage::write_columns(path, &[&series.times_s, &series.currents_a])
    }

    pub async fn close(&mut self) -> Result<()> {
        self.session.close().await
    }
}

/// Shift a device timestamp column so the first sample reads zero.
fn rebase_times(raw: &[f64]) -> Vec<f64> {
    let origin = raw.first().copied().unwrap_or(0.0);
    raw.iter().map(|time| time - origin).collect()
}

fn ensure_cvt_config(config: &CvtConfig) -> Result<()> {
    if config.volts.is_empty() {
        return Err(anyhow!("the voltage list must not be empty"));
    }
    if config.volts.iter().any(|volts| !volts.is_finite()) {
        return Err(anyhow!("test voltages must be finite"));
    }
    if config.samples == 0 {
        return Err(anyhow!("at least one sample per voltage is required"));
    }
    if !config.nplc.is_finite() || config.nplc <= 0.0 {
        return Err(anyhow!("integration time must be a positive NPLC count"));
    }
    if !config.settle_s.is_finite() || config.settle_s < 0.0 {
        return Err(anyhow!("settling delay must be non-negative"));
    }
    if !config.line_frequency_hz.is_finite() || config.line_frequency_hz <= 0.0 {
        return Err(anyhow!("line frequency must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(volts: f64, currents_a: Vec<f64>) -> VoltageSeries {
        let times_s = (0..currents_a.len()).map(|i| i as f64 * 0.02).collect();
        VoltageSeries {
            volts,
            times_s,
            currents_a,
        }
    }

    #[test]
    fn normalization_spans_zero_to_one() {
        let normalized = series(5.0, vec![1.0e-9, 5.0e-9, 3.0e-9]).normalized().unwrap();
        assert_eq!(normalized, vec![0.0, 1.0, 0.5]);
        assert!(normalized.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn negative_voltage_inverts_the_sweep() {
        // Under negative bias the current falls over time; the inverted
        // normalization makes the curve rise from 0 to 1 like the rest.
        let falling = series(-10.0, vec![-1.0e-9, -3.0e-9, -5.0e-9]);
        let normalized = falling.normalized().unwrap();
        assert_eq!(normalized, vec![0.0, 0.5, 1.0]);

        let rising = series(10.0, vec![1.0e-9, 3.0e-9, 5.0e-9]);
        assert_eq!(rising.normalized().unwrap(), vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn constant_series_cannot_be_normalized() {
        assert!(series(5.0, vec![2.0e-9; 4]).normalized().is_err());
        assert!(series(5.0, vec![]).normalized().is_err());
    }

    #[test]
    fn times_rebase_to_the_first_sample() {
        assert_eq!(
            rebase_times(&[100.5, 101.0, 101.5]),
            vec![0.0, 0.5, 1.0]
        );
        assert_eq!(rebase_times(&[]), Vec::<f64>::new());
    }

    #[test]
    fn read_timeout_scales_with_sample_count() {
        let config = CvtConfig::new("localhost", vec![1.0], 500);
        // 500 samples of 1 NPLC at 50 Hz plus the fixed margin.
        let expected = 500.0 * (1.0 / 50.0) + 10.0;
        assert!((config.read_timeout().as_secs_f64() - expected).abs() < 1e-9);
    }

    #[test]
    fn config_validation_names_the_fault() {
        assert!(ensure_cvt_config(&CvtConfig::new("localhost", vec![], 10)).is_err());
        assert!(ensure_cvt_config(&CvtConfig::new("localhost", vec![1.0], 0)).is_err());

        let mut bad_settle = CvtConfig::new("localhost", vec![1.0], 10);
        bad_settle.settle_s = -1.0;
        assert!(ensure_cvt_config(&bad_settle).is_err());

        assert!(ensure_cvt_config(&CvtConfig::new("localhost", vec![-10.0, 10.0], 10)).is_ok());
    }
}
