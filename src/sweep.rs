use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::ValueEnum;
use tracing::debug;

use crate::fit::{linear_fit, LinearFit};
use crate::instrument::Electrometer;
use crate::plot::{self, PlotStyle, PlotTarget};
use crate::storage;
use crate::units::{self, Resistivity, ResistivityUnit, SampleGeometry};

/// Fixed settling margin added to the estimated runtime, matching the
/// instrument's own post-sweep housekeeping time.
const RUNTIME_MARGIN_S: f64 = 5.0;

/// Extra slack on top of the runtime budget before a blocking read is
/// declared dead.
const READ_TIMEOUT_MARGIN_S: f64 = 10.0;

pub const DEFAULT_RESOURCE: &str = "gpib0,22";
pub const DEFAULT_STEP_V: f64 = 0.1;
pub const DEFAULT_DELAY_S: f64 = 5.0;
pub const DEFAULT_NPLC: f64 = 1.0;
pub const DEFAULT_LINE_FREQUENCY_HZ: f64 = 50.0;

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ElectrometerModel {
    /// Keithley 6487 picoammeter / voltage source.
    #[value(name = "6487")]
    K6487,
    /// Keithley 6517B electrometer with the staircase test sequence and an
    /// optional external temperature channel.
    #[value(name = "6517b")]
    K6517b,
}

impl ElectrometerModel {
    pub fn label(self) -> &'static str {
        match self {
            ElectrometerModel::K6487 => "Keithley 6487",
            ElectrometerModel::K6517b => "Keithley 6517B",
        }
    }
}

/// One entry of the `:FORM:ELEM` output element list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    Reading,
    SourceVoltage,
    Temperature,
    Timestamp,
}

impl Element {
    fn as_scpi(self) -> &'static str {
        match self {
            Element::Reading => "READ",
            Element::SourceVoltage => "VSO",
            Element::Temperature => "ETEM",
            Element::Timestamp => "TIME",
        }
    }
}

/// Render an element list in the form the `:FORM:ELEM` command expects.
pub fn element_list_scpi(elements: &[Element]) -> String {
    elements
        .iter()
        .map(|e| e.as_scpi())
        .collect::<Vec<_>>()
        .join(",")
}

/// Split a flat device response into `stride` per-channel sequences.
///
/// The stride must be the per-sample value count derived from the configured
/// element list; any mismatch between the two is a correctness hazard, so a
/// flat length that is not an exact multiple of the stride is rejected
/// rather than truncated.
pub fn deinterleave(flat: &[f64], stride: usize) -> Result<Vec<Vec<f64>>> {
    if stride == 0 {
        return Err(anyhow!("de-interleave stride must be at least 1"));
    }
    if flat.len() % stride != 0 {
        return Err(anyhow!(
            "device returned {} values, not a multiple of the {} elements per sample",
            flat.len(),
            stride
        ));
    }
    let mut channels: Vec<Vec<f64>> = (0..stride)
        .map(|_| Vec::with_capacity(flat.len() / stride))
        .collect();
    for (index, value) in flat.iter().enumerate() {
        channels[index % stride].push(*value);
    }
    Ok(channels)
}

/// Everything needed to program one voltage sweep.
///
/// Construction fills in the defaults the meters are normally driven with;
/// fields are public so callers can adjust them before connecting.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub host: String,
    pub resource: String,
    pub start_v: f64,
    pub stop_v: f64,
    pub step_v: f64,
    /// Hold time at each step before the reading is taken, in seconds.
    pub delay_s: f64,
    /// Integration time in power-line cycles.
    pub nplc: f64,
    pub line_frequency_hz: f64,
    /// Record the 6517B's external temperature channel alongside each
    /// reading. Rejected for the 6487.
    pub temperature: bool,
}

impl SweepConfig {
    pub fn new(host: impl Into<String>, start_v: f64, stop_v: f64) -> Self {
        Self {
            host: host.into(),
            resource: DEFAULT_RESOURCE.to_string(),
            start_v,
            stop_v,
            step_v: DEFAULT_STEP_V,
            delay_s: DEFAULT_DELAY_S,
            nplc: DEFAULT_NPLC,
            line_frequency_hz: DEFAULT_LINE_FREQUENCY_HZ,
            temperature: false,
        }
    }

    /// Number of points the programmed sweep will produce, `floor(|stop -
    /// start| / |step|) + 1`. Meaningful only for a validated configuration.
    pub fn step_count(&self) -> u32 {
        ((self.stop_v - self.start_v) / self.step_v).abs().floor() as u32 + 1
    }

    /// The step magnitude carrying the sign of the sweep direction, so a
    /// step of the wrong polarity cannot stall the instrument. Positive when
    /// start and stop coincide.
    pub fn signed_step(&self) -> f64 {
        if self.stop_v < self.start_v {
            -self.step_v.abs()
        } else {
            self.step_v.abs()
        }
    }

    fn acquisition_s(&self) -> f64 {
        f64::from(self.step_count()) * (self.delay_s + self.nplc / self.line_frequency_hz)
    }

    /// Estimated wall-clock duration of a complete measurement cycle.
    pub fn runtime_s(&self) -> f64 {
        self.acquisition_s() + RUNTIME_MARGIN_S
    }

    /// Read-timeout budget sized so the blocking read survives the whole
    /// sweep.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.acquisition_s() + READ_TIMEOUT_MARGIN_S)
    }
}

/// De-interleaved result of one sweep. All columns have equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepData {
    pub voltage_v: Vec<f64>,
    pub current_a: Vec<f64>,
    pub temperature_c: Option<Vec<f64>>,
}

/// IV-sweep controller for both electrometer variants.
///
/// The 6487 runs an immediate-trigger voltage sweep the host reads back
/// directly; the 6517B arms its internal staircase test sequence, takes a
/// software trigger, and is polled after the estimated runtime.
pub struct IvSweep {
    model: ElectrometerModel,
    config: SweepConfig,
    elements: Vec<Element>,
    session: Electrometer,
    data: Option<SweepData>,
}

impl IvSweep {
    /// Validate the configuration, open the device session with a read
    /// timeout sized for the whole sweep, and program the instrument. The
    /// sweep itself does not start until [`IvSweep::run`].
    pub async fn connect(model: ElectrometerModel, config: SweepConfig) -> Result<Self> {
        ensure_sweep_config(model, &config)?;

        let mut session = Electrometer::connect(&config.host, &config.resource).await?;
        session.set_read_timeout(config.read_timeout());

        let elements = if config.temperature {
            vec![Element::Reading, Element::SourceVoltage, Element::Temperature]
        } else {
            vec![Element::Reading, Element::SourceVoltage]
        };

        let mut sweep = Self {
            model,
            config,
            elements,
            session,
            data: None,
        };
        sweep.program().await?;
        Ok(sweep)
    }

    async fn program(&mut self) -> Result<()> {
        debug!(
            "programming {} for a {} point sweep, {} V to {} V",
            self.model.label(),
            self.config.step_count(),
            self.config.start_v,
            self.config.stop_v
        );
        self.session.reset().await?;

        self.session.write(":SENS:FUNC 'CURR:DC'\n").await?;
        self.session.write(":SENS:CURR:RANG:AUTO ON\n").await?;
        self.session
            .write(&format!(":SENS:CURR:NPLC {}\n", self.config.nplc))
            .await?;

        match self.model {
            ElectrometerModel::K6487 => self.program_sweep().await?,
            ElectrometerModel::K6517b => self.program_test_sequence().await?,
        }

        self.session.write(":FORM:DATA ASC\n").await?;
        self.session
            .write(&format!(":FORM:ELEM {}\n", element_list_scpi(&self.elements)))
            .await?;

        match self.model {
            ElectrometerModel::K6487 => {
                self.session.write(":TRIG:SOUR IMM\n").await?;
                self.session
                    .write(&format!(":TRIG:COUN {}\n", self.config.step_count()))
                    .await?;
            }
            ElectrometerModel::K6517b => {
                // The 6517B counts triggers per buffered value, not per step.
                let count = self.config.step_count() as usize * self.elements.len();
                self.session
                    .write(&format!(":TRIG:COUN {count}\n"))
                    .await?;
            }
        }

        self.session.write("SYST:ZCH OFF\n").await?;
        if self.config.temperature {
            self.session.write("SYST:TSC ON\n").await?;
        }
        Ok(())
    }

    async fn program_sweep(&mut self) -> Result<()> {
        self.session
            .write(&format!(":SOUR:VOLT:SWE:STAR {}\n", self.config.start_v))
            .await?;
        self.session
            .write(&format!(":SOUR:VOLT:SWE:STOP {}\n", self.config.stop_v))
            .await?;
        self.session
            .write(&format!(":SOUR:VOLT:SWE:STEP {}\n", self.config.signed_step()))
            .await?;
        self.session
            .write(&format!(":SOUR:VOLT:SWE:DEL {}\n", self.config.delay_s))
            .await?;
        Ok(())
    }

    async fn program_test_sequence(&mut self) -> Result<()> {
        self.session
            .write(&format!(":TSEQ:STSW:STAR {}\n", self.config.start_v))
            .await?;
        self.session
            .write(&format!(":TSEQ:STSW:STOP {}\n", self.config.stop_v))
            .await?;
        self.session
            .write(&format!(":TSEQ:STSW:STEP {}\n", self.config.signed_step()))
            .await?;
        self.session
            .write(&format!(":TSEQ:STSW:STIME {}\n", self.config.delay_s))
            .await?;
        self.session.write(":TSEQ:TYPE STSW\n").await?;
        self.session.write(":TSEQ:TSO BUS\n").await?;
        Ok(())
    }

    /// Run the programmed sweep to completion and de-interleave the result.
    /// Any previous result is discarded; a failure leaves no partial data.
    pub async fn run(&mut self) -> Result<&SweepData> {
        self.data = None;

        let flat = match self.model {
            ElectrometerModel::K6487 => {
                self.session.write(":SOUR:VOLT:SWE:INIT\n").await?;
                // :READ? blocks until the last step has been measured.
                self.session.query(":READ?\n").await?;
                self.session.query_values(":FETC?\n").await?
            }
            ElectrometerModel::K6517b => {
                self.session.write(":TSEQ:ARM\n").await?;
                self.session.write("*TRG\n").await?;
                // The staircase runs inside the instrument; wait it out
                // before polling the buffer.
                let wait = Duration::from_secs_f64(self.config.runtime_s() + RUNTIME_MARGIN_S);
                debug!("waiting {:.0?} for the staircase sweep to finish", wait);
                tokio::time::sleep(wait).await;
                self.session.query_values(":TRACE:DATA?\n").await?
            }
        };

        if flat.is_empty() {
            return Err(anyhow!("device returned no sweep data"));
        }

        let mut channels = deinterleave(&flat, self.elements.len())?;
        // The meter interleaves values in its own fixed order (reading,
        // temperature, source voltage), not the order listed in :FORM:ELEM.
        let data = if self.config.temperature {
            let voltage_v = channels.remove(2);
            let temperature_c = channels.remove(1);
            let current_a = channels.remove(0);
            SweepData {
                voltage_v,
                current_a,
                temperature_c: Some(temperature_c),
            }
        } else {
            let voltage_v = channels.remove(1);
            let current_a = channels.remove(0);
            SweepData {
                voltage_v,
                current_a,
                temperature_c: None,
            }
        };

        debug!("{} points acquired", data.current_a.len());
        Ok(self.data.insert(data))
    }

    pub fn model(&self) -> ElectrometerModel {
        self.model
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn step_count(&self) -> u32 {
        self.config.step_count()
    }

    /// Estimated wall-clock duration of a complete measurement cycle.
    pub fn runtime_s(&self) -> f64 {
        self.config.runtime_s()
    }

    pub fn data(&self) -> Option<&SweepData> {
        self.data.as_ref()
    }

    fn acquired(&self) -> Result<&SweepData> {
        self.data
            .as_ref()
            .ok_or_else(|| anyhow!("no sweep data acquired yet; call run() first"))
    }

    /// Least-squares fit of current against source voltage.
    pub fn fit(&self) -> Result<LinearFit> {
        let data = self.acquired()?;
        linear_fit(&data.voltage_v, &data.current_a)
    }

    /// Sample resistance from the reciprocal slope of the IV fit.
    pub fn resistance_ohms(&self) -> Result<f64> {
        Ok(self.fit()?.resistance_ohms())
    }

    /// Bulk resistivity for a sample of known geometry, in the requested
    /// unit.
    pub fn resistivity(
        &self,
        geometry: &SampleGeometry,
        unit: ResistivityUnit,
    ) -> Result<Resistivity> {
        units::resistivity(self.resistance_ohms()?, geometry, unit)
    }

    /// Render the IV curve, optionally with the fitted line and its R² and
    /// resistance in the legend.
    pub fn plot(
        &self,
        with_fit: bool,
        style: &PlotStyle,
        target: &PlotTarget,
    ) -> Result<PathBuf> {
        let data = self.acquired()?;
        let fit = if with_fit { Some(self.fit()?) } else { None };
        plot::render_iv(&data.voltage_v, &data.current_a, fit.as_ref(), style, target)
    }

    /// Write the acquired columns as headerless CSV: voltage, current, and
    /// temperature when recorded.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let data = self.acquired()?;
        let mut columns: Vec<&[f64]> = vec![&data.voltage_v, &data.current_a];
        if let Some(temperature) = &data.temperature_c {
            columns.push(temperature);
        }
        storage::write_columns(path, &columns)
    }

    /// Release the device session. The controller keeps its data but can no
    /// longer talk to the instrument.
    pub async fn close(&mut self) -> Result<()> {
        self.session.close().await
    }
}

fn ensure_sweep_config(model: ElectrometerModel, config: &SweepConfig) -> Result<()> {
    if !config.start_v.is_finite() || !config.stop_v.is_finite() {
        return Err(anyhow!("sweep endpoints must be finite voltages"));
    }
    if !config.step_v.is_finite() || config.step_v == 0.0 {
        return Err(anyhow!("sweep step size must be a finite, non-zero voltage"));
    }
    if !config.delay_s.is_finite() || config.delay_s < 0.0 {
        return Err(anyhow!("step delay must be non-negative"));
    }
    if !config.nplc.is_finite() || config.nplc <= 0.0 {
        return Err(anyhow!("integration time must be a positive NPLC count"));
    }
    if !config.line_frequency_hz.is_finite() || config.line_frequency_hz <= 0.0 {
        return Err(anyhow!("line frequency must be positive"));
    }
    if config.temperature && model == ElectrometerModel::K6487 {
        return Err(anyhow!("the 6487 has no temperature channel"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(start: f64, stop: f64, step: f64) -> SweepConfig {
        let mut config = SweepConfig::new("localhost", start, stop);
        config.step_v = step;
        config
    }

    fn interleave(channels: &[&[f64]]) -> Vec<f64> {
        let mut flat = Vec::new();
        for index in 0..channels[0].len() {
            for channel in channels {
                flat.push(channel[index]);
            }
        }
        flat
    }

    #[test]
    fn step_count_matches_floor_formula() {
        assert_eq!(config(0.0, 1.0, 0.1).step_count(), 11);
        assert_eq!(config(0.0, 1.0, 0.3).step_count(), 4);
        assert_eq!(config(-5.0, 5.0, 0.5).step_count(), 21);
        assert_eq!(config(1.0, 0.0, -0.1).step_count(), 11);
    }

    #[test]
    fn step_count_is_at_least_one() {
        assert_eq!(config(2.0, 2.0, 0.1).step_count(), 1);
        assert_eq!(config(0.0, 0.05, 0.1).step_count(), 1);
    }

    #[test]
    fn signed_step_follows_sweep_direction() {
        assert_eq!(config(0.0, -1.0, 0.1).signed_step(), -0.1);
        assert_eq!(config(0.0, -1.0, -0.1).signed_step(), -0.1);
        assert_eq!(config(-1.0, 0.0, -0.1).signed_step(), 0.1);
        assert_eq!(config(-1.0, 0.0, 0.1).signed_step(), 0.1);
        assert_eq!(config(2.0, 2.0, 0.1).signed_step(), 0.1);
    }

    #[test]
    fn read_timeout_covers_the_whole_sweep() {
        let config = config(0.0, 1.0, 0.1);
        // 11 steps of 5 s hold plus 1 NPLC at 50 Hz, plus the fixed margin.
        let expected = 11.0 * (5.0 + 1.0 / 50.0) + 10.0;
        assert!((config.read_timeout().as_secs_f64() - expected).abs() < 1e-9);
        assert!((config.runtime_s() - (expected - 5.0)).abs() < 1e-9);
    }

    #[test]
    fn deinterleave_round_trips_stride_two() {
        let current = [0.1, 0.2, 0.3];
        let voltage = [0.0, 0.5, 1.0];
        let flat = interleave(&[&current, &voltage]);
        let channels = deinterleave(&flat, 2).unwrap();
        assert_eq!(channels[0], current);
        assert_eq!(channels[1], voltage);
        let rebuilt = interleave(&[&channels[0], &channels[1]]);
        assert_eq!(rebuilt, flat);
    }

    #[test]
    fn deinterleave_round_trips_stride_three() {
        let flat = [1.0, 20.0, 0.0, 2.0, 21.0, 0.5, 3.0, 22.0, 1.0];
        let channels = deinterleave(&flat, 3).unwrap();
        assert_eq!(channels[0], [1.0, 2.0, 3.0]);
        assert_eq!(channels[1], [20.0, 21.0, 22.0]);
        assert_eq!(channels[2], [0.0, 0.5, 1.0]);
        let rebuilt = interleave(&[&channels[0], &channels[1], &channels[2]]);
        assert_eq!(rebuilt, flat);
    }

    #[test]
    fn deinterleave_rejects_ragged_input() {
        assert!(deinterleave(&[1.0, 2.0, 3.0], 2).is_err());
        assert!(deinterleave(&[1.0], 0).is_err());
    }

    #[test]
    fn zero_to_one_volt_scenario() {
        let config = config(0.0, 1.0, 0.1);
        assert_eq!(config.step_count(), 11);

        let mut flat = Vec::new();
        for step in 0..11 {
            let voltage = f64::from(step) * 0.1;
            flat.push(voltage + 0.1); // current
            flat.push(voltage); // source voltage
        }
        let channels = deinterleave(&flat, 2).unwrap();
        assert_eq!(channels[0].len(), 11);
        assert_eq!(channels[1].len(), 11);
        assert_eq!(channels[0][0], 0.1);
        assert_eq!(channels[1][0], 0.0);
        assert_eq!(channels[0][10], 1.1);
        assert_eq!(channels[1][10], 1.0);
    }

    #[test]
    fn element_lists_render_verbatim() {
        assert_eq!(
            element_list_scpi(&[Element::Reading, Element::SourceVoltage]),
            "READ,VSO"
        );
        assert_eq!(
            element_list_scpi(&[
                Element::Reading,
                Element::SourceVoltage,
                Element::Temperature
            ]),
            "READ,VSO,ETEM"
        );
        assert_eq!(
            element_list_scpi(&[Element::Reading, Element::Timestamp]),
            "READ,TIME"
        );
    }

    #[test]
    fn config_validation_names_the_fault() {
        let zero_step = config(0.0, 1.0, 0.0);
        assert!(ensure_sweep_config(ElectrometerModel::K6487, &zero_step).is_err());

        let mut temperature = config(0.0, 1.0, 0.1);
        temperature.temperature = true;
        assert!(ensure_sweep_config(ElectrometerModel::K6487, &temperature).is_err());
        assert!(ensure_sweep_config(ElectrometerModel::K6517b, &temperature).is_ok());

        let mut bad_nplc = config(0.0, 1.0, 0.1);
        bad_nplc.nplc = 0.0;
        assert!(ensure_sweep_config(ElectrometerModel::K6517b, &bad_nplc).is_err());
    }
}
