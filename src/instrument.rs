use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio_vxi11::DeviceClient;
use tracing::debug;

/// Upper bound on a single read from the device. A full 6517B staircase
/// sweep with three elements per sample is still well under this in ASCII
/// form.
const MAX_READ: u32 = 262_144;

/// Read timeout applied when the caller has not derived one from a sweep
/// configuration.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// One exclusively-owned electrometer session.
///
/// All traffic is plain SCPI text over the device link. The session is
/// invalid after [`Electrometer::close`]; controllers own their session for
/// their whole lifetime and release it explicitly.
pub struct Electrometer {
    inner: DeviceClient,
    read_timeout: Duration,
}

impl Electrometer {
    /// Open a session to an instrument behind a VXI-11 endpoint, e.g. a
    /// LAN/GPIB gateway exposing the meter as `gpib0,22`.
    pub async fn connect(host: &str, resource: &str) -> Result<Self> {
        let inner = DeviceClient::connect(host, resource).await?;
        Ok(Self {
            inner,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    pub async fn connect_with_timeout(
        host: &str,
        resource: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let inner = DeviceClient::connect_with_timeout(host, resource, timeout).await?;
        Ok(Self {
            inner,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    /// Bound on how long a blocking read may take before the run is
    /// abandoned. Sweep controllers set this to their full runtime budget so
    /// a long measurement is not cut short.
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Return the instrument to its power-on defaults.
    pub async fn reset(&mut self) -> Result<()> {
        self.write("*RST\n").await
    }

    pub async fn idn(&mut self) -> Result<String> {
        self.query("*IDN?\n").await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.inner.close().await?;
        Ok(())
    }

    pub(crate) async fn write(&mut self, command: &str) -> Result<()> {
        debug!("SCPI write  -> {}", command.trim_end_matches('\n'));
        self.inner
            .write(command.as_bytes())
            .await
            .with_context(|| format!("failed to send {command:?}"))?;
        Ok(())
    }

    pub(crate) async fn query(&mut self, command: &str) -> Result<String> {
        debug!("SCPI query  -> {}", command.trim_end_matches('\n'));
        self.write(command).await?;
        let read_timeout = self.read_timeout;
        let resp = tokio::time::timeout(read_timeout, self.inner.read(MAX_READ))
            .await
            .map_err(|_| anyhow!("device did not answer {command:?} within {read_timeout:?}"))??;
        let raw = String::from_utf8(resp)?;
        let trimmed = raw.trim_matches(char::from(0)).trim().to_string();

        debug!("SCPI result <- {}", trimmed);

        if trimmed.is_empty() {
            return Err(anyhow!("empty response from device for command {command:?}"));
        }

        Ok(trimmed)
    }

    /// Query returning a flat sequence of ASCII floats, as produced by
    /// `:FETC?` / `:TRACE:DATA?` under `:FORM:DATA ASC`.
    pub(crate) async fn query_values(&mut self, command: &str) -> Result<Vec<f64>> {
        let resp = self.query(command).await?;
        parse_ascii_values(&resp)
            .with_context(|| format!("unparseable numeric response to {command:?}"))
    }
}

fn parse_ascii_values(response: &str) -> Result<Vec<f64>> {
    response
        .split(',')
        .map(|field| {
            field
                .trim()
                .parse::<f64>()
                .map_err(|e| anyhow!("bad numeric field {field:?}: {e}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::parse_ascii_values;

    #[test]
    fn parses_comma_separated_floats() {
        let values = parse_ascii_values("1.5e-9, -2.0,0.25").unwrap();
        assert_eq!(values, vec![1.5e-9, -2.0, 0.25]);
    }

    #[test]
    fn rejects_non_numeric_fields() {
        assert!(parse_ascii_values("1.0,oops,2.0").is_err());
    }
}
