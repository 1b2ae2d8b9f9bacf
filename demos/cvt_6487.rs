use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use keithley_iv_control::{CurrentVsTime, CvtConfig, PlotStyle, PlotTarget};
use tokio::time::timeout;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let host = args.get(1).map(String::as_str).unwrap_or("192.168.0.230");
    let resource = args.get(2).map(String::as_str).unwrap_or("gpib0,22");

    let mut config = CvtConfig::new(host, vec![-10.0, -5.0, 5.0, 10.0], 200);
    config.resource = resource.to_string();
    config.settle_s = 2.0;

    let mut cvt = match timeout(Duration::from_secs(10), CurrentVsTime::connect(config)).await {
        Ok(Ok(cvt)) => cvt,
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            eprintln!("timed out connecting to the 6487 (10 s); check the gateway and GPIB cabling");
            return Ok(());
        }
    };

    cvt.run().await?;
    for series in cvt.series() {
        println!(
            "{} V: {} samples over {:.2} s",
            series.volts,
            series.currents_a.len(),
            series.times_s.last().copied().unwrap_or(0.0)
        );
    }

    cvt.write_csv(Path::new("cvt_10v.csv"), 10.0)?;
    // Normalized curves all rise 0 -> 1, which makes the settling time at
    // each voltage easy to read off.
    cvt.plot(
        true,
        &PlotStyle::default(),
        &PlotTarget::File("cvt_6487.png".into()),
    )?;

    cvt.close().await?;
    Ok(())
}
