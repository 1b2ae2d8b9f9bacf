use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use keithley_iv_control::{ElectrometerModel, IvSweep, PlotStyle, PlotTarget, SweepConfig};
use tokio::time::timeout;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let host = args.get(1).map(String::as_str).unwrap_or("192.168.0.230");
    let resource = args.get(2).map(String::as_str).unwrap_or("gpib0,22");

    let mut config = SweepConfig::new(host, 0.0, 1.0);
    config.resource = resource.to_string();
    config.step_v = 0.1;
    config.delay_s = 2.0;

    println!(
        "{} steps, estimated runtime {:.0} s",
        config.step_count(),
        config.runtime_s()
    );

    let connect = IvSweep::connect(ElectrometerModel::K6487, config);
    let mut sweep = match timeout(Duration::from_secs(10), connect).await {
        Ok(Ok(sweep)) => sweep,
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            eprintln!("timed out connecting to the 6487 (10 s); check the gateway and GPIB cabling");
            return Ok(());
        }
    };

    let data = sweep.run().await?;
    println!("{} points acquired", data.current_a.len());

    let fit = sweep.fit()?;
    println!(
        "resistance: {:.4e} Ω (R² = {:.4}, std err {:.2e})",
        fit.resistance_ohms(),
        fit.r_squared(),
        fit.std_err
    );

    sweep.write_csv(Path::new("iv_6487.csv"))?;
    sweep.plot(
        true,
        &PlotStyle::default(),
        &PlotTarget::File("iv_6487.png".into()),
    )?;

    sweep.close().await?;
    Ok(())
}
