use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use keithley_iv_control::{
    Area, AreaUnit, ElectrometerModel, IvSweep, Length, LengthUnit, PlotStyle, PlotTarget,
    ResistivityUnit, SampleGeometry, SweepConfig,
};
use tokio::time::timeout;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let host = args.get(1).map(String::as_str).unwrap_or("192.168.0.230");
    let resource = args.get(2).map(String::as_str).unwrap_or("gpib0,27");

    // Downward sweep; the step sign is corrected to match automatically.
    let mut config = SweepConfig::new(host, 10.0, -10.0);
    config.resource = resource.to_string();
    config.step_v = 0.5;
    config.delay_s = 2.0;
    config.temperature = true;

    println!(
        "{} steps, estimated runtime {:.0} s",
        config.step_count(),
        config.runtime_s()
    );

    let connect = IvSweep::connect(ElectrometerModel::K6517b, config);
    let mut sweep = match timeout(Duration::from_secs(10), connect).await {
        Ok(Ok(sweep)) => sweep,
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            eprintln!("timed out connecting to the 6517B (10 s); check the gateway and GPIB cabling");
            return Ok(());
        }
    };

    let data = sweep.run().await?;
    println!("{} points acquired", data.current_a.len());
    if let Some(temperature) = &data.temperature_c {
        println!(
            "temperature span: {:.1} °C to {:.1} °C",
            temperature.iter().cloned().fold(f64::INFINITY, f64::min),
            temperature.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
        );
    }

    let fit = sweep.fit()?;
    println!(
        "resistance: {:.4e} Ω (R² = {:.4})",
        fit.resistance_ohms(),
        fit.r_squared()
    );

    let geometry = SampleGeometry {
        length: Length::new(1.0, LengthUnit::Centimetres),
        area: Area::new(0.25, AreaUnit::SquareCentimetres),
    };
    let rho = sweep.resistivity(&geometry, ResistivityUnit::TeraohmCentimetres)?;
    println!("resistivity: {rho}");

    sweep.write_csv(Path::new("iv_6517b.csv"))?;
    // Preview renders to a temp file and opens the system image viewer.
    sweep.plot(true, &PlotStyle::default(), &PlotTarget::Preview)?;

    sweep.close().await?;
    Ok(())
}
