pub mod cvt;
pub mod fit;
pub mod instrument;
pub mod plot;
pub mod storage;
pub mod sweep;
pub mod units;

// Re-export the primary types so users can depend on the crate
// without knowing the internal module layout.
pub use cvt::{CurrentVsTime, CvtConfig, VoltageSeries};
pub use fit::{linear_fit, LinearFit};
pub use instrument::Electrometer;
pub use plot::{PlotStyle, PlotTarget};
pub use sweep::{ElectrometerModel, IvSweep, SweepConfig, SweepData};
pub use units::{
    Area, AreaUnit, Length, LengthUnit, Resistivity, ResistivityUnit, SampleGeometry,
};
