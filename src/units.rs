use std::fmt;

use anyhow::{anyhow, Result};
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum LengthUnit {
    #[value(name = "mm")]
    Millimetres,
    #[value(name = "cm")]
    Centimetres,
    #[value(name = "m")]
    Metres,
}

impl LengthUnit {
    fn metres(self) -> f64 {
        match self {
            LengthUnit::Millimetres => 1e-3,
            LengthUnit::Centimetres => 1e-2,
            LengthUnit::Metres => 1.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LengthUnit::Millimetres => "mm",
            LengthUnit::Centimetres => "cm",
            LengthUnit::Metres => "m",
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum AreaUnit {
    #[value(name = "mm2")]
    SquareMillimetres,
    #[value(name = "cm2")]
    SquareCentimetres,
    #[value(name = "m2")]
    SquareMetres,
}

impl AreaUnit {
    fn square_metres(self) -> f64 {
        match self {
            AreaUnit::SquareMillimetres => 1e-6,
            AreaUnit::SquareCentimetres => 1e-4,
            AreaUnit::SquareMetres => 1.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AreaUnit::SquareMillimetres => "mm²",
            AreaUnit::SquareCentimetres => "cm²",
            AreaUnit::SquareMetres => "m²",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Length {
    pub value: f64,
    pub unit: LengthUnit,
}

impl Length {
    pub fn new(value: f64, unit: LengthUnit) -> Self {
        Self { value, unit }
    }

    pub fn as_metres(&self) -> f64 {
        self.value * self.unit.metres()
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Area {
    pub value: f64,
    pub unit: AreaUnit,
}

impl Area {
    pub fn new(value: f64, unit: AreaUnit) -> Self {
        Self { value, unit }
    }

    pub fn as_square_metres(&self) -> f64 {
        self.value * self.unit.square_metres()
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.label())
    }
}

/// Dimensions of the sample under test: conduction length and the
/// cross-sectional area the current flows through.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleGeometry {
    pub length: Length,
    pub area: Area,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ResistivityUnit {
    #[value(name = "ohm-m")]
    OhmMetres,
    #[value(name = "ohm-cm")]
    OhmCentimetres,
    #[value(name = "megaohm-cm")]
    MegaohmCentimetres,
    #[value(name = "gigaohm-cm")]
    GigaohmCentimetres,
    #[value(name = "teraohm-cm")]
    TeraohmCentimetres,
}

impl ResistivityUnit {
    /// Ω·m per one of this unit.
    fn ohm_metres(self) -> f64 {
        match self {
            ResistivityUnit::OhmMetres => 1.0,
            ResistivityUnit::OhmCentimetres => 1e-2,
            ResistivityUnit::MegaohmCentimetres => 1e4,
            ResistivityUnit::GigaohmCentimetres => 1e7,
            ResistivityUnit::TeraohmCentimetres => 1e10,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResistivityUnit::OhmMetres => "Ω·m",
            ResistivityUnit::OhmCentimetres => "Ω·cm",
            ResistivityUnit::MegaohmCentimetres => "MΩ·cm",
            ResistivityUnit::GigaohmCentimetres => "GΩ·cm",
            ResistivityUnit::TeraohmCentimetres => "TΩ·cm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resistivity {
    pub value: f64,
    pub unit: ResistivityUnit,
}

impl fmt::Display for Resistivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4e} {}", self.value, self.unit.label())
    }
}

/// Bulk resistivity `ρ = R · A / L` for a measured resistance and sample
/// geometry, converted into the requested unit.
pub fn resistivity(
    resistance_ohms: f64,
    geometry: &SampleGeometry,
    unit: ResistivityUnit,
) -> Result<Resistivity> {
    let length_m = geometry.length.as_metres();
    let area_m2 = geometry.area.as_square_metres();
    if !(length_m.is_finite() && length_m > 0.0) {
        return Err(anyhow!("sample length must be positive, got {}", geometry.length));
    }
    if !(area_m2.is_finite() && area_m2 > 0.0) {
        return Err(anyhow!("sample area must be positive, got {}", geometry.area));
    }

    let ohm_metres = resistance_ohms * area_m2 / length_m;
    Ok(Resistivity {
        value: ohm_metres / unit.ohm_metres(),
        unit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_cube() -> SampleGeometry {
        SampleGeometry {
            length: Length::new(1.0, LengthUnit::Centimetres),
            area: Area::new(1.0, AreaUnit::SquareCentimetres),
        }
    }

    #[test]
    fn kiloohm_unit_cube_is_a_kiloohm_centimetre() {
        let rho = resistivity(1.0e3, &unit_cube(), ResistivityUnit::OhmCentimetres).unwrap();
        assert!((rho.value - 1.0e3).abs() < 1e-9);

        let rho = resistivity(1.0e3, &unit_cube(), ResistivityUnit::OhmMetres).unwrap();
        assert!((rho.value - 10.0).abs() < 1e-12);
    }

    #[test]
    fn teraohm_scale_conversion() {
        // A 1 TΩ reading across a unit cube is 1 TΩ·cm.
        let rho = resistivity(1.0e12, &unit_cube(), ResistivityUnit::TeraohmCentimetres).unwrap();
        assert!((rho.value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn mixed_units_are_converted_before_the_ratio() {
        let geometry = SampleGeometry {
            length: Length::new(5.0, LengthUnit::Millimetres),
            area: Area::new(2.0, AreaUnit::SquareCentimetres),
        };
        // 1 MΩ · 2e-4 m² / 5e-3 m = 4e4 Ω·m
        let rho = resistivity(1.0e6, &geometry, ResistivityUnit::OhmMetres).unwrap();
        assert!((rho.value - 4.0e4).abs() < 1e-6);
    }

    #[test]
    fn degenerate_geometry_is_rejected() {
        let mut geometry = unit_cube();
        geometry.length.value = 0.0;
        assert!(resistivity(1.0, &geometry, ResistivityUnit::OhmMetres).is_err());

        let mut geometry = unit_cube();
        geometry.area.value = -1.0;
        assert!(resistivity(1.0, &geometry, ResistivityUnit::OhmMetres).is_err());
    }
}
