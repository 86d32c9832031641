// openweather_connector - Ship OpenWeatherMap readings to InfluxDB and MQTT
//
// Copyright 2024 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

//! US EPA Air Quality Index computed from pollutant concentrations.
//!
//! OpenWeatherMap reports every concentration in µg/m³. The EPA tables for gases are
//! expressed in ppm (CO) or ppb (NO2, SO2) so those are converted at 25C and one atmosphere
//! before lookup.

use std::fmt;
use thiserror::Error;

// Molar volume of an ideal gas at 25C and 1 atm, in liters.
const MOLAR_VOLUME: f64 = 24.45;
const CO_MOLAR_MASS: f64 = 28.01;
const NO2_MOLAR_MASS: f64 = 46.0055;
const SO2_MOLAR_MASS: f64 = 64.066;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AqiError {
    #[error("no pollutants supplied")]
    Empty,

    #[error("{pollutant} concentration {concentration} is outside the AQI range")]
    OutOfRange {
        pollutant: Pollutant,
        concentration: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pollutant {
    Pm25,
    Pm10,
    Co,
    No2,
    So2,
}

impl fmt::Display for Pollutant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pm25 => "PM2.5",
            Self::Pm10 => "PM10",
            Self::Co => "CO",
            Self::No2 => "NO2",
            Self::So2 => "SO2",
        };
        f.write_str(name)
    }
}

/// Concentration of a single pollutant in µg/m³.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Concentration {
    pub pollutant: Pollutant,
    pub micrograms: f64,
}

impl Concentration {
    pub fn new(pollutant: Pollutant, micrograms: f64) -> Self {
        Concentration { pollutant, micrograms }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    Good,
    Moderate,
    UnhealthyForSensitiveGroups,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl Category {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Moderate => "Moderate",
            Self::UnhealthyForSensitiveGroups => "Unhealthy for Sensitive Groups",
            Self::Unhealthy => "Unhealthy",
            Self::VeryUnhealthy => "Very Unhealthy",
            Self::Hazardous => "Hazardous",
        }
    }

    fn from_index(aqi: f64) -> Self {
        if aqi <= 50.0 {
            Self::Good
        } else if aqi <= 100.0 {
            Self::Moderate
        } else if aqi <= 150.0 {
            Self::UnhealthyForSensitiveGroups
        } else if aqi <= 200.0 {
            Self::Unhealthy
        } else if aqi <= 300.0 {
            Self::VeryUnhealthy
        } else {
            Self::Hazardous
        }
    }
}

/// Composite AQI: the highest index of any supplied pollutant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aqi {
    pub value: f64,
    pub category: Category,
    pub dominant: Pollutant,
}

// (concentration low, concentration high, index low, index high)
type Breakpoint = (f64, f64, f64, f64);

const PM25_TABLE: [Breakpoint; 7] = [
    (0.0, 12.0, 0.0, 50.0),
    (12.1, 35.4, 51.0, 100.0),
    (35.5, 55.4, 101.0, 150.0),
    (55.5, 150.4, 151.0, 200.0),
    (150.5, 250.4, 201.0, 300.0),
    (250.5, 350.4, 301.0, 400.0),
    (350.5, 500.4, 401.0, 500.0),
];

const PM10_TABLE: [Breakpoint; 7] = [
    (0.0, 54.0, 0.0, 50.0),
    (55.0, 154.0, 51.0, 100.0),
    (155.0, 254.0, 101.0, 150.0),
    (255.0, 354.0, 151.0, 200.0),
    (355.0, 424.0, 201.0, 300.0),
    (425.0, 504.0, 301.0, 400.0),
    (505.0, 604.0, 401.0, 500.0),
];

// ppm, 8-hour
const CO_TABLE: [Breakpoint; 7] = [
    (0.0, 4.4, 0.0, 50.0),
    (4.5, 9.4, 51.0, 100.0),
    (9.5, 12.4, 101.0, 150.0),
    (12.5, 15.4, 151.0, 200.0),
    (15.5, 30.4, 201.0, 300.0),
    (30.5, 40.4, 301.0, 400.0),
    (40.5, 50.4, 401.0, 500.0),
];

// ppb, 1-hour
const NO2_TABLE: [Breakpoint; 7] = [
    (0.0, 53.0, 0.0, 50.0),
    (54.0, 100.0, 51.0, 100.0),
    (101.0, 360.0, 101.0, 150.0),
    (361.0, 649.0, 151.0, 200.0),
    (650.0, 1249.0, 201.0, 300.0),
    (1250.0, 1649.0, 301.0, 400.0),
    (1650.0, 2049.0, 401.0, 500.0),
];

// ppb, 1-hour
const SO2_TABLE: [Breakpoint; 7] = [
    (0.0, 35.0, 0.0, 50.0),
    (36.0, 75.0, 51.0, 100.0),
    (76.0, 185.0, 101.0, 150.0),
    (186.0, 304.0, 151.0, 200.0),
    (305.0, 604.0, 201.0, 300.0),
    (605.0, 804.0, 301.0, 400.0),
    (805.0, 1004.0, 401.0, 500.0),
];

impl Pollutant {
    fn table(&self) -> &'static [Breakpoint] {
        match self {
            Self::Pm25 => &PM25_TABLE,
            Self::Pm10 => &PM10_TABLE,
            Self::Co => &CO_TABLE,
            Self::No2 => &NO2_TABLE,
            Self::So2 => &SO2_TABLE,
        }
    }

    /// Convert from µg/m³ to the unit of the EPA table and truncate to its precision.
    fn normalize(&self, micrograms: f64) -> f64 {
        match self {
            Self::Pm25 => truncate(micrograms, 1),
            Self::Pm10 => truncate(micrograms, 0),
            Self::Co => truncate(micrograms * MOLAR_VOLUME / CO_MOLAR_MASS / 1000.0, 1),
            Self::No2 => truncate(micrograms * MOLAR_VOLUME / NO2_MOLAR_MASS, 0),
            Self::So2 => truncate(micrograms * MOLAR_VOLUME / SO2_MOLAR_MASS, 0),
        }
    }
}

fn truncate(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).trunc() / scale
}

/// AQI for a single pollutant concentration, rounded to the nearest integer.
pub fn index(concentration: Concentration) -> Result<f64, AqiError> {
    let out_of_range = || AqiError::OutOfRange {
        pollutant: concentration.pollutant,
        concentration: concentration.micrograms,
    };

    if !concentration.micrograms.is_finite() || concentration.micrograms < 0.0 {
        return Err(out_of_range());
    }

    let c = concentration.pollutant.normalize(concentration.micrograms);
    let (c_lo, c_hi, i_lo, i_hi) = concentration
        .pollutant
        .table()
        .iter()
        .copied()
        .find(|(lo, hi, _, _)| c >= *lo && c <= *hi)
        .ok_or_else(out_of_range)?;

    Ok(((i_hi - i_lo) / (c_hi - c_lo) * (c - c_lo) + i_lo).round())
}

/// Composite AQI across all supplied pollutants.
///
/// Fails if any concentration falls outside of the EPA tables.
pub fn calculate(concentrations: &[Concentration]) -> Result<Aqi, AqiError> {
    let mut worst: Option<(f64, Pollutant)> = None;
    for c in concentrations {
        let value = index(*c)?;
        match worst {
            Some((v, _)) if v >= value => {}
            _ => worst = Some((value, c.pollutant)),
        }
    }

    worst
        .map(|(value, dominant)| Aqi {
            value,
            category: Category::from_index(value),
            dominant,
        })
        .ok_or(AqiError::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pm25_breakpoints() {
        assert_eq!(Ok(0.0), index(Concentration::new(Pollutant::Pm25, 0.0)));
        assert_eq!(Ok(50.0), index(Concentration::new(Pollutant::Pm25, 12.0)));
        assert_eq!(Ok(100.0), index(Concentration::new(Pollutant::Pm25, 35.4)));
        // 12.05 truncates to 12.0
        assert_eq!(Ok(50.0), index(Concentration::new(Pollutant::Pm25, 12.05)));
    }

    #[test]
    fn test_pm10_interpolation() {
        // (100 - 51) / (154 - 55) * (100 - 55) + 51 = 73.27
        assert_eq!(Ok(73.0), index(Concentration::new(Pollutant::Pm10, 100.9)));
    }

    #[test]
    fn test_gas_conversion() {
        // 229.3 µg/m³ of CO is about 0.2 ppm
        assert_eq!(Ok(2.0), index(Concentration::new(Pollutant::Co, 229.3)));
        // 100 µg/m³ of NO2 is about 53 ppb
        assert_eq!(Ok(50.0), index(Concentration::new(Pollutant::No2, 100.0)));
        assert_eq!(Ok(0.0), index(Concentration::new(Pollutant::So2, 0.5)));
    }

    #[test]
    fn test_out_of_range() {
        assert!(matches!(
            index(Concentration::new(Pollutant::Pm25, 600.0)),
            Err(AqiError::OutOfRange {
                pollutant: Pollutant::Pm25,
                ..
            })
        ));
        assert!(index(Concentration::new(Pollutant::Pm10, -1.0)).is_err());
        assert!(index(Concentration::new(Pollutant::So2, f64::NAN)).is_err());
    }

    #[test]
    fn test_composite_uses_worst_pollutant() {
        let aqi = calculate(&[
            Concentration::new(Pollutant::Pm25, 40.0),
            Concentration::new(Pollutant::Pm10, 20.0),
            Concentration::new(Pollutant::Co, 200.0),
        ])
        .unwrap();

        assert_eq!(Pollutant::Pm25, aqi.dominant);
        assert_eq!(Category::UnhealthyForSensitiveGroups, aqi.category);
        assert_eq!("Unhealthy for Sensitive Groups", aqi.category.name());
        assert!(aqi.value > 100.0 && aqi.value <= 150.0);
    }

    #[test]
    fn test_composite_fails_on_any_out_of_range() {
        let res = calculate(&[
            Concentration::new(Pollutant::Pm25, 5.0),
            Concentration::new(Pollutant::Pm10, 9000.0),
        ]);
        assert!(res.is_err());
        assert_eq!(Err(AqiError::Empty), calculate(&[]));
    }

    #[test]
    fn test_category_names() {
        assert_eq!("Good", Category::from_index(0.0).name());
        assert_eq!("Moderate", Category::from_index(51.0).name());
        assert_eq!("Hazardous", Category::from_index(450.0).name());
    }
}
