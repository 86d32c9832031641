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

//! Unit conversions and derived meteorological indices.
//!
//! Inputs follow the units OpenWeatherMap reports in its imperial mode: temperatures in
//! degrees Fahrenheit, wind speed in miles per hour, pressure in millibar (hPa), and
//! visibility in meters. Celsius variants of the derived indices are provided alongside.

use serde::Deserialize;
use thiserror::Error;

const MB_PER_INHG: f64 = 33.864;
const METERS_PER_MILE: f64 = 1609.34;
const KNOTS_PER_MPH: f64 = 0.868_976;

/// Reason a derived quantity could not be computed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("{formula} is not applicable: {reason}")]
    NotApplicable { formula: &'static str, reason: String },

    #[error("invalid input for {formula}: {reason}")]
    InvalidInput { formula: &'static str, reason: String },
}

impl FormulaError {
    fn not_applicable(formula: &'static str, reason: impl Into<String>) -> Self {
        Self::NotApplicable {
            formula,
            reason: reason.into(),
        }
    }

    fn invalid(formula: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            formula,
            reason: reason.into(),
        }
    }
}

pub fn fahrenheit_to_celsius(temp_f: f64) -> f64 {
    (temp_f - 32.0) / 1.8
}

pub fn celsius_to_fahrenheit(temp_c: f64) -> f64 {
    temp_c * 1.8 + 32.0
}

pub fn millibar_to_inhg(pressure_mb: f64) -> f64 {
    pressure_mb / MB_PER_INHG
}

pub fn inhg_to_millibar(pressure_inhg: f64) -> f64 {
    pressure_inhg * MB_PER_INHG
}

pub fn meters_to_miles(meters: f64) -> f64 {
    meters / METERS_PER_MILE
}

pub fn mph_to_knots(mph: f64) -> f64 {
    mph * KNOTS_PER_MPH
}

pub fn knots_to_mph(knots: f64) -> f64 {
    knots / KNOTS_PER_MPH
}

/// Clamp a reported relative humidity to the 0-100 percent range.
pub fn clamp_humidity(percent: i64) -> u8 {
    percent.clamp(0, 100) as u8
}

/// Dew point in degrees F using the Magnus approximation.
///
/// Humidity is an integer percentage (0-100), not a fraction. A humidity of zero or less
/// has no dew point and results in an error.
pub fn dew_point_f(temp_f: f64, humidity: u8) -> Result<f64, FormulaError> {
    const A: f64 = 17.625;
    const B: f64 = 243.04;

    if humidity == 0 {
        return Err(FormulaError::invalid("dew point", "relative humidity must be above 0%"));
    }
    if humidity > 100 {
        return Err(FormulaError::invalid(
            "dew point",
            format!("relative humidity {}% is above 100%", humidity),
        ));
    }

    let t = fahrenheit_to_celsius(temp_f);
    let alpha = (f64::from(humidity) / 100.0).ln() + A * t / (B + t);
    Ok(celsius_to_fahrenheit((B * alpha) / (A - alpha)))
}

/// How wind chill behaves outside of the range where the formula is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindChillStrategy {
    /// Return the air temperature unchanged, matching ecobee_influx_connector.
    Identity,
    /// Report that wind chill is not applicable.
    #[default]
    Explicit,
}

/// Wind chill in degrees F for a temperature in degrees F and wind speed in MPH.
///
/// The NWS formula is only valid at or below 50 degrees F with winds of at least 3 MPH.
pub fn wind_chill_f(temp_f: f64, wind_mph: f64, strategy: WindChillStrategy) -> Result<f64, FormulaError> {
    if temp_f > 50.0 || wind_mph < 3.0 {
        return match strategy {
            WindChillStrategy::Identity => Ok(temp_f),
            WindChillStrategy::Explicit => Err(FormulaError::not_applicable(
                "wind chill",
                format!("requires <= 50F and >= 3 MPH, got {:.1}F at {:.1} MPH", temp_f, wind_mph),
            )),
        };
    }

    let v = wind_mph.powf(0.16);
    Ok(35.74 + (0.6215 * temp_f) - (35.75 * v) + (0.4275 * temp_f * v))
}

/// Wind chill in degrees C for a temperature in degrees C and wind speed in MPH.
pub fn wind_chill_c(temp_c: f64, wind_mph: f64, strategy: WindChillStrategy) -> Result<f64, FormulaError> {
    wind_chill_f(celsius_to_fahrenheit(temp_c), wind_mph, strategy).map(fahrenheit_to_celsius)
}

/// Heat index in degrees F using the NWS Rothfusz regression.
///
/// Only defined at or above 80 degrees F and 40% relative humidity.
pub fn heat_index_f(temp_f: f64, humidity: u8) -> Result<f64, FormulaError> {
    if !temp_f.is_finite() {
        return Err(FormulaError::invalid("heat index", "temperature is not finite"));
    }
    if humidity > 100 {
        return Err(FormulaError::invalid(
            "heat index",
            format!("relative humidity {}% is above 100%", humidity),
        ));
    }
    if temp_f < 80.0 || humidity < 40 {
        return Err(FormulaError::not_applicable(
            "heat index",
            format!("requires >= 80F and >= 40% humidity, got {:.1}F at {}%", temp_f, humidity),
        ));
    }

    let t = temp_f;
    let rh = f64::from(humidity);
    let mut hi = -42.379 + 2.049_015_23 * t + 10.143_331_27 * rh
        - 0.224_755_41 * t * rh
        - 0.006_837_83 * t * t
        - 0.054_817_17 * rh * rh
        + 0.001_228_74 * t * t * rh
        + 0.000_852_82 * t * rh * rh
        - 0.000_001_99 * t * t * rh * rh;

    if rh > 85.0 && t <= 87.0 {
        hi += ((rh - 85.0) / 10.0) * ((87.0 - t) / 5.0);
    }

    Ok(hi)
}

/// Heat index in degrees C for a temperature in degrees C.
pub fn heat_index_c(temp_c: f64, humidity: u8) -> Result<f64, FormulaError> {
    heat_index_f(celsius_to_fahrenheit(temp_c), humidity).map(fahrenheit_to_celsius)
}

/// Wet-bulb temperature in degrees C using Stull's 2011 approximation.
pub fn wet_bulb_c(temp_c: f64, humidity: u8) -> Result<f64, FormulaError> {
    if !temp_c.is_finite() {
        return Err(FormulaError::invalid("wet bulb", "temperature is not finite"));
    }
    if humidity > 100 {
        return Err(FormulaError::invalid(
            "wet bulb",
            format!("relative humidity {}% is above 100%", humidity),
        ));
    }

    let t = temp_c;
    let rh = f64::from(humidity);
    Ok(t * (0.151_977 * (rh + 8.313_659).sqrt()).atan() + (t + rh).atan() - (rh - 1.676_331).atan()
        + 0.003_918_38 * rh.powf(1.5) * (0.023_101 * rh).atan()
        - 4.686_035)
}

/// Wet-bulb temperature in degrees F.
pub fn wet_bulb_f(temp_f: f64, humidity: u8) -> Result<f64, FormulaError> {
    wet_bulb_c(fahrenheit_to_celsius(temp_f), humidity).map(celsius_to_fahrenheit)
}

/// Absolute humidity in grams of water vapor per cubic meter.
pub fn absolute_humidity(temp_f: f64, humidity: u8) -> Result<f64, FormulaError> {
    if humidity > 100 {
        return Err(FormulaError::invalid(
            "absolute humidity",
            format!("relative humidity {}% is above 100%", humidity),
        ));
    }

    let t = fahrenheit_to_celsius(temp_f);
    let saturation_hpa = 6.112 * ((17.67 * t) / (t + 243.5)).exp();
    Ok(saturation_hpa * f64::from(humidity) * 2.1674 / (273.15 + t))
}

// Outdoor temperature (F) at or above which each indoor humidity limit applies.
const INDOOR_HUMIDITY_STEPS: [(f64, u8); 7] = [
    (50.0, 50),
    (40.0, 45),
    (30.0, 40),
    (20.0, 35),
    (10.0, 30),
    (0.0, 25),
    (-10.0, 20),
];
const INDOOR_HUMIDITY_FLOOR: u8 = 15;

/// Maximum recommended indoor relative humidity (percent) to avoid condensation, given an
/// outdoor temperature in degrees F.
pub fn indoor_humidity_recommendation_f(outdoor_f: f64) -> u8 {
    INDOOR_HUMIDITY_STEPS
        .iter()
        .find(|(threshold, _)| outdoor_f >= *threshold)
        .map(|(_, limit)| *limit)
        .unwrap_or(INDOOR_HUMIDITY_FLOOR)
}

/// Same as `indoor_humidity_recommendation_f` with an outdoor temperature in degrees C.
pub fn indoor_humidity_recommendation_c(outdoor_c: f64) -> u8 {
    INDOOR_HUMIDITY_STEPS
        .iter()
        .find(|(threshold, _)| outdoor_c >= fahrenheit_to_celsius(*threshold))
        .map(|(_, limit)| *limit)
        .unwrap_or(INDOOR_HUMIDITY_FLOOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_temperature_round_trip() {
        for x in [-40.0, -17.5, 0.0, 32.0, 72.0, 98.6, 451.0] {
            assert!((celsius_to_fahrenheit(fahrenheit_to_celsius(x)) - x).abs() < EPSILON);
        }
        assert!((fahrenheit_to_celsius(212.0) - 100.0).abs() < EPSILON);
        assert!((fahrenheit_to_celsius(-40.0) - -40.0).abs() < EPSILON);
    }

    #[test]
    fn test_pressure_round_trip() {
        for y in [0.0, 28.5, 29.92, 30.1, 31.0] {
            assert!((millibar_to_inhg(inhg_to_millibar(y)) - y).abs() < EPSILON);
        }
        assert!((millibar_to_inhg(1013.0) - 29.913).abs() < 0.001);
    }

    #[test]
    fn test_distance_and_speed() {
        assert!((meters_to_miles(1609.34) - 1.0).abs() < EPSILON);
        assert!((meters_to_miles(10000.0) - 6.2137).abs() < 0.0001);
        assert!((knots_to_mph(mph_to_knots(12.5)) - 12.5).abs() < EPSILON);
        assert!((mph_to_knots(10.0) - 8.68976).abs() < 0.0001);
    }

    #[test]
    fn test_clamp_humidity() {
        assert_eq!(0, clamp_humidity(-5));
        assert_eq!(45, clamp_humidity(45));
        assert_eq!(100, clamp_humidity(104));
    }

    #[test]
    fn test_dew_point_zero_humidity() {
        assert!(matches!(
            dew_point_f(70.0, 0),
            Err(FormulaError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_dew_point_not_above_temperature() {
        for temp in [-20.0, 0.0, 32.0, 55.5, 72.0, 100.0] {
            for humidity in [1, 10, 45, 80, 99, 100] {
                let dp = dew_point_f(temp, humidity).unwrap();
                assert!(dp <= temp + 1e-6, "dew point {} above temp {} at {}%", dp, temp, humidity);
            }
        }

        assert!((dew_point_f(72.0, 100).unwrap() - 72.0).abs() < 1e-6);
        assert!((dew_point_f(72.0, 45).unwrap() - 49.5).abs() < 0.5);
    }

    #[test]
    fn test_wind_chill_identity_outside_range() {
        assert_eq!(Ok(72.0), wind_chill_f(72.0, 10.0, WindChillStrategy::Identity));
        assert_eq!(Ok(30.0), wind_chill_f(30.0, 2.0, WindChillStrategy::Identity));
        assert_eq!(Ok(50.5), wind_chill_f(50.5, 20.0, WindChillStrategy::Identity));
    }

    #[test]
    fn test_wind_chill_explicit_outside_range() {
        assert!(matches!(
            wind_chill_f(72.0, 10.0, WindChillStrategy::Explicit),
            Err(FormulaError::NotApplicable { .. })
        ));
        assert!(matches!(
            wind_chill_f(30.0, 2.9, WindChillStrategy::Explicit),
            Err(FormulaError::NotApplicable { .. })
        ));
        assert!(wind_chill_c(30.0, 10.0, WindChillStrategy::Explicit).is_err());
    }

    #[test]
    fn test_wind_chill_in_range() {
        // NWS wind chill chart: 30F at 10 MPH is 21F
        let identity = wind_chill_f(30.0, 10.0, WindChillStrategy::Identity).unwrap();
        let explicit = wind_chill_f(30.0, 10.0, WindChillStrategy::Explicit).unwrap();
        assert_eq!(identity, explicit);
        assert!((explicit - 21.2).abs() < 0.1);

        let chill_c = wind_chill_c(fahrenheit_to_celsius(30.0), 10.0, WindChillStrategy::Explicit).unwrap();
        assert!((celsius_to_fahrenheit(chill_c) - explicit).abs() < 1e-6);
    }

    #[test]
    fn test_heat_index_out_of_domain() {
        assert!(matches!(heat_index_f(72.0, 45), Err(FormulaError::NotApplicable { .. })));
        assert!(matches!(heat_index_f(90.0, 30), Err(FormulaError::NotApplicable { .. })));
        assert!(heat_index_c(20.0, 80).is_err());
    }

    #[test]
    fn test_heat_index_in_domain() {
        // NWS heat index chart: 90F at 60% is 100F
        assert!((heat_index_f(90.0, 60).unwrap() - 100.0).abs() < 1.0);
        let hi_c = heat_index_c(fahrenheit_to_celsius(90.0), 60).unwrap();
        assert!((celsius_to_fahrenheit(hi_c) - heat_index_f(90.0, 60).unwrap()).abs() < 1e-6);
    }

    #[test]
    fn test_wet_bulb() {
        // Stull's reference value: 20C at 50% is about 13.7C
        assert!((wet_bulb_c(20.0, 50).unwrap() - 13.7).abs() < 0.1);
        assert!(wet_bulb_f(72.0, 45).unwrap() < 72.0);
        assert!(wet_bulb_c(20.0, 101).is_err());
        assert!(wet_bulb_c(f64::NAN, 50).is_err());
    }

    #[test]
    fn test_absolute_humidity() {
        // 20C at 100% holds roughly 17.3 g/m^3
        let ah = absolute_humidity(celsius_to_fahrenheit(20.0), 100).unwrap();
        assert!((ah - 17.3).abs() < 0.2);
        assert_eq!(0.0, absolute_humidity(70.0, 0).unwrap());
        assert!(absolute_humidity(70.0, 120).is_err());
    }

    #[test]
    fn test_indoor_humidity_breakpoints() {
        let inputs = [50.0, 40.0, 30.0, 20.0, 10.0, 0.0, -10.0, -20.0];
        let expected = [50, 45, 40, 35, 30, 25, 20, 15];

        for (temp, want) in inputs.iter().zip(expected.iter()) {
            assert_eq!(*want, indoor_humidity_recommendation_f(*temp), "at {}F", temp);
            assert_eq!(
                *want,
                indoor_humidity_recommendation_c(fahrenheit_to_celsius(*temp)),
                "at {}F in C",
                temp
            );
        }

        assert_eq!(45, indoor_humidity_recommendation_f(49.9));
        assert_eq!(50, indoor_humidity_recommendation_f(95.0));
    }

    #[test]
    fn test_indoor_humidity_non_increasing() {
        let mut previous = u8::MAX;
        let mut temp = 70.0;
        while temp > -40.0 {
            let current = indoor_humidity_recommendation_f(temp);
            assert!(current <= previous);
            previous = current;
            temp -= 0.5;
        }
    }
}
