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

use crate::aqi::{self, AqiError, Concentration, Pollutant};
use crate::client::{Coordinates, PollutionReading, Reading};
use crate::point::{MeasurementPoint, PointKind, SOURCE};
use crate::units::{self, FormulaError, WindChillStrategy};

pub const ECOBEE_MEASUREMENT: &str = "ecobee_weather";

const TAG_SOURCE: &str = "data_source";
const TAG_LATITUDE: &str = "latitude";
const TAG_LONGITUDE: &str = "longitude";
const TAG_THERMOSTAT: &str = "thermostat_name";

/// Fields whose computation may fail, keyed by field name.
///
/// Only successful values make it into a point. Failures are logged and dropped so that a
/// single out-of-domain index never keeps the rest of a reading from being written.
#[derive(Debug, Default)]
pub struct DerivedFields {
    entries: Vec<(&'static str, Result<f64, FormulaError>)>,
}

impl DerivedFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &'static str, value: Result<f64, FormulaError>) {
        self.entries.push((name, value));
    }

    /// Add every successfully computed field to the point.
    pub fn apply_to(self, mut point: MeasurementPoint) -> MeasurementPoint {
        for (name, value) in self.entries {
            match value {
                Ok(v) => point = point.field(name, v),
                Err(e @ FormulaError::NotApplicable { .. }) => {
                    tracing::debug!(
                        message = "omitting derived field",
                        measurement = %point.measurement,
                        field = name,
                        reason = %e,
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        message = "unable to compute derived field",
                        measurement = %point.measurement,
                        field = name,
                        error = %e,
                    );
                }
            }
        }

        point
    }
}

/// Builds measurement points from provider readings.
#[derive(Debug, Clone)]
pub struct Assembler {
    weather_measurement: String,
    pollution_measurement: String,
    ecobee_thermostat: Option<String>,
    wind_chill: WindChillStrategy,
    location: Coordinates,
}

impl Assembler {
    pub fn new(weather_measurement: &str, pollution_measurement: &str, location: Coordinates) -> Self {
        Assembler {
            weather_measurement: weather_measurement.to_owned(),
            pollution_measurement: pollution_measurement.to_owned(),
            ecobee_thermostat: None,
            wind_chill: WindChillStrategy::default(),
            location,
        }
    }

    /// Also build the ecobee-compatible point, tagged with the given thermostat name.
    pub fn with_ecobee(mut self, thermostat: &str) -> Self {
        self.ecobee_thermostat = Some(thermostat.to_owned());
        self
    }

    pub fn with_wind_chill(mut self, strategy: WindChillStrategy) -> Self {
        self.wind_chill = strategy;
        self
    }

    fn located(&self, kind: PointKind, measurement: &str, timestamp: i64) -> MeasurementPoint {
        MeasurementPoint::new(kind, measurement, timestamp)
            .tag(TAG_SOURCE, SOURCE)
            .tag(TAG_LATITUDE, &format!("{:.3}", self.location.lat))
            .tag(TAG_LONGITUDE, &format!("{:.3}", self.location.lon))
    }

    /// Every point to write for a weather reading: the ecobee point first if enabled.
    pub fn weather_points(&self, reading: &Reading) -> Vec<MeasurementPoint> {
        let mut points = Vec::with_capacity(2);
        if let Some(p) = self.ecobee(reading) {
            points.push(p);
        }
        points.push(self.weather(reading));
        points
    }

    pub fn weather(&self, reading: &Reading) -> MeasurementPoint {
        let temp_f = reading.temp_f;
        let temp_c = units::fahrenheit_to_celsius(temp_f);
        let feels_like_f = reading.feels_like_f;
        let humidity = units::clamp_humidity(reading.humidity);
        let wind_mph = reading.wind_speed_mph;

        let mut derived = DerivedFields::new();
        let dew_point = units::dew_point_f(temp_f, humidity.max(1));
        derived.insert("dew_point_f", dew_point.clone());
        derived.insert("dew_point_c", dew_point.map(units::fahrenheit_to_celsius));
        derived.insert("abs_humidity", units::absolute_humidity(temp_f, humidity));
        derived.insert("heat_index_f", units::heat_index_f(temp_f, humidity));
        derived.insert("heat_index_c", units::heat_index_c(temp_c, humidity));
        derived.insert("wind_chill_f", units::wind_chill_f(temp_f, wind_mph, self.wind_chill));
        derived.insert("wind_chill_c", units::wind_chill_c(temp_c, wind_mph, self.wind_chill));
        derived.insert("wet_bulb_f", units::wet_bulb_f(temp_f, humidity));
        derived.insert("wet_bulb_c", units::wet_bulb_c(temp_c, humidity));

        let point = self
            .located(PointKind::Weather, &self.weather_measurement, reading.timestamp)
            .field("temp_f", temp_f)
            .field("temp_c", temp_c)
            .field("rel_humidity", humidity)
            .field("feels_like_f", feels_like_f)
            .field("feels_like_c", units::fahrenheit_to_celsius(feels_like_f))
            .field("barometric_pressure_mb", reading.pressure_mb)
            .field("barometric_pressure_inHg", units::millibar_to_inhg(reading.pressure_mb))
            .field("wind_speed_mph", wind_mph)
            .field("wind_speed_kt", units::mph_to_knots(wind_mph))
            .field("wind_bearing", reading.wind_bearing)
            .field("visibility_mi", units::meters_to_miles(reading.visibility_m))
            .field(
                "recommended_max_indoor_humidity_f",
                units::indoor_humidity_recommendation_f(temp_f),
            )
            .field(
                "recommended_max_indoor_humidity_c",
                units::indoor_humidity_recommendation_c(temp_c),
            )
            .field("cloud_cover", reading.cloud_cover);

        derived.apply_to(point)
    }

    /// Point matching the `ecobee_weather` schema of ecobee_influx_connector, or `None` when
    /// no thermostat has been configured.
    pub fn ecobee(&self, reading: &Reading) -> Option<MeasurementPoint> {
        let thermostat = self.ecobee_thermostat.as_deref()?;
        let temp_f = reading.temp_f;
        let humidity = units::clamp_humidity(reading.humidity);

        let mut derived = DerivedFields::new();
        derived.insert("dew_point", units::dew_point_f(temp_f, humidity.max(1)));
        derived.insert(
            "wind_chill_f",
            units::wind_chill_f(temp_f, reading.wind_speed_mph, WindChillStrategy::Identity),
        );

        let point = MeasurementPoint::new(PointKind::Ecobee, ECOBEE_MEASUREMENT, reading.timestamp)
            .tag(TAG_THERMOSTAT, thermostat)
            .tag(TAG_SOURCE, SOURCE)
            .field("outdoor_temp", temp_f)
            .field("outdoor_humidity", humidity)
            .field("barometric_pressure_mb", reading.pressure_mb)
            .field("barometric_pressure_inHg", units::millibar_to_inhg(reading.pressure_mb))
            .field("wind_speed", reading.wind_speed_mph)
            .field("wind_bearing", reading.wind_bearing)
            .field("visibility_mi", units::meters_to_miles(reading.visibility_m))
            .field(
                "recommended_max_indoor_humidity",
                units::indoor_humidity_recommendation_f(temp_f),
            );

        Some(derived.apply_to(point))
    }

    /// Pollution point including US EPA AQI computed from particulates alone and from all
    /// pollutants with an EPA table. Unlike weather indices, AQI is required and any failure
    /// to compute it is returned.
    pub fn pollution(&self, reading: &PollutionReading) -> Result<MeasurementPoint, AqiError> {
        let particulates = [
            Concentration::new(Pollutant::Pm25, reading.pm2_5),
            Concentration::new(Pollutant::Pm10, reading.pm10),
        ];
        let all = [
            Concentration::new(Pollutant::Pm25, reading.pm2_5),
            Concentration::new(Pollutant::Pm10, reading.pm10),
            Concentration::new(Pollutant::Co, reading.co),
            Concentration::new(Pollutant::No2, reading.no2),
            Concentration::new(Pollutant::So2, reading.so2),
        ];

        let aqi_pm = aqi::calculate(&particulates)?;
        let aqi_all = aqi::calculate(&all)?;
        tracing::debug!(
            message = "calculated US AQI",
            aqi = aqi_all.value,
            category = aqi_all.category.name(),
            dominant = %aqi_all.dominant,
            aqi_pm = aqi_pm.value,
            dominant_pm = %aqi_pm.dominant,
        );

        Ok(self
            .located(PointKind::Pollution, &self.pollution_measurement, reading.timestamp)
            .field("aqi_1_5", reading.aqi)
            .field("aqi_us_pm", aqi_pm.value)
            .field("aqi_us_pm_name", aqi_pm.category.name())
            .field("aqi_us", aqi_all.value)
            .field("aqi_us_name", aqi_all.category.name())
            .field("co", reading.co)
            .field("no", reading.no)
            .field("no2", reading.no2)
            .field("o3", reading.o3)
            .field("so2", reading.so2)
            .field("pm25", reading.pm2_5)
            .field("pm10", reading.pm10)
            .field("nh3", reading.nh3))
    }
}
