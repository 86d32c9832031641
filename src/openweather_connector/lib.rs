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

//! Ship OpenWeatherMap weather and air quality readings to InfluxDB and MQTT
//!
//! ## Features
//!
//! `openweather_connector` fetches current conditions and air pollution for a single location using
//! the [OpenWeatherMap] API, derives a handful of indices from them, and writes the results to
//! InfluxDB, an MQTT broker, or both. It runs once and exits, so it's meant to be run periodically
//! by cron or a systemd timer.
//!
//! Each run writes the following measurements.
//!
//! * `$wx_measurement_name{data_source, latitude, longitude}` - Temperature, feels like, humidity,
//!   absolute humidity, pressure, dew point, wind, visibility, cloud cover, and recommended maximum
//!   indoor humidity. Heat index, wind chill, and wet bulb temperature are included only when they
//!   can be computed for current conditions.
//! * `$pollution_measurement_name{data_source, latitude, longitude}` - OpenWeatherMap's 1-5 air
//!   quality index, US EPA AQI for particulates and for all pollutants, and raw concentrations.
//! * `ecobee_weather{thermostat_name, data_source}` - Optional. The same schema that
//!   [ecobee_influx_connector] writes for weather so that dashboards built for it keep working.
//!   This measurement is only written to InfluxDB, never to MQTT.
//!
//! When MQTT is configured, weather and pollution fields are published as JSON objects to
//! `$mqtt_topic_root/weather` and `$mqtt_topic_root/pollution` along with `source`, `latitude`,
//! `longitude`, and `timestamp` keys.
//!
//! [OpenWeatherMap]: https://openweathermap.org/api
//! [ecobee_influx_connector]: https://github.com/cdzombak/ecobee_influx_connector
//!
//! ## Build
//!
//! `openweather_connector` is a Rust program and must be built from source using a
//! [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! git clone git@github.com:56quarters/openweather_connector.git && cd openweather_connector
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! ### Configuration
//!
//! Settings are read from a JSON file, `./config.json` unless `--config` says otherwise. At
//! least one of `influx_server` or `mqtt_server` must be set.
//!
//! ```json
//! {
//!   "api_key": "your OpenWeatherMap API key",
//!   "lat": 42.36,
//!   "lon": -71.06,
//!   "wx_measurement_name": "weather",
//!   "pollution_measurement_name": "pollution",
//!   "influx_server": "http://influx.example.com:8086",
//!   "influx_org": "home",
//!   "influx_token": "...",
//!   "influx_bucket": "weather",
//!   "mqtt_server": "mqtt.example.com:1883",
//!   "mqtt_topic_root": "home/outside"
//! }
//! ```
//!
//! Other optional keys are `influx_user` and `influx_password` (used instead of a token),
//! `influx_health_check_disabled`, `write_ecobee_weather_measurement` with
//! `ecobee_thermostat_name`, `mqtt_user`, `mqtt_password`, `mqtt_client_id`, and
//! `wind_chill_strategy`. The wind chill strategy is `explicit` by default, meaning wind chill is
//! left out when it isn't defined (above 50F or below 3 MPH). Set it to `identity` to write the air
//! temperature instead. The `ecobee_weather` measurement always uses `identity`.
//!
//! ### Run
//!
//! ```text
//! ./openweather_connector --config /etc/openweather_connector/config.json
//! ```
//!
//! The exit status is non-zero when a run is aborted: bad configuration, failure to fetch data,
//! an unhealthy InfluxDB, no sink that could be opened, or an AQI that can't be computed. Points
//! that could not be written after retrying, and an unreachable MQTT broker when InfluxDB is also
//! configured, are logged but don't change the exit status.
//!

pub mod aqi;
pub mod assemble;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod influx;
pub mod mqtt;
pub mod point;
pub mod run;
pub mod units;
