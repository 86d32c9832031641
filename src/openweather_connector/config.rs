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

use crate::client::Coordinates;
use crate::units::WindChillStrategy;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "https://api.openweathermap.org/";
const DEFAULT_MQTT_CLIENT_ID: &str = "openweather_connector";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("unable to parse config file {path}: {source}")]
    Parse { path: String, source: serde_json::Error },

    #[error("{0} must be set in the config file")]
    Missing(&'static str),

    #[error("ecobee_thermostat_name must be set in the config file if write_ecobee_weather_measurement is set")]
    MissingThermostat,

    #[error("at least one of influx_server or mqtt_server must be set in the config file")]
    NoSinks,

    #[error("invalid mqtt_server {0}, expected host or host:port")]
    InvalidBroker(String),
}

/// Contents of the JSON configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_key: String,
    #[serde(rename = "owm_api_url")]
    pub api_url: Option<String>,
    pub lat: f64,
    pub lon: f64,

    pub wx_measurement_name: String,
    pub pollution_measurement_name: String,
    pub wind_chill_strategy: WindChillStrategy,
    pub write_ecobee_weather_measurement: bool,
    pub ecobee_thermostat_name: String,

    pub influx_server: String,
    pub influx_org: String,
    pub influx_user: String,
    pub influx_password: String,
    pub influx_token: String,
    pub influx_bucket: String,
    pub influx_health_check_disabled: bool,

    pub mqtt_server: String,
    pub mqtt_user: String,
    pub mqtt_password: String,
    pub mqtt_client_id: String,
    pub mqtt_topic_root: String,
}

impl Settings {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;

        serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Check that everything required for a run is present. Performs no I/O.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::Missing("api_key"));
        }
        if self.wx_measurement_name.is_empty() {
            return Err(ConfigError::Missing("wx_measurement_name"));
        }
        if self.pollution_measurement_name.is_empty() {
            return Err(ConfigError::Missing("pollution_measurement_name"));
        }
        if self.write_ecobee_weather_measurement && self.ecobee_thermostat_name.is_empty() {
            return Err(ConfigError::MissingThermostat);
        }
        if self.influx().is_none() && self.mqtt()?.is_none() {
            return Err(ConfigError::NoSinks);
        }
        if self.influx().is_some() && self.influx_bucket.is_empty() {
            return Err(ConfigError::Missing("influx_bucket"));
        }
        if self.mqtt()?.is_some() && self.mqtt_topic_root.is_empty() {
            return Err(ConfigError::Missing("mqtt_topic_root"));
        }

        Ok(())
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            lat: self.lat,
            lon: self.lon,
        }
    }

    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    /// Thermostat name for the ecobee-compatible measurement, if it should be written.
    pub fn ecobee_thermostat(&self) -> Option<&str> {
        if self.write_ecobee_weather_measurement && !self.ecobee_thermostat_name.is_empty() {
            Some(&self.ecobee_thermostat_name)
        } else {
            None
        }
    }

    /// InfluxDB settings if a server has been configured.
    pub fn influx(&self) -> Option<InfluxSettings> {
        if self.influx_server.is_empty() {
            return None;
        }

        let auth = if !self.influx_user.is_empty() || !self.influx_password.is_empty() {
            Some(format!("{}:{}", self.influx_user, self.influx_password))
        } else if !self.influx_token.is_empty() {
            Some(self.influx_token.clone())
        } else {
            None
        };

        Some(InfluxSettings {
            server: self.influx_server.clone(),
            org: self.influx_org.clone(),
            bucket: self.influx_bucket.clone(),
            auth,
            health_check: !self.influx_health_check_disabled,
        })
    }

    /// MQTT settings if a broker has been configured.
    pub fn mqtt(&self) -> Result<Option<MqttSettings>, ConfigError> {
        if self.mqtt_server.is_empty() {
            return Ok(None);
        }

        let (host, port) = parse_broker(&self.mqtt_server)?;
        let credentials = if self.mqtt_user.is_empty() {
            None
        } else {
            Some((self.mqtt_user.clone(), self.mqtt_password.clone()))
        };
        let client_id = if self.mqtt_client_id.is_empty() {
            DEFAULT_MQTT_CLIENT_ID.to_owned()
        } else {
            self.mqtt_client_id.clone()
        };

        Ok(Some(MqttSettings {
            host,
            port,
            client_id,
            credentials,
            topic_root: self.mqtt_topic_root.trim_end_matches('/').to_owned(),
        }))
    }
}

fn parse_broker(server: &str) -> Result<(String, u16), ConfigError> {
    const DEFAULT_PORT: u16 = 1883;

    let trimmed = server
        .trim()
        .trim_start_matches("mqtt://")
        .trim_start_matches("tcp://");
    let invalid = || ConfigError::InvalidBroker(server.to_owned());

    match trimmed.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => Ok((host.to_owned(), port.parse().map_err(|_| invalid())?)),
        Some(_) => Err(invalid()),
        None if !trimmed.is_empty() => Ok((trimmed.to_owned(), DEFAULT_PORT)),
        None => Err(invalid()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfluxSettings {
    pub server: String,
    pub org: String,
    pub bucket: String,
    pub auth: Option<String>,
    pub health_check: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub topic_root: String,
}

/// Timing of sink deliveries. Passed to the dispatcher and sinks explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySettings {
    pub influx_attempts: u32,
    pub influx_retry_delay: Duration,
    pub influx_timeout: Duration,
    pub mqtt_connect_timeout: Duration,
    pub mqtt_publish_timeout: Duration,
    pub mqtt_disconnect_grace: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        DeliverySettings {
            influx_attempts: 3,
            influx_retry_delay: Duration::from_secs(1),
            influx_timeout: Duration::from_secs(3),
            mqtt_connect_timeout: Duration::from_secs(5),
            mqtt_publish_timeout: Duration::from_secs(3),
            mqtt_disconnect_grace: Duration::from_millis(250),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(value: serde_json::Value) -> Settings {
        serde_json::from_value(value).unwrap()
    }

    fn base() -> serde_json::Value {
        json!({
            "api_key": "abc123",
            "lat": 40.0,
            "lon": -75.0,
            "wx_measurement_name": "weather",
            "pollution_measurement_name": "pollution",
            "influx_server": "http://localhost:8086",
            "influx_bucket": "weather",
        })
    }

    #[test]
    fn test_valid_influx_only() {
        let s = settings(base());
        assert!(s.validate().is_ok());
        assert!(s.mqtt().unwrap().is_none());
        assert_eq!(WindChillStrategy::Explicit, s.wind_chill_strategy);
        assert_eq!(DEFAULT_API_URL, s.api_url());

        let influx = s.influx().unwrap();
        assert!(influx.health_check);
        assert_eq!(None, influx.auth);
    }

    #[test]
    fn test_missing_api_key() {
        let mut v = base();
        v["api_key"] = json!("");
        assert!(matches!(settings(v).validate(), Err(ConfigError::Missing("api_key"))));
    }

    #[test]
    fn test_no_sinks() {
        let mut v = base();
        v["influx_server"] = json!("");
        assert!(matches!(settings(v).validate(), Err(ConfigError::NoSinks)));
    }

    #[test]
    fn test_ecobee_requires_thermostat() {
        let mut v = base();
        v["write_ecobee_weather_measurement"] = json!(true);
        assert!(matches!(settings(v.clone()).validate(), Err(ConfigError::MissingThermostat)));

        v["ecobee_thermostat_name"] = json!("Main Floor");
        let s = settings(v);
        assert!(s.validate().is_ok());
        assert_eq!(Some("Main Floor"), s.ecobee_thermostat());
    }

    #[test]
    fn test_influx_auth() {
        let mut v = base();
        v["influx_token"] = json!("tok");
        assert_eq!(Some("tok".to_owned()), settings(v.clone()).influx().unwrap().auth);

        v["influx_user"] = json!("user");
        v["influx_password"] = json!("pass");
        assert_eq!(Some("user:pass".to_owned()), settings(v).influx().unwrap().auth);
    }

    #[test]
    fn test_mqtt_settings() {
        let mut v = base();
        v["influx_server"] = json!("");
        v["mqtt_server"] = json!("broker.local:1884");
        assert!(matches!(
            settings(v.clone()).validate(),
            Err(ConfigError::Missing("mqtt_topic_root"))
        ));

        v["mqtt_topic_root"] = json!("home/outside/");
        v["wind_chill_strategy"] = json!("identity");
        let s = settings(v);
        assert!(s.validate().is_ok());
        assert_eq!(WindChillStrategy::Identity, s.wind_chill_strategy);

        let mqtt = s.mqtt().unwrap().unwrap();
        assert_eq!("broker.local", mqtt.host);
        assert_eq!(1884, mqtt.port);
        assert_eq!("home/outside", mqtt.topic_root);
        assert_eq!("openweather_connector", mqtt.client_id);
        assert_eq!(None, mqtt.credentials);
    }

    #[test]
    fn test_parse_broker() {
        assert_eq!(("localhost".to_owned(), 1883), parse_broker("localhost").unwrap());
        assert_eq!(("10.0.0.5".to_owned(), 8883), parse_broker("tcp://10.0.0.5:8883").unwrap());
        assert!(parse_broker(":1883").is_err());
        assert!(parse_broker("host:port").is_err());
    }
}
