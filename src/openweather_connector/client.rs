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

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{0}")]
    Internal(#[from] reqwest::Error),

    #[error("invalid API URL {0}")]
    InvalidUrl(String),

    #[error("API key rejected for {0}")]
    Unauthorized(Url),

    #[error("unexpected status {0} for {1}")]
    Unexpected(StatusCode, Url),

    #[error("no pollution data returned")]
    NoPollutionData,
}

/// Geographic point to fetch readings for, in signed decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Current conditions at a single instant, in imperial units.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp: i64,
    pub temp_f: f64,
    pub feels_like_f: f64,
    pub humidity: i64,
    pub pressure_mb: f64,
    pub wind_speed_mph: f64,
    pub wind_bearing: f64,
    pub visibility_m: f64,
    pub cloud_cover: i64,
    pub coordinates: Coordinates,
}

/// Pollutant concentrations (µg/m³) at a single instant.
#[derive(Debug, Clone, PartialEq)]
pub struct PollutionReading {
    pub timestamp: i64,
    pub coordinates: Coordinates,
    pub aqi: i64,
    pub co: f64,
    pub no: f64,
    pub no2: f64,
    pub o3: f64,
    pub so2: f64,
    pub pm2_5: f64,
    pub pm10: f64,
    pub nh3: f64,
}

/// Source of weather and pollution readings for a point.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current(&self, coords: Coordinates) -> Result<Reading, ClientError>;

    /// Pollution readings for the point, most relevant first. May be empty.
    async fn pollution(&self, coords: Coordinates) -> Result<Vec<PollutionReading>, ClientError>;
}

#[derive(Debug)]
pub struct OpenWeatherClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl OpenWeatherClient {
    const USER_AGENT: &'static str = "OpenWeather Connector (https://github.com/56quarters/openweather_connector)";
    const JSON_RESPONSE: &'static str = "application/json";

    pub fn new(client: Client, base_url: &str, api_key: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url).map_err(|_| ClientError::InvalidUrl(base_url.to_owned()))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }

        Ok(OpenWeatherClient {
            client,
            base_url,
            api_key: api_key.to_owned(),
        })
    }

    async fn make_request(&self, url: Url) -> Result<Response, ClientError> {
        let res = self
            .client
            .get(url.clone())
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .send()
            .await?;

        let status = res.status();
        if status == StatusCode::OK {
            Ok(res)
        } else if status == StatusCode::UNAUTHORIZED {
            Err(ClientError::Unauthorized(self.redacted(url)))
        } else {
            Err(ClientError::Unexpected(status, self.redacted(url)))
        }
    }

    fn endpoint_url(&self, endpoint: &str, coords: Coordinates, imperial: bool) -> Url {
        let mut url = self.base_url.clone();
        {
            // Checked for cannot-be-a-base when the client was built
            if let Ok(mut p) = url.path_segments_mut() {
                p.pop_if_empty().push("data").push("2.5").push(endpoint);
            }
        }

        {
            let mut q = url.query_pairs_mut();
            q.append_pair("lat", &coords.lat.to_string())
                .append_pair("lon", &coords.lon.to_string())
                .append_pair("appid", &self.api_key);
            if imperial {
                q.append_pair("units", "imperial");
            }
        }

        url
    }

    /// Strip the API key from a URL before it ends up in an error or log message.
    fn redacted(&self, url: Url) -> Url {
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "appid")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let mut clean = url;
        clean.query_pairs_mut().clear().extend_pairs(pairs);
        clean
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    async fn current(&self, coords: Coordinates) -> Result<Reading, ClientError> {
        let request_url = self.endpoint_url("weather", coords, true);
        tracing::debug!(message = "making current weather request", url = %self.redacted(request_url.clone()));

        let res = self.make_request(request_url).await?;
        Ok(res.json::<CurrentWeather>().await?.into())
    }

    async fn pollution(&self, coords: Coordinates) -> Result<Vec<PollutionReading>, ClientError> {
        let request_url = self.endpoint_url("air_pollution", coords, false);
        tracing::debug!(message = "making air pollution request", url = %self.redacted(request_url.clone()));

        let res = self.make_request(request_url).await?;
        let body = res.json::<AirPollution>().await?;
        let coordinates = body.coord;
        Ok(body
            .list
            .into_iter()
            .map(|p| PollutionReading {
                timestamp: p.dt,
                coordinates,
                aqi: p.main.aqi,
                co: p.components.co,
                no: p.components.no,
                no2: p.components.no2,
                o3: p.components.o3,
                so2: p.components.so2,
                pm2_5: p.components.pm2_5,
                pm10: p.components.pm10,
                nh3: p.components.nh3,
            })
            .collect())
    }
}

// Response shapes, see https://openweathermap.org/current and
// https://openweathermap.org/api/air-pollution

#[derive(Serialize, Deserialize, Debug)]
pub struct CurrentWeather {
    pub coord: Coordinates,
    pub main: MainConditions,
    #[serde(default)]
    pub visibility: f64,
    pub wind: Wind,
    pub clouds: Clouds,
    pub dt: i64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MainConditions {
    pub temp: f64,
    pub feels_like: f64,
    // hPa regardless of the requested units, hPa is the same as millibar
    pub pressure: f64,
    pub humidity: i64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Wind {
    pub speed: f64,
    #[serde(default)]
    pub deg: f64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Clouds {
    pub all: i64,
}

impl From<CurrentWeather> for Reading {
    fn from(w: CurrentWeather) -> Self {
        Reading {
            timestamp: w.dt,
            temp_f: w.main.temp,
            feels_like_f: w.main.feels_like,
            humidity: w.main.humidity,
            pressure_mb: w.main.pressure,
            wind_speed_mph: w.wind.speed,
            wind_bearing: w.wind.deg,
            visibility_m: w.visibility,
            cloud_cover: w.clouds.all,
            coordinates: w.coord,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AirPollution {
    pub coord: Coordinates,
    pub list: Vec<PollutionEntry>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PollutionEntry {
    pub dt: i64,
    pub main: PollutionIndex,
    pub components: Components,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PollutionIndex {
    pub aqi: i64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Components {
    pub co: f64,
    pub no: f64,
    pub no2: f64,
    pub o3: f64,
    pub so2: f64,
    pub pm2_5: f64,
    pub pm10: f64,
    pub nh3: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURRENT_BODY: &str = r#"{
        "coord": {"lon": -75.0, "lat": 40.0},
        "weather": [{"id": 800, "main": "Clear", "description": "clear sky", "icon": "01d"}],
        "main": {
            "temp": 72.0, "feels_like": 70.0, "temp_min": 70.1, "temp_max": 74.2,
            "pressure": 1013, "humidity": 45
        },
        "visibility": 10000,
        "wind": {"speed": 5.0, "deg": 180},
        "clouds": {"all": 20},
        "dt": 1700000000,
        "name": "Somewhere"
    }"#;

    const POLLUTION_BODY: &str = r#"{
        "coord": {"lon": -75.0, "lat": 40.0},
        "list": [{
            "main": {"aqi": 2},
            "components": {
                "co": 230.31, "no": 0.1, "no2": 12.5, "o3": 60.08,
                "so2": 1.2, "pm2_5": 4.5, "pm10": 8.2, "nh3": 0.9
            },
            "dt": 1700000100
        }]
    }"#;

    fn client() -> OpenWeatherClient {
        OpenWeatherClient::new(Client::new(), "https://api.openweathermap.org/", "secret").unwrap()
    }

    #[test]
    fn test_decode_current_weather() {
        let body: CurrentWeather = serde_json::from_str(CURRENT_BODY).unwrap();
        let reading = Reading::from(body);

        assert_eq!(1700000000, reading.timestamp);
        assert_eq!(72.0, reading.temp_f);
        assert_eq!(45, reading.humidity);
        assert_eq!(1013.0, reading.pressure_mb);
        assert_eq!(180.0, reading.wind_bearing);
        assert_eq!(10000.0, reading.visibility_m);
        assert_eq!(Coordinates { lat: 40.0, lon: -75.0 }, reading.coordinates);
    }

    #[test]
    fn test_decode_pollution() {
        let body: AirPollution = serde_json::from_str(POLLUTION_BODY).unwrap();
        assert_eq!(1, body.list.len());
        assert_eq!(2, body.list[0].main.aqi);
        assert_eq!(4.5, body.list[0].components.pm2_5);
    }

    #[test]
    fn test_endpoint_url() {
        let url = client().endpoint_url("weather", Coordinates { lat: 40.5, lon: -75.25 }, true);
        assert_eq!("/data/2.5/weather", url.path());
        assert_eq!(
            Some("lat=40.5&lon=-75.25&appid=secret&units=imperial"),
            url.query()
        );
    }

    #[test]
    fn test_redacted_url() {
        let c = client();
        let url = c.endpoint_url("air_pollution", Coordinates { lat: 1.0, lon: 2.0 }, false);
        let clean = c.redacted(url);
        assert_eq!(Some("lat=1&lon=2"), clean.query());
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            OpenWeatherClient::new(Client::new(), "not a url", "secret"),
            Err(ClientError::InvalidUrl(_))
        ));
    }
}
