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

use crate::aqi::AqiError;
use crate::assemble::Assembler;
use crate::client::{ClientError, PollutionReading, Reading, WeatherProvider};
use crate::config::{ConfigError, DeliverySettings, Settings};
use crate::dispatch::{DeliveryReport, Dispatcher, Sink, SinkError};
use crate::influx::InfluxSink;
use crate::mqtt::MqttSink;
use crate::point::MeasurementPoint;
use crate::units;
use reqwest::Client;
use std::fmt::Write;
use std::sync::Arc;
use thiserror::Error;

/// Conditions that stop a run. Failed deliveries are not among them, see `RunSummary`.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("unable to fetch {what} from OpenWeatherMap: {source}")]
    Provider {
        what: &'static str,
        #[source]
        source: ClientError,
    },

    #[error("InfluxDB health check failed: {0}")]
    HealthCheck(#[source] SinkError),

    #[error("unable to set up {sink} sink: {source}")]
    SinkSetup {
        sink: &'static str,
        #[source]
        source: SinkError,
    },

    #[error("failed to calculate US AQI: {0}")]
    Aqi(#[from] AqiError),
}

/// A configured sink that could not be opened for this run.
#[derive(Debug)]
pub struct SkippedSink {
    pub name: &'static str,
    pub error: SinkError,
}

/// Result of a run that was not aborted.
#[derive(Debug)]
pub struct RunSummary {
    pub reading: Reading,
    pub pollution: PollutionReading,
    pub report: DeliveryReport,
    pub skipped_sinks: Vec<SkippedSink>,
}

impl RunSummary {
    /// True if every point reached every sink it was meant for, including sinks
    /// that were configured but never opened.
    pub fn is_complete(&self) -> bool {
        self.report.failed() == 0 && self.skipped_sinks.is_empty()
    }
}

/// Sinks opened for a single run.
pub struct OpenSinks {
    pub dispatcher: Dispatcher,
    pub skipped: Vec<SkippedSink>,
    mqtt: Option<Arc<MqttSink>>,
}

impl OpenSinks {
    /// Open every configured sink. A failing InfluxDB health check is fatal while an
    /// unreachable MQTT broker only removes that sink for the run, unless it was the only
    /// sink configured.
    pub async fn open(settings: &Settings, http: Client, delivery: &DeliverySettings) -> Result<Self, RunError> {
        let mut sinks: Vec<Box<dyn Sink>> = Vec::new();
        let mut skipped = Vec::new();
        let mut mqtt = None;

        if let Some(influx) = settings.influx() {
            let sink = InfluxSink::new(http, &influx, delivery).map_err(|e| RunError::SinkSetup {
                sink: "influxdb",
                source: e,
            })?;

            if influx.health_check {
                let health = sink
                    .health_check(delivery.influx_timeout)
                    .await
                    .map_err(RunError::HealthCheck)?;
                tracing::debug!(message = "influxdb passed health check", status = %health.status);
            }

            sinks.push(Box::new(sink));
        }

        if let Some(mqtt_settings) = settings.mqtt()? {
            match MqttSink::connect(&mqtt_settings, settings.coordinates(), delivery).await {
                Ok(sink) => {
                    let sink = Arc::new(sink);
                    mqtt = Some(sink.clone());
                    sinks.push(Box::new(sink));
                }
                Err(e) => {
                    tracing::error!(
                        message = "unable to connect to mqtt broker, skipping mqtt for this run",
                        host = %mqtt_settings.host,
                        port = mqtt_settings.port,
                        error = %e,
                    );
                    skipped.push(SkippedSink {
                        name: "mqtt",
                        error: e,
                    });
                }
            }
        }

        let dispatcher = Dispatcher::new(sinks);
        if dispatcher.is_empty() {
            return Err(match skipped.pop() {
                Some(s) => RunError::SinkSetup {
                    sink: s.name,
                    source: s.error,
                },
                None => RunError::Config(ConfigError::NoSinks),
            });
        }

        Ok(OpenSinks {
            dispatcher,
            skipped,
            mqtt,
        })
    }

    pub async fn close(self, delivery: &DeliverySettings) {
        // Drop the dispatcher first so the MQTT sink has a single owner again
        drop(self.dispatcher);
        if let Some(mqtt) = self.mqtt {
            match Arc::try_unwrap(mqtt) {
                Ok(sink) => sink.close(delivery.mqtt_disconnect_grace).await,
                Err(_) => tracing::warn!(message = "mqtt sink still in use, not closing cleanly"),
            }
        }
    }
}

/// One fetch-compute-deliver cycle for the configured location.
pub struct Connector<P> {
    settings: Settings,
    provider: P,
    delivery: DeliverySettings,
    print_data: bool,
}

impl<P: WeatherProvider> Connector<P> {
    pub fn new(settings: Settings, provider: P) -> Self {
        Connector {
            settings,
            provider,
            delivery: DeliverySettings::default(),
            print_data: false,
        }
    }

    pub fn with_delivery(mut self, delivery: DeliverySettings) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_print_data(mut self, print_data: bool) -> Self {
        self.print_data = print_data;
        self
    }

    fn assembler(&self) -> Assembler {
        let assembler = Assembler::new(
            &self.settings.wx_measurement_name,
            &self.settings.pollution_measurement_name,
            self.settings.coordinates(),
        )
        .with_wind_chill(self.settings.wind_chill_strategy);

        match self.settings.ecobee_thermostat() {
            Some(thermostat) => assembler.with_ecobee(thermostat),
            None => assembler,
        }
    }

    /// Validate settings, open sinks, and run a single cycle. The MQTT connection is
    /// closed whether or not the cycle succeeded. Sinks that could not be opened are
    /// reported in the summary.
    pub async fn run(&self, http: Client) -> Result<RunSummary, RunError> {
        self.settings.validate()?;

        let mut sinks = OpenSinks::open(&self.settings, http, &self.delivery).await?;
        let skipped_sinks = std::mem::take(&mut sinks.skipped);
        let res = self.run_with(&sinks.dispatcher).await;
        sinks.close(&self.delivery).await;

        res.map(|summary| RunSummary {
            skipped_sinks,
            ..summary
        })
    }

    /// Fetch readings, build points, and deliver them with the given dispatcher.
    pub async fn run_with(&self, dispatcher: &Dispatcher) -> Result<RunSummary, RunError> {
        let coords = self.settings.coordinates();

        let reading = self
            .provider
            .current(coords)
            .await
            .map_err(|e| RunError::Provider {
                what: "weather",
                source: e,
            })?;
        tracing::info!(message = "fetched current weather", timestamp = reading.timestamp);

        let pollution = self
            .provider
            .pollution(coords)
            .await
            .and_then(|list| list.into_iter().next().ok_or(ClientError::NoPollutionData))
            .map_err(|e| RunError::Provider {
                what: "pollution",
                source: e,
            })?;
        tracing::info!(message = "fetched air pollution", timestamp = pollution.timestamp);

        let assembler = self.assembler();
        let weather_points = assembler.weather_points(&reading);
        let pollution_point = assembler.pollution(&pollution)?;

        if self.print_data {
            print!("{}", describe_weather(&reading));
            print!("{}", describe_pollution(&pollution, &pollution_point));
        }

        let mut report = dispatcher.dispatch_all(&weather_points).await;
        report.extend(dispatcher.dispatch(&pollution_point).await);

        for failure in report.failures() {
            if let Err(e) = &failure.result {
                tracing::warn!(
                    message = "point was not delivered",
                    sink = %failure.sink,
                    measurement = %failure.measurement,
                    error = %e,
                );
            }
        }

        tracing::info!(
            message = "run finished",
            delivered = report.delivered(),
            failed = report.failed(),
        );

        Ok(RunSummary {
            reading,
            pollution,
            report,
            skipped_sinks: Vec::new(),
        })
    }
}

/// Human readable summary of current conditions.
pub fn describe_weather(r: &Reading) -> String {
    let humidity = units::clamp_humidity(r.humidity);
    let mut out = String::new();
    let _ = writeln!(out, "Conditions at {}:", r.timestamp);
    let _ = writeln!(out, "\ttemperature: {:.1} degF", r.temp_f);
    let _ = writeln!(out, "\tpressure: {:.0} mb", r.pressure_mb);
    let _ = writeln!(out, "\thumidity: {}%", humidity);
    if let Ok(dp) = units::dew_point_f(r.temp_f, humidity.max(1)) {
        let _ = writeln!(out, "\tdew point: {:.1} degF", dp);
    }
    let _ = writeln!(out, "\twind: {:.0} at {:.1} mph", r.wind_bearing, r.wind_speed_mph);
    let _ = writeln!(out, "\tvisibility: {:.1} miles", units::meters_to_miles(r.visibility_m));
    let _ = writeln!(out, "\tcloud cover: {}%", r.cloud_cover);
    out
}

/// Human readable summary of pollution along with the AQI fields of its point.
pub fn describe_pollution(p: &PollutionReading, point: &MeasurementPoint) -> String {
    use crate::point::FieldValue;

    let float = |key: &str| match point.get(key) {
        Some(FieldValue::Float(v)) => *v,
        _ => f64::NAN,
    };

    let mut out = String::new();
    let _ = writeln!(out, "Pollution at {}:", p.timestamp);
    let _ = writeln!(out, "\tAQI (US EPA): {:.1}", float("aqi_us"));
    let _ = writeln!(out, "\tAQI (US EPA, particulates): {:.1}", float("aqi_us_pm"));
    let _ = writeln!(out, "\tCO: {:.2}", p.co);
    let _ = writeln!(out, "\tNO: {:.2}", p.no);
    let _ = writeln!(out, "\tNO2: {:.2}", p.no2);
    let _ = writeln!(out, "\tO3: {:.2}", p.o3);
    let _ = writeln!(out, "\tSO2: {:.2}", p.so2);
    let _ = writeln!(out, "\tPM2.5: {:.2}", p.pm2_5);
    let _ = writeln!(out, "\tPM10: {:.2}", p.pm10);
    let _ = writeln!(out, "\tNH3: {:.2}", p.nh3);
    out
}
