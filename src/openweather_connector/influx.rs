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

use crate::config::{DeliverySettings, InfluxSettings};
use crate::dispatch::{DeliveryPolicy, Sink, SinkError, SinkKind};
use crate::point::MeasurementPoint;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

const HEALTH_PASS: &str = "pass";

#[derive(Deserialize, Debug)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Writes points to an InfluxDB 2.x (or 1.8 with the 2.x compatibility API) server.
#[derive(Debug)]
pub struct InfluxSink {
    client: Client,
    health_url: Url,
    write_url: Url,
    auth: Option<String>,
    policy: DeliveryPolicy,
}

impl InfluxSink {
    const USER_AGENT: &'static str = "OpenWeather Connector (https://github.com/56quarters/openweather_connector)";
    const LINE_PROTOCOL: &'static str = "text/plain; charset=utf-8";

    pub fn new(client: Client, settings: &InfluxSettings, delivery: &DeliverySettings) -> Result<Self, SinkError> {
        let base = Url::parse(&settings.server)
            .map_err(|e| SinkError::Connection(format!("invalid influx_server {}: {}", settings.server, e)))?;
        let health_url = base
            .join("health")
            .map_err(|e| SinkError::Connection(e.to_string()))?;
        let mut write_url = base
            .join("api/v2/write")
            .map_err(|e| SinkError::Connection(e.to_string()))?;
        write_url
            .query_pairs_mut()
            .append_pair("org", &settings.org)
            .append_pair("bucket", &settings.bucket)
            .append_pair("precision", "s");

        Ok(InfluxSink {
            client,
            health_url,
            write_url,
            auth: settings.auth.clone(),
            policy: DeliveryPolicy::Retry {
                attempts: delivery.influx_attempts,
                delay: delivery.influx_retry_delay,
                timeout: delivery.influx_timeout,
            },
        })
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        let req = req.header(USER_AGENT, Self::USER_AGENT);
        match &self.auth {
            Some(token) => req.header(AUTHORIZATION, format!("Token {}", token)),
            None => req,
        }
    }

    /// Query the health endpoint and fail unless the server reports itself as passing.
    pub async fn health_check(&self, timeout: Duration) -> Result<Health, SinkError> {
        tracing::debug!(message = "checking influxdb health", url = %self.health_url);

        let res = self
            .authorized(self.client.get(self.health_url.clone()))
            .timeout(timeout)
            .send()
            .await?;

        // An unhealthy server answers 503 with the same body shape
        let health = res.json::<Health>().await?;
        if health.status == HEALTH_PASS {
            Ok(health)
        } else {
            Err(SinkError::Unhealthy {
                status: health.status,
                message: health.message.unwrap_or_default(),
            })
        }
    }
}

#[async_trait]
impl Sink for InfluxSink {
    fn name(&self) -> &str {
        "influxdb"
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Database
    }

    fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    async fn deliver(&self, point: &MeasurementPoint) -> Result<(), SinkError> {
        let body = point.to_line_protocol();
        tracing::trace!(message = "writing line protocol", line = %body);

        let res = self
            .authorized(self.client.post(self.write_url.clone()))
            .header(CONTENT_TYPE, Self::LINE_PROTOCOL)
            .body(body)
            .send()
            .await?;

        let status = res.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::OK {
            Ok(())
        } else {
            let body = res.text().await.unwrap_or_default();
            Err(SinkError::Status { status, body })
        }
    }
}
