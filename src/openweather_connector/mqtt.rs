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
use crate::config::{DeliverySettings, MqttSettings};
use crate::dispatch::{DeliveryPolicy, Sink, SinkError, SinkKind};
use crate::point::{MeasurementPoint, PointKind};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;

const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Topic a point is published to under the configured root, if it is published at all.
pub fn topic_for(root: &str, kind: PointKind) -> Option<String> {
    match kind {
        PointKind::Weather => Some(format!("{}/weather", root)),
        PointKind::Pollution => Some(format!("{}/pollution", root)),
        PointKind::Ecobee => None,
    }
}

/// Publishes points as JSON to an MQTT broker with QoS 0.
///
/// The connection is opened by `connect` and must be released with `close` at the end
/// of a run.
pub struct MqttSink {
    client: AsyncClient,
    driver: JoinHandle<()>,
    topic_root: String,
    location: Coordinates,
    policy: DeliveryPolicy,
}

impl MqttSink {
    pub async fn connect(
        settings: &MqttSettings,
        location: Coordinates,
        delivery: &DeliverySettings,
    ) -> Result<Self, SinkError> {
        let mut options = MqttOptions::new(settings.client_id.clone(), settings.host.clone(), settings.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some((user, password)) = &settings.credentials {
            options.set_credentials(user.clone(), password.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 16);
        match tokio::time::timeout(delivery.mqtt_connect_timeout, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(SinkError::Timeout(delivery.mqtt_connect_timeout)),
        }

        tracing::info!(message = "connected to mqtt broker", host = %settings.host, port = settings.port);
        let driver = tokio::spawn(drive(eventloop));

        Ok(MqttSink {
            client,
            driver,
            topic_root: settings.topic_root.clone(),
            location,
            policy: DeliveryPolicy::Once {
                timeout: delivery.mqtt_publish_timeout,
            },
        })
    }

    /// Disconnect from the broker, giving queued publishes `grace` to be flushed.
    pub async fn close(self, grace: Duration) {
        if let Err(e) = self.client.disconnect().await {
            tracing::warn!(message = "unable to request mqtt disconnect", error = %e);
        }

        let mut driver = self.driver;
        if tokio::time::timeout(grace, &mut driver).await.is_err() {
            tracing::warn!(message = "mqtt connection did not close in time, aborting");
            driver.abort();
        }
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), SinkError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(SinkError::Connection(format!("broker refused connection: {:?}", ack.code)))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(SinkError::Connection(e.to_string())),
        }
    }
}

// Polls the event loop so that queued publishes are written, until we disconnect or
// the connection drops.
async fn drive(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!(message = "mqtt disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(message = "mqtt connection dropped", error = %e);
                break;
            }
        }
    }
}

#[async_trait]
impl Sink for MqttSink {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn kind(&self) -> SinkKind {
        SinkKind::MessageBus
    }

    fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    async fn deliver(&self, point: &MeasurementPoint) -> Result<(), SinkError> {
        let topic = match topic_for(&self.topic_root, point.kind) {
            Some(t) => t,
            None => {
                tracing::debug!(
                    message = "point is not published to mqtt",
                    measurement = %point.measurement,
                );
                return Ok(());
            }
        };

        if self.driver.is_finished() {
            return Err(SinkError::Connection("mqtt connection is closed".to_owned()));
        }

        let payload = point.to_json_payload(self.location.lat, self.location.lon)?;
        self.client.publish(topic.clone(), QoS::AtMostOnce, false, payload).await?;
        tracing::debug!(message = "published point", topic = %topic, measurement = %point.measurement);
        Ok(())
    }
}
