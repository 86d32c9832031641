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

use crate::point::{MeasurementPoint, PointKind};
use async_trait::async_trait;
use futures::future;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: reqwest::StatusCode, body: String },

    #[error("unhealthy: status {status}, message '{message}'")]
    Unhealthy { status: String, message: String },

    #[error("{0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unable to encode point: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Database,
    MessageBus,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database => f.write_str("database"),
            Self::MessageBus => f.write_str("message_bus"),
        }
    }
}

impl PointKind {
    /// Ecobee-compatible points only ever go to the database.
    pub fn delivers_to(&self, sink: SinkKind) -> bool {
        match self {
            PointKind::Ecobee => sink == SinkKind::Database,
            PointKind::Weather | PointKind::Pollution => true,
        }
    }
}

/// How many times, and how patiently, the dispatcher tries a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Up to `attempts` tries, each bounded by `timeout`, with `delay` between them.
    Retry {
        attempts: u32,
        delay: Duration,
        timeout: Duration,
    },
    /// A single try bounded by `timeout`.
    Once { timeout: Duration },
}

impl DeliveryPolicy {
    fn attempts(&self) -> u32 {
        match self {
            Self::Retry { attempts, .. } => (*attempts).max(1),
            Self::Once { .. } => 1,
        }
    }

    fn timeout(&self) -> Duration {
        match self {
            Self::Retry { timeout, .. } => *timeout,
            Self::Once { timeout } => *timeout,
        }
    }

    fn delay(&self) -> Duration {
        match self {
            Self::Retry { delay, .. } => *delay,
            Self::Once { .. } => Duration::ZERO,
        }
    }
}

/// A destination for measurement points.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> SinkKind;

    fn policy(&self) -> DeliveryPolicy;

    /// Make a single attempt to deliver the point.
    async fn deliver(&self, point: &MeasurementPoint) -> Result<(), SinkError>;
}

#[async_trait]
impl<S: Sink + ?Sized> Sink for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn kind(&self) -> SinkKind {
        (**self).kind()
    }

    fn policy(&self) -> DeliveryPolicy {
        (**self).policy()
    }

    async fn deliver(&self, point: &MeasurementPoint) -> Result<(), SinkError> {
        (**self).deliver(point).await
    }
}

/// Final result of delivering one point to one sink.
#[derive(Debug)]
pub struct DeliveryOutcome {
    pub sink: String,
    pub kind: SinkKind,
    pub measurement: String,
    pub attempts: u32,
    pub result: Result<(), SinkError>,
}

impl DeliveryOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeliveryOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    pub fn extend(&mut self, other: DeliveryReport) {
        self.outcomes.extend(other.outcomes);
    }
}

/// Delivers points to every configured sink. Sinks are tried concurrently and a failure
/// of one never affects delivery to another.
pub struct Dispatcher {
    sinks: Vec<Box<dyn Sink>>,
}

impl Dispatcher {
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Self {
        Dispatcher { sinks }
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub async fn dispatch(&self, point: &MeasurementPoint) -> DeliveryReport {
        let deliveries = self
            .sinks
            .iter()
            .filter(|s| point.kind.delivers_to(s.kind()))
            .map(|s| deliver_with_policy(s.as_ref(), point));

        DeliveryReport {
            outcomes: future::join_all(deliveries).await,
        }
    }

    pub async fn dispatch_all(&self, points: &[MeasurementPoint]) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for point in points {
            report.extend(self.dispatch(point).await);
        }
        report
    }
}

async fn deliver_with_policy(sink: &dyn Sink, point: &MeasurementPoint) -> DeliveryOutcome {
    let policy = sink.policy();
    let max_attempts = policy.attempts();
    let mut attempt = 0;

    let result = loop {
        attempt += 1;
        let res = match tokio::time::timeout(policy.timeout(), sink.deliver(point)).await {
            Ok(r) => r,
            Err(_) => Err(SinkError::Timeout(policy.timeout())),
        };

        match res {
            Ok(()) => {
                tracing::debug!(
                    message = "delivered point",
                    sink = sink.name(),
                    measurement = %point.measurement,
                    attempt = attempt,
                );
                break Ok(());
            }
            Err(e) if attempt < max_attempts => {
                tracing::warn!(
                    message = "delivery attempt failed, retrying",
                    sink = sink.name(),
                    measurement = %point.measurement,
                    attempt = attempt,
                    error = %e,
                );
                tokio::time::sleep(policy.delay()).await;
            }
            Err(e) => {
                tracing::error!(
                    message = "failed to deliver point",
                    sink = sink.name(),
                    measurement = %point.measurement,
                    attempts = attempt,
                    error = %e,
                );
                break Err(e);
            }
        }
    };

    DeliveryOutcome {
        sink: sink.name().to_owned(),
        kind: sink.kind(),
        measurement: point.measurement.clone(),
        attempts: attempt,
        result,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// In-memory sink that fails a set number of times before accepting points.
    pub(crate) struct FakeSink {
        pub kind: SinkKind,
        pub policy: DeliveryPolicy,
        pub failures: u32,
        pub calls: AtomicU32,
        pub received: Arc<Mutex<Vec<MeasurementPoint>>>,
        pub hang: bool,
    }

    impl FakeSink {
        pub(crate) fn new(kind: SinkKind, failures: u32) -> Self {
            FakeSink {
                kind,
                policy: DeliveryPolicy::Retry {
                    attempts: 3,
                    delay: Duration::from_millis(1),
                    timeout: Duration::from_millis(50),
                },
                failures,
                calls: AtomicU32::new(0),
                received: Arc::new(Mutex::new(Vec::new())),
                hang: false,
            }
        }

        pub(crate) fn once(mut self) -> Self {
            self.policy = DeliveryPolicy::Once {
                timeout: Duration::from_millis(50),
            };
            self
        }
    }

    #[async_trait]
    impl Sink for FakeSink {
        fn name(&self) -> &str {
            match self.kind {
                SinkKind::Database => "fake-influx",
                SinkKind::MessageBus => "fake-mqtt",
            }
        }

        fn kind(&self) -> SinkKind {
            self.kind
        }

        fn policy(&self) -> DeliveryPolicy {
            self.policy
        }

        async fn deliver(&self, point: &MeasurementPoint) -> Result<(), SinkError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if call < self.failures {
                return Err(SinkError::Connection(format!("attempt {} refused", call + 1)));
            }

            self.received.lock().unwrap().push(point.clone());
            Ok(())
        }
    }

    fn point(kind: PointKind) -> MeasurementPoint {
        MeasurementPoint::new(kind, "wx", 1700000000).field("temp_f", 72.0)
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let sink = FakeSink::new(SinkKind::Database, 2);
        let received = sink.received.clone();
        let dispatcher = Dispatcher::new(vec![Box::new(sink)]);

        let report = dispatcher.dispatch(&point(PointKind::Weather)).await;
        assert_eq!(1, report.delivered());
        assert_eq!(3, report.outcomes[0].attempts);
        assert_eq!(1, received.lock().unwrap().len());
    }

    #[tokio::test]
    async fn test_retry_exhausted_isolated() {
        let db = FakeSink::new(SinkKind::Database, 10);
        let bus = FakeSink::new(SinkKind::MessageBus, 0).once();
        let bus_received = bus.received.clone();
        let dispatcher = Dispatcher::new(vec![Box::new(db), Box::new(bus)]);

        let report = dispatcher.dispatch(&point(PointKind::Weather)).await;
        assert_eq!(1, report.delivered());
        assert_eq!(1, report.failed());

        let failure = report.failures().next().unwrap();
        assert_eq!(SinkKind::Database, failure.kind);
        assert_eq!(3, failure.attempts);
        assert_eq!("wx", failure.measurement);
        assert_eq!(1, bus_received.lock().unwrap().len());
    }

    #[tokio::test]
    async fn test_once_policy_no_retry() {
        let bus = FakeSink::new(SinkKind::MessageBus, 1).once();
        let dispatcher = Dispatcher::new(vec![Box::new(bus)]);

        let report = dispatcher.dispatch(&point(PointKind::Pollution)).await;
        assert_eq!(1, report.failed());
        assert_eq!(1, report.outcomes[0].attempts);
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let mut db = FakeSink::new(SinkKind::Database, 0);
        db.hang = true;
        let dispatcher = Dispatcher::new(vec![Box::new(db)]);

        let report = dispatcher.dispatch(&point(PointKind::Weather)).await;
        let outcome = &report.outcomes[0];
        assert_eq!(3, outcome.attempts);
        assert!(matches!(outcome.result, Err(SinkError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_ecobee_only_to_database() {
        let db = FakeSink::new(SinkKind::Database, 0);
        let bus = FakeSink::new(SinkKind::MessageBus, 0).once();
        let db_received = db.received.clone();
        let bus_received = bus.received.clone();
        let dispatcher = Dispatcher::new(vec![Box::new(db), Box::new(bus)]);

        let report = dispatcher
            .dispatch_all(&[point(PointKind::Ecobee), point(PointKind::Weather)])
            .await;

        assert_eq!(3, report.delivered());
        assert_eq!(2, db_received.lock().unwrap().len());
        let bus_points = bus_received.lock().unwrap();
        assert_eq!(1, bus_points.len());
        assert_eq!(PointKind::Weather, bus_points[0].kind);
    }

    #[test]
    fn test_delivers_to() {
        assert!(PointKind::Ecobee.delivers_to(SinkKind::Database));
        assert!(!PointKind::Ecobee.delivers_to(SinkKind::MessageBus));
        assert!(PointKind::Weather.delivers_to(SinkKind::MessageBus));
        assert!(PointKind::Pollution.delivers_to(SinkKind::Database));
    }
}
