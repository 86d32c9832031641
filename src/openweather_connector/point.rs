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

use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write;

pub const SOURCE: &str = "openweathermap";

/// Which reading a point was built from. Decides which sinks and topics it goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointKind {
    Weather,
    Pollution,
    /// Fixed schema mirroring ecobee_influx_connector output
    Ecobee,
}

impl fmt::Display for PointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Weather => "weather",
            Self::Pollution => "pollution",
            Self::Ecobee => "ecobee",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Text(String),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        FieldValue::Integer(i64::from(v))
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_owned())
    }
}

/// A named, tagged, timestamped set of fields ready for delivery.
///
/// Tags and fields are kept sorted by key so that encoded output is stable.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementPoint {
    pub kind: PointKind,
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: i64,
}

impl MeasurementPoint {
    pub fn new(kind: PointKind, measurement: &str, timestamp: i64) -> Self {
        MeasurementPoint {
            kind,
            measurement: measurement.to_owned(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn field<V: Into<FieldValue>>(mut self, key: &str, value: V) -> Self {
        self.fields.insert(key.to_owned(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Encode as a single line of InfluxDB line protocol with second precision.
    ///
    /// Non-finite floats cannot be represented and are left out.
    pub fn to_line_protocol(&self) -> String {
        let mut out = escape(&self.measurement, &[',', ' ']);
        for (k, v) in &self.tags {
            let _ = write!(out, ",{}={}", escape(k, TAG_SPECIAL), escape(v, TAG_SPECIAL));
        }

        let mut first = true;
        for (k, v) in &self.fields {
            let value = match v {
                FieldValue::Float(f) if f.is_finite() => format!("{}", f),
                FieldValue::Float(_) => continue,
                FieldValue::Integer(i) => format!("{}i", i),
                FieldValue::Text(s) => format!("\"{}\"", escape(s, &['"', '\\'])),
            };

            out.push(if first { ' ' } else { ',' });
            let _ = write!(out, "{}={}", escape(k, TAG_SPECIAL), value);
            first = false;
        }

        let _ = write!(out, " {}", self.timestamp);
        out
    }

    /// Encode the fields as a JSON object for the message bus along with the source and
    /// coordinates.
    ///
    /// The `timestamp` key is the time of the reading this point was built from (the point's
    /// own timestamp), not the time the message is published.
    pub fn to_json_payload(&self, latitude: f64, longitude: f64) -> Result<Vec<u8>, serde_json::Error> {
        let mut body = Map::new();
        for (k, v) in &self.fields {
            body.insert(k.clone(), json_value(v));
        }

        body.insert("source".to_owned(), Value::String(SOURCE.to_owned()));
        body.insert("latitude".to_owned(), float_value(latitude));
        body.insert("longitude".to_owned(), float_value(longitude));
        body.insert("timestamp".to_owned(), Value::from(self.timestamp));
        serde_json::to_vec(&Value::Object(body))
    }
}

const TAG_SPECIAL: &[char] = &[',', '=', ' '];

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn json_value(v: &FieldValue) -> Value {
    match v {
        FieldValue::Float(f) => float_value(*f),
        FieldValue::Integer(i) => Value::from(*i),
        FieldValue::Text(s) => Value::String(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MeasurementPoint {
        MeasurementPoint::new(PointKind::Weather, "wx", 1700000000)
            .tag("data_source", SOURCE)
            .tag("latitude", "40.000")
            .field("temp_f", 72.5)
            .field("rel_humidity", 45i64)
            .field("aqi_us_name", "Unhealthy for Sensitive Groups")
    }

    #[test]
    fn test_line_protocol() {
        assert_eq!(
            "wx,data_source=openweathermap,latitude=40.000 aqi_us_name=\"Unhealthy for Sensitive Groups\",rel_humidity=45i,temp_f=72.5 1700000000",
            sample().to_line_protocol()
        );
    }

    #[test]
    fn test_line_protocol_escaping() {
        let point = MeasurementPoint::new(PointKind::Ecobee, "ecobee weather", 10)
            .tag("thermostat_name", "Main Floor, East")
            .field("note", "say \"hi\"")
            .field("bad", f64::NAN)
            .field("ok", 1.0);

        assert_eq!(
            "ecobee\\ weather,thermostat_name=Main\\ Floor\\,\\ East note=\"say \\\"hi\\\"\",ok=1 10",
            point.to_line_protocol()
        );
    }

    #[test]
    fn test_json_payload_metadata() {
        let payload = sample().to_json_payload(40.0, -75.0).unwrap();
        let v: Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(Value::from("openweathermap"), v["source"]);
        assert_eq!(Value::from(40.0), v["latitude"]);
        assert_eq!(Value::from(-75.0), v["longitude"]);
        assert_eq!(Value::from(1700000000i64), v["timestamp"]);
        assert_eq!(Value::from(72.5), v["temp_f"]);
        assert_eq!(Value::from(45i64), v["rel_humidity"]);
        assert!(v.get("data_source").is_none());
    }
}
