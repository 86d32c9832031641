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

use clap::Parser;
use openweather_connector::client::OpenWeatherClient;
use openweather_connector::config::Settings;
use openweather_connector::run::Connector;
use reqwest::Client;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{Instrument, Level};

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_CONFIG_PATH: &str = "./config.json";
const DEFAULT_TIMEOUT_MILLIS: u64 = 10000;

#[derive(Debug, Parser)]
#[clap(name = "openweather_connector", version = clap::crate_version!())]
struct OpenWeatherConnectorApplication {
    /// Path to the JSON configuration file
    #[clap(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print weather and pollution data to stdout
    #[clap(long)]
    print_data: bool,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Timeout for fetching weather and pollution from the OpenWeatherMap API, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,
}

#[tokio::main]
async fn main() {
    let opts = OpenWeatherConnectorApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let settings = Settings::from_file(&opts.config).unwrap_or_else(|e| {
        tracing::error!(message = "unable to load configuration", error = %e);
        process::exit(1)
    });

    // Validate before building any clients so that bad configuration never results in
    // network requests.
    if let Err(e) = settings.validate() {
        tracing::error!(message = "invalid configuration", config = %opts.config.display(), error = %e);
        process::exit(1)
    }

    let timeout = Duration::from_millis(opts.timeout_millis);
    let owm_http = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let provider = OpenWeatherClient::new(owm_http, settings.api_url(), &settings.api_key).unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize OpenWeatherMap client", error = %e);
        process::exit(1)
    });

    let location = settings.coordinates();
    let connector = Connector::new(settings, provider).with_print_data(opts.print_data);

    // Timeouts for sink requests are set per request
    match connector
        .run(Client::new())
        .instrument(tracing::span!(Level::DEBUG, "openweather_run", lat = location.lat, lon = location.lon))
        .await
    {
        Ok(summary) if summary.is_complete() => {
            tracing::info!(message = "wrote all measurements", points = summary.report.delivered());
        }
        Ok(summary) => {
            for skipped in &summary.skipped_sinks {
                tracing::warn!(
                    message = "sink was unavailable for this run",
                    sink = skipped.name,
                    error = %skipped.error,
                );
            }

            tracing::warn!(
                message = "some measurements were not written",
                delivered = summary.report.delivered(),
                failed = summary.report.failed(),
                skipped_sinks = summary.skipped_sinks.len(),
            );
        }
        Err(e) => {
            tracing::error!(message = "run aborted", error = %e);
            process::exit(1)
        }
    }
}
