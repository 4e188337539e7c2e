// tempest_exporter - Prometheus metrics exporter for WeatherFlow Tempest stations
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
use reqwest::Client;
use std::error::Error;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tempest_exporter::client::{ClientError, TempestClient};
use tempest_exporter::http::RequestContext;
use tempest_exporter::metrics::{RefreshMetrics, StationMetrics};
use tempest_exporter::record::{self, Identity};
use tempest_exporter::refresh::Refresher;
use tokio::signal::unix::{self, SignalKind};
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
const DEFAULT_PORT: u16 = 6969;
const DEFAULT_REFRESH_SECS: u64 = 15;
const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;
const DEFAULT_API_URL: &str = "https://swd.weatherflow.com/swd/rest/";

#[derive(Debug, Parser)]
#[clap(name = "tempest_exporter", version = clap::crate_version!())]
struct TempestExporterApplication {
    /// WeatherFlow personal access token used to authenticate API requests
    #[clap(long, env = "WEATHERFLOW_API_TOKEN", hide_env_values = true, value_parser = non_empty)]
    token: String,

    /// WeatherFlow station ID to fetch observations for
    #[clap(long, env = "WEATHERFLOW_STATION_ID", value_parser = non_empty)]
    station: String,

    /// Base URL for the WeatherFlow REST API
    #[clap(long, default_value_t = DEFAULT_API_URL.into())]
    api_url: String,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Fetch observations from the WeatherFlow API at this interval, in seconds.
    #[clap(long, default_value_t = DEFAULT_REFRESH_SECS)]
    refresh_secs: u64,

    /// Timeout for fetching observations from the WeatherFlow API, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Address to bind to. By default, tempest_exporter will bind to public address since
    /// the purpose is to expose metrics to an external system (Prometheus or another
    /// agent for ingestion)
    #[clap(long, default_value_t = DEFAULT_BIND_IP)]
    bind_ip: IpAddr,

    /// Port to serve metrics on
    #[clap(long, env = "WEATHERFLOW_LISTEN_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
}

fn non_empty(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        Err("value must not be empty".to_owned())
    } else {
        Ok(s.to_owned())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = TempestExporterApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let timeout = Duration::from_millis(opts.timeout_millis);
    let http_client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let client = TempestClient::new(http_client, &opts.api_url, opts.token.clone()).unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize API client", error = %e);
        process::exit(1)
    });

    // Make an initial request to verify that the station and token the user provided are
    // valid and the API is available before starting the HTTP server and running indefinitely.
    match client.observations(&opts.station).await {
        Err(ClientError::InvalidStation(station)) => {
            tracing::error!(message = "invalid station provided", station = %station);
            process::exit(1)
        }
        Err(ClientError::Unauthorized) => {
            tracing::error!(message = "API token rejected", station = %opts.station);
            process::exit(1)
        }
        Err(e) => {
            tracing::warn!(message = "failed to fetch initial station observations", error = %e);
        }
        Ok(o) => {
            tracing::debug!(message = "verified station information", identity = ?o.identity);
        }
    }

    let mut registry = prometheus_client::registry::Registry::default();
    let mut metrics = StationMetrics::new();
    metrics
        .initialize(&mut registry, record::numeric_fields(), Identity::LABEL_KEYS)
        .unwrap_or_else(|e| {
            tracing::error!(message = "unable to initialize station metrics", error = %e);
            process::exit(1)
        });
    let health = RefreshMetrics::new(&mut registry);

    let refresher = Refresher::new(
        client,
        Arc::new(metrics),
        health,
        opts.station.clone(),
        Duration::from_secs(opts.refresh_secs),
    );
    tokio::spawn(refresher.run());

    let context = Arc::new(RequestContext::new(registry));
    let app = tempest_exporter::http::app(context);
    let bind = SocketAddr::new(opts.bind_ip, opts.port);
    let server = axum::Server::try_bind(&bind).unwrap_or_else(|e| {
        tracing::error!(message = "error binding to address", address = %bind, error = %e);
        process::exit(1)
    });

    tracing::info!(message = "server started", address = %bind);
    server
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    tracing::info!("server shutdown");
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
