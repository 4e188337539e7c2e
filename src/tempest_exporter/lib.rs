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

//! Prometheus metrics exporter for WeatherFlow Tempest weather stations
//!
//! ## Features
//!
//! `tempest_exporter` fetches the latest observation for a particular [Tempest station] using the
//! [WeatherFlow REST API] and emits every numeric field of it as a Prometheus gauge. Fields are
//! taken from a table of the observation schema rather than a hand-picked list, so every reading
//! the API returns is exported. Some example metrics are below.
//!
//! * `tempest_station_air_temperature{station_id=$STATION_ID, ...}` - Temperature, in degrees celsius.
//! * `tempest_station_relative_humidity{station_id=$STATION_ID, ...}` - Relative humidity (0-100).
//! * `tempest_station_wind_avg{station_id=$STATION_ID, ...}` - Average wind speed, in meters per second.
//! * `tempest_station_precip_accum_local_day{station_id=$STATION_ID, ...}` - Rain today, in millimeters.
//!
//! Every metric carries the labels `station_id`, `station_name`, `public_name`, `latitude`,
//! `longitude`, `timezone`, and `elevation`. Numeric label values are written as plain decimals
//! (e.g. `latitude="42.3601"`, `elevation="12"`), not in exponent notation (`4.23601E+01`), so
//! dashboards or alerts that match on those labels from other Tempest exporters may need updating.
//!
//! Stations that report readings from an indoor sensor (e.g. `air_temperature_indoor`) have those
//! readings exported in place of the outdoor reading whenever the indoor reading is non-zero. The
//! API reports a missing reading as zero, so an indoor reading of exactly zero is never used.
//!
//! The health of the exporter itself is available as the following metrics.
//!
//! * `tempest_exporter_refresh_attempts_total` - Attempts to fetch observations.
//! * `tempest_exporter_refresh_failures_total` - Failed attempts to fetch observations.
//! * `tempest_exporter_last_success_timestamp_seconds` - Time of the last successful fetch.
//!
//! [Tempest station]: https://weatherflow.github.io/Tempest/api/
//! [WeatherFlow REST API]: https://weatherflow.github.io/Tempest/api/swagger/
//!
//! ## Build
//!
//! `tempest_exporter` is a Rust program and must be built from source using a
//! [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! `tempest_exporter` needs a WeatherFlow personal access token and the ID of the station to
//! fetch observations for. Both can be passed as flags or environment variables.
//!
//! ```text
//! export WEATHERFLOW_API_TOKEN=...
//! export WEATHERFLOW_STATION_ID=12345
//! ./tempest_exporter
//! ```
//!
//! ### Prometheus
//!
//! Prometheus metrics are exposed on port `6969` at `/metrics` (the port may be changed with
//! `--port` or `WEATHERFLOW_LISTEN_PORT`). Observations are fetched every 15 seconds by default.
//!
//! ```yaml
//! scrape_configs:
//! - job_name: tempest_exporter
//!   static_configs:
//!   - targets: ['example:6969']
//! ```
//!

pub mod client;
pub mod http;
pub mod metrics;
pub mod overlay;
pub mod record;
pub mod refresh;
