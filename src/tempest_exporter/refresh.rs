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

use crate::client::{ClientError, StationObservations, TempestClient};
use crate::metrics::{RefreshMetrics, StationMetrics};
use crate::overlay;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{Instrument, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Metrics were set from the latest observation.
    Updated,
    /// The station reported no observations, metrics were left as they were.
    Empty,
}

/// Resolve indoor readings for the latest observation and set metrics from it.
pub fn fold(metrics: &StationMetrics, response: &StationObservations) -> Outcome {
    match response.latest() {
        Some(record) => {
            metrics.apply(&overlay::resolve(record.clone()), &response.identity.labels());
            Outcome::Updated
        }
        None => Outcome::Empty,
    }
}

/// Periodically fetch observations for a station and update metrics from them.
#[derive(Debug)]
pub struct Refresher {
    client: TempestClient,
    metrics: Arc<StationMetrics>,
    health: RefreshMetrics,
    station: String,
    interval: Duration,
}

impl Refresher {
    pub fn new<S: Into<String>>(
        client: TempestClient,
        metrics: Arc<StationMetrics>,
        health: RefreshMetrics,
        station: S,
        interval: Duration,
    ) -> Self {
        Refresher {
            client,
            metrics,
            health,
            station: station.into(),
            interval,
        }
    }

    /// Run refresh cycles forever, waiting for the interval after each one finishes.
    ///
    /// A cycle that fails to fetch observations is logged and skipped.
    pub async fn run(self) {
        tracing::info!(message = "observation polling started", station = %self.station, interval = ?self.interval);

        loop {
            self.cycle().await;
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Perform a single fetch and update, recording the result in health metrics.
    pub async fn cycle(&self) -> Option<Outcome> {
        self.health.attempt();
        match self
            .refresh()
            .instrument(tracing::span!(Level::DEBUG, "tempest_observations"))
            .await
        {
            Ok(outcome) => {
                self.health.success(SystemTime::now());
                match outcome {
                    Outcome::Updated => {
                        tracing::info!(message = "fetched new observation", station = %self.station)
                    }
                    Outcome::Empty => {
                        tracing::warn!(message = "no observations returned for station", station = %self.station)
                    }
                }
                Some(outcome)
            }
            Err(e) => {
                self.health.failure();
                tracing::error!(message = "failed to fetch observations", station = %self.station, error = %e);
                None
            }
        }
    }

    async fn refresh(&self) -> Result<Outcome, ClientError> {
        let response = self.client.observations(&self.station).await?;
        Ok(fold(&self.metrics, &response))
    }
}
