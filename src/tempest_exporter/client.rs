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

use crate::record::{Identity, Record};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use std::error;
use std::fmt;

#[derive(Debug)]
pub enum ClientError {
    Internal(reqwest::Error),
    InvalidUrl(String),
    InvalidStation(String),
    Unauthorized,
    Unexpected(StatusCode, Url),
    Api(i64, String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(e) => write!(f, "{}", e),
            Self::InvalidUrl(u) => write!(f, "invalid API URL {}", u),
            Self::InvalidStation(s) => write!(f, "invalid station {}", s),
            Self::Unauthorized => write!(f, "API token rejected"),
            Self::Unexpected(status, url) => write!(f, "unexpected status {} for {}", status, url),
            Self::Api(code, message) => write!(f, "API error status {}: {}", code, message),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            _ => None,
        }
    }
}

/// Client for the WeatherFlow REST API.
///
/// The API token is sent as a query parameter and is never included in URLs that
/// are logged or returned as part of an error.
pub struct TempestClient {
    client: Client,
    base_url: Url,
    token: String,
}

impl TempestClient {
    const USER_AGENT: &'static str = concat!("tempest_exporter/", env!("CARGO_PKG_VERSION"));
    const JSON_RESPONSE: &'static str = "application/json";

    pub fn new<S: Into<String>>(client: Client, base_url: &str, token: S) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url).map_err(|_| ClientError::InvalidUrl(base_url.to_owned()))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }

        Ok(TempestClient {
            client,
            base_url,
            token: token.into(),
        })
    }

    /// Fetch station identity and the latest observations for a station.
    pub async fn observations(&self, station: &str) -> Result<StationObservations, ClientError> {
        let request_url = self.observations_url(station);
        tracing::debug!(message = "making latest observations request", url = %request_url);

        let res = self.make_request(station, request_url).await?;
        let body = res
            .json::<StationObservations>()
            .await
            .map_err(|e| ClientError::Internal(e.without_url()))?;
        if body.status.status_code != 0 {
            return Err(ClientError::Api(body.status.status_code, body.status.status_message));
        }

        Ok(body)
    }

    async fn make_request<S: Into<String>>(&self, station: S, url: Url) -> Result<Response, ClientError> {
        let mut authenticated = url.clone();
        authenticated.query_pairs_mut().append_pair("token", &self.token);

        let res = self
            .client
            .get(authenticated)
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .send()
            .await
            .map_err(|e| ClientError::Internal(e.without_url()))?;

        let status = res.status();
        if status.is_success() {
            Ok(res)
        } else if status == StatusCode::NOT_FOUND {
            Err(ClientError::InvalidStation(station.into()))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(ClientError::Unauthorized)
        } else {
            Err(ClientError::Unexpected(status, url))
        }
    }

    fn observations_url(&self, station: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut p) = url.path_segments_mut() {
            p.pop_if_empty().push("observations").push("station").push(station);
        }

        url
    }
}

impl fmt::Debug for TempestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempestClient")
            .field("client", &self.client)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Status {
    pub status_code: i64,
    pub status_message: String,
}

/// Response body of the station observations endpoint.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct StationObservations {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub obs: Vec<Record>,
}

impl StationObservations {
    /// The most recent observation, if the station reported any.
    pub fn latest(&self) -> Option<&Record> {
        self.obs.first()
    }
}
