//! ESP relay and sensor HTTP collaborators
//!
//! The board exposes `GET /relay?room=<key>&state=<on|off>` plus a pair of
//! sensor endpoints (`/dht`, newer firmware; `/sensor`, older). Sensor
//! reads try the prioritized list and accept the first reply that carries
//! `ok=true` with both values present.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

use super::intent::{DeviceCommand, RelayState, Room, RoomTarget};

const SENSOR_PATHS: [&str; 2] = ["/dht", "/sensor"];

/// Outcome of applying a device command, aggregated across rooms
#[derive(Debug, Clone, Serialize)]
pub struct RelayOutcome {
    pub ok: bool,
    pub text: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub results: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SensorReading {
    pub ok: bool,
    pub temperature_c: f64,
    pub humidity: f64,
}

pub struct EspClient {
    client: Client,
    base_url: String,
}

impl EspClient {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(5))
            // LAN board; environment proxies only get in the way
            .no_proxy()
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &crate::config::EspConfig) -> Self {
        Self::new(&config.base_url)
    }

    async fn relay_once(&self, room_key: &str, state: RelayState) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/relay", self.base_url))
            .query(&[("room", room_key), ("state", state.as_str())])
            .send()
            .await
            .with_context(|| format!("relay request failed for {}", room_key))?
            .error_for_status()
            .with_context(|| format!("relay rejected {}", room_key))?;
        Ok(response.text().await.unwrap_or_default().trim().to_string())
    }

    /// Issue one relay GET per target room. A multi-room command reports
    /// `partial_failure` when any room fails; a single-room command
    /// propagates its error.
    pub async fn apply(&self, command: &DeviceCommand) -> Result<RelayOutcome> {
        let (rooms, is_all): (Vec<Room>, bool) = match &command.target {
            RoomTarget::All => (Room::ALL.to_vec(), true),
            RoomTarget::Rooms(rooms) => {
                let mut unique = Vec::new();
                for &room in rooms {
                    if !unique.contains(&room) {
                        unique.push(room);
                    }
                }
                (unique, false)
            }
        };

        if rooms.is_empty() {
            return Ok(RelayOutcome {
                ok: false,
                text: "no_room_target".to_string(),
                results: BTreeMap::new(),
                errors: BTreeMap::new(),
            });
        }

        if rooms.len() == 1 {
            let text = self.relay_once(rooms[0].key(), command.state).await?;
            return Ok(RelayOutcome {
                ok: true,
                text,
                results: BTreeMap::new(),
                errors: BTreeMap::new(),
            });
        }

        let mut results = BTreeMap::new();
        let mut errors = BTreeMap::new();
        for room in &rooms {
            match self.relay_once(room.key(), command.state).await {
                Ok(text) => {
                    results.insert(room.key().to_string(), text);
                }
                Err(e) => {
                    warn!("relay failed for {}: {}", room.key(), e);
                    errors.insert(room.key().to_string(), e.to_string());
                }
            }
        }

        let ok = errors.is_empty();
        let room_list = rooms
            .iter()
            .map(|r| r.key())
            .collect::<Vec<_>>()
            .join(",");
        let text = match (ok, is_all) {
            (true, true) => format!("ok room=all state={}", command.state.as_str()),
            (true, false) => format!("ok rooms={} state={}", room_list, command.state.as_str()),
            (false, true) => "partial_failure room=all".to_string(),
            (false, false) => format!("partial_failure rooms={}", room_list),
        };

        Ok(RelayOutcome {
            ok,
            text,
            results,
            errors,
        })
    }

    /// Read temperature/humidity, first healthy endpoint wins.
    pub async fn sensor(&self) -> Result<SensorReading> {
        let mut last_error = None;

        for path in SENSOR_PATHS {
            let url = format!("{}{}", self.base_url, path);
            let response = match self.client.get(&url).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(format!("{}: {}", path, e));
                    continue;
                }
            };

            let status = response.status();
            let data: serde_json::Value = response.json().await.unwrap_or_default();

            if status.is_client_error() || status.is_server_error() {
                let detail = data
                    .get("error")
                    .and_then(|e| e.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("http_{}", status.as_u16()));
                last_error = Some(format!("{}: {}", path, detail));
                continue;
            }

            if data.get("ok").and_then(|v| v.as_bool()) != Some(true) {
                let detail = data
                    .get("error")
                    .and_then(|e| e.as_str())
                    .unwrap_or("sensor_error");
                last_error = Some(format!("{}: {}", path, detail));
                continue;
            }

            let temperature = data.get("temperature_c").and_then(|v| v.as_f64());
            let humidity = data.get("humidity").and_then(|v| v.as_f64());
            match (temperature, humidity) {
                (Some(temperature_c), Some(humidity)) => {
                    return Ok(SensorReading {
                        ok: true,
                        temperature_c,
                        humidity,
                    });
                }
                _ => {
                    last_error = Some(format!("{}: missing_sensor_values", path));
                }
            }
        }

        anyhow::bail!(last_error.unwrap_or_else(|| "sensor_unavailable".to_string()))
    }
}
