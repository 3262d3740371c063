//! Smart plug collaborator.
//!
//! The plug's vendor protocol is spoken by a local gateway; this module only
//! knows the gateway's small JSON surface and the plug's register (dps) map.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::DeviceConfig;
use crate::error::{AppError, Result};

/// Switch state register
pub const DPS_SWITCH: &str = "1";
/// Current, in mA
pub const DPS_CURRENT: &str = "18";
/// Power, in tenths of a watt
pub const DPS_POWER: &str = "19";
/// Voltage, in tenths of a volt
pub const DPS_VOLTAGE: &str = "20";

/// Raw register snapshot reported by the plug.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeviceStatus {
    pub power_on: bool,
    pub current_raw: f64,
    pub power_raw: f64,
    pub voltage_raw: f64,
}

impl DeviceStatus {
    /// Build a snapshot from a dps map. Absent registers read as off / 0.
    pub fn from_dps(dps: &Map<String, Value>) -> Result<Self> {
        let power_on = match dps.get(DPS_SWITCH) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(AppError::Device(format!(
                    "register {} is not a boolean: {}",
                    DPS_SWITCH, other
                )))
            }
        };

        Ok(Self {
            power_on,
            current_raw: numeric_register(dps, DPS_CURRENT)?,
            power_raw: numeric_register(dps, DPS_POWER)?,
            voltage_raw: numeric_register(dps, DPS_VOLTAGE)?,
        })
    }

    /// Parse a full gateway status payload (`{"dps": {...}}`).
    pub fn from_payload(payload: &Value) -> Result<Self> {
        if let Some(err) = payload.get("Error") {
            return Err(AppError::Device(format!("gateway reported: {}", err)));
        }
        match payload.get("dps") {
            Some(Value::Object(dps)) => Self::from_dps(dps),
            None => Self::from_dps(&Map::new()),
            Some(other) => Err(AppError::Device(format!(
                "dps is not an object: {}",
                other
            ))),
        }
    }
}

fn numeric_register(dps: &Map<String, Value>, key: &str) -> Result<f64> {
    match dps.get(key) {
        None | Some(Value::Null) => Ok(0.0),
        Some(v) => v.as_f64().ok_or_else(|| {
            AppError::Device(format!("register {} is not numeric: {}", key, v))
        }),
    }
}

/// Operations the monitor needs from a plug.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlugDevice: Send + Sync {
    async fn status(&self) -> Result<DeviceStatus>;
    async fn turn_on(&self) -> Result<()>;
    async fn turn_off(&self) -> Result<()>;
}

/// Plug reached through a local HTTP gateway exposing
/// `/status/{id}`, `/turnon/{id}` and `/turnoff/{id}`.
pub struct GatewayDevice {
    client: reqwest::Client,
    base_url: String,
    config: DeviceConfig,
}

impl GatewayDevice {
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            config: config.clone(),
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/{}/{}", self.base_url, action, self.config.id)
    }

    fn device_query(&self) -> Vec<(&'static str, &str)> {
        let mut query = Vec::new();
        if let Some(ip) = self.config.address.as_deref() {
            query.push(("ip", ip));
        }
        if let Some(key) = self.config.local_key.as_deref() {
            query.push(("key", key));
        }
        if let Some(version) = self.config.version.as_deref() {
            query.push(("version", version));
        }
        query
    }

    async fn call(&self, action: &str) -> Result<Value> {
        let url = self.endpoint(action);
        debug!(url = %url, "calling plug gateway");
        let payload = self
            .client
            .get(&url)
            .query(&self.device_query())
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(payload)
    }

    async fn command(&self, action: &str) -> Result<()> {
        let payload = self.call(action).await?;
        if let Some(err) = payload.get("Error") {
            return Err(AppError::Device(format!("{} rejected: {}", action, err)));
        }
        Ok(())
    }
}

#[async_trait]
impl PlugDevice for GatewayDevice {
    async fn status(&self) -> Result<DeviceStatus> {
        let payload = self.call("status").await?;
        DeviceStatus::from_payload(&payload)
    }

    async fn turn_on(&self) -> Result<()> {
        self.command("turnon").await
    }

    async fn turn_off(&self) -> Result<()> {
        self.command("turnoff").await
    }
}
