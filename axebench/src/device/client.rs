//! HTTP client for the Bitaxe firmware API
//!
//! Endpoints used:
//! - `GET /api/system/info`: telemetry and most capabilities
//! - `GET /api/system/asic`: ASIC defaults (fallback for older firmware)
//! - `PATCH /api/system`: write `coreVoltage` / `frequency`
//! - `POST /api/system/restart`

use super::{DeviceCapabilities, DeviceConnector, DeviceError, DeviceGateway, Telemetry};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 10;
const FALLBACK_VOLTAGE_MV: u32 = 1150;
const FALLBACK_FREQUENCY_MHZ: u32 = 500;

/// Capability-related fields of `/api/system/info`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SystemInfoResponse {
    small_core_count: Option<u32>,
    asic_count: Option<u32>,
    core_voltage: Option<u32>,
    frequency: Option<u32>,
    hostname: Option<String>,
    mac_addr: Option<String>,
    version: Option<String>,
}

/// `/api/system/asic`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AsicInfoResponse {
    asic_count: Option<u32>,
    default_voltage: Option<u32>,
    default_frequency: Option<u32>,
}

/// Bitaxe HTTP client
pub struct BitaxeClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl BitaxeClient {
    /// Create a client for `address` (bare IP/host or full `http://` URL)
    pub fn new(address: &str) -> Result<Self, DeviceError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| DeviceError::Network(e.to_string()))?;

        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address)
        };

        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, DeviceError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "GET");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| DeviceError::Network(e.to_string()))?;

        let response = check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| DeviceError::Parse(e.to_string()))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DeviceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response.text().await.unwrap_or_default();
    Err(DeviceError::Status(status.as_u16(), error_text))
}

/// Merge `/api/system/info` with `/api/system/asic` (when consulted)
fn build_capabilities(
    info: SystemInfoResponse,
    asic: Option<AsicInfoResponse>,
) -> Result<DeviceCapabilities, DeviceError> {
    let small_core_count = info
        .small_core_count
        .ok_or(DeviceError::MissingField("smallCoreCount"))?;

    let (asic_count, default_voltage, default_frequency) = match asic {
        None => (
            info.asic_count.unwrap_or(1),
            info.core_voltage.unwrap_or(FALLBACK_VOLTAGE_MV),
            info.frequency.unwrap_or(FALLBACK_FREQUENCY_MHZ),
        ),
        Some(asic) => (
            asic.asic_count.unwrap_or(1),
            asic.default_voltage.unwrap_or(FALLBACK_VOLTAGE_MV),
            asic.default_frequency.unwrap_or(FALLBACK_FREQUENCY_MHZ),
        ),
    };

    Ok(DeviceCapabilities {
        small_core_count,
        asic_count,
        default_voltage,
        default_frequency,
        hostname: info.hostname,
        mac_address: info.mac_addr,
        firmware_version: info.version,
    })
}

#[async_trait]
impl DeviceGateway for BitaxeClient {
    async fn read_telemetry(&self) -> Result<Telemetry, DeviceError> {
        self.get_json("/api/system/info").await
    }

    async fn apply_settings(&self, voltage: u32, frequency: u32) -> Result<(), DeviceError> {
        let url = format!("{}/api/system", self.base_url);
        let body = serde_json::json!({ "coreVoltage": voltage, "frequency": frequency });

        let response = self
            .http_client
            .patch(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeviceError::Network(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }

    async fn restart(&self) -> Result<(), DeviceError> {
        let url = format!("{}/api/system/restart", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .send()
            .await
            .map_err(|e| DeviceError::Network(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }

    async fn fetch_capabilities(&self) -> Result<DeviceCapabilities, DeviceError> {
        let info: SystemInfoResponse = self.get_json("/api/system/info").await?;
        if info.small_core_count.is_none() {
            return Err(DeviceError::MissingField("smallCoreCount"));
        }

        let complete =
            info.core_voltage.is_some() && info.frequency.is_some() && info.asic_count.is_some();
        if complete {
            return build_capabilities(info, None);
        }

        tracing::debug!("System info incomplete, querying /api/system/asic");
        let asic: AsicInfoResponse = self.get_json("/api/system/asic").await?;
        build_capabilities(info, Some(asic))
    }
}

/// Connector handing out [`BitaxeClient`]s
#[derive(Debug, Default, Clone)]
pub struct HttpConnector;

impl DeviceConnector for HttpConnector {
    fn connect(&self, address: &str) -> Result<Arc<dyn DeviceGateway>, DeviceError> {
        Ok(Arc::new(BitaxeClient::new(address)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(json: serde_json::Value) -> SystemInfoResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_base_url_normalization() {
        assert_eq!(BitaxeClient::new("192.168.1.50").unwrap().base_url(), "http://192.168.1.50");
        assert_eq!(
            BitaxeClient::new("http://127.0.0.1:8080/").unwrap().base_url(),
            "http://127.0.0.1:8080"
        );
    }

    #[test]
    fn test_capabilities_from_complete_system_info() {
        let caps = build_capabilities(
            info(serde_json::json!({
                "smallCoreCount": 1276,
                "asicCount": 1,
                "coreVoltage": 1200,
                "frequency": 525,
                "hostname": "bitaxe-gamma",
                "macAddr": "AA:BB:CC:DD:EE:FF",
                "version": "v2.4.0"
            })),
            None,
        )
        .unwrap();

        assert_eq!(caps.core_count_product(), 1276);
        assert_eq!(caps.default_voltage, 1200);
        assert_eq!(caps.default_frequency, 525);
        assert_eq!(caps.mac_address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(caps.firmware_version.as_deref(), Some("v2.4.0"));
    }

    #[test]
    fn test_capabilities_fall_back_to_asic_endpoint() {
        let asic: AsicInfoResponse = serde_json::from_value(serde_json::json!({
            "asicCount": 4,
            "defaultVoltage": 1166
        }))
        .unwrap();

        let caps = build_capabilities(
            info(serde_json::json!({ "smallCoreCount": 672, "coreVoltage": 1300 })),
            Some(asic),
        )
        .unwrap();

        // ASIC endpoint values win; missing frequency falls back to 500
        assert_eq!(caps.asic_count, 4);
        assert_eq!(caps.default_voltage, 1166);
        assert_eq!(caps.default_frequency, 500);
        assert_eq!(caps.core_count_product(), 2688);
    }

    #[test]
    fn test_capabilities_require_small_core_count() {
        let err = build_capabilities(info(serde_json::json!({ "asicCount": 1 })), None).unwrap_err();
        assert!(matches!(err, DeviceError::MissingField("smallCoreCount")));
    }
}
