// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 The cdm-device-agent Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration for the device agent.
//!
//! The agent is configured from the environment. `BRIDGE_API_URL` and
//! `THINGSBOARD_HOST` are required; everything else carries a default.
//!
//! | Variable | Default |
//! |---|---|
//! | `DEVICE_ID` | `device-001` |
//! | `DEVICE_TYPE` | `posix-device` |
//! | `TENANT_ID` | `tenant1` |
//! | `BRIDGE_API_URL` | required |
//! | `CERTS_DIR` | `./certs` |
//! | `THINGSBOARD_HOST` | required |
//! | `THINGSBOARD_MQTT_PORT` | `8883` |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

/// Default device identifier when `DEVICE_ID` is unset.
pub const DEFAULT_DEVICE_ID: &str = "device-001";

/// Default device type when `DEVICE_TYPE` is unset.
pub const DEFAULT_DEVICE_TYPE: &str = "posix-device";

/// Default tenant when `TENANT_ID` is unset.
pub const DEFAULT_TENANT_ID: &str = "tenant1";

/// Organization placed in the CSR subject (`O=`).
pub const DEFAULT_ORG: &str = "CDM";

/// Default credential directory when `CERTS_DIR` is unset.
pub const DEFAULT_CERTS_DIR: &str = "./certs";

/// Default broker TLS port when `THINGSBOARD_MQTT_PORT` is unset.
pub const DEFAULT_MQTT_PORT: u16 = 8883;

/// Timeout for the enrollment POST.
pub const ENROLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for the broker to acknowledge the MQTT CONNECT.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// MQTT keep-alive negotiated with the broker.
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Delay between telemetry cycles, applied after success and failure alike.
pub const CYCLE_INTERVAL: Duration = Duration::from_secs(30);

/// Immutable identity of this device, sourced from configuration.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    /// Unique device identifier; also the MQTT client id and CSR CN.
    pub device_id: String,
    /// Device model / type string; reported in telemetry.
    pub device_type: String,
    /// Tenant this device belongs to; becomes the CSR OU.
    pub tenant_id: String,
    /// Organization for the CSR subject.
    pub org: String,
}

/// Fully resolved agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Device identity.
    pub device: DeviceIdentity,
    /// Enrollment endpoint, already joined with the `/v1/enroll` path.
    pub enroll_url: Url,
    /// Directory holding the persisted credential bundle.
    pub certs_dir: PathBuf,
    /// MQTT broker hostname; also used for SNI and certificate matching.
    pub broker_host: String,
    /// MQTT broker TLS port.
    pub broker_port: u16,
    /// Delay between telemetry cycles.
    pub cycle_interval: Duration,
}

impl AgentConfig {
    /// Create a new configuration builder.
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }

    /// Load the configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value
    /// fails to parse. Configuration errors are surfaced before any
    /// task starts.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::builder()
            .device_id(env_or("DEVICE_ID", DEFAULT_DEVICE_ID))
            .device_type(env_or("DEVICE_TYPE", DEFAULT_DEVICE_TYPE))
            .tenant_id(env_or("TENANT_ID", DEFAULT_TENANT_ID))
            .certs_dir(env_or("CERTS_DIR", DEFAULT_CERTS_DIR));

        builder = builder
            .bridge_url(non_empty("BRIDGE_API_URL").ok_or(ConfigError::MissingVar("BRIDGE_API_URL"))?)
            .broker_host(
                non_empty("THINGSBOARD_HOST").ok_or(ConfigError::MissingVar("THINGSBOARD_HOST"))?,
            );

        if let Some(port) = non_empty("THINGSBOARD_MQTT_PORT") {
            let port = port.parse().map_err(|_| ConfigError::InvalidPort {
                var: "THINGSBOARD_MQTT_PORT",
                value: port.clone(),
            })?;
            builder = builder.broker_port(port);
        }

        builder.build()
    }
}

/// Builder for [`AgentConfig`].
///
/// Used by `from_env()` and by tests that need to point the agent at
/// mock endpoints.
#[derive(Default)]
pub struct AgentConfigBuilder {
    device_id: Option<String>,
    device_type: Option<String>,
    tenant_id: Option<String>,
    org: Option<String>,
    bridge_url: Option<String>,
    certs_dir: Option<PathBuf>,
    broker_host: Option<String>,
    broker_port: Option<u16>,
    cycle_interval: Option<Duration>,
}

impl AgentConfigBuilder {
    /// Set the device identifier.
    pub fn device_id(mut self, id: impl Into<String>) -> Self {
        self.device_id = Some(id.into());
        self
    }

    /// Set the device type string.
    pub fn device_type(mut self, ty: impl Into<String>) -> Self {
        self.device_type = Some(ty.into());
        self
    }

    /// Set the tenant identifier.
    pub fn tenant_id(mut self, tenant: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant.into());
        self
    }

    /// Set the CSR subject organization.
    pub fn org(mut self, org: impl Into<String>) -> Self {
        self.org = Some(org.into());
        self
    }

    /// Set the bridge API base URL.
    pub fn bridge_url(mut self, url: impl Into<String>) -> Self {
        self.bridge_url = Some(url.into());
        self
    }

    /// Set the credential directory.
    pub fn certs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.certs_dir = Some(dir.into());
        self
    }

    /// Set the broker hostname.
    pub fn broker_host(mut self, host: impl Into<String>) -> Self {
        self.broker_host = Some(host.into());
        self
    }

    /// Set the broker TLS port.
    pub fn broker_port(mut self, port: u16) -> Self {
        self.broker_port = Some(port);
        self
    }

    /// Override the telemetry cycle interval (tests only, in practice).
    pub fn cycle_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval = Some(interval);
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the bridge URL or broker host is missing, or
    /// if the bridge URL does not parse.
    pub fn build(self) -> Result<AgentConfig, ConfigError> {
        let bridge_url = self.bridge_url.ok_or(ConfigError::MissingVar("BRIDGE_API_URL"))?;
        let broker_host = self
            .broker_host
            .ok_or(ConfigError::MissingVar("THINGSBOARD_HOST"))?;

        // Join the way the bridge expects: base + /v1/enroll, tolerating
        // a trailing slash on the base.
        let enroll_url = format!("{}/v1/enroll", bridge_url.trim_end_matches('/'));
        let enroll_url = Url::parse(&enroll_url).map_err(|source| ConfigError::InvalidUrl {
            var: "BRIDGE_API_URL",
            source,
        })?;

        Ok(AgentConfig {
            device: DeviceIdentity {
                device_id: self.device_id.unwrap_or_else(|| DEFAULT_DEVICE_ID.into()),
                device_type: self.device_type.unwrap_or_else(|| DEFAULT_DEVICE_TYPE.into()),
                tenant_id: self.tenant_id.unwrap_or_else(|| DEFAULT_TENANT_ID.into()),
                org: self.org.unwrap_or_else(|| DEFAULT_ORG.into()),
            },
            enroll_url,
            certs_dir: self.certs_dir.unwrap_or_else(|| DEFAULT_CERTS_DIR.into()),
            broker_host,
            broker_port: self.broker_port.unwrap_or(DEFAULT_MQTT_PORT),
            cycle_interval: self.cycle_interval.unwrap_or(CYCLE_INTERVAL),
        })
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    non_empty(key).unwrap_or_else(|| fallback.to_string())
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}
