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

//! # cdm-device-agent
//!
//! Device-side agent for the CDM platform: provisions a device
//! certificate through the tenant IoT bridge, then reports telemetry to
//! the tenant ThingsBoard broker over mutual TLS.
//!
//! The agent runs two concurrent units:
//!
//! - **Enrollment**, once per device lifetime: generate an EC P-256
//!   key pair, submit a PKCS#10 CSR to `POST {BRIDGE_API_URL}/v1/enroll`,
//!   persist the issued certificate and CA chain, and commit with an
//!   `.enrolled` marker. Re-running on an enrolled device is a no-op.
//! - **Telemetry**, gated on enrollment: every 30 seconds, open a fresh
//!   mTLS MQTT session with the issued identity, publish one telemetry
//!   message, and disconnect. Failures are logged and retried on the
//!   next cycle, forever.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cdm_device_agent::{
//!     AgentConfig, CredentialStore, EnrollmentEngine, Orchestrator, TelemetryChannel,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AgentConfig::from_env()?;
//!     let store = CredentialStore::new(&config.certs_dir);
//!
//!     let engine = EnrollmentEngine::new(config.clone(), store.clone())?;
//!     let channel = TelemetryChannel::new(config.clone(), store);
//!
//!     Orchestrator::new(engine, channel, config.cycle_interval)
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Credential layout
//!
//! Under `CERTS_DIR` (default `./certs`): `device-key.pem`,
//! `device.pem`, `ca-chain.pem`, and the zero-length `.enrolled`
//! marker that commits the bundle.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod channel;
pub mod config;
pub mod csr;
pub mod enroll;
pub mod error;
pub mod json;
pub mod orchestrator;
pub mod store;
pub mod tls;

// Re-export main types at crate root for convenience
pub use channel::TelemetryChannel;
pub use config::{AgentConfig, AgentConfigBuilder, DeviceIdentity};
pub use enroll::EnrollmentEngine;
pub use error::{ChannelError, ConfigError, EnrollError};
pub use orchestrator::{Orchestrator, Provision, Telemetry};
pub use store::{CredentialBundle, CredentialStore};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent string for HTTP requests.
pub const USER_AGENT: &str = concat!("cdm-device-agent/", env!("CARGO_PKG_VERSION"));
