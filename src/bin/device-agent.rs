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

//! CDM device agent entry point.
//!
//! Reads its configuration from the environment (see
//! [`cdm_device_agent::config`]), enrolls the device against the tenant
//! IoT bridge once, then publishes telemetry to the tenant ThingsBoard
//! broker on a fixed interval, forever.
//!
//! Exits non-zero on configuration or enrollment failure. Once enrolled,
//! the telemetry loop retries indefinitely and the process does not exit
//! on its own.

use std::process::ExitCode;

use cdm_device_agent::{
    AgentConfig, CredentialStore, EnrollmentEngine, Orchestrator, TelemetryChannel,
};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    tracing::info!(version = cdm_device_agent::VERSION, "CDM device agent starting");

    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::FAILURE;
        }
    };

    let store = CredentialStore::new(&config.certs_dir);

    let engine = match EnrollmentEngine::new(config.clone(), store.clone()) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "failed to build enrollment engine");
            return ExitCode::FAILURE;
        }
    };
    let channel = TelemetryChannel::new(config.clone(), store);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to create runtime");
            return ExitCode::FAILURE;
        }
    };

    let orchestrator = Orchestrator::new(engine, channel, config.cycle_interval);
    match rt.block_on(orchestrator.run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "agent failed");
            ExitCode::FAILURE
        }
    }
}
