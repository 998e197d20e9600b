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

//! Two-task handoff between enrollment and the telemetry loop.
//!
//! The orchestrator runs two units concurrently:
//!
//! - the enrollment unit runs exactly once and, on success, fires a
//!   one-shot signal;
//! - the channel unit waits on that signal, then cycles forever:
//!   connect, publish, disconnect, sleep the fixed interval, repeat,
//!   retrying after the same interval on any failure.
//!
//! The signal is a `tokio::sync::oneshot`: the enrollment unit is the
//! sole sender, the channel unit the sole receiver. Enrollment failure
//! is conveyed by dropping the sender, after which the channel unit
//! never attempts a connection; a device without a provisioned
//! identity stays off the network. The marker write happens inside
//! `provision()` before the send, so the first credential load is
//! strictly ordered after the committed bundle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::channel::TelemetryChannel;
use crate::enroll::EnrollmentEngine;
use crate::error::{ChannelError, EnrollError};

/// One-shot device provisioning.
#[async_trait]
pub trait Provision: Send + Sync + 'static {
    /// Provision the device identity. Called exactly once.
    async fn provision(&self) -> Result<(), EnrollError>;
}

/// One telemetry cycle.
#[async_trait]
pub trait Telemetry: Send + Sync + 'static {
    /// Run one connect-publish-disconnect cycle.
    async fn run_cycle(&self) -> Result<(), ChannelError>;
}

#[async_trait]
impl Provision for EnrollmentEngine {
    async fn provision(&self) -> Result<(), EnrollError> {
        self.enroll().await
    }
}

#[async_trait]
impl Telemetry for TelemetryChannel {
    async fn run_cycle(&self) -> Result<(), ChannelError> {
        self.connect_and_publish().await
    }
}

/// Runs the enrollment unit and the channel unit to the scheme above.
pub struct Orchestrator<P, T> {
    provisioner: Arc<P>,
    telemetry: Arc<T>,
    cycle_interval: Duration,
}

impl<P: Provision, T: Telemetry> Orchestrator<P, T> {
    /// Create an orchestrator with the given units and cycle interval.
    pub fn new(provisioner: P, telemetry: T, cycle_interval: Duration) -> Self {
        Self {
            provisioner: Arc::new(provisioner),
            telemetry: Arc::new(telemetry),
            cycle_interval,
        }
    }

    /// Run both units.
    ///
    /// Returns `Err` if enrollment fails (the caller should exit
    /// non-zero). On enrollment success this never returns: the
    /// telemetry loop has no shutdown path.
    pub async fn run(self) -> Result<(), EnrollError> {
        let (enrolled_tx, enrolled_rx) = oneshot::channel();

        let channel_task = tokio::spawn(Self::telemetry_loop(
            Arc::clone(&self.telemetry),
            enrolled_rx,
            self.cycle_interval,
        ));

        match self.provisioner.provision().await {
            Ok(()) => {
                info!("enrollment unit finished, signaling channel unit");
                // The receiver outlives us unless the loop task died;
                // either way there is nothing further to do here.
                let _ = enrolled_tx.send(());
            }
            Err(e) => {
                error!(error = %e, "enrollment failed, device will not connect");
                drop(enrolled_tx);
                return Err(e);
            }
        }

        // Never completes after a successful signal.
        let _ = channel_task.await;
        Ok(())
    }

    async fn telemetry_loop(
        telemetry: Arc<T>,
        enrolled: oneshot::Receiver<()>,
        interval: Duration,
    ) {
        info!("channel unit waiting for enrollment");
        if enrolled.await.is_err() {
            warn!("enrollment never completed, channel unit exiting without connecting");
            return;
        }

        info!("channel unit starting telemetry cycles");
        loop {
            if let Err(e) = telemetry.run_cycle().await {
                warn!(error = %e, retry_in = ?interval, "telemetry cycle failed");
            }
            sleep(interval).await;
        }
    }
}
