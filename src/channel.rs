//! Mutually authenticated telemetry channel to the ThingsBoard broker.
//!
//! One call to [`TelemetryChannel::connect_and_publish`] is one complete
//! cycle: load credentials, open an mTLS MQTT session, publish a single
//! telemetry message, disconnect. The session state lives in a
//! [`ChannelSession`] value owned by that call alone: built fresh every
//! cycle and fully dropped on every exit path, so no transport or
//! protocol state survives into the next cycle.

use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    TlsConfiguration, Transport,
};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, CONNECT_TIMEOUT, KEEP_ALIVE};
use crate::error::ChannelError;
use crate::store::CredentialStore;
use crate::tls::build_client_tls;

/// Topic the telemetry message is published to.
pub const TELEMETRY_TOPIC: &str = "v1/devices/me/telemetry";

/// Bound on flushing the outgoing PUBLISH.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on draining the outgoing DISCONNECT.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
struct TelemetryPayload<'a> {
    enrolled: bool,
    platform: &'a str,
}

/// Drives one connect-publish-disconnect cycle per call.
pub struct TelemetryChannel {
    config: AgentConfig,
    store: CredentialStore,
}

impl TelemetryChannel {
    /// Create a channel bound to the given configuration and store.
    pub fn new(config: AgentConfig, store: CredentialStore) -> Self {
        Self { config, store }
    }

    /// Run one telemetry cycle.
    ///
    /// A publish failure is logged and does not fail the cycle; the
    /// disconnect still runs. Everything acquired during the cycle is
    /// released before this returns, on success and error alike.
    pub async fn connect_and_publish(&self) -> Result<(), ChannelError> {
        let bundle = self.store.load().map_err(|e| {
            ChannelError::credential_load(format!(
                "{}: {e}",
                self.config.certs_dir.display()
            ))
        })?;
        let tls = build_client_tls(&bundle)?;

        let mut session = ChannelSession::connect(&self.config, tls).await?;

        if let Err(e) = session.publish_telemetry(&self.config).await {
            warn!(error = %e, "telemetry publish failed");
        }

        session.disconnect().await;
        Ok(())
    }
}

/// Live MQTT-over-TLS session state for a single cycle.
struct ChannelSession {
    client: AsyncClient,
    eventloop: EventLoop,
    /// Cleared when the transport dies. Polling the event loop after a
    /// fatal error would make rumqttc reconnect, which a per-cycle
    /// session must never do.
    alive: bool,
}

impl ChannelSession {
    /// Open the TCP connection, complete the TLS handshake, and perform
    /// the MQTT CONNECT. The broker must acknowledge within
    /// [`CONNECT_TIMEOUT`].
    async fn connect(
        config: &AgentConfig,
        tls: std::sync::Arc<rustls::ClientConfig>,
    ) -> Result<Self, ChannelError> {
        let mut options = MqttOptions::new(
            config.device.device_id.clone(),
            config.broker_host.clone(),
            config.broker_port,
        );
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        options.set_transport(Transport::Tls(TlsConfiguration::Rustls(tls)));

        let (client, mut eventloop) = AsyncClient::new(options, 10);

        // rumqttc performs TCP connect, TLS handshake, and CONNECT inside
        // poll(); would-block conditions are absorbed there. Drive it
        // until the CONNACK arrives or a hard error surfaces.
        let wait_for_ack = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(event) => {
                        debug!(?event, "pre-CONNACK event");
                    }
                    Err(e) => return Err(classify_connect_error(e)),
                }
            }
        };

        match timeout(CONNECT_TIMEOUT, wait_for_ack).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(ChannelError::protocol_connect(format!(
                    "no CONNACK within {CONNECT_TIMEOUT:?}"
                )));
            }
        }

        info!(
            host = %config.broker_host,
            port = config.broker_port,
            "mTLS session established, CONNACK received"
        );
        Ok(Self {
            client,
            eventloop,
            alive: true,
        })
    }

    /// Publish the telemetry message at QoS 0 and flush it.
    async fn publish_telemetry(&mut self, config: &AgentConfig) -> Result<(), ChannelError> {
        let payload = serde_json::to_string(&TelemetryPayload {
            enrolled: true,
            platform: &config.device.device_type,
        })
        .map_err(|e| ChannelError::publish(e.to_string()))?;

        self.client
            .publish(TELEMETRY_TOPIC, QoS::AtMostOnce, false, payload.clone())
            .await
            .map_err(|e| ChannelError::publish(e.to_string()))?;

        // QoS 0: flushed to the wire is as far as confirmation goes.
        let flushed = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Publish(_))) => return Ok(()),
                    Ok(_) => continue,
                    Err(e) => return Err(ChannelError::publish(e.to_string())),
                }
            }
        };
        let flush_result = timeout(FLUSH_TIMEOUT, flushed).await;
        match flush_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.alive = false;
                return Err(e);
            }
            Err(_) => {
                return Err(ChannelError::publish(format!(
                    "publish not flushed within {FLUSH_TIMEOUT:?}"
                )));
            }
        }

        info!(topic = TELEMETRY_TOPIC, %payload, "telemetry published");
        Ok(())
    }

    /// Send DISCONNECT and drain the event loop. Errors here are
    /// ignored; the session is being torn down regardless.
    async fn disconnect(mut self) {
        if !self.alive {
            // The transport already failed; dropping the session is all
            // the teardown there is.
            debug!("session transport gone, skipping DISCONNECT");
            return;
        }
        if self.client.disconnect().await.is_err() {
            return;
        }

        let drained = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        };
        let _ = timeout(DISCONNECT_TIMEOUT, drained).await;
        debug!("session closed");
    }
}

/// Map an event-loop error during connection establishment onto the
/// channel taxonomy.
fn classify_connect_error(e: ConnectionError) -> ChannelError {
    match e {
        ConnectionError::Io(e) => ChannelError::tcp_connect(e.to_string()),
        ConnectionError::Tls(e) => ChannelError::tls_handshake(e.to_string()),
        ConnectionError::ConnectionRefused(code) => {
            ChannelError::protocol_connect(format!("broker refused connection: {code:?}"))
        }
        ConnectionError::NotConnAck(packet) => {
            ChannelError::protocol_connect(format!("expected CONNACK, got {packet:?}"))
        }
        other => ChannelError::protocol_connect(other.to_string()),
    }
}
