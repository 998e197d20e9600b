//! Telemetry channel tests against a stub MQTT broker over real mutual
//! TLS.
//!
//! The stub accepts TLS with client-certificate verification anchored at
//! the test CA, answers the MQTT CONNECT with a CONNACK, and records
//! PUBLISH and DISCONNECT packets. It speaks just enough MQTT 3.1.1 to
//! observe what the agent sends.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use cdm_device_agent::tls::{parse_pem_certificates, parse_pem_private_key};
use cdm_device_agent::{AgentConfig, ChannelError, CredentialStore, TelemetryChannel};

use crate::integration::{test_pki, TestPki};

const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
const PINGRESP: [u8; 2] = [0xD0, 0x00];

/// What one stub-broker connection observed.
#[derive(Debug, Default)]
struct BrokerReport {
    client_id: Option<String>,
    publishes: Vec<(String, Vec<u8>)>,
    disconnected: bool,
}

/// Read one MQTT packet: returns (fixed header byte, body), or `None`
/// on a clean EOF before the next packet.
async fn read_packet<S>(stream: &mut S) -> io::Result<Option<(u8, Vec<u8>)>>
where
    S: AsyncReadExt + Unpin,
{
    let mut header = [0u8; 1];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let mut len: usize = 0;
    let mut shift = 0;
    loop {
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await?;
        len |= ((byte[0] & 0x7F) as usize) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(Some((header[0], body)))
}

fn parse_connect_client_id(body: &[u8]) -> Option<String> {
    // protocol name (2 + 4) + level (1) + flags (1) + keep-alive (2)
    let id_start = 10;
    let id_len = u16::from_be_bytes([*body.get(id_start)?, *body.get(id_start + 1)?]) as usize;
    let id = body.get(id_start + 2..id_start + 2 + id_len)?;
    String::from_utf8(id.to_vec()).ok()
}

fn parse_publish(body: &[u8]) -> Option<(String, Vec<u8>)> {
    let topic_len = u16::from_be_bytes([*body.first()?, *body.get(1)?]) as usize;
    let topic = String::from_utf8(body.get(2..2 + topic_len)?.to_vec()).ok()?;
    // QoS 0: no packet id, the rest is payload.
    let payload = body.get(2 + topic_len..)?.to_vec();
    Some((topic, payload))
}

fn acceptor_for(pki: &TestPki) -> TlsAcceptor {
    let mut roots = rustls::RootCertStore::empty();
    for cert in parse_pem_certificates(pki.ca_cert_pem.as_bytes()).unwrap() {
        roots.add(cert).unwrap();
    }
    let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .unwrap();

    let config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(
            parse_pem_certificates(pki.server_cert_pem.as_bytes()).unwrap(),
            parse_pem_private_key(pki.server_key_pem.as_bytes()).unwrap(),
        )
        .unwrap();

    TlsAcceptor::from(Arc::new(config))
}

/// Accept `connections` sequential sessions. If `close_after_connack`,
/// the first session is dropped right after the CONNACK.
async fn run_stub_broker(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    connections: usize,
    close_after_connack: bool,
) -> Vec<BrokerReport> {
    let mut reports = Vec::new();

    for i in 0..connections {
        let (tcp, _) = listener.accept().await.expect("accept");
        let mut stream = acceptor.accept(tcp).await.expect("TLS accept");
        let mut report = BrokerReport::default();

        match read_packet(&mut stream).await.expect("read CONNECT") {
            Some((header, body)) if header >> 4 == 1 => {
                report.client_id = parse_connect_client_id(&body);
            }
            other => panic!("expected CONNECT, got {other:?}"),
        }
        stream.write_all(&CONNACK).await.expect("write CONNACK");

        if close_after_connack && i == 0 {
            drop(stream);
            reports.push(report);
            continue;
        }

        loop {
            match read_packet(&mut stream).await {
                Ok(Some((header, body))) => match header >> 4 {
                    3 => {
                        if let Some(publish) = parse_publish(&body) {
                            report.publishes.push(publish);
                        }
                    }
                    12 => stream.write_all(&PINGRESP).await.expect("write PINGRESP"),
                    14 => {
                        report.disconnected = true;
                        break;
                    }
                    _ => {}
                },
                Ok(None) | Err(_) => break,
            }
        }
        reports.push(report);
    }

    reports
}

/// Seed a credential store with the test PKI, the way enrollment would.
fn seeded_store(dir: &std::path::Path, pki: &TestPki) -> CredentialStore {
    let store = CredentialStore::new(dir);
    store.save_key(pki.client_key_pem.as_bytes()).unwrap();
    store.save_certificate(pki.client_cert_pem.as_bytes()).unwrap();
    store.save_ca_chain(pki.ca_cert_pem.as_bytes()).unwrap();
    store.mark_enrolled().unwrap();
    store
}

fn broker_config(port: u16, certs_dir: &std::path::Path) -> AgentConfig {
    AgentConfig::builder()
        .device_id("device-001")
        .device_type("posix-device")
        .bridge_url("http://bridge.invalid")
        .certs_dir(certs_dir)
        .broker_host("localhost")
        .broker_port(port)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_full_cycle_over_mtls() {
    let pki = test_pki("device-001");
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path(), &pki);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let broker = tokio::spawn(run_stub_broker(listener, acceptor_for(&pki), 1, false));

    let channel = TelemetryChannel::new(broker_config(port, dir.path()), store);
    channel.connect_and_publish().await.expect("cycle succeeds");

    let reports = broker.await.unwrap();
    let report = &reports[0];
    assert_eq!(report.client_id.as_deref(), Some("device-001"));
    assert_eq!(report.publishes.len(), 1);

    let (topic, payload) = &report.publishes[0];
    assert_eq!(topic, "v1/devices/me/telemetry");
    let payload: serde_json::Value = serde_json::from_slice(payload).unwrap();
    assert_eq!(payload["enrolled"], true);
    assert_eq!(payload["platform"], "posix-device");

    assert!(report.disconnected, "broker saw a clean DISCONNECT");
}

#[tokio::test]
async fn test_consecutive_cycles_use_fresh_sessions() {
    let pki = test_pki("device-001");
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path(), &pki);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let broker = tokio::spawn(run_stub_broker(listener, acceptor_for(&pki), 2, false));

    let channel = TelemetryChannel::new(broker_config(port, dir.path()), store);
    channel.connect_and_publish().await.expect("first cycle");
    channel.connect_and_publish().await.expect("second cycle");

    let reports = broker.await.unwrap();
    assert_eq!(reports.len(), 2, "each cycle opened its own connection");
    for report in &reports {
        assert_eq!(report.publishes.len(), 1);
        assert!(report.disconnected);
    }
}

#[tokio::test]
async fn test_broker_hangup_after_connack_does_not_fail_cycle() {
    let pki = test_pki("device-001");
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path(), &pki);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // First session is dropped after CONNACK; second is served fully.
    let broker = tokio::spawn(run_stub_broker(listener, acceptor_for(&pki), 2, true));

    let channel = TelemetryChannel::new(broker_config(port, dir.path()), store);

    // Publish/disconnect problems on a torn connection are logged, not
    // raised; the cycle still completes and releases its session.
    channel.connect_and_publish().await.expect("first cycle survives hangup");
    channel.connect_and_publish().await.expect("second cycle connects cleanly");

    let reports = broker.await.unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[1].publishes.len(), 1);
}

#[tokio::test]
async fn test_missing_credentials_fail_load() {
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path());
    // Store never populated.

    let channel = TelemetryChannel::new(broker_config(9, dir.path()), store);
    let err = channel.connect_and_publish().await.expect_err("cycle fails");
    assert!(matches!(err, ChannelError::CredentialLoad(_)));
}

#[tokio::test]
async fn test_corrupt_chain_fails_load() {
    let pki = test_pki("device-001");
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path());
    store.save_key(pki.client_key_pem.as_bytes()).unwrap();
    store.save_certificate(pki.client_cert_pem.as_bytes()).unwrap();
    store.save_ca_chain(b"not pem at all").unwrap();
    store.mark_enrolled().unwrap();

    let channel = TelemetryChannel::new(broker_config(9, dir.path()), store);
    let err = channel.connect_and_publish().await.expect_err("cycle fails");
    assert!(matches!(err, ChannelError::CredentialLoad(_)));
}

#[tokio::test]
async fn test_refused_connection_classified_as_tcp() {
    let pki = test_pki("device-001");
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path(), &pki);

    // Bind then drop: the port is very likely unused afterwards.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let channel = TelemetryChannel::new(broker_config(port, dir.path()), store);
    let err = channel.connect_and_publish().await.expect_err("cycle fails");
    assert!(
        matches!(err, ChannelError::TcpConnect(_) | ChannelError::ProtocolConnect(_)),
        "refused connect classified as transport-level: {err:?}"
    );
}
