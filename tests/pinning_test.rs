use rask_telemetry::sender::{ClientConfig, HttpClient, HttpTransmitter, Transmit, TransmitOutcome};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ServerConfig, ServerConnection, Stream};
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

const ACCEPTED: &str = r#"{"result":"Success"}"#;

struct Authority {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl Authority {
    fn new(name: &str) -> Self {
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    fn pem(&self) -> Vec<u8> {
        self.cert.pem().into_bytes()
    }

    /// Server config presenting a leaf for 127.0.0.1 issued by this authority.
    fn server_config(&self) -> ServerConfig {
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, "collector");
        params.subject_alt_names = vec![
            SanType::DnsName("localhost".try_into().unwrap()),
            SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        ];
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        let leaf_key = KeyPair::generate().unwrap();
        let leaf = params.signed_by(&leaf_key, &self.cert, &self.key).unwrap();

        let chain = vec![CertificateDer::from(leaf.der().clone())];
        let key = PrivatePkcs8KeyDer::from(leaf_key.serialize_der());
        ServerConfig::builder_with_provider(ring::default_provider().into())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(chain, PrivateKeyDer::Pkcs8(key))
            .unwrap()
    }
}

/// Blocking HTTPS collector answering every request with [`ACCEPTED`].
struct TlsCollector {
    addr: String,
    served: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TlsCollector {
    fn start(config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let config = Arc::new(config);
        let served = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let served = served.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || {
                for stream in listener.incoming() {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    let Ok(mut tcp) = stream else {
                        continue;
                    };
                    let Ok(mut conn) = ServerConnection::new(config.clone()) else {
                        break;
                    };
                    let mut tls = Stream::new(&mut conn, &mut tcp);

                    let mut request = Vec::new();
                    let mut chunk = [0u8; 1024];
                    let complete = loop {
                        match tls.read(&mut chunk) {
                            Ok(0) | Err(_) => break false,
                            Ok(n) => {
                                request.extend_from_slice(&chunk[..n]);
                                if request.windows(4).any(|w| w == b"\r\n\r\n") {
                                    break true;
                                }
                            }
                        }
                    };
                    if !complete {
                        continue;
                    }

                    served.fetch_add(1, Ordering::SeqCst);
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                        ACCEPTED.len(),
                        ACCEPTED
                    );
                    let _ = tls.write_all(response.as_bytes());
                }
            })
        };

        Self {
            addr,
            served,
            shutdown,
            handle: Some(handle),
        }
    }

    fn endpoint(&self) -> String {
        format!("https://{}", self.addr)
    }

    fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

impl Drop for TlsCollector {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = TcpStream::connect(&self.addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn pinned_transmitter(endpoint: String, pinned: Vec<u8>) -> HttpTransmitter {
    let client = HttpClient::new(ClientConfig {
        endpoint,
        event_path: "i".to_string(),
        pinned_certificates: vec![pinned],
        ..ClientConfig::default()
    })
    .unwrap();
    HttpTransmitter::new(client)
}

#[tokio::test]
async fn test_certificate_outside_pinned_set_is_transport_failure() {
    let server_ca = Authority::new("collector-ca");
    let other_ca = Authority::new("someone-else-ca");
    let collector = TlsCollector::start(server_ca.server_config());

    let transmitter = pinned_transmitter(collector.endpoint(), other_ca.pem());
    let outcome = transmitter
        .transmit("app_key=k&timestamp=1&device_id=d&session_id=d")
        .await;

    assert!(
        matches!(outcome, TransmitOutcome::TransportFailure { .. }),
        "unexpected outcome {outcome:?}"
    );
    assert_eq!(collector.served(), 0);
}

#[tokio::test]
async fn test_pinned_certificate_is_trusted() {
    let server_ca = Authority::new("collector-ca");
    let collector = TlsCollector::start(server_ca.server_config());

    let transmitter = pinned_transmitter(collector.endpoint(), server_ca.pem());
    let outcome = transmitter
        .transmit("app_key=k&timestamp=1&device_id=d&session_id=d")
        .await;

    assert_eq!(outcome, TransmitOutcome::Success);
    assert_eq!(collector.served(), 1);
}
