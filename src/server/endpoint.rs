//! QUIC endpoint for the chat server
//!
//! Accepts connections and wires each one to the chat core: a reader task
//! decodes length-prefixed command frames, a writer task drains the
//! connection's event channel. One bidirectional stream per connection,
//! opened by the client.

use std::sync::Arc;

use quinn::Endpoint;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{ChatError, Result};
use crate::generate_id;
use crate::protocol::codec::{encode_frame, FrameDecoder};
use crate::protocol::messages::{ClientCommand, ServerEvent};
use crate::server::chat_server::ChatServer;
use crate::transport::gateway::Fanout;

/// ALPN protocol identifier
pub const ALPN: &[u8] = b"embercast";

/// Bind the QUIC endpoint without accepting yet
///
/// Split from `serve` so callers (and tests) can learn the bound address
/// when listening on an ephemeral port.
pub fn bind(server: &ChatServer) -> Result<Endpoint> {
    build_endpoint(server)
}

/// Run the accept loop until the endpoint shuts down
pub async fn serve(server: Arc<ChatServer>) -> Result<()> {
    let endpoint = bind(&server)?;
    serve_on(server, endpoint).await
}

/// Run the accept loop on an already-bound endpoint
pub async fn serve_on(server: Arc<ChatServer>, endpoint: Endpoint) -> Result<()> {
    info!("Chat server listening on {}", endpoint.local_addr()?);

    while let Some(incoming) = endpoint.accept().await {
        let active = server.gateway().connection_count().await;
        if active >= server.config().max_connections {
            warn!("Connection limit reached, refusing connection");
            incoming.refuse();
            continue;
        }

        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(server, incoming).await {
                debug!("Connection ended with error: {}", e);
            }
        });
    }

    warn!("Endpoint stopped accepting connections");
    Ok(())
}

/// Build the QUIC endpoint with a self-signed development certificate
fn build_endpoint(server: &ChatServer) -> Result<Endpoint> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
        .map_err(|e| ChatError::config(format!("Failed to generate certificate: {}", e)))?;

    let cert_der = CertificateDer::from(
        cert.serialize_der()
            .map_err(|e| ChatError::config(format!("Failed to serialize certificate: {}", e)))?,
    );
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));

    let mut tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .map_err(|e| ChatError::config(format!("Failed to configure TLS: {}", e)))?;
    tls_config.alpn_protocols = vec![ALPN.to_vec()];

    let mut transport_config = quinn::TransportConfig::default();
    transport_config.max_idle_timeout(Some(
        server
            .config()
            .idle_timeout
            .try_into()
            .map_err(|_| ChatError::config("Idle timeout out of range"))?,
    ));

    let mut quic_config = quinn::ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
            .map_err(|e| ChatError::config(format!("Failed to create QUIC config: {}", e)))?,
    ));
    quic_config.transport_config(Arc::new(transport_config));

    Endpoint::server(quic_config, server.config().bind_addr)
        .map_err(|e| ChatError::network(format!("Failed to create endpoint: {}", e)))
}

/// Drive a single connection from accept to teardown
async fn handle_connection(server: Arc<ChatServer>, incoming: quinn::Incoming) -> Result<()> {
    let connection = incoming.await?;
    let remote_addr = connection.remote_address();
    let conn_id = generate_id();
    debug!("New connection {} from {}", conn_id, remote_addr);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    server.connect(&conn_id, event_tx).await;

    let result = run_connection(&server, &conn_id, &connection, event_rx).await;

    // Teardown is the implicit leave-all path
    server.disconnect(&conn_id).await;
    debug!("Connection {} closed", conn_id);
    result
}

async fn run_connection(
    server: &Arc<ChatServer>,
    conn_id: &str,
    connection: &quinn::Connection,
    mut event_rx: mpsc::UnboundedReceiver<ServerEvent>,
) -> Result<()> {
    let (mut send, mut recv) = connection.accept_bi().await?;

    // Writer: drain the event channel into frames
    let writer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let frame = match encode_frame(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    error!("Failed to encode event: {}", e);
                    continue;
                }
            };
            if send.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    // Reader: decode frames into commands and dispatch
    let mut decoder = FrameDecoder::new(server.config().max_frame_size);
    let mut buf = [0u8; 8192];
    loop {
        match recv.read(&mut buf).await {
            Ok(Some(n)) => {
                decoder.extend(&buf[..n]);
                loop {
                    let payload = match decoder.next_frame() {
                        Ok(Some(payload)) => payload,
                        Ok(None) => break,
                        Err(e) => {
                            // Framing is unrecoverable, drop the connection
                            warn!("Framing error on {}: {}", conn_id, e);
                            writer.abort();
                            return Err(e.into());
                        }
                    };

                    match serde_json::from_slice::<ClientCommand>(&payload) {
                        Ok(cmd) => server.handle_command(conn_id, cmd).await,
                        Err(e) => {
                            // A malformed command only fails its sender
                            let err = ChatError::from(e);
                            server
                                .gateway()
                                .send_to_connection(
                                    conn_id,
                                    ServerEvent::Error {
                                        code: err.code(),
                                        message: err.to_string(),
                                    },
                                )
                                .await;
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Read error on {}: {}", conn_id, e);
                break;
            }
        }
    }

    writer.abort();
    Ok(())
}
