//! QUIC chat client
//!
//! A thin typed client over the wire protocol, mainly used to exercise the
//! server end to end and as a reference for transport integrations.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::{ClientConfig as QuinnClientConfig, Connection, Endpoint, RecvStream, SendStream};
use tracing::{debug, info};

use crate::error::{ChatError, Result};
use crate::protocol::codec::{encode_frame, FrameDecoder, MAX_FRAME_SIZE};
use crate::protocol::messages::{ClientCommand, ServerEvent};
use crate::server::endpoint::ALPN;

/// Chat client configuration
#[derive(Clone, Debug)]
pub struct ChatClientConfig {
    /// Server address to connect to
    pub server_addr: SocketAddr,
    /// Client bind address (use 0.0.0.0:0 for auto)
    pub bind_addr: SocketAddr,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Maximum inbound frame size
    pub max_frame_size: usize,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:4433".parse().unwrap(),
            bind_addr: "0.0.0.0:0".parse().unwrap(),
            connect_timeout_secs: 10,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

/// Typed QUIC chat client
pub struct ChatClient {
    endpoint: Endpoint,
    connection: Connection,
    send: SendStream,
    recv: RecvStream,
    decoder: FrameDecoder,
}

impl ChatClient {
    /// Connect and open the command/event stream
    pub async fn connect(config: ChatClientConfig) -> Result<Self> {
        info!("Connecting to chat server at {}", config.server_addr);

        let mut endpoint = Endpoint::client(config.bind_addr)
            .map_err(|e| ChatError::network(format!("Failed to create endpoint: {}", e)))?;
        endpoint.set_default_client_config(configure_client()?);

        let connecting = endpoint.connect(config.server_addr, "localhost")?;
        let connection = tokio::time::timeout(
            Duration::from_secs(config.connect_timeout_secs),
            connecting,
        )
        .await
        .map_err(|_| ChatError::network("Connection timeout"))??;

        let (send, recv) = connection.open_bi().await?;
        debug!("Connected to {}", config.server_addr);

        Ok(Self {
            endpoint,
            connection,
            send,
            recv,
            decoder: FrameDecoder::new(config.max_frame_size),
        })
    }

    /// Send a raw command
    pub async fn send(&mut self, cmd: &ClientCommand) -> Result<()> {
        let frame = encode_frame(cmd)?;
        self.send.write_all(&frame).await?;
        Ok(())
    }

    /// Register an identity for this connection
    pub async fn register(&mut self, username: &str, roles: &[&str]) -> Result<()> {
        self.send(&ClientCommand::Register {
            user_id: None,
            username: username.to_string(),
            display_name: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
            color: None,
        })
        .await
    }

    /// Join the room bound to a stream key
    pub async fn join_stream(&mut self, stream_key: &str) -> Result<()> {
        self.send(&ClientCommand::JoinRoom {
            room_id: None,
            stream_key: Some(stream_key.to_string()),
        })
        .await
    }

    /// Join an ad-hoc room by id
    pub async fn join_room(&mut self, room_id: &str) -> Result<()> {
        self.send(&ClientCommand::JoinRoom {
            room_id: Some(room_id.to_string()),
            stream_key: None,
        })
        .await
    }

    /// Send a chat message
    pub async fn send_chat(&mut self, room_id: &str, body: &str) -> Result<()> {
        self.send(&ClientCommand::SendMessage {
            room_id: room_id.to_string(),
            message: body.to_string(),
            reply_to: None,
        })
        .await
    }

    /// Receive the next server event; `None` when the stream ended
    pub async fn next_event(&mut self) -> Result<Option<ServerEvent>> {
        loop {
            if let Some(payload) = self.decoder.next_frame()? {
                let event = serde_json::from_slice(&payload)?;
                return Ok(Some(event));
            }

            let mut buf = [0u8; 8192];
            match self.recv.read(&mut buf).await? {
                Some(n) => self.decoder.extend(&buf[..n]),
                None => return Ok(None),
            }
        }
    }

    /// Close the connection
    pub fn close(self) {
        self.connection.close(0u32.into(), b"Client disconnect");
        self.endpoint.close(0u32.into(), b"Client shutdown");
        info!("Disconnected from chat server");
    }
}

/// Configure the QUIC client
fn configure_client() -> Result<QuinnClientConfig> {
    // Custom verifier accepting the server's self-signed certificate
    // WARNING: development/testing only
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    Ok(QuinnClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| ChatError::config(format!("Failed to create QUIC config: {}", e)))?,
    )))
}

/// Certificate verifier that accepts any certificate (INSECURE - dev only)
#[derive(Debug)]
struct AcceptAnyCertificate;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::endpoint;
    use crate::server::chat_server::{ChatServer, ServerConfig};

    #[test]
    fn test_client_config_default() {
        let config = ChatClientConfig::default();
        assert_eq!(config.server_addr.port(), 4433);
        assert_eq!(config.bind_addr.port(), 0);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.max_frame_size, MAX_FRAME_SIZE);
    }

    async fn expect_event<F>(client: &mut ChatClient, mut pred: F) -> ServerEvent
    where
        F: FnMut(&ServerEvent) -> bool,
    {
        // Bounded scan so a missing event fails instead of hanging
        for _ in 0..20 {
            let event = tokio::time::timeout(Duration::from_secs(5), client.next_event())
                .await
                .expect("timed out waiting for event")
                .expect("read failure")
                .expect("stream closed");
            if pred(&event) {
                return event;
            }
        }
        panic!("Expected event not received");
    }

    #[tokio::test]
    async fn test_wire_round_trip() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let server = Arc::new(ChatServer::new(config));
        let server_endpoint = endpoint::bind(&server).unwrap();
        let addr = server_endpoint.local_addr().unwrap();
        tokio::spawn(endpoint::serve_on(Arc::clone(&server), server_endpoint));

        let client_config = ChatClientConfig {
            server_addr: addr,
            ..Default::default()
        };
        let mut client = ChatClient::connect(client_config).await.unwrap();

        client.register("alice", &[]).await.unwrap();
        expect_event(&mut client, |e| {
            matches!(e, ServerEvent::Registered { username, .. } if username == "alice")
        })
        .await;

        client.join_stream("abc").await.unwrap();
        let joined = expect_event(&mut client, |e| {
            matches!(e, ServerEvent::RoomJoined { .. })
        })
        .await;
        match joined {
            ServerEvent::RoomJoined { room_id, .. } => assert_eq!(room_id, "stream_abc"),
            _ => unreachable!(),
        }

        client.send_chat("stream_abc", "hello over quic").await.unwrap();
        expect_event(&mut client, |e| {
            matches!(e, ServerEvent::NewMessage { message } if message.body == "hello over quic")
        })
        .await;

        client.close();
    }
}
