//! Reconnecting OCPP-J WebSocket client
//!
//! Maintains one connection to the central system with the `ocpp1.6`
//! subprotocol. TLS and credentials follow the configured
//! `SecurityProfile`: 0 plain, 1 plain + HTTP Basic, 2 TLS + Basic,
//! 3 mutual TLS with the SECC leaf certificate. Client pings run every
//! `WebSocketPingInterval` seconds; a missing pong within
//! `WebsocketPongTimeout` tears the connection down. Reconnects follow
//! the configured backoff sequence with random jitter.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::http::{header, Request, Uri};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::Connector;
use tracing::{debug, error, info, warn};

use crate::device_model::DeviceModel;
use crate::device_model::KnownKey;
use crate::drivers::CertStore;
use crate::queue::backoff::ReconnectBackoff;
use crate::queue::MessageQueue;
use crate::support::errors::ChargePointError;

/// OCPP 1.6 WebSocket subprotocol token.
const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

/// Connection events surfaced to the charge point runtime.
#[derive(Debug)]
pub enum LinkEvent {
    /// Connection established; carries the wire sender for frames that
    /// bypass the Call queue (CallResult / CallError replies).
    Connected(mpsc::UnboundedSender<String>),
    Disconnected,
    /// Raw OCPP-J frame text.
    Message(String),
    /// Profile 3: seconds until the client certificate expires, so the
    /// runtime can schedule a reconnect at exactly that moment.
    CertificateExpiresIn(i64),
}

pub struct WebSocketLink {
    device_model: Arc<DeviceModel>,
    cert_store: Arc<dyn CertStore>,
    queue: Arc<MessageQueue>,
    events: mpsc::UnboundedSender<LinkEvent>,
    /// Armed fallback: switch to this profile if the next connect fails.
    fallback_profile: Mutex<Option<i32>>,
}

impl WebSocketLink {
    pub fn new(
        device_model: Arc<DeviceModel>,
        cert_store: Arc<dyn CertStore>,
        queue: Arc<MessageQueue>,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        Self {
            device_model,
            cert_store,
            queue,
            events,
            fallback_profile: Mutex::new(None),
        }
    }

    /// Arm a one-shot security profile fallback for the next failed
    /// connection attempt.
    pub fn arm_security_profile_fallback(&self, profile: i32) {
        *self.fallback_profile.lock().unwrap() = Some(profile);
    }

    fn connection_url(&self) -> Result<String, ChargePointError> {
        let uri = self
            .device_model
            .central_system_uri()
            .ok_or_else(|| ChargePointError::Validation("CentralSystemURI not set".into()))?;
        let id = self
            .device_model
            .charge_point_id()
            .ok_or_else(|| ChargePointError::Validation("ChargePointId not set".into()))?;
        Ok(format!("{}/{}", uri.trim_end_matches('/'), id))
    }

    /// HTTP Basic credentials: username is the charge point id, password
    /// the AuthorizationKey (hex-decoded when it is a long hex string).
    fn basic_auth_header(&self) -> Option<String> {
        let key = self.device_model.authorization_key()?;
        let id = self.device_model.charge_point_id()?;
        let password: Vec<u8> = if key.len() >= 40 && key.len() % 2 == 0 {
            hex::decode(&key).unwrap_or_else(|_| key.clone().into_bytes())
        } else {
            key.into_bytes()
        };
        let mut credentials = id.into_bytes();
        credentials.push(b':');
        credentials.extend_from_slice(&password);
        Some(format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        ))
    }

    async fn tls_connector(&self, profile: i32) -> Result<Option<Connector>, ChargePointError> {
        if profile < 3 {
            // profiles 0/1 are plain ws; profile 2 uses the default
            // native-roots connector
            return Ok(None);
        }

        let mut roots = rustls::RootCertStore::empty();
        for cert in rustls_native_certs::load_native_certs().certs {
            let _ = roots.add(cert);
        }

        let (chain_pem, key_pem) = self
            .cert_store
            .client_identity()
            .await
            .ok_or_else(|| ChargePointError::Validation("no SECC leaf certificate installed".into()))?;

        let certs: Vec<_> = rustls_pemfile::certs(&mut chain_pem.as_bytes())
            .collect::<Result<_, _>>()
            .map_err(|e| ChargePointError::Validation(format!("bad client chain: {}", e)))?;
        let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
            .map_err(|e| ChargePointError::Validation(format!("bad client key: {}", e)))?
            .ok_or_else(|| ChargePointError::Validation("no client key found".into()))?;

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
            .map_err(|e| ChargePointError::Validation(format!("client auth setup: {}", e)))?;

        Ok(Some(Connector::Rustls(Arc::new(config))))
    }

    /// Run the connection loop until the task is aborted.
    pub async fn run(self: Arc<Self>) {
        let mut backoff = ReconnectBackoff::new(
            self.device_model.retry_backoff_wait_minimum(),
            self.device_model.retry_backoff_repeat_times(),
            self.device_model.retry_backoff_random_range(),
        );

        loop {
            match self.connect_and_serve().await {
                Ok(()) => {
                    backoff.reset();
                }
                Err(e) => {
                    error!(error = %e, "Connection attempt failed");
                    let fallback = self.fallback_profile.lock().unwrap().take();
                    if let Some(profile) = fallback {
                        warn!(profile, "Falling back to lower security profile");
                        self.device_model
                            .set_internal(KnownKey::SecurityProfile, &profile.to_string())
                            .await;
                    }
                }
            }

            self.queue.pause();
            let _ = self.events.send(LinkEvent::Disconnected);

            let delay = backoff.next_delay();
            info!(delay_s = delay.as_secs(), "Reconnecting after backoff");
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_and_serve(&self) -> Result<(), ChargePointError> {
        let profile = self.device_model.security_profile();
        let url = self.connection_url()?;
        let uri: Uri = url
            .parse()
            .map_err(|_| ChargePointError::Validation(format!("invalid URL: {}", url)))?;

        if profile >= 2 && uri.scheme_str() != Some("wss") {
            return Err(ChargePointError::Validation(
                "security profile 2/3 requires a wss:// URL".into(),
            ));
        }

        let host = uri
            .host()
            .ok_or_else(|| ChargePointError::Validation("URL has no host".into()))?
            .to_string();

        let mut request = Request::builder()
            .uri(&url)
            .header(header::HOST, host)
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, generate_key())
            .header(header::SEC_WEBSOCKET_PROTOCOL, OCPP_SUBPROTOCOL);

        if profile >= 1 {
            match self.basic_auth_header() {
                Some(auth) => request = request.header(header::AUTHORIZATION, auth),
                None => {
                    return Err(ChargePointError::Validation(
                        "security profile requires an AuthorizationKey".into(),
                    ))
                }
            }
        }

        let request = request
            .body(())
            .map_err(|e| ChargePointError::Transport(e.to_string()))?;

        let connector = self.tls_connector(profile).await?;

        info!(url = url.as_str(), profile, "Connecting to central system");
        let (ws_stream, response) =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
                .await
                .map_err(|e| ChargePointError::Transport(e.to_string()))?;

        let accepted = response
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());
        if accepted != Some(OCPP_SUBPROTOCOL) {
            warn!(?accepted, "Central system did not confirm the ocpp1.6 subprotocol");
        }

        info!("WebSocket connected");

        if profile == 3 {
            if let Some((chain, _)) = self.cert_store.client_identity().await {
                let expires_in = self.cert_store.valid_in(&chain).await;
                let _ = self.events.send(LinkEvent::CertificateExpiresIn(expires_in));
            }
        }

        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        // wire sender feeding the socket; the queue writes into it
        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<String>();
        self.queue.resume(send_tx.clone());
        let _ = self.events.send(LinkEvent::Connected(send_tx.clone()));

        let ping_interval =
            Duration::from_secs(self.device_model.websocket_ping_interval().max(1) as u64);
        let pong_timeout =
            Duration::from_secs(self.device_model.websocket_pong_timeout().max(1) as u64);
        let ping_payload = self
            .device_model
            .raw(KnownKey::WebsocketPingPayload)
            .unwrap_or_default();

        let mut ping_timer = tokio::time::interval(ping_interval);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping_timer.reset();
        let mut last_pong = tokio::time::Instant::now();
        let mut awaiting_pong = false;

        loop {
            tokio::select! {
                outgoing = send_rx.recv() => {
                    match outgoing {
                        Some(text) => {
                            debug!(frame = text.as_str(), "Sending");
                            if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                                error!(error = %e, "Send failed");
                                break;
                            }
                        }
                        None => break,
                    }
                }

                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            debug!(frame = %text, "Received");
                            let _ = self.events.send(LinkEvent::Message(text.to_string()));
                        }
                        Some(Ok(Message::Pong(_))) => {
                            last_pong = tokio::time::Instant::now();
                            awaiting_pong = false;
                        }
                        Some(Ok(Message::Ping(_))) => {
                            // tungstenite answers pings itself
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(?frame, "Central system closed the connection");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }
                        None => {
                            info!("WebSocket stream ended");
                            break;
                        }
                    }
                }

                _ = ping_timer.tick() => {
                    if awaiting_pong && last_pong.elapsed() > ping_interval + pong_timeout {
                        warn!("Pong overdue, reconnecting");
                        break;
                    }
                    awaiting_pong = true;
                    if let Err(e) = ws_tx.send(Message::Ping(ping_payload.clone().into_bytes().into())).await {
                        error!(error = %e, "Ping failed");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}
