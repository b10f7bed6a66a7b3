// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Transport adapter: one duplex byte stream to the broker, over plain
//! TCP, TLS, or WebSocket (optionally over TLS).

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{self, ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream,
    WebSocketStream};

use crate::connect_options::{ConnectOptions, ConnectType, TlsType};
use crate::error::{Error, ErrorKind};

/// Duplex connection to the broker.
#[derive(Debug)]
pub enum Stream {
    /// No transport; the initial state and the state after `close()`.
    None,
    Mqtt(TcpStream),
    Mqtts(Box<TlsStream<TcpStream>>),
    Ws(Box<WebSocketStream<MaybeTlsStream<TcpStream>>>),
}

impl Stream {
    /// Dial the broker with the transport selected in `options`,
    /// bounded by the connect timeout.
    ///
    /// # Errors
    ///
    /// Returns error if the socket, TLS handshake or WebSocket upgrade
    /// fails, or the timeout fires.
    pub async fn connect(options: &ConnectOptions) -> Result<Self, Error> {
        let fut = Self::connect_inner(options);
        timeout(options.connect_timeout(), fut)
            .await
            .map_err(|_| Error::new(ErrorKind::SocketError, "connect timed out"))?
    }

    async fn connect_inner(options: &ConnectOptions) -> Result<Self, Error> {
        let host = options.host();
        let port = options.port();
        match options.connect_type() {
            ConnectType::Mqtt => {
                let socket = TcpStream::connect((host, port)).await?;
                Ok(Self::Mqtt(socket))
            }
            ConnectType::Mqtts(mqtts) => {
                let connector = tls_connector(&mqtts.tls_type)?;
                let server_name = ServerName::try_from(mqtts.domain.as_str()).map_err(|_| {
                    Error::from_string(
                        ErrorKind::CertError,
                        format!("invalid server name: {}", mqtts.domain),
                    )
                })?;
                let socket = TcpStream::connect((host, port)).await?;
                let tls_socket = connector.connect(server_name, socket).await?;
                Ok(Self::Mqtts(Box::new(tls_socket)))
            }
            ConnectType::Ws(ws) => {
                let url = format!("ws://{host}:{port}{}", ws.path);
                let request = mqtt_ws_request(&url)?;
                let (ws_stream, _response) =
                    connect_async_tls_with_config(request, None, false, None).await?;
                Ok(Self::Ws(Box::new(ws_stream)))
            }
            ConnectType::Wss(wss) => {
                let url = format!("wss://{}:{port}{}", wss.domain, wss.path);
                let request = mqtt_ws_request(&url)?;
                let config = tls_client_config(&wss.tls_type)?;
                let connector = Connector::Rustls(Arc::new(config));
                let (ws_stream, _response) =
                    connect_async_tls_with_config(request, None, false, Some(connector)).await?;
                Ok(Self::Ws(Box::new(ws_stream)))
            }
        }
    }

    /// Whether the transport is gone or being torn down.
    #[must_use]
    pub const fn is_closing(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Read available bytes into `buf`.
    ///
    /// Returns the number of bytes read; zero means the peer closed
    /// the connection.
    ///
    /// # Errors
    ///
    /// Returns error if the socket or stream fails.
    pub async fn read_buf(&mut self, buf: &mut Vec<u8>) -> Result<usize, Error> {
        match self {
            Self::None => Err(Error::new(ErrorKind::SocketError, "stream is closed")),
            Self::Mqtt(tcp_stream) => Ok(tcp_stream.read_buf(buf).await?),
            Self::Mqtts(tls_stream) => Ok(tls_stream.read_buf(buf).await?),
            Self::Ws(ws_stream) => {
                // One binary frame carries one or more MQTT packets.
                // Control frames are skipped; tungstenite answers pings
                // itself.
                loop {
                    match ws_stream.next().await {
                        None => return Ok(0),
                        Some(msg) => match msg? {
                            WsMessage::Binary(data) => {
                                let data_len = data.len();
                                buf.extend(data);
                                return Ok(data_len);
                            }
                            WsMessage::Close(_) => return Ok(0),
                            _ => (),
                        },
                    }
                }
            }
        }
    }

    /// Write all of `buf` to the transport.
    ///
    /// # Errors
    ///
    /// Returns error if the socket or stream fails.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        match self {
            Self::None => Err(Error::new(ErrorKind::SocketError, "stream is closed")),
            Self::Mqtt(tcp_stream) => {
                tcp_stream.write_all(buf).await?;
                Ok(buf.len())
            }
            Self::Mqtts(tls_stream) => {
                tls_stream.write_all(buf).await?;
                Ok(buf.len())
            }
            Self::Ws(ws_stream) => {
                let msg = WsMessage::binary(buf);
                ws_stream.send(msg).await?;
                Ok(buf.len())
            }
        }
    }

    /// Shut the transport down. Harmless when already closed.
    pub async fn close(&mut self) {
        match std::mem::replace(self, Self::None) {
            Self::None => (),
            Self::Mqtt(mut tcp_stream) => {
                let _ret = tcp_stream.shutdown().await;
            }
            Self::Mqtts(mut tls_stream) => {
                let _ret = tls_stream.shutdown().await;
            }
            Self::Ws(mut ws_stream) => {
                let _ret = ws_stream.close(None).await;
            }
        }
    }
}

/// Build the WebSocket upgrade request with the `mqtt` subprotocol.
fn mqtt_ws_request(
    url: &str,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, Error> {
    let mut request = url.into_client_request()?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static("mqtt"),
    );
    Ok(request)
}

fn tls_connector(tls_type: &TlsType) -> Result<TlsConnector, Error> {
    let config = tls_client_config(tls_type)?;
    Ok(TlsConnector::from(Arc::new(config)))
}

fn tls_client_config(tls_type: &TlsType) -> Result<ClientConfig, Error> {
    let mut root_store = RootCertStore::empty();
    root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    if let TlsType::SelfSigned(self_signed) = tls_type {
        let root_ca_fd = File::open(&self_signed.root_ca_pem).map_err(|err| {
            Error::from_string(
                ErrorKind::CertError,
                format!("failed to open {}: {err}", self_signed.root_ca_pem),
            )
        })?;
        let mut reader = BufReader::new(root_ca_fd);
        let certs = rustls_pemfile::certs(&mut reader).map_err(|err| {
            Error::from_string(
                ErrorKind::CertError,
                format!("failed to parse {}: {err}", self_signed.root_ca_pem),
            )
        })?;
        for cert in certs {
            root_store.add(&rustls::Certificate(cert))?;
        }
    }

    Ok(ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth())
}
