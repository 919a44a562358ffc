//! TCP accept loop and frame dispatch for the orchestrator service.

use crate::error::OrchestratorError;
use crate::service::Orchestrator;
use anyhow::{Context, Result};
use periderm_protocol::{read_message, write_message, Message, OpCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub tls: Option<rustls::ServerConfig>,
}

/// A bound listener, plaintext or TLS depending on configuration.
pub struct Server {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.bind, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to listen on {addr}"))?;

        let acceptor = config.tls.map(|tls| TlsAcceptor::from(Arc::new(tls)));
        if acceptor.is_some() {
            info!(%addr, "orchestrator listening with TLS");
        } else {
            warn!(%addr, "orchestrator listening without TLS");
        }

        Ok(Self { listener, acceptor })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, service: Arc<Orchestrator>) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await.context("accept failed")?;
            let service = Arc::clone(&service);
            match self.acceptor.clone() {
                None => {
                    tokio::spawn(handle_connection(stream, service, peer));
                }
                Some(acceptor) => {
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls_stream) => handle_connection(tls_stream, service, peer).await,
                            Err(err) => warn!(%peer, %err, "TLS handshake failed"),
                        }
                    });
                }
            }
        }
    }
}

async fn handle_connection<S>(mut stream: S, service: Arc<Orchestrator>, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let message = match read_message(&mut stream).await {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(err) => {
                warn!(%peer, %err, "dropping connection on protocol error");
                return;
            }
        };

        let request_id = message.header.request_id;
        let frame = match dispatch(&service, message).await {
            Ok(frame) => frame,
            Err(err) => match Message::new(OpCode::Err, request_id, &err.to_payload()) {
                Ok(frame) => frame,
                Err(encode_err) => {
                    warn!(%peer, %encode_err, "failed to encode error response");
                    return;
                }
            },
        };

        if let Err(err) = write_message(&mut stream, &frame).await {
            warn!(%peer, %err, "failed to write response");
            return;
        }
    }
}

async fn dispatch(
    service: &Orchestrator,
    message: Message,
) -> std::result::Result<Message, OrchestratorError> {
    let request_id = message.header.request_id;
    let deadline = (message.header.deadline_secs > 0)
        .then(|| Duration::from_secs(u64::from(message.header.deadline_secs)));
    let started = Instant::now();

    let handler = async {
        match message.header.opcode {
            OpCode::CreateScan => {
                let response = service.create_scan()?;
                encode(request_id, &response)
            }
            OpCode::ListInterests => {
                let request = decode(&message)?;
                let response = service.list_interests(&request)?;
                encode(request_id, &response)
            }
            OpCode::ScanFiles => {
                let request = decode(&message)?;
                let remaining = deadline.map(|limit| limit.saturating_sub(started.elapsed()));
                let response = service.scan_files(request, remaining).await?;
                encode(request_id, &response)
            }
            other => Err(OrchestratorError::InvalidArgument(format!(
                "unsupported opcode {other:?}"
            ))),
        }
    };

    match deadline {
        Some(limit) => tokio::time::timeout(limit, handler)
            .await
            .map_err(|_| OrchestratorError::DeadlineExceeded(limit))?,
        None => handler.await,
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    message: &Message,
) -> std::result::Result<T, OrchestratorError> {
    message
        .decode()
        .map_err(|err| OrchestratorError::InvalidArgument(format!("malformed payload: {err}")))
}

fn encode<T: serde::Serialize>(
    request_id: u64,
    payload: &T,
) -> std::result::Result<Message, OrchestratorError> {
    Message::new(OpCode::Reply, request_id, payload)
        .map_err(|err| OrchestratorError::Internal(err.to_string()))
}
