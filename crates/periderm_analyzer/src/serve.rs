//! Accept loop exposing an [`Analyzer`] over the wire protocol.

use crate::Analyzer;
use anyhow::{Context, Result};
use periderm_protocol::{
    read_message, write_message, AnalyzeFilesRequest, ErrorKind, ErrorPayload,
    ListInitialInterestsResponse, Message, OpCode,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
    pub tls: Option<rustls::ServerConfig>,
}

/// A bound analyzer listener.
pub struct AnalyzerServer {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
}

impl AnalyzerServer {
    pub async fn bind(config: ServeConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.bind, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to listen on {addr}"))?;

        let acceptor = config.tls.map(|tls| TlsAcceptor::from(Arc::new(tls)));
        if acceptor.is_some() {
            info!(%addr, "analyzer listening with TLS");
        } else {
            warn!(%addr, "analyzer listening without TLS");
        }

        Ok(Self { listener, acceptor })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run<A: Analyzer>(self, analyzer: Arc<A>) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await.context("accept failed")?;
            let analyzer = Arc::clone(&analyzer);
            match self.acceptor.clone() {
                None => {
                    tokio::spawn(handle_connection(stream, analyzer, peer));
                }
                Some(acceptor) => {
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls_stream) => handle_connection(tls_stream, analyzer, peer).await,
                            Err(err) => warn!(%peer, %err, "TLS handshake failed"),
                        }
                    });
                }
            }
        }
    }
}

async fn handle_connection<S, A>(mut stream: S, analyzer: Arc<A>, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin,
    A: Analyzer,
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
        let frame = match dispatch(analyzer.as_ref(), message).await {
            Ok(frame) => frame,
            Err(err) => {
                let payload = ErrorPayload {
                    kind: ErrorKind::Internal,
                    message: err.to_string(),
                };
                match Message::new(OpCode::Err, request_id, &payload) {
                    Ok(frame) => frame,
                    Err(encode_err) => {
                        warn!(%peer, %encode_err, "failed to encode error response");
                        return;
                    }
                }
            }
        };

        if let Err(err) = write_message(&mut stream, &frame).await {
            warn!(%peer, %err, "failed to write response");
            return;
        }
    }
}

async fn dispatch<A: Analyzer>(analyzer: &A, message: Message) -> Result<Message> {
    let request_id = message.header.request_id;
    let deadline = (message.header.deadline_secs > 0)
        .then(|| Duration::from_secs(u64::from(message.header.deadline_secs)));

    let handler = async {
        match message.header.opcode {
            OpCode::ListInitialInterests => {
                let interests = analyzer.initial_interests().await?;
                let response = ListInitialInterestsResponse { interests };
                Ok(Message::new(OpCode::Reply, request_id, &response)?)
            }
            OpCode::AnalyzeFiles => {
                let request: AnalyzeFilesRequest = message.decode()?;
                let response = analyzer.analyze(&request.scan_id, request.files).await?;
                Ok(Message::new(OpCode::Reply, request_id, &response)?)
            }
            other => anyhow::bail!("unsupported opcode {other:?}"),
        }
    };

    match deadline {
        Some(limit) => tokio::time::timeout(limit, handler)
            .await
            .map_err(|_| anyhow::anyhow!("deadline of {limit:?} exceeded"))?,
        None => handler.await,
    }
}
