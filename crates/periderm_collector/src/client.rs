//! RPC client for the orchestrator surface.
//!
//! Opens a fresh connection per call and applies a caller deadline to
//! every RPC, carried on the wire so the orchestrator can bound its own
//! downstream work.

use crate::error::{CollectorError, Result};
use periderm_protocol::{
    read_message, write_message, ChunkedFile, CreateScanResponse, ErrorPayload,
    ListInterestsRequest, ListInterestsResponse, Message, OpCode, ScanFilesRequest,
    ScanFilesResponse,
};
use rustls::pki_types::ServerName;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

pub struct OrchestratorClient {
    address: String,
    tls: Option<TlsConnector>,
    deadline: Duration,
    next_request_id: AtomicU64,
}

impl OrchestratorClient {
    pub fn new(
        address: String,
        tls: Option<Arc<rustls::ClientConfig>>,
        deadline: Duration,
    ) -> Self {
        Self {
            address,
            tls: tls.map(TlsConnector::from),
            deadline,
            next_request_id: AtomicU64::new(1),
        }
    }

    pub async fn create_scan(&self) -> Result<CreateScanResponse> {
        self.call(OpCode::CreateScan, &()).await
    }

    pub async fn list_interests(&self, scan_id: &str) -> Result<ListInterestsResponse> {
        let request = ListInterestsRequest {
            scan_id: scan_id.to_string(),
            page_token: String::new(),
        };
        self.call(OpCode::ListInterests, &request).await
    }

    pub async fn scan_files(
        &self,
        scan_id: &str,
        files: Vec<ChunkedFile>,
    ) -> Result<ScanFilesResponse> {
        let request = ScanFilesRequest {
            scan_id: scan_id.to_string(),
            files,
        };
        self.call(OpCode::ScanFiles, &request).await
    }

    async fn call<Req, Resp>(&self, opcode: OpCode, request: &Req) -> Result<Resp>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let deadline_secs = self.deadline.as_secs().min(u64::from(u16::MAX)) as u16;
        let message = Message::with_deadline(opcode, request_id, deadline_secs, request)?;

        match tokio::time::timeout(self.deadline, self.exchange(message)).await {
            Ok(result) => result,
            Err(_) => Err(CollectorError::DeadlineExceeded(self.deadline)),
        }
    }

    async fn exchange<Resp>(&self, message: Message) -> Result<Resp>
    where
        Resp: serde::de::DeserializeOwned,
    {
        let stream = TcpStream::connect(&self.address).await?;

        let reply = match &self.tls {
            None => self.exchange_on(stream, message).await?,
            Some(connector) => {
                let host = self
                    .address
                    .split(':')
                    .next()
                    .unwrap_or(self.address.as_str());
                let server_name = ServerName::try_from(host.to_string())
                    .map_err(|_| CollectorError::InvalidServerName(self.address.clone()))?;
                let stream = connector.connect(server_name, stream).await?;
                self.exchange_on(stream, message).await?
            }
        };

        match reply.header.opcode {
            OpCode::Reply => Ok(reply.decode()?),
            OpCode::Err => {
                let payload: ErrorPayload = reply.decode()?;
                Err(CollectorError::Remote {
                    kind: payload.kind,
                    message: payload.message,
                })
            }
            other => Err(CollectorError::UnexpectedOpcode(other)),
        }
    }

    async fn exchange_on<S>(&self, mut stream: S, message: Message) -> Result<Message>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let request_id = message.header.request_id;
        write_message(&mut stream, &message).await?;

        let reply = read_message(&mut stream)
            .await?
            .ok_or(CollectorError::ConnectionClosed)?;

        if reply.header.request_id != request_id {
            return Err(CollectorError::RequestMismatch {
                sent: request_id,
                got: reply.header.request_id,
            });
        }
        Ok(reply)
    }
}
