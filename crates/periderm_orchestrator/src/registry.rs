//! Analyzer client registry and fan-out.
//!
//! The registry is built once at startup from the configured endpoint
//! list and immutable afterwards. Every endpoint is asked for its
//! initial interests during construction; any failure there aborts
//! startup. Analyzer calls open a fresh connection per request: one
//! request, one response, nothing pipelined.

use crate::error::{OrchestratorError, Result};
use crate::interest::MappedInterest;
use periderm_protocol::{
    read_message, write_message, AnalyzeFilesRequest, AnalyzeFilesResponse, AssembledFile,
    ErrorPayload, Interest, ListInitialInterestsResponse, Message, OpCode,
};
use rustls::pki_types::ServerName;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

/// RPC client for one analyzer endpoint.
pub struct AnalyzerClient {
    address: String,
    tls: Option<TlsConnector>,
    next_request_id: AtomicU64,
}

impl AnalyzerClient {
    pub fn new(address: String, tls: Option<Arc<rustls::ClientConfig>>) -> Self {
        Self {
            address,
            tls: tls.map(TlsConnector::from),
            next_request_id: AtomicU64::new(1),
        }
    }

    pub async fn list_initial_interests(&self, deadline: Duration) -> Result<Vec<Interest>> {
        let response: ListInitialInterestsResponse = self
            .call(OpCode::ListInitialInterests, &(), deadline)
            .await?;
        Ok(response.interests)
    }

    pub async fn analyze_files(
        &self,
        scan_id: &str,
        files: Vec<AssembledFile>,
        deadline: Duration,
    ) -> Result<AnalyzeFilesResponse> {
        let request = AnalyzeFilesRequest {
            scan_id: scan_id.to_string(),
            files,
        };
        self.call(OpCode::AnalyzeFiles, &request, deadline).await
    }

    async fn call<Req, Resp>(&self, opcode: OpCode, request: &Req, deadline: Duration) -> Result<Resp>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let deadline_secs = deadline.as_secs().min(u64::from(u16::MAX)) as u16;
        let message = Message::with_deadline(opcode, request_id, deadline_secs, request)
            .map_err(|err| self.failure(err))?;

        match tokio::time::timeout(deadline, self.exchange(message)).await {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::Analyzer {
                analyzer: self.address.clone(),
                message: format!("deadline of {deadline:?} exceeded"),
            }),
        }
    }

    async fn exchange<Resp>(&self, message: Message) -> Result<Resp>
    where
        Resp: serde::de::DeserializeOwned,
    {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|err| self.failure(err))?;

        let reply = match &self.tls {
            None => self.exchange_on(stream, message).await?,
            Some(connector) => {
                let host = self
                    .address
                    .split(':')
                    .next()
                    .unwrap_or(self.address.as_str());
                let server_name = ServerName::try_from(host.to_string())
                    .map_err(|err| self.failure(err))?;
                let stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|err| self.failure(err))?;
                self.exchange_on(stream, message).await?
            }
        };

        match reply.header.opcode {
            OpCode::Reply => reply.decode().map_err(|err| self.failure(err)),
            OpCode::Err => {
                let payload: ErrorPayload = reply.decode().map_err(|err| self.failure(err))?;
                Err(OrchestratorError::Analyzer {
                    analyzer: self.address.clone(),
                    message: format!("{}: {}", payload.kind, payload.message),
                })
            }
            other => Err(OrchestratorError::Analyzer {
                analyzer: self.address.clone(),
                message: format!("unexpected response opcode {other:?}"),
            }),
        }
    }

    async fn exchange_on<S>(&self, mut stream: S, message: Message) -> Result<Message>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let request_id = message.header.request_id;
        write_message(&mut stream, &message)
            .await
            .map_err(|err| self.failure(err))?;

        let reply = read_message(&mut stream)
            .await
            .map_err(|err| self.failure(err))?
            .ok_or_else(|| OrchestratorError::Analyzer {
                analyzer: self.address.clone(),
                message: "connection closed before a response".to_string(),
            })?;

        if reply.header.request_id != request_id {
            return Err(OrchestratorError::Analyzer {
                analyzer: self.address.clone(),
                message: format!(
                    "response correlates request {} but {} was sent",
                    reply.header.request_id, request_id
                ),
            });
        }
        Ok(reply)
    }

    fn failure(&self, err: impl std::fmt::Display) -> OrchestratorError {
        OrchestratorError::Analyzer {
            analyzer: self.address.clone(),
            message: err.to_string(),
        }
    }
}

/// Immutable address -> client map, plus the initial interests gathered
/// at startup.
pub struct AnalyzerRegistry {
    clients: BTreeMap<String, Arc<AnalyzerClient>>,
}

impl AnalyzerRegistry {
    /// Dial every configured analyzer and collect its initial
    /// interests. Any endpoint failing here fails startup.
    pub async fn connect(
        endpoints: &[String],
        tls: Option<Arc<rustls::ClientConfig>>,
        deadline: Duration,
    ) -> Result<(Self, Vec<MappedInterest>)> {
        let mut clients = BTreeMap::new();
        let mut interests = Vec::new();

        info!("reaching out to {} analyzers", endpoints.len());
        for address in endpoints {
            info!(%address, "querying analyzer for initial interests");
            let client = Arc::new(AnalyzerClient::new(address.clone(), tls.clone()));
            let initial = client.list_initial_interests(deadline).await?;
            debug!(%address, interests = initial.len(), "analyzer connected");
            for interest in initial {
                interests.push(MappedInterest {
                    interest,
                    analyzer: address.clone(),
                });
            }
            clients.insert(address.clone(), client);
        }
        info!(interests = interests.len(), "initial interests recorded");

        Ok((Self { clients }, interests))
    }

    /// Send each analyzer its routed batch in parallel. Results come
    /// back per analyzer in address order; the caller decides how to
    /// combine successes and failures.
    pub async fn fan_out(
        &self,
        scan_id: &str,
        batches: BTreeMap<String, Vec<AssembledFile>>,
        deadline: Duration,
    ) -> Result<Vec<(String, Result<AnalyzeFilesResponse>)>> {
        let mut tasks = JoinSet::new();
        for (address, files) in batches {
            let client = self
                .clients
                .get(&address)
                .cloned()
                .ok_or_else(|| {
                    OrchestratorError::Internal(format!(
                        "interest expressed by an analyzer that is not registered: {address}"
                    ))
                })?;
            let scan_id = scan_id.to_string();
            tasks.spawn(async move {
                let result = client.analyze_files(&scan_id, files, deadline).await;
                (address, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(err) => {
                    return Err(OrchestratorError::Internal(format!(
                        "analyzer fan-out task failed: {err}"
                    )))
                }
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }
}
