//! Full-loop tests: collector -> orchestrator -> analyzers over TCP.

use periderm_analyzer::{AnalyzerServer, FixtureAnalyzer, ServeConfig};
use periderm_collector::{run_scan, CollectorError, OrchestratorClient};
use periderm_orchestrator::{AnalyzerRegistry, Orchestrator, ScanStore, Server, ServerConfig};
use periderm_protocol::{defaults, ErrorKind, Interest};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn spawn_analyzer(analyzer: FixtureAnalyzer) -> (String, Arc<FixtureAnalyzer>) {
    let analyzer = Arc::new(analyzer);
    let server = AnalyzerServer::bind(ServeConfig {
        bind: "127.0.0.1".to_string(),
        port: 0,
        tls: None,
    })
    .await
    .unwrap();
    let address = server.local_addr().unwrap().to_string();
    let serving = Arc::clone(&analyzer);
    tokio::spawn(async move {
        let _ = server.run(serving).await;
    });
    (address, analyzer)
}

async fn spawn_orchestrator(analyzer_addresses: &[String]) -> String {
    let (registry, initial) =
        AnalyzerRegistry::connect(analyzer_addresses, None, Duration::from_secs(5))
            .await
            .unwrap();
    let service = Arc::new(Orchestrator::new(
        Arc::new(ScanStore::with_default_ttls()),
        registry,
        initial,
        Duration::from_secs(5),
    ));

    let server = Server::bind(ServerConfig {
        bind: "127.0.0.1".to_string(),
        port: 0,
        tls: None,
    })
    .await
    .unwrap();
    let address = server.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let _ = server.run(service).await;
    });
    address
}

fn client(address: String) -> OrchestratorClient {
    OrchestratorClient::new(address, None, Duration::from_secs(10))
}

fn write(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[tokio::test]
async fn collector_drains_a_scan_with_iterative_interests() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "etc/hosts", b"127.0.0.1 localhost\n");
    write(temp.path(), "conf/server.xml", b"<server/>\n");
    write(temp.path(), "conf/users.xml", b"<users/>\n");
    write(temp.path(), "var/uninteresting.log", b"noise\n");

    let (hosts_addr, hosts_analyzer) =
        spawn_analyzer(FixtureAnalyzer::new(&[r"^/etc/hosts$"], true)).await;
    let (xml_addr, xml_analyzer) = spawn_analyzer(
        FixtureAnalyzer::new(&[r"^/conf/server\.xml$"], true)
            .with_follow_up(vec![Interest::with_data(r"^/conf/users\.xml$")]),
    )
    .await;

    let orchestrator_addr = spawn_orchestrator(&[hosts_addr.clone(), xml_addr.clone()]).await;
    let client = client(orchestrator_addr);

    let outcome = run_scan(&client, temp.path(), defaults::CHUNK_SIZE)
        .await
        .unwrap();

    // Round one: hosts and server.xml; round two: users.xml via the
    // follow-up interest. One canned finding per analyzed batch.
    assert_eq!(outcome.findings.len(), 3);
    assert_eq!(hosts_analyzer.analyze_calls(), 1);
    assert_eq!(xml_analyzer.analyze_calls(), 2);

    let sources: Vec<&str> = outcome
        .findings
        .iter()
        .map(|finding| finding.source.as_ref().unwrap().analyzer.as_str())
        .collect();
    assert!(sources.contains(&hosts_addr.as_str()));
    assert!(sources.contains(&xml_addr.as_str()));

    for finding in &outcome.findings {
        assert_eq!(finding.source.as_ref().unwrap().scan_id, outcome.scan_id);
    }
}

#[tokio::test]
async fn collector_chunks_large_files() {
    let temp = TempDir::new().unwrap();
    let content = vec![0x41u8; 10_000];
    write(temp.path(), "etc/hosts", &content);

    let (hosts_addr, hosts_analyzer) =
        spawn_analyzer(FixtureAnalyzer::new(&[r"^/etc/hosts$"], false)).await;
    let orchestrator_addr = spawn_orchestrator(&[hosts_addr]).await;
    let client = client(orchestrator_addr);

    // A chunk size far below the file size forces real reassembly.
    let outcome = run_scan(&client, temp.path(), 1024).await.unwrap();
    assert!(outcome.findings.is_empty());
    assert_eq!(hosts_analyzer.analyze_calls(), 1);
}

#[tokio::test]
async fn listing_interests_round_trips() {
    let (addr, _analyzer) =
        spawn_analyzer(FixtureAnalyzer::new(&[r"^/etc/hosts$"], false)).await;
    let orchestrator_addr = spawn_orchestrator(&[addr]).await;
    let client = client(orchestrator_addr);

    let scan = client.create_scan().await.unwrap();
    let listed = client.list_interests(&scan.scan_id).await.unwrap();
    assert_eq!(listed.interests, scan.interests);
    assert!(listed.next_page_token.is_empty());
}

#[tokio::test]
async fn unknown_scan_surfaces_as_remote_not_found() {
    let (addr, _analyzer) =
        spawn_analyzer(FixtureAnalyzer::new(&[r"^/etc/hosts$"], false)).await;
    let orchestrator_addr = spawn_orchestrator(&[addr]).await;
    let client = client(orchestrator_addr);

    let err = client.scan_files("nope", vec![]).await.unwrap_err();
    match err {
        CollectorError::Remote { kind, .. } => assert_eq!(kind, ErrorKind::NotFound),
        other => panic!("expected remote not-found, got {other:?}"),
    }
}
