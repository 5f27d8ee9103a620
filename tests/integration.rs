//! End-to-end tests: real volumes and a coordinator on loopback ports

use minidfs::common::protocol::{
    RejectReason, UploadCommitRequest, UploadCommitResponse, UploadDone, UploadRequest,
    UploadResponse,
};
use minidfs::common::{
    read_message, write_message, CoordinatorConfig, Message, MessageType, VolumeConfig,
};
use minidfs::coordinator::CoordState;
use minidfs::volume::StorageEngine;
use minidfs::{Client, Coordinator, Error, VolumeServer};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

struct Cluster {
    _dirs: Vec<TempDir>,
    volumes: Vec<(String, Arc<StorageEngine>)>,
    coord_addr: String,
    state: Arc<CoordState>,
}

impl Cluster {
    async fn start(capacities: &[i64]) -> Self {
        let mut dirs = Vec::new();
        let mut volumes = Vec::new();

        for &capacity in capacities {
            let dir = TempDir::new().unwrap();
            let server = VolumeServer::bind(VolumeConfig {
                bind_addr: "127.0.0.1:0".parse().unwrap(),
                data_path: dir.path().join("data"),
                capacity_bytes: capacity,
            })
            .await
            .unwrap();
            let addr = server.local_addr().unwrap().to_string();
            volumes.push((addr, server.engine()));
            tokio::spawn(server.serve());
            dirs.push(dir);
        }

        let coord = Coordinator::bind(CoordinatorConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            storage_nodes: volumes.iter().map(|(addr, _)| addr.clone()).collect(),
        })
        .await
        .unwrap();
        let coord_addr = coord.local_addr().unwrap().to_string();
        let state = coord.state();
        tokio::spawn(coord.serve());

        Self {
            _dirs: dirs,
            volumes,
            coord_addr,
            state,
        }
    }

    fn client(&self) -> Client {
        Client::new(self.coord_addr.clone())
    }

    fn engine(&self, addr: &str) -> &Arc<StorageEngine> {
        &self
            .volumes
            .iter()
            .find(|(a, _)| a == addr)
            .expect("unknown volume")
            .1
    }
}

/// Volume deletes land just after the ack, so settle before asserting
async fn wait_for_available(engine: &StorageEngine, expected: i64) {
    for _ in 0..100 {
        if engine.available().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(engine.available().await, expected);
}

/// One request/reply exchange on a fresh connection
async fn exchange(addr: &str, request: Message, expected: MessageType) -> Message {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_message(&mut stream, &request).await.unwrap();
    read_message(&mut stream)
        .await
        .unwrap()
        .expect(expected)
        .unwrap()
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_upload_lookup_delete() {
    let cluster = Cluster::start(&[1000]).await;
    let client = cluster.client();
    let node = cluster.volumes[0].0.clone();

    let data = payload(100);
    let receipt = client
        .upload_from("a.txt", 100, &mut data.as_slice())
        .await
        .unwrap();
    assert_eq!(receipt.storage_addr, node);
    assert_eq!(receipt.written, 100);

    let files = client.lookup().await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files["a.txt"].size, 100);
    assert_eq!(files["a.txt"].location, node);
    assert_eq!(cluster.state.registry.capacity(&node).await, Some(900));
    assert!(cluster.state.registry.pending().await.is_empty());

    assert!(client.delete("a.txt").await.unwrap());
    assert!(client.lookup().await.unwrap().is_empty());
    assert_eq!(cluster.state.registry.capacity(&node).await, Some(1000));
    wait_for_available(cluster.engine(&node), 1000).await;
}

#[tokio::test]
async fn test_oversized_upload_rejected() {
    let cluster = Cluster::start(&[1000]).await;
    let client = cluster.client();

    let data = payload(2000);
    let err = client
        .upload_from("b.txt", 2000, &mut data.as_slice())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::UploadRejected(Some(RejectReason::NoCapacity))
    ));
    assert!(client.lookup().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_download_returns_uploaded_bytes() {
    let cluster = Cluster::start(&[1 << 20]).await;
    let client = cluster.client();

    let data = payload(200_000);
    client
        .upload_from("big.bin", data.len() as u64, &mut data.as_slice())
        .await
        .unwrap();

    let mut out = Vec::new();
    let received = client.download_to("big.bin", &mut out).await.unwrap();
    assert_eq!(received, data.len() as u64);
    assert_eq!(out, data);
}

#[tokio::test]
async fn test_file_roundtrip_through_disk() {
    let cluster = Cluster::start(&[1000]).await;
    let client = cluster.client();
    let dir = TempDir::new().unwrap();

    let input = dir.path().join("notes.txt");
    tokio::fs::write(&input, b"some notes").await.unwrap();
    let receipt = client.upload(&input, None).await.unwrap();
    assert_eq!(receipt.written, 10);

    let output = dir.path().join("copy.txt");
    client.download("notes.txt", &output).await.unwrap();
    assert_eq!(tokio::fs::read(&output).await.unwrap(), b"some notes");
}

#[tokio::test]
async fn test_download_unknown_file() {
    let cluster = Cluster::start(&[1000]).await;
    let client = cluster.client();

    let mut out = Vec::new();
    let err = client.download_to("ghost", &mut out).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_delete_twice() {
    let cluster = Cluster::start(&[1000]).await;
    let client = cluster.client();

    let data = payload(10);
    client
        .upload_from("once", 10, &mut data.as_slice())
        .await
        .unwrap();

    assert!(client.delete("once").await.unwrap());
    assert!(!client.delete("once").await.unwrap());

    let mut out = Vec::new();
    assert!(client
        .download_to("once", &mut out)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_duplicate_rejected() {
    let cluster = Cluster::start(&[1000]).await;
    let client = cluster.client();
    let node = cluster.volumes[0].0.clone();

    let data = payload(50);
    client
        .upload_from("dup", 50, &mut data.as_slice())
        .await
        .unwrap();
    let err = client
        .upload_from("dup", 50, &mut data.as_slice())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::UploadRejected(Some(RejectReason::Duplicate))
    ));

    // The rejection charged nothing
    assert_eq!(cluster.state.registry.capacity(&node).await, Some(950));
    assert_eq!(client.lookup().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_name_rejected() {
    let cluster = Cluster::start(&[1000]).await;
    let client = cluster.client();

    let data = payload(5);
    let err = client
        .upload_from("..", 5, &mut data.as_slice())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::UploadRejected(Some(RejectReason::InvalidName))
    ));
}

#[tokio::test]
async fn test_placement_prefers_most_free() {
    let cluster = Cluster::start(&[500, 1000]).await;
    let client = cluster.client();
    let small = cluster.volumes[0].0.clone();
    let large = cluster.volumes[1].0.clone();

    let data = payload(600);
    let receipt = client
        .upload_from("first", 600, &mut data.as_slice())
        .await
        .unwrap();
    assert_eq!(receipt.storage_addr, large);

    // large now has 400 free, small has 500
    let data = payload(450);
    let receipt = client
        .upload_from("second", 450, &mut data.as_slice())
        .await
        .unwrap();
    assert_eq!(receipt.storage_addr, small);

    // Neither node has 500 left
    let data = payload(500);
    assert!(client
        .upload_from("third", 500, &mut data.as_slice())
        .await
        .is_err());
}

#[tokio::test]
async fn test_capacity_accounting_across_uploads() {
    let cluster = Cluster::start(&[1000]).await;
    let client = cluster.client();
    let node = cluster.volumes[0].0.clone();

    for i in 0..10 {
        let data = payload(100);
        client
            .upload_from(&format!("file_{}", i), 100, &mut data.as_slice())
            .await
            .unwrap();
    }

    let files = client.lookup().await.unwrap();
    let stored: u64 = files.values().map(|f| f.size).sum();
    let cached = cluster.state.registry.capacity(&node).await.unwrap();
    assert_eq!(stored as i64 + cached, 1000);
    assert_eq!(cluster.engine(&node).available().await, 0);

    let data = payload(1);
    let err = client
        .upload_from("overflow", 1, &mut data.as_slice())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::UploadRejected(Some(RejectReason::NoCapacity))
    ));
}

#[tokio::test]
async fn test_short_transfer_releases_reservation() {
    let cluster = Cluster::start(&[1000]).await;
    let client = cluster.client();
    let node = cluster.volumes[0].0.clone();

    // Promise 100 bytes, deliver 40
    let data = payload(40);
    let err = client
        .upload_from("partial", 100, &mut data.as_slice())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ShortTransfer { .. }));

    assert!(client.lookup().await.unwrap().is_empty());
    assert_eq!(cluster.state.registry.capacity(&node).await, Some(1000));
    assert!(cluster.state.registry.pending().await.is_empty());

    let engine = cluster.engine(&node);
    wait_for_available(engine, 1000).await;
    assert!(engine.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_node_is_never_chosen() {
    let dir = TempDir::new().unwrap();
    let server = VolumeServer::bind(VolumeConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        data_path: dir.path().join("data"),
        capacity_bytes: 1000,
    })
    .await
    .unwrap();
    let live = server.local_addr().unwrap().to_string();
    tokio::spawn(server.serve());

    // Grab a free port and close it again
    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };

    let coord = Coordinator::bind(CoordinatorConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        storage_nodes: vec![dead.clone(), live.clone()],
    })
    .await
    .unwrap();
    let state = coord.state();
    let client = Client::new(coord.local_addr().unwrap().to_string());
    tokio::spawn(coord.serve());

    assert_eq!(
        state.registry.capacity(&dead).await,
        Some(minidfs::coordinator::UNKNOWN_CAPACITY)
    );

    let data = payload(10);
    let receipt = client
        .upload_from("x", 10, &mut data.as_slice())
        .await
        .unwrap();
    assert_eq!(receipt.storage_addr, live);
}

#[tokio::test]
async fn test_released_upload_is_removed_from_volume() {
    let cluster = Cluster::start(&[1000]).await;
    let node = cluster.volumes[0].0.clone();
    let engine = cluster.engine(&node);
    let request = UploadRequest {
        filename: "orphan".into(),
        size: 100,
    };

    let placement: UploadResponse = exchange(
        &cluster.coord_addr,
        Message::new(MessageType::UploadReq, &request).unwrap(),
        MessageType::UploadResp,
    )
    .await
    .decode()
    .unwrap();
    assert_eq!(placement.storage_addr, node);

    // The bytes land on the volume in full
    let mut stream = TcpStream::connect(&node).await.unwrap();
    write_message(
        &mut stream,
        &Message::new(MessageType::UploadReq, &request).unwrap(),
    )
    .await
    .unwrap();
    read_message(&mut stream)
        .await
        .unwrap()
        .expect(MessageType::UploadAck)
        .unwrap();
    stream.write_all(&payload(100)).await.unwrap();
    let done: UploadDone = read_message(&mut stream)
        .await
        .unwrap()
        .expect(MessageType::UploadDone)
        .unwrap()
        .decode()
        .unwrap();
    assert!(done.success);
    assert_eq!(engine.list().await.unwrap(), vec!["orphan".to_string()]);
    assert_eq!(engine.available().await, 900);

    // ...but the client reports failure, e.g. after a checksum mismatch
    let resp: UploadCommitResponse = exchange(
        &cluster.coord_addr,
        Message::new(
            MessageType::UploadCommitReq,
            &UploadCommitRequest {
                filename: "orphan".into(),
                success: false,
            },
        )
        .unwrap(),
        MessageType::UploadCommitResp,
    )
    .await
    .decode()
    .unwrap();
    assert!(resp.success);

    wait_for_available(engine, 1000).await;
    assert!(engine.list().await.unwrap().is_empty());
    assert!(cluster.client().lookup().await.unwrap().is_empty());
    assert_eq!(cluster.state.registry.capacity(&node).await, Some(1000));
    assert!(cluster.state.registry.pending().await.is_empty());
}
