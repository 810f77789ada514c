//! Drives `NodeConnection::run` over an in-memory duplex stream, playing
//! the remote peer's side by hand, for the scenarios this client's
//! behaviour is defined by.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use net::checkpoint::{Checkpoint, CheckpointStore};
use net::connection::NodeConnection;
use net::crypto::hash256;
use net::error::PeerResult;
use net::peer::PeerStateMachine;
use net::presenter::TransactionPresenter;
use net::session::Session;
use net::wire::buffer::BlockHeader;
use net::wire::messages::{ProtocolMessage, VerackMessage, VersionMessage};
use net::wire::node::{Chain, NodeDesc, NodeService, NodeServiceSet};
use net::wire::raw_message::{Command, RawMessage};

const TEST_CHAIN: Chain = Chain::Testnet3;
const INV_TYPE_TX: u32 = 1;

#[derive(Default)]
struct FixedCheckpointStore {
    initial: Mutex<Option<Checkpoint>>,
    stored: Mutex<Vec<Checkpoint>>,
}

impl FixedCheckpointStore {
    fn new(initial: Checkpoint) -> Self {
        FixedCheckpointStore { initial: Mutex::new(Some(initial)), stored: Mutex::new(vec![]) }
    }

    fn last_stored(&self) -> Option<Checkpoint> {
        self.stored.lock().unwrap().last().copied()
    }
}

impl CheckpointStore for FixedCheckpointStore {
    fn load(&self) -> PeerResult<Option<Checkpoint>> {
        Ok(*self.initial.lock().unwrap())
    }

    fn store(&self, checkpoint: Checkpoint) -> PeerResult<()> {
        self.stored.lock().unwrap().push(checkpoint);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPresenter {
    received: Mutex<Vec<Vec<u8>>>,
}

impl TransactionPresenter for RecordingPresenter {
    fn present(&self, raw_tx: &[u8]) {
        self.received.lock().unwrap().push(raw_tx.to_vec());
    }
}

fn local_node_desc(start_height: i32) -> NodeDesc {
    NodeDesc {
        chain: TEST_CHAIN,
        protocol_version: 70015,
        services: NodeServiceSet(vec![NodeService::NodeBloom]),
        sub_ver: "/spv-client-test:1.0/".to_string(),
        start_height,
    }
}

fn remote_node_desc(start_height: i32) -> NodeDesc {
    NodeDesc {
        chain: TEST_CHAIN,
        protocol_version: 70015,
        services: NodeServiceSet(vec![NodeService::NodeNetwork]),
        sub_ver: "/bitcoin-core-stand-in:24.0/".to_string(),
        start_height,
    }
}

/// Minimal-length varint encoding, duplicated here (rather than reused)
/// since the library's encoder is crate-private; this test only ever
/// needs counts small enough for the single-byte form.
fn varint(n: u64) -> Vec<u8> {
    assert!(n < 0xFD, "test fixture only covers small counts");
    vec![n as u8]
}

fn encode_headers_payload(headers: &[BlockHeader]) -> Vec<u8> {
    let mut payload = varint(headers.len() as u64);
    for header in headers {
        payload.extend_from_slice(&header.to_bytes());
        payload.push(0); // txn_count, always 0 on this wire
    }
    payload
}

fn encode_single_tx_inv_payload(hash: [u8; 32]) -> Vec<u8> {
    let mut payload = varint(1);
    payload.extend_from_slice(&INV_TYPE_TX.to_le_bytes());
    payload.extend_from_slice(&hash);
    payload
}

/// Reads one wire frame's command name and payload, bypassing the
/// library's own (crate-private) parser so the test has an independent
/// read path. Header layout: 4 magic + 12 command + 4 length + 4 checksum.
async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> (String, Vec<u8>) {
    let mut header = [0u8; 24];
    stream.read_exact(&mut header).await.expect("peer closed before sending a full frame");
    let command_bytes = &header[4..16];
    let command = String::from_utf8(command_bytes.iter().copied().take_while(|&b| b != 0).collect()).unwrap();
    let len = u32::from_le_bytes(header[16..20].try_into().unwrap()) as usize;
    let mut payload = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut payload).await.expect("peer closed mid-payload");
    }
    (command, payload)
}

struct Harness {
    session: Arc<Session>,
    checkpoint_store: Arc<FixedCheckpointStore>,
    presenter: Arc<RecordingPresenter>,
    peer_side: tokio::io::DuplexStream,
    run_task: tokio::task::JoinHandle<PeerResult<()>>,
}

impl Harness {
    async fn new(local_checkpoint: Checkpoint, local_start_height: i32) -> Self {
        let (client_io, peer_side) = tokio::io::duplex(256 * 1024);
        let (client_read, client_write) = tokio::io::split(client_io);

        let checkpoint_store = Arc::new(FixedCheckpointStore::new(local_checkpoint));
        let presenter = Arc::new(RecordingPresenter::default());
        let session = Arc::new(
            Session::new(local_node_desc(local_start_height), checkpoint_store.clone(), presenter.clone(), vec![])
                .unwrap(),
        );

        let remote_addr: SocketAddr = "127.0.0.1:18333".parse().unwrap();
        let handler = PeerStateMachine::new(session.clone(), remote_addr);

        let run_task =
            tokio::spawn(NodeConnection::run(TEST_CHAIN, client_read, client_write, session.clone(), handler));

        Harness { session, checkpoint_store, presenter, peer_side, run_task }
    }

    async fn send_message(&mut self, message: ProtocolMessage) {
        self.peer_side.write_all(&message.to_bytes()).await.unwrap();
    }

    async fn send_raw(&mut self, command: Command, payload: Vec<u8>) {
        let bytes = RawMessage::new(TEST_CHAIN, command, payload).to_bytes();
        self.peer_side.write_all(&bytes).await.unwrap();
    }

    async fn recv(&mut self) -> (String, Vec<u8>) {
        read_frame(&mut self.peer_side).await
    }

    async fn complete_handshake(&mut self, peer_start_height: i32) {
        let (command, _) = self.recv().await;
        assert_eq!(command, "version");

        self.send_message(ProtocolMessage::Version(VersionMessage::new(
            "127.0.0.1:18333".parse().unwrap(),
            &remote_node_desc(peer_start_height),
        )))
        .await;
        self.send_message(ProtocolMessage::Verack(VerackMessage::new(TEST_CHAIN))).await;

        let (command, _) = self.recv().await;
        assert_eq!(command, "verack");
        let (command, _) = self.recv().await;
        assert_eq!(command, "getheaders");
    }

    async fn finish(self) -> PeerResult<()> {
        self.session.request_shutdown();
        tokio::time::timeout(Duration::from_secs(2), self.run_task)
            .await
            .expect("connection did not shut down in time")
            .expect("run task panicked")
    }
}

fn sample_header(prev_block: [u8; 32], nonce: u32) -> BlockHeader {
    BlockHeader { version: 1, prev_block, merkle_root: [0x55; 32], timestamp: 1_600_000_000, bits: 0x1d00ffff, nonce }
}

#[tokio::test]
async fn handshake_completes_with_version_verack_getheaders() {
    let checkpoint = Checkpoint { height: 1_447_141, last_headers_hash: [0xAA; 32] };
    let mut h = Harness::new(checkpoint, 1_447_141).await;

    let (command, _) = h.recv().await;
    assert_eq!(command, "version");

    h.send_message(ProtocolMessage::Version(VersionMessage::new(
        "127.0.0.1:18333".parse().unwrap(),
        &remote_node_desc(1_500_000),
    )))
    .await;
    h.send_message(ProtocolMessage::Verack(VerackMessage::new(TEST_CHAIN))).await;

    let (command, _) = h.recv().await;
    assert_eq!(command, "verack");

    let (command, payload) = h.recv().await;
    assert_eq!(command, "getheaders");
    let locator: [u8; 32] = payload[5..37].try_into().unwrap();
    assert_eq!(locator, checkpoint.last_headers_hash);

    h.finish().await.unwrap();
}

#[tokio::test]
async fn stale_peer_is_rejected_before_verack() {
    let checkpoint = Checkpoint { height: 1_447_141, last_headers_hash: [0xAA; 32] };
    let mut h = Harness::new(checkpoint, 1_447_141).await;

    let (command, _) = h.recv().await;
    assert_eq!(command, "version");

    h.send_message(ProtocolMessage::Version(VersionMessage::new(
        "127.0.0.1:18333".parse().unwrap(),
        &remote_node_desc(1_000_000),
    )))
    .await;

    let result = tokio::time::timeout(Duration::from_secs(2), h.run_task).await.expect("task did not finish");
    assert!(result.unwrap().is_err(), "stale peer must terminate the session with an error");
}

#[tokio::test]
async fn header_batch_advances_height_and_locator() {
    let checkpoint = Checkpoint { height: 1_447_141, last_headers_hash: [0xAA; 32] };
    let mut h = Harness::new(checkpoint, 1_447_141).await;
    h.complete_handshake(1_500_000).await;

    let first = sample_header([0x01; 32], 1);
    let second = sample_header(hash256(&first.to_bytes()), 2);
    h.send_raw(Command::Headers, encode_headers_payload(&[first, second])).await;

    let (command, payload) = h.recv().await;
    assert_eq!(command, "getheaders");
    let locator: [u8; 32] = payload[5..37].try_into().unwrap();
    assert_eq!(locator, hash256(&second.to_bytes()));
    assert_eq!(h.session.height(), 1_447_141 + 2);

    h.finish().await.unwrap();
}

#[tokio::test]
async fn empty_header_batch_marks_tip_reached_and_installs_filter() {
    let checkpoint = Checkpoint { height: 1_447_141, last_headers_hash: [0xAA; 32] };
    let mut h = Harness::new(checkpoint, 1_447_141).await;
    h.complete_handshake(1_500_000).await;

    h.send_raw(Command::Headers, encode_headers_payload(&[])).await;

    let (command, _) = h.recv().await;
    assert_eq!(command, "filterload");
    let (command, _) = h.recv().await;
    assert_eq!(command, "mempool");

    assert!(h.session.synced.load(Ordering::Acquire));
    assert_eq!(h.checkpoint_store.last_stored().unwrap().height, 1_447_141);

    h.finish().await.unwrap();
}

#[tokio::test]
async fn ping_is_answered_with_matching_pong_nonce() {
    let checkpoint = Checkpoint { height: 1_447_141, last_headers_hash: [0xAA; 32] };
    let mut h = Harness::new(checkpoint, 1_447_141).await;

    let (command, _) = h.recv().await;
    assert_eq!(command, "version");

    let nonce: u64 = 0xDEAD_BEEF_0000_1234;
    h.send_raw(Command::Ping, nonce.to_le_bytes().to_vec()).await;

    let (command, payload) = h.recv().await;
    assert_eq!(command, "pong");
    assert_eq!(u64::from_le_bytes(payload.try_into().unwrap()), nonce);

    h.finish().await.unwrap();
}

#[tokio::test]
async fn inv_for_tx_triggers_getdata_and_tx_reaches_presenter() {
    let checkpoint = Checkpoint { height: 1_447_141, last_headers_hash: [0xAA; 32] };
    let mut h = Harness::new(checkpoint, 1_447_141).await;
    h.complete_handshake(1_500_000).await;

    h.send_raw(Command::Headers, encode_headers_payload(&[])).await;
    let (command, _) = h.recv().await;
    assert_eq!(command, "filterload");
    let (command, _) = h.recv().await;
    assert_eq!(command, "mempool");

    let tx_hash = [0x77; 32];
    h.send_raw(Command::Inv, encode_single_tx_inv_payload(tx_hash)).await;

    let (command, payload) = h.recv().await;
    assert_eq!(command, "getdata");
    assert_eq!(&payload, &encode_single_tx_inv_payload(tx_hash));

    let raw_tx = vec![0x01, 0x02, 0x03, 0x04];
    h.send_raw(Command::Tx, raw_tx.clone()).await;

    // give the reader task a moment to dispatch the tx to the presenter
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.presenter.received.lock().unwrap().as_slice(), &[raw_tx]);

    h.finish().await.unwrap();
}
