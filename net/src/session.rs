use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::PeerResult;
use crate::presenter::TransactionPresenter;
use crate::wire::messages::ProtocolMessage;
use crate::wire::node::{Chain, NodeDesc};
use crate::wire::raw_message::RawMessage;

/// Matches `SZ_SEND_BUF` from the reference client: the reusable send
/// buffer starts large enough that a typical outbound frame never
/// triggers a reallocation.
const SEND_BUFFER_CAPACITY: usize = 3096;

/// Per-connection state shared between the reader task and the driver
/// task. The reader is the sole writer of `height`, `synced`,
/// `last_headers_hash` and `ping_nonce` while the connection is alive;
/// the driver only ever reads them and writes `run`.
pub struct Session {
    pub chain: Chain,
    pub local: NodeDesc,
    pub run: AtomicBool,
    pub height: AtomicU32,
    pub synced: AtomicBool,
    pub last_headers_hash: std::sync::Mutex<[u8; 32]>,
    /// 0 means no ping is outstanding.
    pub ping_nonce: AtomicU64,
    pub checkpoint_store: Arc<dyn CheckpointStore>,
    pub presenter: Arc<dyn TransactionPresenter>,
    /// Public-key hashes to watch for via the installed Bloom filter.
    pub watch_items: Vec<Vec<u8>>,
}

impl Session {
    pub fn new(
        local: NodeDesc,
        checkpoint_store: Arc<dyn CheckpointStore>,
        presenter: Arc<dyn TransactionPresenter>,
        watch_items: Vec<Vec<u8>>,
    ) -> PeerResult<Self> {
        let checkpoint = checkpoint_store.load()?.unwrap_or_default();
        Ok(Session {
            chain: local.chain,
            local,
            run: AtomicBool::new(true),
            height: AtomicU32::new(checkpoint.height),
            synced: AtomicBool::new(false),
            last_headers_hash: std::sync::Mutex::new(checkpoint.last_headers_hash),
            ping_nonce: AtomicU64::new(0),
            checkpoint_store,
            presenter,
            watch_items,
        })
    }

    pub fn height(&self) -> u32 {
        self.height.load(Ordering::Acquire)
    }

    pub fn last_headers_hash(&self) -> [u8; 32] {
        *self.last_headers_hash.lock().unwrap()
    }

    pub fn set_last_headers_hash(&self, hash: [u8; 32]) {
        *self.last_headers_hash.lock().unwrap() = hash;
    }

    pub fn persist_checkpoint(&self) -> PeerResult<()> {
        let checkpoint = Checkpoint { height: self.height(), last_headers_hash: self.last_headers_hash() };
        self.checkpoint_store.store(checkpoint)
    }

    pub fn request_shutdown(&self) {
        self.run.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.run.load(Ordering::Acquire)
    }
}

/// Serialises writes to the socket. Both the reader (replies to `ping`,
/// `headers`, `inv`) and the driver (the initial `version`) send through
/// this; the buffer is exclusively held for the duration of a send.
/// Generic over the write half so tests can drive it over
/// `tokio::io::duplex` instead of a real `TcpStream`.
pub(crate) struct SharedSender<W> {
    inner: AsyncMutex<SharedSenderInner<W>>,
}

struct SharedSenderInner<W> {
    write_half: W,
    buffer: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> SharedSender<W> {
    pub fn new(write_half: W) -> Self {
        SharedSender {
            inner: AsyncMutex::new(SharedSenderInner { write_half, buffer: Vec::with_capacity(SEND_BUFFER_CAPACITY) }),
        }
    }

    pub async fn send(&self, message: ProtocolMessage) -> PeerResult<()> {
        let mut inner = self.inner.lock().await;
        inner.buffer.clear();
        inner.buffer.extend_from_slice(&RawMessage::from(message).to_bytes());
        inner.write_half.write_all(&inner.buffer).await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> PeerResult<()> {
        let mut inner = self.inner.lock().await;
        inner.write_half.shutdown().await?;
        Ok(())
    }
}
