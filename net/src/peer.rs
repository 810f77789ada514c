use std::net::SocketAddr;
use std::sync::atomic::Ordering;

use rand::{thread_rng, Rng};

use crate::bloom::BloomFilter;
use crate::conversation::{ConversationAction, ConversationTopicHandler};
use crate::crypto::hash256;
use crate::error::{PeerError, PeerResult};
use crate::session::Session;
use crate::wire::buffer::{BlockHeader, InventoryType};
use crate::wire::messages::{
    FilterLoadMessage, GetDataMessage, GetHeadersMessage, HeadersMessage, InvMessage, MempoolMessage, PongMessage,
    ProtocolMessage, VerackMessage, VersionMessage,
};
use crate::wire::node::NodeDesc;

const BLOOM_ELEMENTS: u32 = 700;
const BLOOM_FALSE_POSITIVE_RATE: f64 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    VersionSent,
    VersionReceived,
    SyncingHeaders,
    Synced,
}

/// Drives one peer connection through handshake, header sync, and
/// steady-state relay. Owned exclusively by the reader task; the small
/// subset of state other tasks need is read through `Session`'s atomics.
pub struct PeerStateMachine {
    session: std::sync::Arc<Session>,
    remote_addr: SocketAddr,
    state: State,
    peer: Option<NodeDesc>,
}

impl PeerStateMachine {
    pub fn new(session: std::sync::Arc<Session>, remote_addr: SocketAddr) -> Self {
        PeerStateMachine { session, remote_addr, state: State::Init, peer: None }
    }

    /// The peer's own `NodeDesc`, available once its `version` has been processed.
    pub fn peer(&self) -> Option<&NodeDesc> {
        self.peer.as_ref()
    }

    fn getheaders(&self) -> ProtocolMessage {
        ProtocolMessage::GetHeaders(GetHeadersMessage::new(
            self.session.chain,
            self.session.local.protocol_version,
            self.session.last_headers_hash(),
        ))
    }

    fn install_bloom_filter(&self) -> ProtocolMessage {
        let mut filter = BloomFilter::new(BLOOM_ELEMENTS, BLOOM_FALSE_POSITIVE_RATE, thread_rng().gen());
        for item in &self.session.watch_items {
            filter.insert(item);
        }
        ProtocolMessage::FilterLoad(FilterLoadMessage::new(
            self.session.chain,
            filter.filter_bytes().to_vec(),
            filter.n_hash_funcs(),
            filter.n_tweak(),
        ))
    }

    fn on_version(&mut self, message: VersionMessage) -> PeerResult<ConversationAction> {
        if self.state != State::Init && self.state != State::VersionSent {
            log::debug!("ignoring stray version message in state {:?}", self.state);
            return Ok(ConversationAction::nop());
        }

        if (message.start_height as i64) < self.session.height() as i64 {
            return Err(PeerError::semantic(format!(
                "stale peer: advertises height {} below local checkpoint {}",
                message.start_height,
                self.session.height()
            )));
        }

        self.peer = Some(NodeDesc {
            chain: self.session.chain,
            protocol_version: message.protocol_version,
            services: message.services,
            sub_ver: message.sub_ver,
            start_height: message.start_height,
        });
        self.state = State::VersionReceived;
        Ok(ConversationAction::nop())
    }

    fn on_verack(&mut self) -> PeerResult<ConversationAction> {
        if self.state != State::VersionReceived {
            log::debug!("ignoring duplicate verack in state {:?}", self.state);
            return Ok(ConversationAction::nop());
        }

        self.state = State::SyncingHeaders;
        Ok(ConversationAction::send_all(vec![
            ProtocolMessage::Verack(VerackMessage::new(self.session.chain)),
            self.getheaders(),
        ]))
    }

    fn on_headers(&mut self, message: HeadersMessage) -> PeerResult<ConversationAction> {
        if self.state != State::SyncingHeaders {
            log::debug!("ignoring unsolicited headers in state {:?}", self.state);
            return Ok(ConversationAction::nop());
        }

        if message.headers.is_empty() {
            self.session.persist_checkpoint()?;
            self.session.synced.store(true, Ordering::Release);
            self.state = State::Synced;
            return Ok(ConversationAction::send_all(vec![
                self.install_bloom_filter(),
                ProtocolMessage::Mempool(MempoolMessage::new(self.session.chain)),
            ]));
        }

        self.apply_genesis_detection(&message.headers[0]);

        self.session.height.fetch_add(message.headers.len() as u32, Ordering::AcqRel);
        let last = message.headers.last().unwrap();
        self.session.set_last_headers_hash(hash256(&last.to_bytes()));

        Ok(ConversationAction::send(self.getheaders()))
    }

    fn apply_genesis_detection(&self, first_header: &BlockHeader) {
        if first_header.prev_block == self.session.chain.genesis_hash() {
            log::debug!("header batch reaches back to the genesis block, resetting height to 0");
            self.session.height.store(0, Ordering::Release);
        }
    }

    fn on_inv(&mut self, message: InvMessage) -> PeerResult<ConversationAction> {
        if self.state != State::Synced {
            log::debug!("ignoring inv before steady state, state {:?}", self.state);
            return Ok(ConversationAction::nop());
        }

        let mut block_count = 0u32;
        let mut wanted = Vec::new();
        for item in &message.items {
            match item.inv_type {
                InventoryType::Block | InventoryType::WitnessBlock => block_count += 1,
                InventoryType::Tx | InventoryType::WitnessTx => wanted.push(*item),
                _ => {}
            }
        }

        if block_count > 0 {
            self.session.height.fetch_add(block_count, Ordering::AcqRel);
            if let Some(last_block) = message.items.iter().rev().find(|i| {
                matches!(i.inv_type, InventoryType::Block | InventoryType::WitnessBlock)
            }) {
                self.session.set_last_headers_hash(last_block.hash);
            }
            self.session.persist_checkpoint()?;
        }

        if wanted.is_empty() {
            Ok(ConversationAction::nop())
        } else {
            Ok(ConversationAction::send(ProtocolMessage::GetData(GetDataMessage::new(self.session.chain, wanted))))
        }
    }
}

impl ConversationTopicHandler for PeerStateMachine {
    type Outcome = ();

    fn initial_action(&mut self) -> ConversationAction {
        let message = VersionMessage::new(self.remote_addr, &self.session.local);
        self.state = State::VersionSent;
        ConversationAction::send(ProtocolMessage::Version(message))
    }

    fn on_message(&mut self, message: ProtocolMessage) -> PeerResult<ConversationAction> {
        match message {
            ProtocolMessage::Version(m) => self.on_version(m),
            ProtocolMessage::Verack(_) => self.on_verack(),
            ProtocolMessage::Ping(ping) => {
                Ok(ConversationAction::send(ProtocolMessage::Pong(PongMessage::reply_to(&ping, self.session.chain))))
            }
            ProtocolMessage::Pong(pong) => {
                // this client never sends `ping` (see `Session::ping_nonce`), so the
                // outstanding nonce stays 0; any `pong` a peer sends unsolicited
                // fails this check, matching the reference client's recv_pong.
                let outstanding = self.session.ping_nonce.load(Ordering::Acquire);
                if outstanding != pong.nonce {
                    return Err(PeerError::semantic("pong nonce does not match outstanding ping"));
                }
                Ok(ConversationAction::nop())
            }
            ProtocolMessage::Addr(m) => {
                log::debug!("peer gossiped {} addresses", m.entry_count);
                Ok(ConversationAction::nop())
            }
            ProtocolMessage::Headers(m) => self.on_headers(m),
            ProtocolMessage::Inv(m) => self.on_inv(m),
            ProtocolMessage::Tx(m) => {
                self.session.presenter.present(&m.raw);
                Ok(ConversationAction::nop())
            }
            ProtocolMessage::FeeFilter(_) | ProtocolMessage::SendHeaders(_) | ProtocolMessage::SendCmpct(_) => {
                Ok(ConversationAction::nop())
            }
            ProtocolMessage::Block(_) | ProtocolMessage::MerkleBlock(_) => {
                log::debug!("draining unsolicited block/merkleblock payload");
                Ok(ConversationAction::nop())
            }
            ProtocolMessage::GetHeaders(_) | ProtocolMessage::GetData(_) | ProtocolMessage::GetBlocks(_)
            | ProtocolMessage::FilterLoad(_) | ProtocolMessage::Mempool(_) => {
                // this client never expects to receive the commands it only sends
                log::debug!("ignoring unexpected outbound-only command from peer");
                Ok(ConversationAction::nop())
            }
        }
    }

    fn outcome(self) -> PeerResult<Self::Outcome> {
        Ok(())
    }
}
