use std::net::{SocketAddr, SocketAddrV4};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::{thread_rng, Rng};

use crate::error::PeerResult;
use crate::wire::buffer::{BlockHeader, ByteBufferComposer, ByteBufferParser, InventoryVector};
use crate::wire::node::{Chain, NodeDesc, NodeServiceSet};
use crate::wire::raw_message::{Command, RawMessage};

/// Every payload shape this client gives a name to. `Other` commands never
/// reach this enum - the framing layer drains them first.
#[derive(Debug)]
pub enum ProtocolMessage {
    Version(VersionMessage),
    Verack(VerackMessage),
    Ping(PingMessage),
    Pong(PongMessage),
    Addr(AddrMessage),
    GetHeaders(GetHeadersMessage),
    Headers(HeadersMessage),
    GetData(GetDataMessage),
    Inv(InvMessage),
    Tx(TxMessage),
    Block(DrainedMessage),
    MerkleBlock(DrainedMessage),
    FilterLoad(FilterLoadMessage),
    Mempool(MempoolMessage),
    FeeFilter(DrainedMessage),
    SendHeaders(DrainedMessage),
    SendCmpct(DrainedMessage),
    GetBlocks(GetBlocksMessage),
}

impl ProtocolMessage {
    pub fn decode(raw: RawMessage) -> PeerResult<Self> {
        let chain = raw.chain;
        Ok(match raw.command {
            Command::Version => ProtocolMessage::Version(VersionMessage::from_raw_message(raw)?),
            Command::Verack => ProtocolMessage::Verack(VerackMessage::new(chain)),
            Command::Ping => ProtocolMessage::Ping(PingMessage::from_raw_message(raw)?),
            Command::Pong => ProtocolMessage::Pong(PongMessage::from_raw_message(raw)?),
            Command::Addr => ProtocolMessage::Addr(AddrMessage::from_raw_message(raw)?),
            Command::GetHeaders => ProtocolMessage::GetHeaders(GetHeadersMessage::from_raw_message(raw)?),
            Command::Headers => ProtocolMessage::Headers(HeadersMessage::from_raw_message(raw)?),
            Command::GetData => ProtocolMessage::GetData(GetDataMessage::from_raw_message(raw)?),
            Command::Inv => ProtocolMessage::Inv(InvMessage::from_raw_message(raw)?),
            Command::Tx => ProtocolMessage::Tx(TxMessage::from_raw_message(raw)),
            Command::Block => ProtocolMessage::Block(DrainedMessage::from_raw_message(raw)),
            Command::MerkleBlock => ProtocolMessage::MerkleBlock(DrainedMessage::from_raw_message(raw)),
            Command::FilterLoad => ProtocolMessage::FilterLoad(FilterLoadMessage::from_raw_message(raw)?),
            Command::Mempool => ProtocolMessage::Mempool(MempoolMessage::new(chain)),
            Command::FeeFilter => ProtocolMessage::FeeFilter(DrainedMessage::from_raw_message(raw)),
            Command::SendHeaders => ProtocolMessage::SendHeaders(DrainedMessage::from_raw_message(raw)),
            Command::SendCmpct => ProtocolMessage::SendCmpct(DrainedMessage::from_raw_message(raw)),
            Command::GetBlocks => ProtocolMessage::GetBlocks(GetBlocksMessage::from_raw_message(raw)?),
        })
    }

    pub fn encode(self) -> RawMessage {
        match self {
            ProtocolMessage::Version(m) => m.to_raw_message(),
            ProtocolMessage::Verack(m) => m.to_raw_message(),
            ProtocolMessage::Ping(m) => m.to_raw_message(),
            ProtocolMessage::Pong(m) => m.to_raw_message(),
            ProtocolMessage::Addr(m) => m.to_raw_message(),
            ProtocolMessage::GetHeaders(m) => m.to_raw_message(),
            ProtocolMessage::Headers(m) => m.to_raw_message(),
            ProtocolMessage::GetData(m) => m.to_raw_message(),
            ProtocolMessage::Inv(m) => m.to_raw_message(),
            ProtocolMessage::Tx(m) => m.to_raw_message(),
            ProtocolMessage::Block(m) => m.to_raw_message(Command::Block),
            ProtocolMessage::MerkleBlock(m) => m.to_raw_message(Command::MerkleBlock),
            ProtocolMessage::FilterLoad(m) => m.to_raw_message(),
            ProtocolMessage::Mempool(m) => m.to_raw_message(),
            ProtocolMessage::FeeFilter(m) => m.to_raw_message(Command::FeeFilter),
            ProtocolMessage::SendHeaders(m) => m.to_raw_message(Command::SendHeaders),
            ProtocolMessage::SendCmpct(m) => m.to_raw_message(Command::SendCmpct),
            ProtocolMessage::GetBlocks(m) => m.to_raw_message(),
        }
    }

    pub fn to_bytes(self) -> Vec<u8> {
        RawMessage::from(self).to_bytes()
    }
}

const ZERO_STOP_HASH: [u8; 32] = [0u8; 32];

/// https://en.bitcoin.it/wiki/Protocol_documentation#version
///
/// size | field        | type     | description
/// ---  | -----        | ----     | ------------
/// 4    | version      | i32      | protocol version used by the node
/// 8    | services     | u64      | bitfield of features enabled for this connection
/// 8    | timestamp    | i64      | standard UNIX timestamp in seconds
/// 26   | addr_recv    | net_addr | network address of the node receiving this message
/// 26   | addr_from    | net_addr | sender's claimed address; not relied upon
/// 8    | nonce        | u64      | random nonce
/// ?    | user_agent   | var_str  | user agent string
/// 4    | start_height | i32      | last block height known to the sender
/// 1    | relay        | bool     | whether the peer should announce relayed transactions
#[derive(Clone, Debug)]
pub struct VersionMessage {
    pub chain: Chain,
    pub protocol_version: i32,
    pub services: NodeServiceSet,
    pub timestamp: i64,
    pub addr_recv: SocketAddr,
    pub nonce: u64,
    pub sub_ver: String,
    pub start_height: i32,
    pub relay: bool,
}

impl VersionMessage {
    pub fn new(addr_recv: SocketAddr, me: &NodeDesc) -> Self {
        let timestamp = match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(v) => v.as_secs() as i64,
            Err(_) => panic!("system clock is set before the UNIX epoch"),
        };

        VersionMessage {
            chain: me.chain,
            protocol_version: me.protocol_version,
            services: me.services.clone(),
            timestamp,
            addr_recv,
            nonce: thread_rng().gen(),
            sub_ver: me.sub_ver.clone(),
            start_height: me.start_height,
            relay: true,
        }
    }

    pub(super) fn from_raw_message(raw: RawMessage) -> PeerResult<Self> {
        let mut parser = ByteBufferParser::new(&raw.payload);

        let protocol_version = parser.read_i32_le()?;
        let services = NodeServiceSet::from_bitmask(parser.read_u64_le()?);
        let timestamp = parser.read_i64_le()?;
        let (_, addr_recv) = parser.read_net_addr()?;
        parser.skip_bytes(26)?; // addr_from, unused
        let nonce = parser.read_u64_le()?;
        let sub_ver = parser.read_var_string()?;
        let start_height = parser.read_i32_le()?;
        let relay = if parser.remaining() > 0 { parser.read_u8()? != 0 } else { true };

        Ok(VersionMessage {
            chain: raw.chain,
            protocol_version,
            services,
            timestamp,
            addr_recv,
            nonce,
            sub_ver,
            start_height,
            relay,
        })
    }

    pub(super) fn to_raw_message(self) -> RawMessage {
        let mut composer = ByteBufferComposer::new();

        composer.append(&self.protocol_version.to_le_bytes());
        composer.append(&self.services.as_bitmask().to_le_bytes());
        composer.append(&self.timestamp.to_le_bytes());
        composer.append_net_addr(&self.services, &self.addr_recv);
        composer.append_net_addr(&NodeServiceSet::default(), &SocketAddr::V4(SocketAddrV4::new(0.into(), 0)));
        composer.append(&self.nonce.to_le_bytes());
        composer.append_var_string(&self.sub_ver);
        composer.append(&self.start_height.to_le_bytes());
        composer.append(&[self.relay as u8]);

        RawMessage::new(self.chain, Command::Version, composer.result())
    }
}

/// Sent once the peer's `version` has been accepted.
#[derive(Debug)]
pub struct VerackMessage {
    chain: Chain,
}

impl VerackMessage {
    pub fn new(chain: Chain) -> Self {
        VerackMessage { chain }
    }
    pub fn to_raw_message(self) -> RawMessage {
        RawMessage::new(self.chain, Command::Verack, vec![])
    }
}

#[derive(Debug)]
pub struct PingMessage {
    chain: Chain,
    pub nonce: u64,
}

impl PingMessage {
    pub(super) fn from_raw_message(raw: RawMessage) -> PeerResult<Self> {
        let nonce = ByteBufferParser::new(&raw.payload).read_u64_le()?;
        Ok(PingMessage { chain: raw.chain, nonce })
    }

    pub fn to_raw_message(self) -> RawMessage {
        RawMessage::new(self.chain, Command::Ping, self.nonce.to_le_bytes().to_vec())
    }
}

#[derive(Debug)]
pub struct PongMessage {
    chain: Chain,
    pub nonce: u64,
}

impl PongMessage {
    pub fn reply_to(ping: &PingMessage, chain: Chain) -> Self {
        PongMessage { chain, nonce: ping.nonce }
    }

    pub(super) fn from_raw_message(raw: RawMessage) -> PeerResult<Self> {
        let nonce = ByteBufferParser::new(&raw.payload).read_u64_le()?;
        Ok(PongMessage { chain: raw.chain, nonce })
    }

    pub fn to_raw_message(self) -> RawMessage {
        RawMessage::new(self.chain, Command::Pong, self.nonce.to_le_bytes().to_vec())
    }
}

/// Peer gossip. Logged and discarded; the entry count is kept for logging
/// only, the individual records are not retained.
#[derive(Debug)]
pub struct AddrMessage {
    chain: Chain,
    pub entry_count: u64,
}

impl AddrMessage {
    pub(super) fn from_raw_message(raw: RawMessage) -> PeerResult<Self> {
        let mut parser = ByteBufferParser::new(&raw.payload);
        let entry_count = parser.read_varint()?;
        for _ in 0..entry_count {
            parser.skip_bytes(4)?; // timestamp
            parser.read_net_addr()?;
        }
        Ok(AddrMessage { chain: raw.chain, entry_count })
    }

    pub fn to_raw_message(self) -> RawMessage {
        RawMessage::new(self.chain, Command::Addr, vec![0])
    }
}

/// `version + varint(1) + one locator hash + zero stop-hash`: this client
/// only ever sends a single locator entry.
#[derive(Debug)]
pub struct GetHeadersMessage {
    chain: Chain,
    pub protocol_version: i32,
    pub locator: [u8; 32],
}

impl GetHeadersMessage {
    pub fn new(chain: Chain, protocol_version: i32, locator: [u8; 32]) -> Self {
        GetHeadersMessage { chain, protocol_version, locator }
    }

    pub(super) fn from_raw_message(raw: RawMessage) -> PeerResult<Self> {
        let mut parser = ByteBufferParser::new(&raw.payload);
        let protocol_version = parser.read_i32_le()?;
        let hash_count = parser.read_varint()?;
        let locator = if hash_count > 0 { parser.read_array()? } else { [0u8; 32] };
        for _ in 1..hash_count {
            parser.skip_bytes(32)?;
        }
        parser.skip_bytes(32)?; // stop hash
        Ok(GetHeadersMessage { chain: raw.chain, protocol_version, locator })
    }

    pub fn to_raw_message(self) -> RawMessage {
        let mut composer = ByteBufferComposer::new();
        composer.append(&self.protocol_version.to_le_bytes());
        composer.append_varint(1);
        composer.append(&self.locator);
        composer.append(&ZERO_STOP_HASH);
        RawMessage::new(self.chain, Command::GetHeaders, composer.result())
    }
}

/// Response to `getheaders`: up to 2000 headers, each followed by a
/// transaction-count byte that is always 0 on this wire.
#[derive(Debug)]
pub struct HeadersMessage {
    chain: Chain,
    pub headers: Vec<BlockHeader>,
}

impl HeadersMessage {
    pub(super) fn from_raw_message(raw: RawMessage) -> PeerResult<Self> {
        let mut parser = ByteBufferParser::new(&raw.payload);
        let count = parser.read_varint()?;
        let mut headers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            headers.push(parser.read_block_header()?);
            parser.skip_bytes(1)?; // txn_count, always 0 here
        }
        Ok(HeadersMessage { chain: raw.chain, headers })
    }

    pub fn to_raw_message(self) -> RawMessage {
        let mut composer = ByteBufferComposer::new();
        composer.append_varint(self.headers.len() as u64);
        for header in &self.headers {
            composer.append_block_header(header);
            composer.append(&[0]);
        }
        RawMessage::new(self.chain, Command::Headers, composer.result())
    }
}

#[derive(Debug)]
pub struct GetDataMessage {
    chain: Chain,
    pub items: Vec<InventoryVector>,
}

impl GetDataMessage {
    pub fn new(chain: Chain, items: Vec<InventoryVector>) -> Self {
        GetDataMessage { chain, items }
    }

    pub(super) fn from_raw_message(raw: RawMessage) -> PeerResult<Self> {
        Ok(GetDataMessage { chain: raw.chain, items: read_inventory_vectors(&raw.payload)? })
    }

    pub fn to_raw_message(self) -> RawMessage {
        RawMessage::new(self.chain, Command::GetData, write_inventory_vectors(&self.items))
    }
}

#[derive(Debug)]
pub struct InvMessage {
    chain: Chain,
    pub items: Vec<InventoryVector>,
}

impl InvMessage {
    pub(super) fn from_raw_message(raw: RawMessage) -> PeerResult<Self> {
        Ok(InvMessage { chain: raw.chain, items: read_inventory_vectors(&raw.payload)? })
    }

    pub fn to_raw_message(self) -> RawMessage {
        RawMessage::new(self.chain, Command::Inv, write_inventory_vectors(&self.items))
    }
}

fn read_inventory_vectors(payload: &[u8]) -> PeerResult<Vec<InventoryVector>> {
    let mut parser = ByteBufferParser::new(payload);
    let count = parser.read_varint()?;
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        items.push(parser.read_inventory_vector()?);
    }
    Ok(items)
}

fn write_inventory_vectors(items: &[InventoryVector]) -> Vec<u8> {
    let mut composer = ByteBufferComposer::new();
    composer.append_varint(items.len() as u64);
    for item in items {
        composer.append_inventory_vector(item);
    }
    composer.result()
}

/// Raw transaction bytes, matched by the peer's view of our Bloom filter.
/// This client surfaces the undecoded bytes to an external collaborator
/// rather than parsing transaction structure itself.
#[derive(Debug)]
pub struct TxMessage {
    chain: Chain,
    pub raw: Vec<u8>,
}

impl TxMessage {
    pub(super) fn from_raw_message(raw: RawMessage) -> Self {
        TxMessage { chain: raw.chain, raw: raw.payload }
    }

    pub fn to_raw_message(self) -> RawMessage {
        RawMessage::new(self.chain, Command::Tx, self.raw)
    }
}

/// Payload placeholder for commands this client recognises by name but
/// deliberately does not parse: `block`, `merkleblock`, `feefilter`,
/// `sendheaders`, `sendcmpct`. Only the byte length is retained, for
/// logging.
#[derive(Debug)]
pub struct DrainedMessage {
    chain: Chain,
    pub payload_len: usize,
}

impl DrainedMessage {
    pub(super) fn from_raw_message(raw: RawMessage) -> Self {
        DrainedMessage { chain: raw.chain, payload_len: raw.payload.len() }
    }

    pub fn to_raw_message(self, command: Command) -> RawMessage {
        RawMessage::new(self.chain, command, vec![])
    }
}

/// `varint-prefixed filter bits + nHashFuncs(u32) + nTweak(u32) + nFlags(u8)`.
#[derive(Debug)]
pub struct FilterLoadMessage {
    chain: Chain,
    pub filter: Vec<u8>,
    pub n_hash_funcs: u32,
    pub n_tweak: u32,
    pub n_flags: u8,
}

pub const BLOOM_UPDATE_ALL: u8 = 1;

impl FilterLoadMessage {
    pub fn new(chain: Chain, filter: Vec<u8>, n_hash_funcs: u32, n_tweak: u32) -> Self {
        FilterLoadMessage { chain, filter, n_hash_funcs, n_tweak, n_flags: BLOOM_UPDATE_ALL }
    }

    pub(super) fn from_raw_message(raw: RawMessage) -> PeerResult<Self> {
        let mut parser = ByteBufferParser::new(&raw.payload);
        let len = parser.read_varint()? as usize;
        let filter = parser.read(len)?.to_vec();
        let n_hash_funcs = parser.read_u32_le()?;
        let n_tweak = parser.read_u32_le()?;
        let n_flags = parser.read_u8()?;
        Ok(FilterLoadMessage { chain: raw.chain, filter, n_hash_funcs, n_tweak, n_flags })
    }

    pub fn to_raw_message(self) -> RawMessage {
        let mut composer = ByteBufferComposer::new();
        composer.append_varint(self.filter.len() as u64);
        composer.append(&self.filter);
        composer.append(&self.n_hash_funcs.to_le_bytes());
        composer.append(&self.n_tweak.to_le_bytes());
        composer.append(&[self.n_flags]);
        RawMessage::new(self.chain, Command::FilterLoad, composer.result())
    }
}

#[derive(Debug)]
pub struct MempoolMessage {
    chain: Chain,
}

impl MempoolMessage {
    pub fn new(chain: Chain) -> Self {
        MempoolMessage { chain }
    }
    pub fn to_raw_message(self) -> RawMessage {
        RawMessage::new(self.chain, Command::Mempool, vec![])
    }
}

/// Defined for completeness; unused once header sync switches to
/// `getheaders`. Kept so the command catalogue has a named encoder for
/// every command it recognises.
#[derive(Debug)]
pub struct GetBlocksMessage {
    chain: Chain,
    pub protocol_version: i32,
    pub locator: [u8; 32],
}

impl GetBlocksMessage {
    #[allow(dead_code)]
    pub fn new(chain: Chain, protocol_version: i32, locator: [u8; 32]) -> Self {
        GetBlocksMessage { chain, protocol_version, locator }
    }

    pub(super) fn from_raw_message(raw: RawMessage) -> PeerResult<Self> {
        let mut parser = ByteBufferParser::new(&raw.payload);
        let protocol_version = parser.read_i32_le()?;
        let hash_count = parser.read_varint()?;
        let locator = if hash_count > 0 { parser.read_array()? } else { [0u8; 32] };
        for _ in 1..hash_count {
            parser.skip_bytes(32)?;
        }
        parser.skip_bytes(32)?;
        Ok(GetBlocksMessage { chain: raw.chain, protocol_version, locator })
    }

    pub fn to_raw_message(self) -> RawMessage {
        let mut composer = ByteBufferComposer::new();
        composer.append(&self.protocol_version.to_le_bytes());
        composer.append_varint(1);
        composer.append(&self.locator);
        composer.append(&ZERO_STOP_HASH);
        RawMessage::new(self.chain, Command::GetBlocks, composer.result())
    }
}

#[cfg(test)]
mod test {
    use crate::wire::buffer::InventoryType;
    use crate::wire::node::NodeService;

    use super::*;

    fn test_node_desc() -> NodeDesc {
        NodeDesc {
            chain: Chain::Testnet3,
            protocol_version: 70015,
            services: NodeServiceSet(vec![NodeService::NodeBloom]),
            sub_ver: "/spv-client:1.0.0/".to_string(),
            start_height: 1_447_141,
        }
    }

    #[test]
    fn version_message_round_trips() {
        let addr_recv: SocketAddr = "127.0.0.1:18333".parse().unwrap();
        let encoded = VersionMessage::new(addr_recv, &test_node_desc()).to_raw_message();
        let decoded = VersionMessage::from_raw_message(encoded).unwrap();

        assert_eq!(decoded.protocol_version, 70015);
        assert_eq!(decoded.start_height, 1_447_141);
        assert_eq!(decoded.sub_ver, "/spv-client:1.0.0/");
        assert!(decoded.relay);
    }

    #[test]
    fn ping_pong_nonce_is_echoed() {
        let ping_raw = PingMessage { chain: Chain::Testnet3, nonce: 0xDEAD_BEEF }.to_raw_message();
        let ping = PingMessage::from_raw_message(ping_raw).unwrap();
        let pong = PongMessage::reply_to(&ping, Chain::Testnet3);
        assert_eq!(pong.nonce, 0xDEAD_BEEF);
    }

    #[test]
    fn getheaders_locator_round_trips() {
        let locator = [0x11; 32];
        let encoded = GetHeadersMessage::new(Chain::Testnet3, 70015, locator).to_raw_message();
        let decoded = GetHeadersMessage::from_raw_message(encoded).unwrap();
        assert_eq!(decoded.locator, locator);
    }

    #[test]
    fn headers_batch_round_trips() {
        let header = BlockHeader {
            version: 1,
            prev_block: [0x22; 32],
            merkle_root: [0x33; 32],
            timestamp: 1_600_000_000,
            bits: 0x1d00ffff,
            nonce: 12345,
        };
        let message = HeadersMessage { chain: Chain::Testnet3, headers: vec![header, header] };
        let encoded = message.to_raw_message();
        let decoded = HeadersMessage::from_raw_message(encoded).unwrap();
        assert_eq!(decoded.headers, vec![header, header]);
    }

    #[test]
    fn empty_headers_batch_round_trips() {
        let message = HeadersMessage { chain: Chain::Testnet3, headers: vec![] };
        let encoded = message.to_raw_message();
        let decoded = HeadersMessage::from_raw_message(encoded).unwrap();
        assert!(decoded.headers.is_empty());
    }

    #[test]
    fn inv_message_mixed_types_round_trips() {
        let items = vec![
            InventoryVector { inv_type: InventoryType::Tx, hash: [1; 32] },
            InventoryVector { inv_type: InventoryType::Block, hash: [2; 32] },
        ];
        let message = InvMessage { chain: Chain::Testnet3, items: items.clone() };
        let encoded = message.to_raw_message();
        let decoded = InvMessage::from_raw_message(encoded).unwrap();
        assert_eq!(decoded.items, items);
    }

    #[test]
    fn filterload_round_trips() {
        let message = FilterLoadMessage::new(Chain::Testnet3, vec![0xAB; 16], 7, 0x1234_5678);
        let encoded = message.to_raw_message();
        let decoded = FilterLoadMessage::from_raw_message(encoded).unwrap();
        assert_eq!(decoded.filter, vec![0xAB; 16]);
        assert_eq!(decoded.n_hash_funcs, 7);
        assert_eq!(decoded.n_tweak, 0x1234_5678);
        assert_eq!(decoded.n_flags, BLOOM_UPDATE_ALL);
    }
}
