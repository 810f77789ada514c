use std::ops::BitOr;

use strum::{EnumIter, IntoEnumIterator};

use crate::error::PeerError;

/// Describes this node (or, once a handshake completes, the peer) for the
/// purposes of the `version` exchange.
#[derive(Clone, Debug)]
pub struct NodeDesc {
    pub chain: Chain,
    pub protocol_version: i32,
    pub services: NodeServiceSet,
    pub sub_ver: String,
    pub start_height: i32,
}

/// Selects the network magic, and nothing else - genesis hashes and
/// default ports live with the collaborators that need them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter)]
pub enum Chain {
    Mainnet,
    Testnet3,
    Regtest,
}

impl Chain {
    /// Network magic as it reads after little-endian `u32` decode of the
    /// four magic bytes on the wire. Each network gets its own value -
    /// reusing one constant across networks defeats the magic's purpose
    /// of resynchronising on framing loss and rejecting cross-network
    /// peers.
    pub fn magic_value(&self) -> u32 {
        match self {
            Chain::Mainnet => 0xD9B4BEF9,
            Chain::Testnet3 => 0x0709110B,
            Chain::Regtest => 0xDAB5BFFA,
        }
    }

    /// The genesis block's own hash, in the same internal byte order
    /// used for `prev_block` comparisons. Used only to detect a header
    /// batch that reaches all the way back to height 1 (whose
    /// `prev_block` points at this). Regtest's genesis hash is
    /// deployment-specific, so the all-zero placeholder below simply
    /// means this tie-break never fires there.
    pub fn genesis_hash(&self) -> [u8; 32] {
        match self {
            Chain::Mainnet => [
                0x6f, 0xe2, 0x8c, 0x0a, 0xb6, 0xf1, 0xb3, 0x72, 0xc1, 0xa6, 0xa2, 0x46, 0xae, 0x63, 0xf7, 0x4f, 0x93,
                0x1e, 0x83, 0x65, 0xe1, 0x5a, 0x08, 0x9c, 0x68, 0xd6, 0x19, 0x00, 0x00, 0x00, 0x00, 0x00,
            ],
            Chain::Testnet3 => [
                0x43, 0x49, 0x7f, 0xd7, 0xf8, 0x26, 0x95, 0x71, 0x08, 0xf4, 0xa3, 0x0f, 0xd9, 0xce, 0xc3, 0xae, 0xba,
                0x79, 0x97, 0x20, 0x84, 0xe9, 0x0e, 0xad, 0x01, 0xea, 0x33, 0x09, 0x00, 0x00, 0x00, 0x00,
            ],
            Chain::Regtest => [0u8; 32],
        }
    }
}

impl TryFrom<u32> for Chain {
    type Error = PeerError;

    fn try_from(magic_value: u32) -> Result<Self, Self::Error> {
        Chain::iter()
            .find(|c| c.magic_value() == magic_value)
            .ok_or_else(|| PeerError::framing(format!("no chain known having magic value {:#010x}", magic_value)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct NodeServiceSet(pub Vec<NodeService>);

impl NodeServiceSet {
    pub fn as_bitmask(&self) -> u64 {
        self.0.iter().fold(0u64, |mask, bit| mask.bitor(bit.as_u64()))
    }

    pub fn from_bitmask(mask: u64) -> Self {
        NodeServiceSet(NodeService::iter().filter(|e| mask & e.as_u64() != 0).collect())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter)]
#[repr(u64)]
pub enum NodeService {
    /// Full node, can serve full blocks.
    NodeNetwork = 0x1,
    /// BIP64 getutxo.
    NodeGetUtxo = 0x2,
    /// BIP111: supports Bloom-filtered connections.
    NodeBloom = 0x4,
    /// BIP144: serves witness data.
    NodeWitness = 0x8,
    /// BIP159: NODE_NETWORK but only the last 288 blocks.
    NodeNetworkLimited = 0x400,
}

impl NodeService {
    pub fn as_u64(self) -> u64 {
        self as u64
    }
}
