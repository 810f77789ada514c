use std::ascii;

use strum::{EnumIter, IntoEnumIterator};

use crate::crypto::hash256;
use crate::error::{PeerError, PeerResult};
use crate::wire::buffer::{ByteBufferComposer, ByteBufferParser, IoBuffer};
use crate::wire::messages::ProtocolMessage;
use crate::wire::node::Chain;

/// The recognised command catalogue. `Other` carries through any command
/// this implementation doesn't give special handling - those frames are
/// drained and discarded without ever reaching a handler.
#[derive(Debug, Clone, PartialEq, Eq, EnumIter)]
pub enum Command {
    Version,
    Verack,
    Ping,
    Pong,
    Addr,
    GetHeaders,
    Headers,
    GetData,
    Inv,
    Tx,
    Block,
    MerkleBlock,
    FilterLoad,
    Mempool,
    FeeFilter,
    SendHeaders,
    SendCmpct,
    GetBlocks,
}

impl Command {
    /// ASCII string identifying the packet content, NUL padded (non-NUL
    /// padding results in the packet being rejected).
    fn as_bytes(&self) -> &'static [u8; 12] {
        match self {
            Command::Version => b"version\0\0\0\0\0",
            Command::Verack => b"verack\0\0\0\0\0\0",
            Command::Ping => b"ping\0\0\0\0\0\0\0\0",
            Command::Pong => b"pong\0\0\0\0\0\0\0\0",
            Command::Addr => b"addr\0\0\0\0\0\0\0\0",
            Command::GetHeaders => b"getheaders\0\0",
            Command::Headers => b"headers\0\0\0\0\0",
            Command::GetData => b"getdata\0\0\0\0\0",
            Command::Inv => b"inv\0\0\0\0\0\0\0\0\0",
            Command::Tx => b"tx\0\0\0\0\0\0\0\0\0\0",
            Command::Block => b"block\0\0\0\0\0\0\0",
            Command::MerkleBlock => b"merkleblock\0",
            Command::FilterLoad => b"filterload\0\0",
            Command::Mempool => b"mempool\0\0\0\0\0",
            Command::FeeFilter => b"feefilter\0\0\0",
            Command::SendHeaders => b"sendheaders\0",
            Command::SendCmpct => b"sendcmpct\0\0\0",
            Command::GetBlocks => b"getblocks\0\0\0",
        }
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = PeerError;

    fn try_from(value: &[u8]) -> PeerResult<Self> {
        fn format_byte_array_as_string(bytes: &[u8]) -> String {
            let mut result = String::new();
            for &c in bytes {
                result.push_str(std::str::from_utf8(&ascii::escape_default(c).collect::<Vec<u8>>()).unwrap())
            }
            result
        }

        for command in Command::iter() {
            if command.as_bytes() == value {
                return Ok(command);
            }
        }
        let printable = format_byte_array_as_string(value);
        Err(PeerError::framing(format!("'{}' does not name a command this client recognises", printable)))
    }
}

/// Almost all integers are encoded little-endian; only IP addresses and
/// port numbers are encoded big-endian.
pub struct RawMessage {
    pub chain: Chain,
    pub command: Command,
    pub payload: Vec<u8>,
}

impl RawMessage {
    pub fn new(chain: Chain, command: Command, payload: Vec<u8>) -> Self {
        RawMessage { chain, command, payload }
    }

    /// Message structure (see https://en.bitcoin.it/wiki/Protocol_documentation#Message_structure)
    ///
    /// size | field    | type     | description
    /// ---  | -----    | ----     | ------------
    /// 4    | magic    | u32      | network-specific magic constant
    /// 12   | command  | [u8; 12] | ASCII command name, NUL padded
    /// 4    | length   | u32      | payload length in bytes
    /// 4    | checksum | u32      | first 4 bytes of hash256(payload)
    /// ?    | payload  | Vec<u8>  | the actual data
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut c = ByteBufferComposer::new();
        c.append(&self.chain.magic_value().to_le_bytes());
        c.append(self.command.as_bytes());
        c.append(&(self.payload.len() as u32).to_le_bytes());
        let checksum = hash256(self.payload.as_slice());
        c.append(&checksum[..4]);
        c.append(&self.payload);
        c.result()
    }

    /// Returns the deserialized message, if a whole frame is present in
    /// `buffer`, consuming it from the buffer's front on success.
    pub fn try_consume_message(buffer: &mut IoBuffer, expected_chain: Chain) -> PeerResult<MessageParseOutcome> {
        let mut parser = ByteBufferParser::new(buffer.content());

        const HEADER_LEN: usize = 4 + 12 + 4 + 4;
        if parser.remaining() < HEADER_LEN {
            return Ok(MessageParseOutcome::NoMessage);
        }

        let magic = parser.read_u32_le()?;
        let chain = Chain::try_from(magic)?;
        if chain != expected_chain {
            return Err(PeerError::framing(format!(
                "expected network chain {expected_chain:?}, but got a message from {chain:?}"
            )));
        }

        let command_bytes = parser.read(12)?;
        let payload_len = parser.read_u32_le()? as usize;
        let checksum: [u8; 4] = parser.read(4)?.try_into().unwrap();

        if parser.remaining() < payload_len {
            return Ok(MessageParseOutcome::NoMessage);
        }

        let payload = parser.read(payload_len)?.to_vec();
        Self::verify_checksum(&payload, &checksum)?;

        let command = match Command::try_from(command_bytes) {
            Ok(command) => command,
            Err(err) => {
                buffer.shift_left(parser.pos());
                log::debug!("draining unrecognised command: {}", err);
                return Ok(MessageParseOutcome::SkippedMessage);
            }
        };

        log::debug!("received {:?}", command);
        buffer.shift_left(parser.pos());

        Ok(MessageParseOutcome::Message(RawMessage { chain, command, payload }))
    }

    pub fn to_protocol_message(self) -> PeerResult<ProtocolMessage> {
        ProtocolMessage::decode(self)
    }

    fn verify_checksum(payload: &[u8], checksum: &[u8]) -> PeerResult<()> {
        if *checksum == hash256(payload)[..4] {
            Ok(())
        } else {
            Err(PeerError::framing("checksum mismatch"))
        }
    }
}

pub enum MessageParseOutcome {
    Message(RawMessage),
    SkippedMessage,
    NoMessage,
}

impl From<ProtocolMessage> for RawMessage {
    fn from(message: ProtocolMessage) -> Self {
        message.encode()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_command_is_padded_and_rejected() {
        let err = Command::try_from(&b"notacommand\0"[..]).unwrap_err();
        assert!(matches!(err, PeerError::Framing(_)));
    }

    #[test]
    fn every_command_name_round_trips_through_its_bytes() {
        for command in Command::iter() {
            let bytes = command.as_bytes();
            assert_eq!(bytes.len(), 12);
            let decoded = Command::try_from(&bytes[..]).unwrap();
            assert_eq!(decoded, command);
        }
    }

    #[test]
    fn frame_with_bad_checksum_is_rejected() {
        let chain = Chain::Testnet3;
        let raw = RawMessage::new(chain, Command::Ping, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let mut bytes = raw.to_bytes();
        // corrupt the checksum field (bytes 20..24)
        bytes[20] ^= 0xFF;

        let mut buffer = IoBuffer::default();
        buffer.writable_part()[..bytes.len()].copy_from_slice(&bytes);
        buffer.register_added_content(bytes.len());

        let err = RawMessage::try_consume_message(&mut buffer, chain).unwrap_err();
        assert!(matches!(err, PeerError::Framing(_)));
    }

    #[test]
    fn wrong_chain_magic_is_rejected() {
        let raw = RawMessage::new(Chain::Mainnet, Command::Ping, vec![0; 8]);
        let bytes = raw.to_bytes();

        let mut buffer = IoBuffer::default();
        buffer.writable_part()[..bytes.len()].copy_from_slice(&bytes);
        buffer.register_added_content(bytes.len());

        let err = RawMessage::try_consume_message(&mut buffer, Chain::Testnet3).unwrap_err();
        assert!(matches!(err, PeerError::Framing(_)));
    }

    #[test]
    fn partial_frame_yields_no_message_and_leaves_buffer_untouched() {
        let raw = RawMessage::new(Chain::Testnet3, Command::Ping, vec![0; 8]);
        let bytes = raw.to_bytes();

        let mut buffer = IoBuffer::default();
        buffer.writable_part()[..bytes.len() - 1].copy_from_slice(&bytes[..bytes.len() - 1]);
        buffer.register_added_content(bytes.len() - 1);

        match RawMessage::try_consume_message(&mut buffer, Chain::Testnet3).unwrap() {
            MessageParseOutcome::NoMessage => {}
            _ => panic!("expected NoMessage for a truncated frame"),
        }
        assert_eq!(buffer.content().len(), bytes.len() - 1);
    }
}
