use std::io;
use std::net::{IpAddr, SocketAddr};

use crate::wire::node::NodeServiceSet;

/// An inventory vector: a typed hash announcing the availability of a tx
/// or block (or asking the peer for one, via `getdata`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InventoryVector {
    pub inv_type: InventoryType,
    pub hash: [u8; 32],
}

const INV_MSK_WITNESS: u32 = 0x4000_0000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InventoryType {
    Error,
    Tx,
    Block,
    FilteredBlock,
    CompactBlock,
    WitnessTx,
    WitnessBlock,
    WitnessFilteredBlock,
    /// Any type tag this implementation doesn't name explicitly; preserved
    /// so an `inv`/`getdata` round-trip never silently drops data.
    Other(u32),
}

impl InventoryType {
    fn as_u32(self) -> u32 {
        match self {
            InventoryType::Error => 0,
            InventoryType::Tx => 1,
            InventoryType::Block => 2,
            InventoryType::FilteredBlock => 3,
            InventoryType::CompactBlock => 4,
            InventoryType::WitnessTx => INV_MSK_WITNESS | 1,
            InventoryType::WitnessBlock => INV_MSK_WITNESS | 2,
            InventoryType::WitnessFilteredBlock => INV_MSK_WITNESS | 3,
            InventoryType::Other(tag) => tag,
        }
    }

    fn from_u32(tag: u32) -> Self {
        match tag {
            0 => InventoryType::Error,
            1 => InventoryType::Tx,
            2 => InventoryType::Block,
            3 => InventoryType::FilteredBlock,
            4 => InventoryType::CompactBlock,
            t if t == (INV_MSK_WITNESS | 1) => InventoryType::WitnessTx,
            t if t == (INV_MSK_WITNESS | 2) => InventoryType::WitnessBlock,
            t if t == (INV_MSK_WITNESS | 3) => InventoryType::WitnessFilteredBlock,
            other => InventoryType::Other(other),
        }
    }
}

/// An 80-byte Bitcoin block header, as it appears in a `headers` or
/// `block` message (without the trailing transaction count).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: [u8; 32],
    pub merkle_root: [u8; 32],
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub const SIZE: usize = 80;

    /// The 80 canonical bytes, suitable for `hash256` to produce this
    /// header's block hash.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.prev_block);
        out[36..68].copy_from_slice(&self.merkle_root);
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }
}

pub(crate) struct ByteBufferParser<'a> {
    buffer: &'a [u8],
    pos: usize,
}

impl<'a> ByteBufferParser<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        ByteBufferParser { buffer, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.pos
    }

    pub fn skip_bytes(&mut self, count: usize) -> io::Result<()> {
        self.eof_check(count)?;
        self.pos += count;
        Ok(())
    }

    pub fn read(&mut self, size: usize) -> io::Result<&'a [u8]> {
        self.eof_check(size)?;
        let range = self.pos..self.pos + size;
        self.pos += size;
        Ok(&self.buffer[range])
    }

    pub fn read_array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        Ok(self.read(N)?.try_into().unwrap())
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        Ok(self.read(1)?[0])
    }

    pub fn read_u16_be(&mut self) -> io::Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32_le(&mut self) -> io::Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32_le(&mut self) -> io::Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64_le(&mut self) -> io::Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64_le(&mut self) -> io::Result<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    /// Bitcoin's variable-length integer: 1, 3, 5, or 9 bytes depending on
    /// the leading byte. Always consumes the minimal-length encoding the
    /// sender should have chosen.
    pub fn read_varint(&mut self) -> io::Result<u64> {
        let lead = self.read_u8()?;
        Ok(match lead {
            0..=0xFC => lead as u64,
            0xFD => u16::from_le_bytes(self.read_array()?) as u64,
            0xFE => u32::from_le_bytes(self.read_array()?) as u64,
            0xFF => u64::from_le_bytes(self.read_array()?),
        })
    }

    /// `varint` length + raw bytes, no NUL terminator on the wire.
    pub fn read_var_string(&mut self) -> io::Result<String> {
        let len = self.read_varint()? as usize;
        let bytes = self.read(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Network address record without the leading 4-byte timestamp that
    /// `addr` entries carry separately.
    pub fn read_net_addr(&mut self) -> io::Result<(NodeServiceSet, SocketAddr)> {
        let services = NodeServiceSet::from_bitmask(self.read_u64_le()?);
        let ip: [u8; 16] = self.read_array()?;
        let port = self.read_u16_be()?;
        Ok((services, SocketAddr::new(IpAddr::from(ip), port)))
    }

    pub fn read_inventory_vector(&mut self) -> io::Result<InventoryVector> {
        let inv_type = InventoryType::from_u32(self.read_u32_le()?);
        let hash = self.read_array()?;
        Ok(InventoryVector { inv_type, hash })
    }

    pub fn read_block_header(&mut self) -> io::Result<BlockHeader> {
        Ok(BlockHeader {
            version: self.read_i32_le()?,
            prev_block: self.read_array()?,
            merkle_root: self.read_array()?,
            timestamp: self.read_u32_le()?,
            bits: self.read_u32_le()?,
            nonce: self.read_u32_le()?,
        })
    }

    fn eof_check(&self, want_bytes: usize) -> io::Result<()> {
        if self.remaining() < want_bytes {
            Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("cannot read {} bytes from buffer of size {}", want_bytes, self.buffer.len()),
            ))
        } else {
            Ok(())
        }
    }
}

pub(crate) struct ByteBufferComposer {
    buffer: Vec<u8>,
}

impl ByteBufferComposer {
    pub fn new() -> Self {
        ByteBufferComposer { buffer: vec![] }
    }

    pub fn result(self) -> Vec<u8> {
        self.buffer
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn append_u16_be(&mut self, v: u16) {
        self.append(&v.to_be_bytes());
    }

    /// Minimal-length varint encoding: 1 byte for v<0xFD, 3 for v<0x10000,
    /// 5 for v<0x100000000, 9 otherwise.
    pub fn append_varint(&mut self, v: u64) {
        if v < 0xFD {
            self.append(&[v as u8]);
        } else if v <= 0xFFFF {
            self.append(&[0xFD]);
            self.append(&(v as u16).to_le_bytes());
        } else if v <= 0xFFFF_FFFF {
            self.append(&[0xFE]);
            self.append(&(v as u32).to_le_bytes());
        } else {
            self.append(&[0xFF]);
            self.append(&v.to_le_bytes());
        }
    }

    pub fn append_var_string(&mut self, s: &str) {
        self.append_varint(s.len() as u64);
        self.append(s.as_bytes());
    }

    /// Net address record without the timestamp field.
    pub fn append_net_addr(&mut self, services: &NodeServiceSet, addr: &SocketAddr) {
        self.append(&services.as_bitmask().to_le_bytes());
        let ipv6_octets = match addr.ip() {
            IpAddr::V4(ip) => ip.to_ipv6_mapped().octets(),
            IpAddr::V6(ip) => ip.octets(),
        };
        self.append(&ipv6_octets);
        self.append_u16_be(addr.port());
    }

    pub fn append_inventory_vector(&mut self, inv: &InventoryVector) {
        self.append(&inv.inv_type.as_u32().to_le_bytes());
        self.append(&inv.hash);
    }

    pub fn append_block_header(&mut self, header: &BlockHeader) {
        self.append(&header.to_bytes());
    }
}

impl Default for ByteBufferComposer {
    fn default() -> Self {
        Self::new()
    }
}

/// Growable read buffer for the socket. Unlike a fixed-size buffer, this
/// must accommodate a `headers` batch of up to 2000 headers (~162 KiB),
/// not just handshake-sized messages.
pub(crate) struct IoBuffer {
    buf: Vec<u8>,
    /// length of valid content, starting at index 0
    mark: usize,
}

const READ_CHUNK: usize = 16 * 1024;

impl IoBuffer {
    pub fn content(&self) -> &[u8] {
        &self.buf[..self.mark]
    }

    /// Ensures at least `READ_CHUNK` bytes of writable space exist past
    /// `mark`, growing the backing `Vec` if necessary, then returns that
    /// writable slice for a socket read to fill.
    pub fn writable_part(&mut self) -> &mut [u8] {
        if self.buf.len() - self.mark < READ_CHUNK {
            self.buf.resize(self.mark + READ_CHUNK, 0);
        }
        &mut self.buf[self.mark..]
    }

    /// Makes the buffer aware of `size` new bytes written into the slice
    /// returned by [`Self::writable_part`].
    pub fn register_added_content(&mut self, size: usize) {
        assert!(self.mark + size <= self.buf.len());
        self.mark += size;
    }

    /// Removes `size` bytes from the front of the buffer, shifting the
    /// remainder down.
    pub fn shift_left(&mut self, size: usize) {
        assert!(size <= self.mark);
        self.buf.copy_within(size..self.mark, 0);
        self.mark -= size;
    }
}

impl Default for IoBuffer {
    fn default() -> Self {
        IoBuffer { buf: vec![0u8; READ_CHUNK], mark: 0 }
    }
}
