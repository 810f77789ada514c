use crate::error::PeerResult;

/// The compiled-in fallback checkpoint, used whenever no persisted
/// checkpoint exists yet. Height and hash come from the same genesis-era
/// point the original client shipped with.
pub const GENESIS_CHECKPOINT_HEIGHT: u32 = 1_447_141;

pub const GENESIS_CHECKPOINT_HASH: [u8; 32] = [
    0x5e, 0xf3, 0xd3, 0x02, 0x93, 0x7a, 0x07, 0xc7, 0x5d, 0x87, 0xc8, 0x1e, 0xae, 0xd5, 0x3b, 0x6f, 0xfe, 0x95, 0x9d,
    0x46, 0xf8, 0xc6, 0xa6, 0x28, 0x0f, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// A persisted chain-tip marker: block height plus the 32-byte hash of
/// the last accepted header. Implementations live outside this crate -
/// typically a small file on disk - so the session can resume header
/// sync across restarts instead of always starting from genesis.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub height: u32,
    pub last_headers_hash: [u8; 32],
}

impl Default for Checkpoint {
    fn default() -> Self {
        Checkpoint { height: GENESIS_CHECKPOINT_HEIGHT, last_headers_hash: GENESIS_CHECKPOINT_HASH }
    }
}

/// External collaborator responsible for persisting the chain-tip
/// checkpoint. `load` returning `Ok(None)` means "no checkpoint yet" -
/// the caller falls back to [`Checkpoint::default`].
pub trait CheckpointStore: Send + Sync {
    fn load(&self) -> PeerResult<Option<Checkpoint>>;
    fn store(&self, checkpoint: Checkpoint) -> PeerResult<()>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_checkpoint_matches_compiled_in_genesis_marker() {
        let checkpoint = Checkpoint::default();
        assert_eq!(checkpoint.height, GENESIS_CHECKPOINT_HEIGHT);
        assert_eq!(checkpoint.last_headers_hash, GENESIS_CHECKPOINT_HASH);
    }
}
