use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use net::checkpoint::{Checkpoint, CheckpointStore};
use net::error::{PeerError, PeerResult};

/// Persists the chain-tip checkpoint as a fixed 36-byte layout: a
/// little-endian `u32` height followed by the 32-byte last-headers hash.
pub struct FileCheckpointStore {
    path: PathBuf,
}

const RECORD_LEN: usize = 4 + 32;

impl FileCheckpointStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        FileCheckpointStore { path: path.as_ref().to_path_buf() }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> PeerResult<Option<Checkpoint>> {
        let mut file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(PeerError::checkpoint(err.to_string())),
        };

        let mut data = [0u8; RECORD_LEN];
        match file.read_exact(&mut data) {
            Ok(()) => {}
            Err(_) => return Ok(None),
        }

        let height = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let last_headers_hash: [u8; 32] = data[4..36].try_into().unwrap();
        Ok(Some(Checkpoint { height, last_headers_hash }))
    }

    fn store(&self, checkpoint: Checkpoint) -> PeerResult<()> {
        let mut file = fs::File::create(&self.path).map_err(|e| PeerError::checkpoint(e.to_string()))?;
        file.write_all(&checkpoint.height.to_le_bytes()).map_err(|e| PeerError::checkpoint(e.to_string()))?;
        file.write_all(&checkpoint.last_headers_hash).map_err(|e| PeerError::checkpoint(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_file_yields_no_checkpoint() {
        let store = FileCheckpointStore::new("/tmp/spv-client-test-checkpoint-does-not-exist");
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn store_then_load_round_trips() {
        let path = std::env::temp_dir().join(format!("spv-client-test-checkpoint-{}", std::process::id()));
        let store = FileCheckpointStore::new(&path);
        let checkpoint = Checkpoint { height: 1_447_143, last_headers_hash: [0x42; 32] };

        store.store(checkpoint).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, checkpoint);

        let _ = fs::remove_file(&path);
    }
}
