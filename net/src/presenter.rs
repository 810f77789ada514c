/// External collaborator that receives decoded `tx` payloads matched by
/// the installed Bloom filter. This crate hands over raw transaction
/// bytes only - parsing transaction structure is out of scope (see
/// `merkleblock` handling, which is drained for the same reason).
pub trait TransactionPresenter: Send + Sync {
    fn present(&self, raw_tx: &[u8]);
}
