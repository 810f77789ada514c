use net::presenter::TransactionPresenter;

/// Presents incoming transactions by logging their raw bytes. A real
/// wallet would parse and match against watched scripts here; this
/// client only needs to prove a transaction reached it.
pub struct LogPresenter;

impl TransactionPresenter for LogPresenter {
    fn present(&self, raw_tx: &[u8]) {
        log::info!("received transaction, {} bytes: {}", raw_tx.len(), hex::encode(raw_tx));
    }
}
