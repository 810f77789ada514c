use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;

use net::checkpoint::CheckpointStore;
use net::connection::NodeConnection;
use net::error::PeerResult;
use net::peer::PeerStateMachine;
use net::presenter::TransactionPresenter;
use net::session::Session;
use net::wire::node::NodeDesc;

/// Dials one remote peer and runs its conversation to completion.
pub struct Node {
    local: NodeDesc,
    checkpoint_store: Arc<dyn CheckpointStore>,
    presenter: Arc<dyn TransactionPresenter>,
    watch_items: Vec<Vec<u8>>,
}

impl Node {
    pub fn new(
        local: NodeDesc,
        checkpoint_store: Arc<dyn CheckpointStore>,
        presenter: Arc<dyn TransactionPresenter>,
        watch_items: Vec<Vec<u8>>,
    ) -> Self {
        Node { local, checkpoint_store, presenter, watch_items }
    }

    pub async fn connect_with(&self, remote_addr: SocketAddr) -> PeerResult<()> {
        let stream = TcpStream::connect(remote_addr).await?;
        let (read_half, write_half) = stream.into_split();

        let session = Arc::new(Session::new(
            self.local.clone(),
            self.checkpoint_store.clone(),
            self.presenter.clone(),
            self.watch_items.clone(),
        )?);

        let handler = PeerStateMachine::new(session.clone(), remote_addr);
        NodeConnection::run(self.local.chain, read_half, write_half, session, handler).await
    }
}
