use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;

use crate::conversation::ConversationTopicHandler;
use crate::error::{PeerError, PeerResult};
use crate::session::{SharedSender, Session};
use crate::wire::buffer::IoBuffer;
use crate::wire::node::Chain;
use crate::wire::raw_message::{MessageParseOutcome, RawMessage};

/// Steady cadence the driver polls `session.run` on. It never blocks on
/// reads or writes - the reader task is the only one doing that.
const DRIVER_TICK: Duration = Duration::from_millis(200);

/// Orchestrates one peer connection: a reader task that blocks on the
/// socket and dispatches every inbound frame, and a driver future (this
/// one) that sends the initial `version` and then just watches the run
/// flag. Generic over the stream halves so tests can drive it over
/// `tokio::io::duplex` instead of a real `TcpStream`.
pub struct NodeConnection;

impl NodeConnection {
    /// Runs the conversation to completion: sends `initial_action`,
    /// spawns the reader, waits for either the reader to finish or
    /// `session.run` to go false, then joins the reader and half-closes
    /// the socket.
    pub async fn run<R, W, H>(
        chain: Chain,
        read_half: R,
        write_half: W,
        session: Arc<Session>,
        mut handler: H,
    ) -> PeerResult<H::Outcome>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        H: ConversationTopicHandler + Send + 'static,
    {
        let sender = Arc::new(SharedSender::new(write_half));

        let initial_action = handler.initial_action();
        for message in initial_action.messages {
            log::debug!("sending {:?}", message);
            sender.send(message).await?;
        }
        if initial_action.topic_finished {
            sender.shutdown().await?;
            return handler.outcome();
        }

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let reader_session = session.clone();
        let reader_sender = sender.clone();

        let reader_task = tokio::spawn(async move {
            let result = Self::reader_loop(read_half, chain, handler, reader_sender, reader_session.clone()).await;
            reader_session.request_shutdown();
            let _ = outcome_tx.send(result);
        });

        let mut ticker = tokio::time::interval(DRIVER_TICK);
        while session.is_running() {
            ticker.tick().await;
        }

        let outcome = match outcome_rx.await {
            Ok(result) => result,
            Err(_) => Err(PeerError::semantic("reader task ended without a result")),
        };

        sender.shutdown().await?;
        reader_task.await.map_err(|e| PeerError::semantic(format!("reader task panicked: {e}")))?;
        outcome
    }

    async fn reader_loop<R, W, H>(
        mut read_half: R,
        chain: Chain,
        mut handler: H,
        sender: Arc<SharedSender<W>>,
        session: Arc<Session>,
    ) -> PeerResult<H::Outcome>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        H: ConversationTopicHandler,
    {
        let mut buffer = IoBuffer::default();

        loop {
            if !session.is_running() {
                return handler.outcome();
            }

            let n = read_half.read(buffer.writable_part()).await?;
            if n == 0 {
                return Err(PeerError::semantic("remote node hung up"));
            }
            buffer.register_added_content(n);
            log::trace!("received {n} bytes, buffer holds {} bytes", buffer.content().len());

            loop {
                match RawMessage::try_consume_message(&mut buffer, chain) {
                    Ok(MessageParseOutcome::Message(raw)) => {
                        let message = raw.to_protocol_message()?;
                        log::debug!("received {:?}", message);
                        let action = handler.on_message(message)?;
                        for reply in action.messages {
                            log::debug!("sending {:?}", reply);
                            sender.send(reply).await?;
                        }
                        if action.topic_finished {
                            return handler.outcome();
                        }
                    }
                    Ok(MessageParseOutcome::SkippedMessage) => {}
                    Ok(MessageParseOutcome::NoMessage) => break,
                    Err(err) => return Err(err),
                }
            }
        }
    }
}
