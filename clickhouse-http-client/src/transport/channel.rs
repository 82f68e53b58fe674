//! One physical HTTP/1.1 connection.

use std::time::Duration;

use http::{Request, Response, Uri};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::body::TransportBody;
use super::connector::Connector;
use crate::ClientError;

/// A connected channel: the request half of a hyper HTTP/1.1 connection plus
/// the task that drives its I/O.
///
/// Aborting the task closes the socket, which is how a channel is
/// force-closed after a failure or an abandoned body.
pub(crate) struct Channel {
    id: u64,
    sender: http1::SendRequest<TransportBody>,
    driver: JoinHandle<()>,
    created_at: Instant,
    last_used: Instant,
}

impl Channel {
    /// Connect and complete the HTTP/1.1 handshake.
    pub(crate) async fn open(connector: &Connector, target: Uri, id: u64) -> Result<Self, ClientError> {
        let io = connector.connect(target).await?;
        let (sender, connection) = http1::handshake(io)
            .await
            .map_err(|err| ClientError::Connection(format!("HTTP handshake failed: {err}")))?;

        let driver = tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::debug!(channel = id, error = %err, "channel closed with error");
            }
        });

        let now = Instant::now();
        tracing::debug!(channel = id, "channel created");
        Ok(Self {
            id,
            sender,
            driver,
            created_at: now,
            last_used: now,
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Send `request` and wait for the response head.
    pub(crate) async fn send(
        &mut self,
        request: Request<TransportBody>,
    ) -> Result<Response<Incoming>, ClientError> {
        self.last_used = Instant::now();
        self.sender
            .ready()
            .await
            .map_err(|err| ClientError::Transport(format!("channel is not usable: {err}")))?;
        self.sender.send_request(request).await.map_err(send_error)
    }

    /// Whether the peer or an I/O error has ended the connection.
    pub(crate) fn is_closed(&self) -> bool {
        self.sender.is_closed() || self.driver.is_finished()
    }

    /// Time since the channel last carried a request.
    pub(crate) fn idle_age(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Mark the end of a request so idle age counts from now.
    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Tear the connection down.
    pub(crate) fn abort(self) {
        self.driver.abort();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("age", &self.age())
            .field("idle_age", &self.idle_age())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn send_error(err: hyper::Error) -> ClientError {
    // A failing upload stream comes back wrapped by hyper; keep its kind.
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        if let Some(client) = cause.downcast_ref::<ClientError>() {
            return client.clone();
        }
        source = cause.source();
    }
    ClientError::Transport(format!("request failed: {err}"))
}
