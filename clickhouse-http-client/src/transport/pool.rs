//! Connection pool and admission control.
//!
//! The pool owns a fixed number of slots, one per permit of its semaphore.
//! A slot is empty, holds an idle channel, or is lent to exactly one
//! request through a [`Lease`]. A request keeps its lease (and therefore its
//! permit) until the response body is fully drained or the channel is
//! invalidated, so at most `max_open_connections` requests are ever in flight.
//!
//! Returning a channel is explicit: [`Lease::release`] after a clean drain,
//! [`Lease::fail`] after a failure, which keeps the channel only when the
//! error kind allows it. A lease dropped without either is treated as an
//! invalidation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use http::{Request, Response, Uri};
use hyper::body::Incoming;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::body::TransportBody;
use super::channel::Channel;
use super::connector::Connector;
use crate::ClientError;

/// Pool settings fixed for the lifetime of a client.
#[derive(Clone, Debug)]
pub(crate) struct PoolConfig {
    pub(crate) max_open_connections: usize,
    pub(crate) keep_alive: bool,
    pub(crate) idle_socket_ttl: Duration,
}

/// A snapshot of slot states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Size of the pool.
    pub max_open_connections: usize,
    /// Slots holding a reusable channel.
    pub idle: usize,
    /// Slots lent to an in-flight request.
    pub busy: usize,
    /// Slots with no channel.
    pub empty: usize,
}

enum Slot {
    Empty,
    Idle(Channel),
    Busy,
}

struct PoolInner {
    connector: Connector,
    target: Uri,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    slots: Mutex<Vec<Slot>>,
    next_channel_id: AtomicU64,
}

impl PoolInner {
    fn slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        // Slot updates are single assignments; a poisoned lock holds a consistent vector.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands out channels to requests, at most `max_open_connections` at a time.
#[derive(Clone)]
pub(crate) struct ChannelPool {
    inner: Arc<PoolInner>,
}

impl ChannelPool {
    /// Create a pool for `target` (scheme and authority only).
    pub(crate) fn new(connector: Connector, target: Uri, config: PoolConfig) -> Self {
        let size = config.max_open_connections.max(1);
        let slots = (0..size).map(|_| Slot::Empty).collect();
        Self {
            inner: Arc::new(PoolInner {
                connector,
                target,
                permits: Arc::new(Semaphore::new(size)),
                slots: Mutex::new(slots),
                next_channel_id: AtomicU64::new(1),
                config: PoolConfig {
                    max_open_connections: size,
                    ..config
                },
            }),
        }
    }

    /// Wait for a slot and return a lease on a usable channel.
    ///
    /// Waiting longer than `timeout` fails with [`ClientError::Timeout`].
    /// A stale or closed idle channel is replaced by a fresh one without the
    /// caller noticing; failing to connect fails with
    /// [`ClientError::Connection`] and frees the slot.
    pub(crate) async fn acquire(&self, timeout: Option<Duration>) -> Result<Lease, ClientError> {
        let permits = self.inner.permits.clone();
        let permit = match timeout {
            Some(limit) => tokio::time::timeout(limit, permits.acquire_owned())
                .await
                .map_err(|_| {
                    tracing::warn!(
                        max_open_connections = self.inner.config.max_open_connections,
                        "timed out waiting for a free connection slot"
                    );
                    ClientError::Timeout(format!(
                        "no connection slot became free within {limit:?}"
                    ))
                })?,
            None => permits.acquire_owned().await,
        }
        .map_err(|_| ClientError::Connection("connection pool is closed".to_string()))?;

        let (slot, reusable) = self.claim_slot()?;
        // From here on, dropping the lease (error or cancellation) frees the slot.
        let mut lease = Lease {
            pool: self.inner.clone(),
            slot,
            channel: None,
            permit: Some(permit),
        };

        if let Some(channel) = reusable {
            let ttl = self.inner.config.idle_socket_ttl;
            if channel.is_closed() {
                tracing::debug!(channel = channel.id(), slot, "discarding closed channel");
                channel.abort();
            } else if channel.idle_age() >= ttl {
                tracing::debug!(
                    channel = channel.id(),
                    slot,
                    idle_age = ?channel.idle_age(),
                    "discarding stale channel"
                );
                channel.abort();
            } else {
                tracing::trace!(channel = channel.id(), slot, "reusing channel");
                lease.channel = Some(channel);
                return Ok(lease);
            }
        }

        let id = self.inner.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let channel = Channel::open(&self.inner.connector, self.inner.target.clone(), id).await?;
        lease.channel = Some(channel);
        Ok(lease)
    }

    /// Mark a slot busy, preferring the most recently used idle channel.
    fn claim_slot(&self) -> Result<(usize, Option<Channel>), ClientError> {
        let mut slots = self.inner.slots();
        let idle = slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Idle(channel) => Some((index, channel.last_used())),
                _ => None,
            })
            .max_by_key(|(_, last_used)| *last_used)
            .map(|(index, _)| index);
        let index = idle
            .or_else(|| slots.iter().position(|slot| matches!(slot, Slot::Empty)))
            .ok_or_else(|| {
                ClientError::Connection("admitted without a free connection slot".to_string())
            })?;

        match std::mem::replace(&mut slots[index], Slot::Busy) {
            Slot::Idle(channel) => Ok((index, Some(channel))),
            _ => Ok((index, None)),
        }
    }

    /// Count slots by state.
    pub(crate) fn status(&self) -> PoolStatus {
        let slots = self.inner.slots();
        let mut status = PoolStatus {
            max_open_connections: slots.len(),
            ..PoolStatus::default()
        };
        for slot in slots.iter() {
            match slot {
                Slot::Empty => status.empty += 1,
                Slot::Idle(_) => status.idle += 1,
                Slot::Busy => status.busy += 1,
            }
        }
        status
    }

    /// Close every idle channel. Busy channels are closed by their leases.
    pub(crate) fn close_idle(&self) {
        let mut slots = self.inner.slots();
        for slot in slots.iter_mut() {
            if !matches!(slot, Slot::Idle(_)) {
                continue;
            }
            if let Slot::Idle(channel) = std::mem::replace(slot, Slot::Empty) {
                tracing::debug!(channel = channel.id(), "closing idle channel");
                channel.abort();
            }
        }
    }
}

impl std::fmt::Debug for ChannelPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPool")
            .field("target", &self.inner.target)
            .field("status", &self.status())
            .finish()
    }
}

/// Exclusive use of one pool slot and its channel.
pub(crate) struct Lease {
    pool: Arc<PoolInner>,
    slot: usize,
    channel: Option<Channel>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Lease {
    pub(crate) fn channel_id(&self) -> Option<u64> {
        self.channel.as_ref().map(Channel::id)
    }

    /// Send a request over the leased channel.
    pub(crate) async fn send(
        &mut self,
        request: Request<TransportBody>,
    ) -> Result<Response<Incoming>, ClientError> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| ClientError::Transport("lease has no channel".to_string()))?;
        channel.send(request).await
    }

    /// Return the channel after its response body was fully consumed.
    ///
    /// The channel goes back to the idle set only when keep-alive is enabled
    /// and the connection is still open; otherwise it is closed.
    pub(crate) fn release(mut self) {
        let reusable = match self.channel.take() {
            Some(mut channel) if self.pool.config.keep_alive && !channel.is_closed() => {
                channel.touch();
                tracing::trace!(channel = channel.id(), slot = self.slot, "channel released");
                Some(channel)
            }
            Some(channel) => {
                channel.abort();
                None
            }
            None => None,
        };
        self.settle(reusable);
    }

    /// Close the channel: its read/write position can no longer be trusted.
    pub(crate) fn invalidate(mut self) {
        if let Some(channel) = self.channel.take() {
            tracing::debug!(channel = channel.id(), slot = self.slot, "channel invalidated");
            channel.abort();
        }
        self.settle(None);
    }

    /// Settle the lease after the call failed with `err`.
    ///
    /// Only failures that leave the channel at a known read position
    /// ([`ErrorKind::keeps_channel`](clickhouse_http_core::ErrorKind::keeps_channel))
    /// return it to the pool.
    pub(crate) fn fail(self, err: &ClientError) {
        if err.kind().keeps_channel() {
            self.release();
        } else {
            self.invalidate();
        }
    }

    /// Update the slot, then give the permit back.
    fn settle(&mut self, channel: Option<Channel>) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        {
            let mut slots = self.pool.slots();
            if let Some(slot) = slots.get_mut(self.slot) {
                *slot = match channel {
                    Some(channel) => Slot::Idle(channel),
                    None => Slot::Empty,
                };
            }
        }
        drop(permit);
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.permit.is_none() {
            return;
        }
        if let Some(channel) = self.channel.take() {
            tracing::debug!(
                channel = channel.id(),
                slot = self.slot,
                "lease dropped before release, closing channel"
            );
            channel.abort();
        }
        self.settle(None);
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("slot", &self.slot)
            .field("channel", &self.channel_id())
            .finish()
    }
}
