//! Datagram transport used by the engine
//!
//! Sends must not block indefinitely: a transport that cannot get a network
//! buffer in time reports `Error::SendTimeout`, which the engine treats as
//! retryable.

use crate::ipsec::{Error, Result};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Outbound datagram channel
pub trait Transport: Send + Sync {
    /// Send one datagram to `peer`
    fn send(&self, peer: SocketAddr, datagram: &[u8]) -> Result<()>;
}

/// Transport that queues datagrams in memory
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<VecDeque<(SocketAddr, Vec<u8>)>>,
    blocked: AtomicBool,
}

impl MemoryTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail with `SendTimeout`
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::Relaxed);
    }

    /// Pop the oldest datagram sent
    pub fn pop(&self) -> Option<(SocketAddr, Vec<u8>)> {
        self.lock().pop_front()
    }

    /// Take every datagram sent so far
    pub fn drain(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.lock().drain(..).collect()
    }

    /// Number of queued datagrams
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<(SocketAddr, Vec<u8>)>> {
        self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for MemoryTransport {
    fn send(&self, peer: SocketAddr, datagram: &[u8]) -> Result<()> {
        if self.blocked.load(Ordering::Relaxed) {
            return Err(Error::SendTimeout);
        }
        self.lock().push_back((peer, datagram.to_vec()));
        Ok(())
    }
}
