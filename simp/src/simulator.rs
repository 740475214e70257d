//! Fault-injecting transport for exercising the reliability mechanisms.
//!
//! Real networks drop packets.  [`Simulator`] wraps any [`Transport`] and
//! intercepts outbound datagrams, applying a configurable fault model:
//!
//! | Fault          | Description                                             |
//! |----------------|---------------------------------------------------------|
//! | Random loss    | Drop an outbound datagram with probability `loss_rate`. |
//! | Scripted loss  | Drop the next `n` outbound datagrams ([`drop_next`]).   |
//!
//! Every datagram handed to [`Transport::send_to`], delivered or not, is
//! recorded so tests can assert on exactly what went out.  Randomness comes
//! from a seeded RNG so failures are reproducible.
//!
//! [`drop_next`]: Simulator::drop_next

use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::codec;
use crate::message::Message;
use crate::socket::{Transport, TransportError};

/// Configuration for the fault-injection model.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability in `[0.0, 1.0]` that any outbound datagram is dropped.
    pub loss_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default; the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            seed: 0x5149_4d50,
        }
    }
}

/// One outbound datagram as seen by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    pub bytes: Vec<u8>,
    pub dest: SocketAddr,
    pub dropped: bool,
}

impl SentDatagram {
    /// Decode the datagram; `None` if it is not a valid SIMP message.
    pub fn message(&self) -> Option<Message> {
        codec::decode(&self.bytes).ok()
    }
}

#[derive(Debug)]
struct FaultState {
    rng: StdRng,
    scripted_drops: usize,
    sent: Vec<SentDatagram>,
}

/// A lossy wrapper around another transport.
#[derive(Debug)]
pub struct Simulator<T> {
    inner: T,
    config: SimulatorConfig,
    state: Mutex<FaultState>,
}

impl<T: Transport> Simulator<T> {
    pub fn new(inner: T, config: SimulatorConfig) -> Self {
        let state = FaultState {
            rng: StdRng::seed_from_u64(config.seed),
            scripted_drops: 0,
            sent: Vec::new(),
        };
        Self {
            inner,
            config,
            state: Mutex::new(state),
        }
    }

    /// Transparent pass-through that only records traffic.
    pub fn passthrough(inner: T) -> Self {
        Self::new(inner, SimulatorConfig::default())
    }

    /// Silently drop the next `n` outbound datagrams.
    pub fn drop_next(&self, n: usize) {
        self.lock().scripted_drops += n;
    }

    /// Every datagram sent so far, in order.
    pub fn sent(&self) -> Vec<SentDatagram> {
        self.lock().sent.clone()
    }

    /// Decoded messages sent so far, including dropped ones.
    pub fn sent_messages(&self) -> Vec<Message> {
        self.lock().sent.iter().filter_map(SentDatagram::message).collect()
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn lock(&self) -> MutexGuard<'_, FaultState> {
        // A poisoned lock only means a test thread panicked mid-record.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide the fate of one datagram and record it.
    fn decide(&self, datagram: &[u8], dest: SocketAddr) -> bool {
        let mut state = self.lock();
        let dropped = if state.scripted_drops > 0 {
            state.scripted_drops -= 1;
            true
        } else {
            self.config.loss_rate > 0.0 && state.rng.random_bool(self.config.loss_rate.min(1.0))
        };
        state.sent.push(SentDatagram {
            bytes: datagram.to_vec(),
            dest,
            dropped,
        });
        !dropped
    }
}

impl<T: Transport> Transport for Simulator<T> {
    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        if self.decide(datagram, dest) {
            self.inner.send_to(datagram, dest).await
        } else {
            log::debug!("[sim] dropped {} byte datagram to {dest}", datagram.len());
            Ok(())
        }
    }

    async fn recv_from(
        &self,
        wait: Duration,
    ) -> Result<Option<(Vec<u8>, SocketAddr)>, TransportError> {
        self.inner.recv_from(wait).await
    }
}
