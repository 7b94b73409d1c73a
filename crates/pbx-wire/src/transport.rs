//! Rendezvous transport between one coordinator (rank 0) and `N` workers
//! (ranks `1..=N`).
//!
//! Every channel has zero capacity, so a send completes only once the peer
//! has received the packet. Broadcasts walk the workers in rank order and
//! gathers receive in rank order; neither has a timeout. A dropped peer shows
//! up as a protocol error on the next exchange.

use crossbeam_channel::{bounded, Receiver, Sender};
use pbx_core::errors::ErrorInfo;
use pbx_core::PbxError;
use tracing::debug;

use crate::codec::expect_len;
use crate::signal::Signal;

/// Unit of transfer on a link.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Control signal.
    Signal(Signal),
    /// Integer buffer.
    Ints(Vec<i64>),
    /// Double buffer.
    Doubles(Vec<f64>),
}

impl Packet {
    fn kind(&self) -> &'static str {
        match self {
            Packet::Signal(_) => "signal",
            Packet::Ints(_) => "ints",
            Packet::Doubles(_) => "doubles",
        }
    }
}

/// Creates connected links for a coordinator and `n_workers` workers.
pub fn rendezvous(n_workers: usize) -> (CoordinatorLink, Vec<WorkerLink>) {
    let mut to_workers = Vec::with_capacity(n_workers);
    let mut from_workers = Vec::with_capacity(n_workers);
    let mut workers = Vec::with_capacity(n_workers);
    for rank in 1..=n_workers {
        let (down_tx, down_rx) = bounded(0);
        let (up_tx, up_rx) = bounded(0);
        to_workers.push(down_tx);
        from_workers.push(up_rx);
        workers.push(WorkerLink {
            rank,
            from_coordinator: down_rx,
            to_coordinator: up_tx,
        });
    }
    (
        CoordinatorLink {
            to_workers,
            from_workers,
        },
        workers,
    )
}

/// Coordinator end of the transport.
#[derive(Debug)]
pub struct CoordinatorLink {
    to_workers: Vec<Sender<Packet>>,
    from_workers: Vec<Receiver<Packet>>,
}

impl CoordinatorLink {
    /// Number of connected workers.
    pub fn n_workers(&self) -> usize {
        self.to_workers.len()
    }

    /// Sends `signal` to every worker.
    pub fn signal(&self, signal: Signal) -> Result<(), PbxError> {
        debug!(signal = signal.as_str(), workers = self.n_workers(), "dispatching signal");
        self.broadcast(Packet::Signal(signal))
    }

    /// Sends the same integer buffer to every worker.
    pub fn broadcast_ints(&self, values: &[i64]) -> Result<(), PbxError> {
        self.broadcast(Packet::Ints(values.to_vec()))
    }

    /// Sends the same double buffer to every worker.
    pub fn broadcast_doubles(&self, values: &[f64]) -> Result<(), PbxError> {
        self.broadcast(Packet::Doubles(values.to_vec()))
    }

    /// Sends an integer buffer to one worker.
    pub fn send_ints(&self, rank: usize, values: Vec<i64>) -> Result<(), PbxError> {
        self.send(rank, Packet::Ints(values))
    }

    /// Sends a double buffer to one worker.
    pub fn send_doubles(&self, rank: usize, values: Vec<f64>) -> Result<(), PbxError> {
        self.send(rank, Packet::Doubles(values))
    }

    /// Receives one integer buffer from every worker, in rank order.
    ///
    /// `expected(rank)` gives the length each worker must send.
    pub fn gather_ints<F>(&self, expected: F) -> Result<Vec<Vec<i64>>, PbxError>
    where
        F: Fn(usize) -> usize,
    {
        (1..=self.n_workers())
            .map(|rank| self.recv_ints(rank, expected(rank)))
            .collect()
    }

    /// Receives one double buffer from every worker, in rank order.
    pub fn gather_doubles<F>(&self, expected: F) -> Result<Vec<Vec<f64>>, PbxError>
    where
        F: Fn(usize) -> usize,
    {
        (1..=self.n_workers())
            .map(|rank| self.recv_doubles(rank, expected(rank)))
            .collect()
    }

    /// Receives an integer buffer from one worker.
    pub fn recv_ints(&self, rank: usize, expected: usize) -> Result<Vec<i64>, PbxError> {
        match self.recv(rank)? {
            Packet::Ints(values) => {
                expect_len("ints", expected, values.len()).map_err(|err| with_rank(err, rank))?;
                Ok(values)
            }
            other => Err(unexpected("ints", &other, rank)),
        }
    }

    /// Receives a double buffer from one worker.
    pub fn recv_doubles(&self, rank: usize, expected: usize) -> Result<Vec<f64>, PbxError> {
        match self.recv(rank)? {
            Packet::Doubles(values) => {
                expect_len("doubles", expected, values.len())
                    .map_err(|err| with_rank(err, rank))?;
                Ok(values)
            }
            other => Err(unexpected("doubles", &other, rank)),
        }
    }

    fn broadcast(&self, packet: Packet) -> Result<(), PbxError> {
        for rank in 1..=self.n_workers() {
            self.send(rank, packet.clone())?;
        }
        Ok(())
    }

    fn send(&self, rank: usize, packet: Packet) -> Result<(), PbxError> {
        let sender = self
            .to_workers
            .get(rank.wrapping_sub(1))
            .ok_or_else(|| unknown_rank(rank, self.n_workers()))?;
        sender.send(packet).map_err(|_| disconnected(rank))
    }

    fn recv(&self, rank: usize) -> Result<Packet, PbxError> {
        let receiver = self
            .from_workers
            .get(rank.wrapping_sub(1))
            .ok_or_else(|| unknown_rank(rank, self.n_workers()))?;
        receiver.recv().map_err(|_| disconnected(rank))
    }
}

/// Worker end of the transport.
#[derive(Debug)]
pub struct WorkerLink {
    rank: usize,
    from_coordinator: Receiver<Packet>,
    to_coordinator: Sender<Packet>,
}

impl WorkerLink {
    /// Rank of this worker, starting at 1.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Blocks until the next control signal arrives.
    pub fn recv_signal(&self) -> Result<Signal, PbxError> {
        match self.recv()? {
            Packet::Signal(signal) => Ok(signal),
            other => Err(unexpected("signal", &other, self.rank)),
        }
    }

    /// Receives an integer buffer of exactly `expected` entries.
    pub fn recv_ints(&self, expected: usize) -> Result<Vec<i64>, PbxError> {
        match self.recv()? {
            Packet::Ints(values) => {
                expect_len("ints", expected, values.len())
                    .map_err(|err| with_rank(err, self.rank))?;
                Ok(values)
            }
            other => Err(unexpected("ints", &other, self.rank)),
        }
    }

    /// Receives a double buffer of exactly `expected` entries.
    pub fn recv_doubles(&self, expected: usize) -> Result<Vec<f64>, PbxError> {
        match self.recv()? {
            Packet::Doubles(values) => {
                expect_len("doubles", expected, values.len())
                    .map_err(|err| with_rank(err, self.rank))?;
                Ok(values)
            }
            other => Err(unexpected("doubles", &other, self.rank)),
        }
    }

    /// Sends an integer buffer to the coordinator.
    pub fn send_ints(&self, values: Vec<i64>) -> Result<(), PbxError> {
        self.send(Packet::Ints(values))
    }

    /// Sends a double buffer to the coordinator.
    pub fn send_doubles(&self, values: Vec<f64>) -> Result<(), PbxError> {
        self.send(Packet::Doubles(values))
    }

    fn send(&self, packet: Packet) -> Result<(), PbxError> {
        self.to_coordinator
            .send(packet)
            .map_err(|_| with_rank(disconnected(0), self.rank))
    }

    fn recv(&self) -> Result<Packet, PbxError> {
        self.from_coordinator
            .recv()
            .map_err(|_| with_rank(disconnected(0), self.rank))
    }
}

fn with_rank(err: PbxError, rank: usize) -> PbxError {
    match err {
        PbxError::Protocol(info) => PbxError::Protocol(info.with_context("rank", rank)),
        other => other,
    }
}

fn disconnected(peer: usize) -> PbxError {
    PbxError::Protocol(
        ErrorInfo::new("peer-disconnected", "peer left the ensemble")
            .with_context("peer", peer),
    )
}

fn unknown_rank(rank: usize, n_workers: usize) -> PbxError {
    PbxError::Protocol(
        ErrorInfo::new("unknown-rank", "no worker with this rank")
            .with_context("rank", rank)
            .with_context("workers", n_workers),
    )
}

fn unexpected(wanted: &str, packet: &Packet, rank: usize) -> PbxError {
    PbxError::Protocol(
        ErrorInfo::new("unexpected-packet", "packet kind does not match the protocol step")
            .with_context("expected", wanted)
            .with_context("found", packet.kind())
            .with_context("rank", rank),
    )
}
