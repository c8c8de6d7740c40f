//! Point-to-point messaging between hosts.
//!
//! Messages are tagged with the [`Phase`] of the communication round they
//! belong to. A receiver only hands out messages of the phase it asks for
//! and buffers all others until their round starts.

use std::collections::VecDeque;
use std::mem::size_of;
use std::sync::{Arc, Barrier};

use byte_slice_cast::{AsByteSlice, AsMutByteSlice, ToByteSlice, ToMutByteSlice};
use fxhash::FxHashMap;
use parking_lot::Mutex;

use crate::{Error, HostId};

/// Generation token of an all-to-all communication round.
///
/// The token is owned by the caller and passed to every round, which
/// advances it once all of its messages have been received.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Phase(u64);

impl Phase {
    pub fn new(phase: u64) -> Self {
        Self(phase)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn advance(&mut self) {
        self.0 += 1;
    }
}

/// The transport used by the partitioning rounds.
///
/// All methods may be called concurrently from multiple threads of the same
/// host. Messages from one sender to one receiver are delivered in the order
/// in which they were sent.
pub trait Channel: Send + Sync {
    fn host_id(&self) -> HostId;

    fn num_hosts(&self) -> HostId;

    /// Queues a message for `dest`. The message may be held back until the
    /// next [`Channel::flush`].
    fn send_tagged(&self, dest: HostId, phase: Phase, bytes: Vec<u8>) -> Result<(), Error>;

    /// Hands all queued messages to the transport.
    fn flush(&self);

    /// Drives progress of inbound messages without blocking.
    fn handle_receives(&self);

    /// Returns the next message of `phase`, if one has arrived.
    fn receive_tagged(&self, phase: Phase) -> Option<(HostId, Vec<u8>)>;

    /// Blocks until all hosts reached the barrier.
    fn barrier(&self);
}

struct Envelope {
    from: HostId,
    phase: Phase,
    bytes: Vec<u8>,
}

struct Network {
    mailboxes: Box<[Mutex<VecDeque<Envelope>>]>,
    barrier: Barrier,
}

/// An in-process network connecting hosts that run on threads of the same
/// process.
pub struct LocalNetwork;

impl LocalNetwork {
    pub const DEFAULT_BATCH_SIZE: usize = 1024;

    /// Creates one channel per host.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(num_hosts: HostId) -> Vec<LocalChannel> {
        Self::with_batch_size(num_hosts, Self::DEFAULT_BATCH_SIZE)
    }

    /// Creates one channel per host, each of which delivers outgoing
    /// messages to a peer as soon as `batch_size` of them are queued.
    pub fn with_batch_size(num_hosts: HostId, batch_size: usize) -> Vec<LocalChannel> {
        let network = Arc::new(Network {
            mailboxes: (0..num_hosts).map(|_| Mutex::new(VecDeque::new())).collect(),
            barrier: Barrier::new(num_hosts as usize),
        });

        (0..num_hosts)
            .map(|host| LocalChannel {
                host,
                network: Arc::clone(&network),
                outboxes: (0..num_hosts).map(|_| Mutex::new(Vec::new())).collect(),
                received: Mutex::new(FxHashMap::default()),
                batch_size: usize::max(batch_size, 1),
            })
            .collect()
    }
}

/// The endpoint of a single host in a [`LocalNetwork`].
pub struct LocalChannel {
    host: HostId,
    network: Arc<Network>,
    outboxes: Box<[Mutex<Vec<Envelope>>]>,
    received: Mutex<FxHashMap<Phase, VecDeque<(HostId, Vec<u8>)>>>,
    batch_size: usize,
}

impl LocalChannel {
    fn deliver(&self, dest: usize, outbox: &mut Vec<Envelope>) {
        if outbox.is_empty() {
            return;
        }
        // the outbox stays locked while delivering to keep the stream order
        self.network.mailboxes[dest].lock().extend(outbox.drain(..));
    }
}

impl Channel for LocalChannel {
    fn host_id(&self) -> HostId {
        self.host
    }

    fn num_hosts(&self) -> HostId {
        self.outboxes.len() as HostId
    }

    fn send_tagged(&self, dest: HostId, phase: Phase, bytes: Vec<u8>) -> Result<(), Error> {
        let num_hosts = self.num_hosts();
        let outbox = self
            .outboxes
            .get(dest as usize)
            .ok_or(Error::InvalidHost { host: dest, num_hosts })?;

        let mut outbox = outbox.lock();
        outbox.push(Envelope {
            from: self.host,
            phase,
            bytes,
        });
        if outbox.len() >= self.batch_size {
            self.deliver(dest as usize, &mut outbox);
        }

        Ok(())
    }

    fn flush(&self) {
        for (dest, outbox) in self.outboxes.iter().enumerate() {
            self.deliver(dest, &mut outbox.lock());
        }
    }

    fn handle_receives(&self) {
        // taking the mailbox under the lock of `received` keeps concurrent
        // callers from reordering a stream
        let mut received = self.received.lock();
        let inbound = std::mem::take(&mut *self.network.mailboxes[self.host as usize].lock());
        for envelope in inbound {
            received
                .entry(envelope.phase)
                .or_default()
                .push_back((envelope.from, envelope.bytes));
        }
    }

    fn receive_tagged(&self, phase: Phase) -> Option<(HostId, Vec<u8>)> {
        self.handle_receives();
        let mut received = self.received.lock();
        let queue = received.get_mut(&phase)?;
        let message = queue.pop_front();
        if queue.is_empty() {
            received.remove(&phase);
        }
        message
    }

    fn barrier(&self) {
        self.network.barrier.wait();
    }
}

/// Builds the payload of a message.
///
/// Scalars are written as native-endian `u64`, slices are prefixed by their
/// length.
#[derive(Debug, Default)]
pub struct SendBuffer {
    bytes: Vec<u8>,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: u64) -> &mut Self {
        self.bytes.extend_from_slice([value].as_byte_slice());
        self
    }

    pub fn push_slice<T: ToByteSlice>(&mut self, values: &[T]) -> &mut Self {
        self.push(values.len() as u64);
        self.bytes.extend_from_slice(values.as_byte_slice());
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Reads the payload written by a [`SendBuffer`].
#[derive(Debug)]
pub struct RecvBuffer<'a> {
    bytes: &'a [u8],
}

impl<'a> RecvBuffer<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if self.bytes.len() < len {
            return Err(Error::TruncatedMessage {
                expected: len,
                actual: self.bytes.len(),
            });
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Ok(head)
    }

    pub fn read(&mut self) -> Result<u64, Error> {
        let mut value = [0_u64];
        value
            .as_mut_byte_slice()
            .copy_from_slice(self.take(size_of::<u64>())?);
        Ok(value[0])
    }

    pub fn read_vec<T>(&mut self) -> Result<Vec<T>, Error>
    where
        T: ToMutByteSlice + Copy + Default,
    {
        let len = usize::try_from(self.read()?)?;
        let mut values = vec![T::default(); len];
        let bytes = self.take(len * size_of::<T>())?;
        values.as_mut_byte_slice().copy_from_slice(bytes);
        Ok(values)
    }
}
