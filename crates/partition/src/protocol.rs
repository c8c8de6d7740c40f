//! The edge round: every host ships the edges it does not construct itself
//! to the hosts that do.
//!
//! A sender walks the nodes owned by this host, writes the edges that stay
//! local directly into the preallocated CSR and sends one message per source
//! node and peer for all others. A receiver consumes the messages of the
//! peers until every announced edge has arrived.

use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::time::Instant;

use byte_slice_cast::ToMutByteSlice;
use log::{debug, info};

use crate::comm::{Channel, Phase, RecvBuffer, SendBuffer};
use crate::cut::EdgeRouter;
use crate::graph::{LocalCsrBuilder, Target};
use crate::id_map::IdMap;
use crate::index::Idx;
use crate::input::GraphSource;
use crate::{Error, HostId};

/// How the sender and the receiver of the edge round are scheduled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExchangeMode {
    /// The receiver runs on its own thread next to the sender.
    #[default]
    Concurrent,
    /// The receiver is polled by the sender after every source node and
    /// drained once the sender is done.
    Cooperative,
}

/// Local state the sender and the receiver share.
pub struct EdgeSink<'a, NI: Idx, EV> {
    pub host: HostId,
    pub id_map: &'a IdMap<NI>,
    pub builder: &'a LocalCsrBuilder<NI, EV>,
}

impl<'a, NI: Idx, EV: Copy> EdgeSink<'a, NI, EV> {
    fn local_id(&self, gid: u64) -> Result<NI, Error> {
        self.id_map.to_local(gid).ok_or(Error::UnknownNode {
            gid,
            host: self.host,
        })
    }
}

/// Runs the edge round and advances `phase` once all edges arrived.
///
/// Returns after all hosts finished their part of the round.
pub fn exchange_edges<S, C, NI>(
    source: &S,
    channel: &C,
    phase: &mut Phase,
    router: &EdgeRouter<'_>,
    sink: &EdgeSink<'_, NI, S::EV>,
    edges_to_receive: u64,
    mode: ExchangeMode,
) -> Result<(), Error>
where
    S: GraphSource,
    C: Channel + ?Sized,
    NI: Idx,
{
    let start = Instant::now();
    let current = *phase;
    let mut receiver = EdgeReceiver::new(edges_to_receive);

    source.reset_seek_counters();

    let sent = match mode {
        ExchangeMode::Concurrent => {
            let aborted = AtomicBool::new(false);
            std::thread::scope(|s| {
                let handle = s.spawn(|| receiver.drain(channel, current, sink, &aborted));
                let sent = send_edges(source, channel, current, router, sink, || Ok(()));
                if sent.is_err() {
                    aborted.store(true, Relaxed);
                }
                let received = match handle.join() {
                    Ok(received) => received,
                    Err(panic) => std::panic::resume_unwind(panic),
                };
                sent.and_then(|sent| received.map(|_| sent))
            })?
        }
        ExchangeMode::Cooperative => {
            let sent = send_edges(source, channel, current, router, sink, || {
                receiver.poll(channel, current, sink).map(|_| ())
            })?;
            receiver.drain(channel, current, sink, &AtomicBool::new(false))?;
            sent
        }
    };

    phase.advance();

    info!(
        "Host {} sent {} edges and received {} edges in {:?}, read {} bytes in {} seeks",
        sink.host,
        sent,
        edges_to_receive,
        start.elapsed(),
        source.num_bytes_read(),
        source.num_seeks()
    );

    channel.barrier();

    Ok(())
}

// Walks the primary range of this host and distributes the out-edges of
// every node. Calls `progress` after each node. Returns the number of edges
// sent to peers.
fn send_edges<S, C, NI, F>(
    source: &S,
    channel: &C,
    phase: Phase,
    router: &EdgeRouter<'_>,
    sink: &EdgeSink<'_, NI, S::EV>,
    mut progress: F,
) -> Result<u64, Error>
where
    S: GraphSource,
    C: Channel + ?Sized,
    NI: Idx,
    F: FnMut() -> Result<(), Error>,
{
    let host = router.host();
    let num_hosts = router.ownership().num_hosts() as usize;

    let mut local = Vec::new();
    let mut dsts = vec![Vec::new(); num_hosts];
    let mut values = vec![Vec::new(); num_hosts];
    let mut sent = 0;

    for src in router.ownership().range(host) {
        let lid = sink.local_id(src)?;
        let degree = source.out_degree(src);

        for e in source.edges(src) {
            let dst = source.edge_dst(e);
            let value = source.edge_value(e);
            let h = router.route(degree, dst);
            if h == host {
                local.push(Target::new(sink.local_id(dst)?, value));
            } else {
                dsts[h as usize].push(dst);
                values[h as usize].push(value);
            }
        }

        sink.builder.construct_edges(lid.index(), &local)?;
        local.clear();

        let lid = lid.index();
        if !sink.builder.is_complete(lid) {
            return Err(Error::IncompleteSlice {
                lid,
                cursor: sink.builder.cursor(lid),
                end: sink.builder.slice_end(lid),
            });
        }

        for (peer, (dsts, values)) in dsts.iter_mut().zip(values.iter_mut()).enumerate() {
            if dsts.is_empty() {
                continue;
            }
            let mut buffer = SendBuffer::new();
            buffer
                .push(src)
                .push_slice(dsts.as_slice())
                .push_slice(values.as_slice());
            channel.send_tagged(peer as HostId, phase, buffer.into_bytes())?;
            sent += dsts.len() as u64;
            dsts.clear();
            values.clear();
        }

        progress()?;
    }

    channel.flush();

    Ok(sent)
}

/// Consumes edge messages until all announced edges arrived.
#[derive(Debug)]
struct EdgeReceiver {
    remaining: u64,
}

impl EdgeReceiver {
    fn new(edges_to_receive: u64) -> Self {
        Self {
            remaining: edges_to_receive,
        }
    }

    // Handles all messages that arrived so far without waiting for more.
    // Returns `true` once all edges are received.
    fn poll<C, NI, EV>(
        &mut self,
        channel: &C,
        phase: Phase,
        sink: &EdgeSink<'_, NI, EV>,
    ) -> Result<bool, Error>
    where
        C: Channel + ?Sized,
        NI: Idx,
        EV: Copy + Default + ToMutByteSlice,
    {
        channel.handle_receives();
        while self.remaining > 0 {
            match channel.receive_tagged(phase) {
                Some((from, bytes)) => self.receive(from, &bytes, sink)?,
                None => break,
            }
        }
        Ok(self.remaining == 0)
    }

    fn drain<C, NI, EV>(
        &mut self,
        channel: &C,
        phase: Phase,
        sink: &EdgeSink<'_, NI, EV>,
        aborted: &AtomicBool,
    ) -> Result<(), Error>
    where
        C: Channel + ?Sized,
        NI: Idx,
        EV: Copy + Default + ToMutByteSlice,
    {
        while !self.poll(channel, phase, sink)? {
            if aborted.load(Relaxed) {
                break;
            }
            std::thread::yield_now();
        }
        Ok(())
    }

    fn receive<NI, EV>(
        &mut self,
        from: HostId,
        bytes: &[u8],
        sink: &EdgeSink<'_, NI, EV>,
    ) -> Result<(), Error>
    where
        NI: Idx,
        EV: Copy + Default + ToMutByteSlice,
    {
        let mut buffer = RecvBuffer::new(bytes);
        let src = buffer.read()?;
        let dsts = buffer.read_vec::<u64>()?;
        let values = buffer.read_vec::<EV>()?;

        if values.len() != dsts.len() {
            return Err(Error::MismatchedEdgeValues {
                dsts: dsts.len(),
                values: values.len(),
            });
        }

        let count = dsts.len() as u64;
        if count > self.remaining {
            return Err(Error::UnexpectedEdges {
                host: sink.host,
                received: count - self.remaining,
            });
        }

        let lid = sink.local_id(src)?;
        let targets = dsts
            .into_iter()
            .zip(values)
            .map(|(dst, value)| Ok(Target::new(sink.local_id(dst)?, value)))
            .collect::<Result<Vec<_>, Error>>()?;
        sink.builder.construct_edges(lid.index(), &targets)?;

        debug!(
            "Host {} received {} edges of node {} from host {}",
            sink.host, count, src, from
        );

        self.remaining -= count;
        Ok(())
    }
}
