use std::{io, time::Duration};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpListener, TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time,
};

use super::{COORDINATOR_RANK, Coordinator};
use crate::{EngineErr, Result};

const CONNECT_BACKOFF: Duration = Duration::from_millis(200);

/// Both halves of the link to a single peer.
struct Link<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
}

impl<R, W> Link<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Msg> {
        match self.rx.recv().await? {
            Msg::Err(detail) => Err(EngineErr::Remote(detail)),
            msg => Ok(msg),
        }
    }

    async fn send(&mut self, msg: &Msg) -> Result<()> {
        self.tx.send(msg).await.map_err(Into::into)
    }

    async fn expect_barrier(&mut self, seq: u64) -> Result<()> {
        match self.recv().await? {
            Msg::Control(Command::Barrier { seq: got }) => check_seq(seq, got),
            other => Err(unexpected(seq, "control/barrier", &other)),
        }
    }

    async fn expect_values(&mut self, seq: u64) -> Result<Vec<f32>> {
        match self.recv().await? {
            Msg::Data(Payload::Values { seq: got, values }) => {
                check_seq(seq, got)?;
                Ok(values)
            }
            other => Err(unexpected(seq, "data/values", &other)),
        }
    }

    async fn expect_blob(&mut self, seq: u64, rank: usize) -> Result<Vec<u8>> {
        match self.recv().await? {
            Msg::Data(Payload::Blob {
                seq: got,
                rank: from,
                bytes,
            }) => {
                check_seq(seq, got)?;
                if from != rank {
                    return Err(EngineErr::Remote(format!(
                        "gather payload of rank {from} arrived in the slot of rank {rank}"
                    )));
                }

                Ok(bytes)
            }
            other => Err(unexpected(seq, "data/blob", &other)),
        }
    }
}

/// The links of a rank, the coordinator is linked to everyone, the rest only to it.
enum Topology<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    /// Links to ranks `1..world_size`, indexed by `rank - 1`.
    Hub(Vec<Link<R, W>>),
    Spoke(Link<R, W>),
}

/// A process group connected in a star around the coordinator.
///
/// Every collective is numbered, a peer that reaches a different collective than its
/// coordinator fails with a protocol error instead of silently mixing payloads.
pub struct NetCoordinator<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    rank: usize,
    world_size: usize,
    seq: u64,
    topology: Topology<R, W>,
}

impl<R, W> NetCoordinator<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Builds the coordinator side of the group out of already accepted streams.
    ///
    /// Waits for the handshake of every peer and places each link in its rank's slot.
    ///
    /// # Arguments
    /// * `world_size` - The size of the whole group, the coordinator included.
    /// * `peers` - One channel per other rank, in any order.
    ///
    /// # Errors
    /// `EngineErr` if a peer announces a duplicated or out of range rank, or disagrees on
    /// the world size.
    pub async fn hub(
        world_size: usize,
        peers: Vec<(OnoReceiver<R>, OnoSender<W>)>,
    ) -> Result<Self> {
        if peers.len() + 1 != world_size {
            return Err(EngineErr::LengthMismatch {
                what: "peer list",
                got: peers.len() + 1,
                expected: world_size,
            });
        }

        let mut slots: Vec<Option<Link<R, W>>> = (1..world_size).map(|_| None).collect();

        for (rx, tx) in peers {
            let mut link = Link { rx, tx };

            let (rank, peer_world_size) = match link.recv().await? {
                Msg::Control(Command::Hello { rank, world_size }) => (rank, world_size),
                other => return Err(unexpected(0, "control/hello", &other)),
            };

            if peer_world_size != world_size {
                return Err(EngineErr::LengthMismatch {
                    what: "world size",
                    got: peer_world_size,
                    expected: world_size,
                });
            }

            let slot = match rank.checked_sub(1).and_then(|idx| slots.get_mut(idx)) {
                Some(slot) if slot.is_none() => slot,
                _ => return Err(EngineErr::InvalidRank { rank, world_size }),
            };

            debug!(rank = rank; "peer joined");
            *slot = Some(link);
        }

        // All slots are filled: there are `world_size - 1` distinct in-range ranks.
        let links = slots.into_iter().flatten().collect();

        Ok(Self {
            rank: COORDINATOR_RANK,
            world_size,
            seq: 0,
            topology: Topology::Hub(links),
        })
    }

    /// Builds a non coordinator rank out of its link to the coordinator.
    ///
    /// # Arguments
    /// * `rank` - This worker's rank, in `1..world_size`.
    /// * `world_size` - The size of the whole group.
    /// * `rx` - Receiving end of the coordinator channel.
    /// * `tx` - Sending end of the coordinator channel.
    pub async fn spoke(
        rank: usize,
        world_size: usize,
        rx: OnoReceiver<R>,
        tx: OnoSender<W>,
    ) -> Result<Self> {
        if rank == COORDINATOR_RANK || rank >= world_size {
            return Err(EngineErr::InvalidRank { rank, world_size });
        }

        let mut link = Link { rx, tx };
        link.send(&Msg::Control(Command::Hello { rank, world_size }))
            .await?;

        Ok(Self {
            rank,
            world_size,
            seq: 0,
            topology: Topology::Spoke(link),
        })
    }

    /// Tells every linked peer this rank is leaving the group.
    pub async fn shutdown(mut self) -> Result<()> {
        let msg = Msg::Control(Command::Disconnect);
        for link in self.links_mut() {
            link.send(&msg).await?;
            link.tx.shutdown().await?;
        }

        Ok(())
    }

    fn links_mut(&mut self) -> &mut [Link<R, W>] {
        match &mut self.topology {
            Topology::Hub(links) => links,
            Topology::Spoke(link) => std::slice::from_mut(link),
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Best effort notification to every spoke so they fail instead of waiting forever.
    async fn abort(&mut self, err: EngineErr) -> EngineErr {
        if let Topology::Hub(links) = &mut self.topology {
            let msg = Msg::Err(err.to_string());
            for link in links.iter_mut() {
                if let Err(e) = link.send(&msg).await {
                    warn!("failed to notify peer of aborted collective: {e}");
                }
            }
        }

        err
    }

    /// Propagates a failed collective to the spokes before surfacing it.
    async fn settle<T>(&mut self, res: Result<T>) -> Result<T> {
        match res {
            Ok(value) => Ok(value),
            Err(e) => Err(self.abort(e).await),
        }
    }

    async fn spoke_barrier(link: &mut Link<R, W>, seq: u64) -> Result<()> {
        link.send(&Msg::Control(Command::Barrier { seq })).await?;
        link.expect_barrier(seq).await
    }

    async fn spoke_gather(
        link: &mut Link<R, W>,
        seq: u64,
        rank: usize,
        world_size: usize,
        bytes: Vec<u8>,
    ) -> Result<Vec<Vec<u8>>> {
        link.send(&Msg::Data(Payload::Blob { seq, rank, bytes }))
            .await?;

        let mut gathered = Vec::with_capacity(world_size);
        for from in 0..world_size {
            gathered.push(link.expect_blob(seq, from).await?);
        }

        Ok(gathered)
    }

    async fn spoke_reduce(
        link: &mut Link<R, W>,
        seq: u64,
        rank: usize,
        values: &mut [f32],
        dst: usize,
    ) -> Result<()> {
        let msg = Msg::Data(Payload::Values {
            seq,
            values: values.to_vec(),
        });
        link.send(&msg).await?;

        if rank != dst {
            return Ok(());
        }

        let sum = link.expect_values(seq).await?;
        if sum.len() != values.len() {
            return Err(EngineErr::LengthMismatch {
                what: "reduced vector",
                got: sum.len(),
                expected: values.len(),
            });
        }

        values.copy_from_slice(&sum);
        Ok(())
    }

    async fn hub_barrier(links: &mut [Link<R, W>], seq: u64) -> Result<()> {
        for link in links.iter_mut() {
            link.expect_barrier(seq).await?;
        }

        let msg = Msg::Control(Command::Barrier { seq });
        for link in links.iter_mut() {
            link.send(&msg).await?;
        }

        Ok(())
    }

    async fn hub_gather(
        links: &mut [Link<R, W>],
        seq: u64,
        own: Vec<u8>,
    ) -> Result<Vec<Vec<u8>>> {
        let mut gathered = Vec::with_capacity(links.len() + 1);
        gathered.push(own);

        for (idx, link) in links.iter_mut().enumerate() {
            gathered.push(link.expect_blob(seq, idx + 1).await?);
        }

        for link in links.iter_mut() {
            for (rank, bytes) in gathered.iter().enumerate() {
                let msg = Msg::Data(Payload::Blob {
                    seq,
                    rank,
                    bytes: bytes.clone(),
                });
                link.send(&msg).await?;
            }
        }

        Ok(gathered)
    }

    async fn hub_reduce(
        links: &mut [Link<R, W>],
        seq: u64,
        values: &mut [f32],
        dst: usize,
    ) -> Result<()> {
        for link in links.iter_mut() {
            let theirs = link.expect_values(seq).await?;
            if theirs.len() != values.len() {
                return Err(EngineErr::LengthMismatch {
                    what: "reduced vector",
                    got: theirs.len(),
                    expected: values.len(),
                });
            }

            values.iter_mut().zip(theirs).for_each(|(acc, v)| *acc += v);
        }

        if dst != COORDINATOR_RANK {
            let msg = Msg::Data(Payload::Values {
                seq,
                values: values.to_vec(),
            });
            links[dst - 1].send(&msg).await?;
        }

        Ok(())
    }
}

impl NetCoordinator<OwnedReadHalf, OwnedWriteHalf> {
    /// Joins a TCP process group, either hosting it or connecting to its host.
    ///
    /// # Arguments
    /// * `rank` - This worker's rank.
    /// * `world_size` - The size of the whole group.
    /// * `addr` - The address the coordinator listens at.
    /// * `retries` - How many times a non coordinator retries connecting.
    pub async fn establish<A>(rank: usize, world_size: usize, addr: A, retries: usize) -> Result<Self>
    where
        A: ToSocketAddrs + Clone,
    {
        match rank {
            COORDINATOR_RANK => Self::bind(addr, world_size).await,
            _ => Self::connect(addr, rank, world_size, retries).await,
        }
    }

    /// Listens at `addr` until `world_size - 1` peers connected and introduced themselves.
    pub async fn bind<A: ToSocketAddrs>(addr: A, world_size: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!("waiting for {} peers at {local}", world_size.saturating_sub(1));

        let mut peers = Vec::with_capacity(world_size.saturating_sub(1));
        while peers.len() + 1 < world_size {
            let (stream, peer) = listener.accept().await?;
            stream.set_nodelay(true)?;
            debug!("accepted connection from {peer}");

            let (rx, tx) = stream.into_split();
            peers.push(comms::channel(rx, tx));
        }

        Self::hub(world_size, peers).await
    }

    /// Connects to the coordinator at `addr`, retrying while it isn't listening yet.
    pub async fn connect<A>(addr: A, rank: usize, world_size: usize, retries: usize) -> Result<Self>
    where
        A: ToSocketAddrs + Clone,
    {
        let mut attempt = 0;
        let stream = loop {
            match TcpStream::connect(addr.clone()).await {
                Ok(stream) => break stream,
                Err(e) if attempt < retries && is_transient(&e) => {
                    attempt += 1;
                    debug!(rank = rank, attempt = attempt; "coordinator not reachable yet: {e}");
                    time::sleep(CONNECT_BACKOFF).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        info!(rank = rank; "connected to coordinator at {peer}");

        let (rx, tx) = stream.into_split();
        let (rx, tx) = comms::channel(rx, tx);
        Self::spoke(rank, world_size, rx, tx).await
    }
}

impl<R, W> Coordinator for NetCoordinator<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn barrier(&mut self) -> Result<()> {
        let seq = self.next_seq();
        debug!(rank = self.rank, seq = seq; "barrier");

        let res = match &mut self.topology {
            Topology::Hub(links) => Self::hub_barrier(links, seq).await,
            Topology::Spoke(link) => Self::spoke_barrier(link, seq).await,
        };

        self.settle(res).await
    }

    async fn all_gather(&mut self, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        let seq = self.next_seq();
        debug!(rank = self.rank, seq = seq, len = bytes.len(); "all_gather");

        let (rank, world_size) = (self.rank, self.world_size);
        let res = match &mut self.topology {
            Topology::Hub(links) => Self::hub_gather(links, seq, bytes).await,
            Topology::Spoke(link) => Self::spoke_gather(link, seq, rank, world_size, bytes).await,
        };

        self.settle(res).await
    }

    async fn reduce_sum(&mut self, values: &mut [f32], dst: usize) -> Result<()> {
        if dst >= self.world_size {
            return Err(EngineErr::InvalidRank {
                rank: dst,
                world_size: self.world_size,
            });
        }

        let seq = self.next_seq();
        debug!(rank = self.rank, seq = seq, dst = dst; "reduce_sum");

        let rank = self.rank;
        let res = match &mut self.topology {
            Topology::Hub(links) => Self::hub_reduce(links, seq, values, dst).await,
            Topology::Spoke(link) => Self::spoke_reduce(link, seq, rank, values, dst).await,
        };

        self.settle(res).await
    }
}

fn check_seq(expected: u64, got: u64) -> Result<()> {
    if expected != got {
        return Err(EngineErr::SequenceMismatch { expected, got });
    }

    Ok(())
}

fn unexpected(seq: u64, expected: &'static str, got: &Msg) -> EngineErr {
    EngineErr::UnexpectedMessage {
        seq,
        expected,
        got: got.kind(),
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::TimedOut
            | io::ErrorKind::NotFound
    )
}
