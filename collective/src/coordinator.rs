//! The rendezvous endpoint and reduction loop for one worker group.

use std::{borrow::Cow, io, net::SocketAddr, num::NonZeroUsize};

use log::{debug, info, warn};
use tokio::net::{
    TcpListener,
    tcp::{OwnedReadHalf, OwnedWriteHalf},
};

use crate::{
    CollectiveErr, Receiver, Result, Sender, channel,
    msg::{Command, Msg},
};

struct Member {
    rx: Receiver<OwnedReadHalf>,
    tx: Sender<OwnedWriteHalf>,
}

/// The shared coordination endpoint known to all workers at startup.
///
/// Accepts exactly `world_size` joins, then serves reduction rounds until
/// every member disconnects: each round it collects one tensor from every
/// member, sums them elementwise and broadcasts the sum back. Collection
/// blocks until all contributions arrive, which is what gives the group
/// its barrier semantics.
pub struct Coordinator {
    listener: TcpListener,
    world_size: NonZeroUsize,
}

impl Coordinator {
    /// Binds the rendezvous endpoint.
    ///
    /// # Arguments
    /// * `addr` - The address to listen on.
    /// * `world_size` - The fixed number of group members.
    pub async fn bind(addr: SocketAddr, world_size: NonZeroUsize) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            world_size,
        })
    }

    /// Returns the bound address, useful when binding to port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the rendezvous and then the reduction loop to completion.
    ///
    /// # Returns
    /// `Ok(())` once every member has disconnected at a round boundary.
    ///
    /// # Errors
    /// Returns `CollectiveErr` on I/O failure, rank or world-size
    /// disagreement, mid-round tensor length mismatches, or a member
    /// leaving while others are still contributing.
    pub async fn run(self) -> Result<()> {
        let world = self.world_size.get();
        let mut members = self.rendezvous().await?;

        for member in &mut members {
            let msg = Msg::Control(Command::Welcome { world_size: world });
            member.tx.send(&msg).await?;
        }
        info!(world_size = world; "group rendezvous complete");

        let mut sum: Vec<f32> = Vec::new();
        let mut round: u64 = 0;

        loop {
            let mut contributed = 0;
            let mut disconnected = 0;

            for (rank, member) in members.iter_mut().enumerate() {
                match member.rx.recv().await? {
                    Msg::Tensor(tensor) => {
                        if disconnected > 0 {
                            return Err(CollectiveErr::Desync { round, rank });
                        }

                        if contributed == 0 {
                            sum.clear();
                            sum.extend_from_slice(tensor);
                        } else {
                            if tensor.len() != sum.len() {
                                let err = CollectiveErr::TensorLenMismatch {
                                    round,
                                    got: tensor.len(),
                                    expected: sum.len(),
                                };
                                let detail = err.to_string();
                                member.tx.send(&Msg::Err(Cow::Borrowed(&detail))).await?;
                                return Err(err);
                            }

                            for (acc, x) in sum.iter_mut().zip(tensor) {
                                *acc += x;
                            }
                        }

                        contributed += 1;
                    }
                    Msg::Control(Command::Disconnect) => {
                        if contributed > 0 {
                            return Err(CollectiveErr::Desync { round, rank });
                        }
                        disconnected += 1;
                    }
                    other => {
                        return Err(CollectiveErr::UnexpectedMessage { got: other.kind() });
                    }
                }
            }

            if disconnected == world {
                info!(rounds = round; "group disconnected");
                return Ok(());
            }

            debug!(round = round, len = sum.len(); "round reduced, broadcasting");
            for member in &mut members {
                member.tx.send(&Msg::Tensor(&sum)).await?;
            }

            round += 1;
        }
    }

    /// Accepts connections until every rank has joined exactly once.
    async fn rendezvous(&self) -> Result<Vec<Member>> {
        let world = self.world_size.get();
        let mut slots: Vec<Option<Member>> = (0..world).map(|_| None).collect();
        let mut joined = 0;

        while joined < world {
            let (stream, addr) = self.listener.accept().await?;
            let (rx, tx) = stream.into_split();
            let (mut rx, tx) = channel(rx, tx);

            match rx.recv().await? {
                Msg::Control(Command::Join { rank, world_size }) => {
                    if world_size != world {
                        return Err(CollectiveErr::WorldSizeMismatch {
                            got: world_size,
                            expected: world,
                        });
                    }

                    if rank >= world || slots[rank].is_some() {
                        return Err(CollectiveErr::RankConflict { rank });
                    }

                    debug!(rank = rank; "member joined from {addr}");
                    slots[rank] = Some(Member { rx, tx });
                    joined += 1;
                }
                other => {
                    warn!("expected Join from {addr}, got {}", other.kind());
                    return Err(CollectiveErr::UnexpectedMessage { got: other.kind() });
                }
            }
        }

        // Every slot was filled exactly once above.
        Ok(slots.into_iter().flatten().collect())
    }
}
