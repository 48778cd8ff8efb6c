//! A worker's handle into the collective group.

use std::{net::SocketAddr, num::NonZeroUsize, time::Duration};

use log::{debug, info};
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::sleep,
};

use crate::{
    CollectiveErr, Receiver, Result, Sender, channel,
    msg::{Command, Msg},
};

const CONNECT_ATTEMPTS: usize = 50;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

/// One member's connection to the coordinator.
///
/// All members must call [`ProcessGroup::all_reduce_mean`] the same number
/// of times in the same order. The coordinator holds each round open until
/// every member has contributed, so this call doubles as a barrier; there
/// is no timeout, and a member that never arrives stalls the group.
#[derive(Debug)]
pub struct ProcessGroup {
    rank: usize,
    world_size: NonZeroUsize,
    rx: Receiver<OwnedReadHalf>,
    tx: Sender<OwnedWriteHalf>,
    rounds: u64,
}

impl ProcessGroup {
    /// Joins the group at the shared rendezvous endpoint.
    ///
    /// Connection is retried with a short backoff so that members may start
    /// before the coordinator has bound its listener.
    ///
    /// # Arguments
    /// * `endpoint` - The coordinator's address.
    /// * `rank` - This member's rank, unique within `0..world_size`.
    /// * `world_size` - The fixed group size.
    ///
    /// # Errors
    /// Returns `CollectiveErr` if the endpoint stays unreachable or the
    /// rendezvous handshake is rejected.
    pub async fn join(
        endpoint: SocketAddr,
        rank: usize,
        world_size: NonZeroUsize,
    ) -> Result<Self> {
        let stream = Self::connect_with_retry(endpoint).await?;
        let (rx, tx) = stream.into_split();
        let (mut rx, mut tx) = channel(rx, tx);

        let join = Msg::Control(Command::Join {
            rank,
            world_size: world_size.get(),
        });
        tx.send(&join).await?;

        match rx.recv().await? {
            Msg::Control(Command::Welcome { world_size: got }) if got == world_size.get() => {
                info!(rank = rank, world_size = got; "joined collective group");
            }
            Msg::Control(Command::Welcome { world_size: got }) => {
                return Err(CollectiveErr::WorldSizeMismatch {
                    got,
                    expected: world_size.get(),
                });
            }
            Msg::Err(detail) => {
                return Err(CollectiveErr::Remote {
                    detail: detail.into_owned(),
                });
            }
            other => return Err(CollectiveErr::UnexpectedMessage { got: other.kind() }),
        }

        Ok(Self {
            rank,
            world_size,
            rx,
            tx,
            rounds: 0,
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size.get()
    }

    /// Number of completed reduction rounds.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Sums `tensor` across all members and divides by the world size in
    /// place, leaving the arithmetic mean in every member's buffer.
    ///
    /// Blocks until every member has contributed to this round.
    ///
    /// # Errors
    /// Returns `CollectiveErr` on transport failure or when the group's
    /// contributions disagree on tensor length.
    pub async fn all_reduce_mean(&mut self, tensor: &mut [f32]) -> Result<()> {
        self.tx.send(&Msg::Tensor(tensor)).await?;

        match self.rx.recv().await? {
            Msg::Tensor(sum) => {
                if sum.len() != tensor.len() {
                    return Err(CollectiveErr::TensorLenMismatch {
                        round: self.rounds,
                        got: sum.len(),
                        expected: tensor.len(),
                    });
                }

                let scale = 1.0 / self.world_size.get() as f32;
                for (x, s) in tensor.iter_mut().zip(sum) {
                    *x = s * scale;
                }
            }
            Msg::Err(detail) => {
                return Err(CollectiveErr::Remote {
                    detail: detail.into_owned(),
                });
            }
            other => return Err(CollectiveErr::UnexpectedMessage { got: other.kind() }),
        }

        self.rounds += 1;
        debug!(rank = self.rank, round = self.rounds; "reduction complete");
        Ok(())
    }

    /// Leaves the group at a round boundary.
    pub async fn leave(mut self) -> Result<()> {
        self.tx.send(&Msg::Control(Command::Disconnect)).await?;
        Ok(())
    }

    async fn connect_with_retry(endpoint: SocketAddr) -> Result<TcpStream> {
        let mut last_err = None;

        for _ in 0..CONNECT_ATTEMPTS {
            match TcpStream::connect(endpoint).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    last_err = Some(e);
                    sleep(CONNECT_BACKOFF).await;
                }
            }
        }

        // The loop ran at least once, so an error was recorded.
        Err(CollectiveErr::Io(last_err.expect("at least one attempt")))
    }
}
