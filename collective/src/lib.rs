//! Collective communication for a fixed-size worker group.
//!
//! Workers rendezvous at a shared coordinator endpoint and then take part
//! in sum reduction rounds. Every member must issue the same sequence of
//! reductions: the coordinator blocks a round until all contributions
//! arrive, so a member that skips a call stalls the whole group.

mod coordinator;
mod error;
mod group;
pub mod msg;
mod receiver;
mod sender;

use tokio::io::{AsyncRead, AsyncWrite};

pub use coordinator::Coordinator;
pub use error::CollectiveErr;
pub use group::ProcessGroup;
pub use receiver::Receiver;
pub use sender::Sender;

/// The collective module's result type.
pub type Result<T> = std::result::Result<T, CollectiveErr>;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Creates both `Receiver` and `Sender` channel parts over a stream.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// Both ends of the framed message channel.
pub fn channel<R, W>(rx: R, tx: W) -> (Receiver<R>, Sender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (Receiver::new(rx), Sender::new(tx))
}
