//! In-process transport: one thread per process, crossbeam channels between
//! them.
//!
//! Every process owns a single inbox. Messages carry the context id of the
//! communicator they were sent on plus the sender's world rank; a receive
//! pulls from the inbox until it finds a match and parks everything else in a
//! per-process stash. Channels are FIFO per sender, so matching by
//! `(context, source)` preserves message order within each communicator.

use super::Communicator;
use crate::Scalar;
use crate::error::{Error, Result};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

struct Envelope {
    context: u64,
    source: usize,
    payload: Box<dyn Any + Send>,
}

/// State shared by every process of one SPMD run.
struct World {
    senders: Vec<Sender<Envelope>>,
    aborted: AtomicBool,
}

struct Inbox {
    rx: Receiver<Envelope>,
    stash: Mutex<VecDeque<Envelope>>,
}

/// A communicator whose processes are threads of the current program.
///
/// Created in groups by [`ThreadComm::world`]; each process takes one handle
/// onto its own thread. Sub-communicators from [`Communicator::split`] share
/// the parent's inbox.
pub struct ThreadComm {
    world: Arc<World>,
    inbox: Arc<Inbox>,
    world_rank: usize,
    context: u64,
    /// Group rank to world rank.
    members: Arc<[usize]>,
    rank: usize,
    splits: AtomicU64,
}

impl ThreadComm {
    /// Builds `size` connected handles, one per process.
    pub fn world(size: usize) -> Vec<ThreadComm> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
        let world = Arc::new(World {
            senders,
            aborted: AtomicBool::new(false),
        });
        let members: Arc<[usize]> = (0..size).collect();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, rx)| ThreadComm {
                world: Arc::clone(&world),
                inbox: Arc::new(Inbox {
                    rx,
                    stash: Mutex::new(VecDeque::new()),
                }),
                world_rank: rank,
                context: 0,
                members: Arc::clone(&members),
                rank,
                splits: AtomicU64::new(0),
            })
            .collect()
    }

    /// Rank of this process in the world the communicator was split from.
    pub fn world_rank(&self) -> usize {
        self.world_rank
    }

    /// Marks the run as failed; peers blocked in `recv` return an error
    /// instead of waiting forever.
    pub fn abort(&self) {
        self.world.aborted.store(true, Ordering::Release);
    }

    fn take_stashed(&self, source: usize) -> Option<Envelope> {
        let mut stash = self.inbox.stash.lock();
        let pos = stash
            .iter()
            .position(|env| env.context == self.context && env.source == source)?;
        stash.remove(pos)
    }

    fn unpack<T: Scalar>(&self, envelope: Envelope) -> Result<Vec<T>> {
        envelope
            .payload
            .downcast::<Vec<T>>()
            .map(|data| *data)
            .map_err(|_| Error::logic("recv", "message element type does not match"))
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.members.len()
    }

    fn split(&self, color: usize, key: usize) -> Result<Self> {
        let counter = self.splits.fetch_add(1, Ordering::Relaxed);
        let entries = self.all_gather(&[color, key])?;

        let mut group: Vec<(usize, usize)> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.first() == Some(&color))
            .map(|(q, e)| (e.get(1).copied().unwrap_or(0), q))
            .collect();
        group.sort_unstable();

        let members: Arc<[usize]> = group.iter().map(|&(_, q)| self.members[q]).collect();
        let rank = group
            .iter()
            .position(|&(_, q)| q == self.rank)
            .ok_or_else(|| Error::generic("split", "process missing from its own color"))?;

        let mut hasher = DefaultHasher::new();
        (self.context, counter, color).hash(&mut hasher);

        Ok(ThreadComm {
            world: Arc::clone(&self.world),
            inbox: Arc::clone(&self.inbox),
            world_rank: self.world_rank,
            context: hasher.finish(),
            members,
            rank,
            splits: AtomicU64::new(0),
        })
    }

    fn send<T: Scalar>(&self, dest: usize, data: Vec<T>) -> Result<()> {
        let world_dest = *self.members.get(dest).ok_or_else(|| {
            Error::argument("send", format!("rank {} outside a group of {}", dest, self.size()))
        })?;
        let envelope = Envelope {
            context: self.context,
            source: self.world_rank,
            payload: Box::new(data),
        };
        self.world.senders[world_dest]
            .send(envelope)
            .map_err(|_| Error::generic("send", format!("process {} has exited", world_dest)))
    }

    fn recv<T: Scalar>(&self, source: usize) -> Result<Vec<T>> {
        let world_source = *self.members.get(source).ok_or_else(|| {
            Error::argument("recv", format!("rank {} outside a group of {}", source, self.size()))
        })?;
        if let Some(envelope) = self.take_stashed(world_source) {
            return self.unpack(envelope);
        }
        loop {
            match self.inbox.rx.recv_timeout(POLL_INTERVAL) {
                Ok(envelope) => {
                    if envelope.context == self.context && envelope.source == world_source {
                        return self.unpack(envelope);
                    }
                    self.inbox.stash.lock().push_back(envelope);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.world.aborted.load(Ordering::Acquire) {
                        return Err(Error::runtime("recv", "a peer process aborted"));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::generic("recv", "all peers have exited"));
                }
            }
        }
    }
}

/// Marks the world aborted if the owning process unwinds.
struct AbortOnPanic {
    world: Arc<World>,
}

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.world.aborted.store(true, Ordering::Release);
        }
    }
}

/// Runs `f` once per process on `size` scoped threads and returns the results
/// in rank order.
///
/// A panic on any process is re-raised after every thread has finished; peers
/// blocked on the failed process observe an error rather than hanging.
pub fn run_spmd<R, F>(size: usize, f: F) -> Vec<R>
where
    F: Fn(ThreadComm) -> R + Sync,
    R: Send,
{
    let comms = ThreadComm::world(size);
    let f = &f;
    std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let guard = AbortOnPanic {
                    world: Arc::clone(&comm.world),
                };
                scope.spawn(move || {
                    let _guard = guard;
                    f(comm)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_properties() {
        let comms = ThreadComm::world(3);
        assert_eq!(comms.len(), 3);
        for (rank, comm) in comms.iter().enumerate() {
            assert_eq!(comm.rank(), rank);
            assert_eq!(comm.size(), 3);
            assert_eq!(comm.world_rank(), rank);
        }
    }

    #[test]
    fn test_ring_all_reduce() {
        // Rank r contributes r + 1 everywhere, so the sum is 1 + 2 + 3 + 4.
        let results = run_spmd(4, |comm| {
            let mut data = vec![(comm.rank() + 1) as f32; 7];
            comm.all_reduce_sum(&mut data).unwrap();
            data
        });
        for data in results {
            assert_eq!(data, vec![10.0; 7]);
        }
    }

    #[test]
    fn test_all_reduce_shorter_than_group() {
        let results = run_spmd(4, |comm| {
            let mut data = vec![comm.rank() as i64, 1];
            comm.all_reduce_sum(&mut data).unwrap();
            data
        });
        for data in results {
            assert_eq!(data, vec![6, 4]);
        }
    }

    #[test]
    fn test_broadcast_and_all_gather() {
        let results = run_spmd(3, |comm| {
            let mut data = if comm.rank() == 1 { vec![7u32, 8] } else { vec![] };
            comm.broadcast(&mut data, 1).unwrap();
            let gathered = comm.all_gather(&vec![comm.rank(); comm.rank()]).unwrap();
            (data, gathered)
        });
        for (data, gathered) in results {
            assert_eq!(data, vec![7, 8]);
            assert_eq!(gathered, vec![vec![], vec![1], vec![2, 2]]);
        }
    }

    #[test]
    fn test_all_to_all_variable_counts() {
        let results = run_spmd(3, |comm| {
            let me = comm.rank();
            // Rank `me` sends `dest` copies of its rank to `dest`
            let blocks = (0..3).map(|dest| vec![me as i32; dest]).collect();
            comm.all_to_all(blocks).unwrap()
        });
        for (me, received) in results.into_iter().enumerate() {
            let expected: Vec<Vec<i32>> = (0..3).map(|src| vec![src as i32; me]).collect();
            assert_eq!(received, expected);
        }
    }

    #[test]
    fn test_reduce_scatter_sum() {
        let results = run_spmd(2, |comm| {
            let me = comm.rank() as f64;
            comm.reduce_scatter_sum(vec![vec![me, 1.0], vec![10.0 * me]]).unwrap()
        });
        assert_eq!(results[0], vec![1.0, 2.0]);
        assert_eq!(results[1], vec![10.0]);
    }

    #[test]
    fn test_split_orders_by_key() {
        let results = run_spmd(4, |comm| {
            // Even and odd ranks, reversed within each color
            let sub = comm.split(comm.rank() % 2, 10 - comm.rank()).unwrap();
            let gathered = sub.all_gather(&[comm.rank()]).unwrap();
            (sub.rank(), sub.size(), gathered)
        });
        assert_eq!(results[0], (1, 2, vec![vec![2], vec![0]]));
        assert_eq!(results[1], (1, 2, vec![vec![3], vec![1]]));
        assert_eq!(results[2], (0, 2, vec![vec![2], vec![0]]));
        assert_eq!(results[3], (0, 2, vec![vec![3], vec![1]]));
    }

    #[test]
    fn test_interleaved_communicators() {
        // Messages on the sub-communicator arrive before the parent's
        // receive is posted and must be stashed, not consumed.
        let results = run_spmd(2, |comm| {
            let sub = comm.split(0, comm.rank()).unwrap();
            if comm.rank() == 0 {
                comm.send(1, vec![1u8]).unwrap();
                sub.send(1, vec![2u8]).unwrap();
                (vec![], vec![])
            } else {
                let from_sub: Vec<u8> = sub.recv(0).unwrap();
                let from_world: Vec<u8> = comm.recv(0).unwrap();
                (from_sub, from_world)
            }
        });
        assert_eq!(results[1], (vec![2], vec![1]));
    }

    #[test]
    fn test_type_mismatch_is_logic_error() {
        let results = run_spmd(2, |comm| {
            if comm.rank() == 0 {
                comm.send(1, vec![1.0f64]).unwrap();
                None
            } else {
                Some(comm.recv::<f32>(0).unwrap_err())
            }
        });
        assert_eq!(results[1].as_ref().map(|e| e.status_code()), Some(4));
    }

    #[test]
    fn test_abort_unblocks_peers() {
        let results = run_spmd(2, |comm| {
            if comm.rank() == 0 {
                comm.abort();
                Ok(())
            } else {
                comm.recv::<f64>(0).map(|_| ())
            }
        });
        assert!(results[1].is_err());
    }
}
