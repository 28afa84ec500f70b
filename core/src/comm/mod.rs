//! Collective communication.
//!
//! [`Communicator`] is the seam between the distribution engine and the
//! message transport. Implementors supply point-to-point `send`/`recv` and
//! `split`; the collectives have default implementations on top of those,
//! so a transport only overrides the ones it can do better.
//!
//! Every collective is blocking and must be entered by every member of the
//! communicator in the same order. Sends never block, so the defaults post all
//! outgoing messages before waiting on any incoming one.

mod thread;

pub use thread::{ThreadComm, run_spmd};

use crate::Scalar;
use crate::error::{Error, Result};

/// Abstraction for a group of cooperating processes.
pub trait Communicator: Send + Sync + Sized {
    /// Rank of this process within the group.
    fn rank(&self) -> usize;

    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// Partitions the group by `color`; within a color, ranks follow `key`
    /// (ties broken by the parent rank). Collective over `self`.
    fn split(&self, color: usize, key: usize) -> Result<Self>;

    /// Sends `data` to group rank `dest`. Never blocks.
    fn send<T: Scalar>(&self, dest: usize, data: Vec<T>) -> Result<()>;

    /// Receives the next message from group rank `source` on this group.
    fn recv<T: Scalar>(&self, source: usize) -> Result<Vec<T>>;

    fn barrier(&self) -> Result<()> {
        self.all_gather::<u8>(&[])?;
        Ok(())
    }

    /// Replaces `data` on every non-root process with the root's `data`.
    fn broadcast<T: Scalar>(&self, data: &mut Vec<T>, root: usize) -> Result<()> {
        check_rank("broadcast", root, self.size())?;
        if self.rank() == root {
            for dest in (0..self.size()).filter(|&q| q != root) {
                self.send(dest, data.clone())?;
            }
        } else {
            *data = self.recv(root)?;
        }
        Ok(())
    }

    /// Gathers every member's contribution, which may differ in length.
    /// Entry `q` of the result is the contribution of rank `q`.
    fn all_gather<T: Scalar>(&self, data: &[T]) -> Result<Vec<Vec<T>>> {
        let rank = self.rank();
        for dest in (0..self.size()).filter(|&q| q != rank) {
            self.send(dest, data.to_vec())?;
        }
        (0..self.size())
            .map(|source| {
                if source == rank {
                    Ok(data.to_vec())
                } else {
                    self.recv(source)
                }
            })
            .collect()
    }

    /// Sends `blocks[q]` to rank `q` and returns the blocks received, indexed
    /// by sender. Block lengths may differ.
    fn all_to_all<T: Scalar>(&self, blocks: Vec<Vec<T>>) -> Result<Vec<Vec<T>>> {
        let rank = self.rank();
        if blocks.len() != self.size() {
            return Err(Error::logic(
                "all_to_all",
                format!("expected {} blocks, got {}", self.size(), blocks.len()),
            ));
        }
        let mut own = Vec::new();
        for (dest, block) in blocks.into_iter().enumerate() {
            if dest == rank {
                own = block;
            } else {
                self.send(dest, block)?;
            }
        }
        let mut own = Some(own);
        (0..self.size())
            .map(|source| {
                if source == rank {
                    Ok(own.take().unwrap_or_default())
                } else {
                    self.recv(source)
                }
            })
            .collect()
    }

    /// Each process contributes `blocks[q]` towards rank `q`; rank `q`
    /// receives the element-wise sum of all contributions addressed to it.
    fn reduce_scatter_sum<T: Scalar>(&self, blocks: Vec<Vec<T>>) -> Result<Vec<T>> {
        let received = self.all_to_all(blocks)?;
        let mut iter = received.into_iter();
        let mut sum = iter.next().unwrap_or_default();
        for block in iter {
            if block.len() != sum.len() {
                return Err(Error::logic(
                    "reduce_scatter_sum",
                    format!("contribution of length {} != {}", block.len(), sum.len()),
                ));
            }
            for (acc, v) in sum.iter_mut().zip(block) {
                *acc += v;
            }
        }
        Ok(sum)
    }

    /// In-place element-wise sum over the whole group.
    ///
    /// Ring algorithm: a scatter-reduce pass leaves every rank with one fully
    /// reduced chunk, then an all-gather pass circulates the reduced chunks.
    /// Every chunk is summed exactly once, so all ranks end with identical
    /// bits.
    fn all_reduce_sum<T: Scalar>(&self, data: &mut [T]) -> Result<()> {
        let size = self.size();
        let rank = self.rank();
        if size == 1 || data.is_empty() {
            return Ok(());
        }
        let total = data.len();
        let chunk_size = total.div_ceil(size);
        let chunk = |idx: usize| {
            let start = (idx * chunk_size).min(total);
            start..(start + chunk_size).min(total)
        };
        let right = (rank + 1) % size;
        let left = (rank + size - 1) % size;

        // Phase 1: scatter-reduce
        for step in 0..size - 1 {
            let send_idx = (rank + size - step) % size;
            let recv_idx = (rank + 2 * size - step - 1) % size;
            self.send(right, data[chunk(send_idx)].to_vec())?;
            let received: Vec<T> = self.recv(left)?;
            for (acc, v) in data[chunk(recv_idx)].iter_mut().zip(received) {
                *acc += v;
            }
        }

        // Phase 2: all-gather
        for step in 0..size - 1 {
            let send_idx = (rank + size - step + 1) % size;
            let recv_idx = (rank + size - step) % size;
            self.send(right, data[chunk(send_idx)].to_vec())?;
            let received: Vec<T> = self.recv(left)?;
            let target = &mut data[chunk(recv_idx)];
            if target.len() != received.len() {
                return Err(Error::logic(
                    "all_reduce_sum",
                    format!("chunk of length {} != {}", received.len(), target.len()),
                ));
            }
            target.copy_from_slice(&received);
        }
        Ok(())
    }
}

fn check_rank(op: &'static str, rank: usize, size: usize) -> Result<()> {
    if rank >= size {
        return Err(Error::argument(
            op,
            format!("rank {} outside a group of {}", rank, size),
        ));
    }
    Ok(())
}
