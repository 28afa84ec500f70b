//! Per-process runtime tunables.
//!
//! Each simulated process runs on its own thread, so the blocksize lives in
//! thread-local storage and changing it on one process never affects another.

use crate::error::{Error, Result};
use std::cell::Cell;

/// Default panel width of the blocked algorithms.
pub const DEFAULT_BLOCKSIZE: usize = 128;

/// Default relative tolerance of [`crate::norm::two_norm_estimate`].
pub const DEFAULT_TWO_NORM_TOL: f64 = 1e-6;

/// Default iteration cap of [`crate::norm::two_norm_estimate`].
pub const DEFAULT_TWO_NORM_MAX_ITS: usize = 1000;

thread_local! {
    static BLOCKSIZE: Cell<usize> = const { Cell::new(DEFAULT_BLOCKSIZE) };
}

/// Current blocksize of this process.
pub fn blocksize() -> usize {
    BLOCKSIZE.with(|b| b.get())
}

/// Sets the blocksize of this process.
pub fn set_blocksize(blocksize: usize) -> Result<()> {
    if blocksize == 0 {
        return Err(Error::argument("set_blocksize", "blocksize must be positive"));
    }
    BLOCKSIZE.with(|b| b.set(blocksize));
    Ok(())
}

/// Sets the blocksize for a scope and restores the previous value on drop.
///
/// Guards nest like a stack.
#[derive(Debug)]
pub struct BlocksizeGuard {
    previous: usize,
}

impl BlocksizeGuard {
    pub fn new(blocksize: usize) -> Result<Self> {
        let previous = self::blocksize();
        set_blocksize(blocksize)?;
        Ok(Self { previous })
    }
}

impl Drop for BlocksizeGuard {
    fn drop(&mut self) {
        BLOCKSIZE.with(|b| b.set(self.previous));
    }
}
