//! Blocked panel traversal.
//!
//! Blocked algorithms walk a matrix dimension in panels of at most the
//! algorithmic blocksize, either from the start (`Forward`) or from the end
//! (`Backward`). At every step the dimension is split three ways: the part
//! already processed, the current panel, and the part still to come.

use crate::config;
use crate::error::{Error, Result};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// One step of a panel loop: the current panel is `offset..offset + size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Panel {
    pub offset: usize,
    pub size: usize,
}

impl Panel {
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    BeforeStart,
    InPanel(Panel),
    Done,
}

/// Iterator over the panels of a dimension of length `extent`.
///
/// The panels are disjoint, cover `0..extent` exactly and are visited in
/// order of `direction`. An empty dimension yields nothing.
#[derive(Debug, Clone)]
pub struct PanelLoop {
    extent: usize,
    blocksize: usize,
    direction: Direction,
    boundary: usize,
    state: State,
}

impl PanelLoop {
    pub fn new(extent: usize, blocksize: usize, direction: Direction) -> Result<Self> {
        if blocksize == 0 {
            return Err(Error::argument("PanelLoop::new", "blocksize must be positive"));
        }
        let boundary = match direction {
            Direction::Forward => 0,
            Direction::Backward => extent,
        };
        Ok(Self {
            extent,
            blocksize,
            direction,
            boundary,
            state: State::BeforeStart,
        })
    }

    /// Loop using the configured algorithmic blocksize.
    pub fn with_default_blocksize(extent: usize, direction: Direction) -> Result<Self> {
        Self::new(extent, config::blocksize(), direction)
    }

    pub fn extent(&self) -> usize {
        self.extent
    }

    pub fn blocksize(&self) -> usize {
        self.blocksize
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Number of panels in the whole loop.
    pub fn steps(&self) -> usize {
        self.extent.div_ceil(self.blocksize)
    }

    /// The panel the loop currently sits on, if any.
    pub fn current(&self) -> Option<Panel> {
        match self.state {
            State::InPanel(panel) => Some(panel),
            State::BeforeStart | State::Done => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }
}

impl Iterator for PanelLoop {
    type Item = Panel;

    fn next(&mut self) -> Option<Panel> {
        if let State::InPanel(panel) = self.state {
            self.boundary = match self.direction {
                Direction::Forward => panel.end(),
                Direction::Backward => panel.offset,
            };
        }
        if self.state == State::Done {
            return None;
        }
        let panel = match self.direction {
            Direction::Forward if self.boundary < self.extent => Some(Panel {
                offset: self.boundary,
                size: self.blocksize.min(self.extent - self.boundary),
            }),
            Direction::Backward if self.boundary > 0 => {
                let size = self.blocksize.min(self.boundary);
                Some(Panel {
                    offset: self.boundary - size,
                    size,
                })
            }
            _ => None,
        };
        self.state = match panel {
            Some(panel) => {
                trace!(offset = panel.offset, size = panel.size, direction = ?self.direction, "panel");
                State::InPanel(panel)
            }
            None => State::Done,
        };
        panel
    }
}
