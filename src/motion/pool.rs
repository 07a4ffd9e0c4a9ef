// src/motion/pool.rs - Fixed ring of planning blocks
//
// The pool is a fixed array addressed by index; prev/next wrap modulo the
// pool size. Three cursors walk the ring monotonically: `write` hands out
// slots to the main loop, `queue` commits them, `run` is consumed by the
// executor. Ownership of a slot is carried entirely by its state field.

use super::AXES;

/// Lifecycle of one pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockState {
    /// Available for allocation (must be the cleared value)
    #[default]
    Empty,
    /// Checked out by the main loop for writing
    Loading,
    /// Committed and visible to the look-ahead planner
    Queued,
    /// Marked as the next block to run
    Pending,
    /// Owned by the executor
    Running,
}

/// Program-flow and peripheral commands that ride the motion queue so they
/// execute in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MCode {
    ProgramStop,
    OptionalStop,
    ProgramEnd,
    SpindleCw,
    SpindleCcw,
    SpindleOff,
    MistCoolantOn,
    FloodCoolantOn,
    FloodCoolantOff,
    FeedOverrideOn,
    FeedOverrideOff,
}

/// What a committed block asks the executor to do.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BlockKind {
    /// Cleared slot; never executed
    #[default]
    Null,
    /// Straight move at a single rate, no accel/decel shaping
    Line,
    /// Jerk-limited move planned by the look-ahead
    AccelLine,
    /// Timed pause (seconds)
    Dwell,
    MCode(MCode),
    Tool(u8),
    SpindleSpeed(f64),
}

/// Execution progress of a block, separate from slot ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveState {
    #[default]
    Off,
    New,
    Run,
}

/// One queued unit of planned motion or auxiliary command.
///
/// Velocity fields split into the *planned* values (entry/cruise/exit) the
/// executor consumes, and the *ceiling* values (`*_vmax`) the look-ahead
/// derives them from. `braking_velocity` carries the reverse-pass result:
/// the fastest entry from which this block can still slow to meet its
/// successor.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanningBlock {
    pub line_number: u32,
    pub state: BlockState,
    pub kind: BlockKind,
    pub move_state: MoveState,

    /// May the look-ahead still revise this block?
    pub replannable: bool,
    /// Is this block the release point of a feedhold?
    pub hold_point: bool,

    /// Absolute end position (mm or degrees per axis)
    pub target: [f64; AXES],
    /// Unit vector of motion
    pub unit: [f64; AXES],

    /// Requested duration (minutes; seconds for dwells)
    pub time: f64,
    /// Euclidean length across all axes (mm)
    pub length: f64,
    pub head_length: f64,
    pub body_length: f64,
    pub tail_length: f64,

    pub entry_velocity: f64,
    pub cruise_velocity: f64,
    pub exit_velocity: f64,

    pub entry_vmax: f64,
    pub cruise_vmax: f64,
    pub exit_vmax: f64,
    /// Largest velocity change achievable over `length` under this jerk
    pub delta_vmax: f64,
    pub braking_velocity: f64,

    pub jerk: f64,
    pub recip_jerk: f64,
    pub cubert_jerk: f64,
}

#[derive(Debug)]
pub struct BufferPool {
    blocks: Vec<PlanningBlock>,
    write: usize,
    queue: usize,
    run: usize,
}

impl BufferPool {
    pub fn new(pool_size: usize) -> Self {
        Self {
            blocks: vec![PlanningBlock::default(); pool_size],
            write: 0,
            queue: 0,
            run: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.blocks.len()
    }

    pub fn next(&self, index: usize) -> usize {
        (index + 1) % self.blocks.len()
    }

    pub fn prev(&self, index: usize) -> usize {
        (index + self.blocks.len() - 1) % self.blocks.len()
    }

    pub fn block(&self, index: usize) -> &PlanningBlock {
        &self.blocks[index]
    }

    pub(crate) fn block_mut(&mut self, index: usize) -> &mut PlanningBlock {
        &mut self.blocks[index]
    }

    /// True if a submission could acquire a slot right now. Upstream layers
    /// are expected to gate on this; an acquire failure is fatal.
    pub fn has_space(&self) -> bool {
        self.blocks[self.write].state == BlockState::Empty
    }

    /// Number of slots currently owned by the queue (committed or running).
    pub fn occupied(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.state != BlockState::Empty)
            .count()
    }

    /// Check out the next write slot, cleared, or None if the ring is full.
    pub fn try_acquire_write(&mut self) -> Option<usize> {
        let index = self.write;
        if self.blocks[index].state != BlockState::Empty {
            return None;
        }
        self.blocks[index] = PlanningBlock {
            state: BlockState::Loading,
            ..PlanningBlock::default()
        };
        self.write = self.next(index);
        Some(index)
    }

    /// Relinquish the most recent unsubmitted write slot.
    pub fn release_write(&mut self) {
        self.write = self.prev(self.write);
        self.blocks[self.write].state = BlockState::Empty;
    }

    /// Commit the oldest checked-out slot to the queue and stamp its kind.
    /// Returns the committed index.
    pub fn commit(&mut self, kind: BlockKind) -> usize {
        let index = self.queue;
        let block = &mut self.blocks[index];
        block.kind = kind;
        block.move_state = MoveState::New;
        block.state = BlockState::Queued;
        self.queue = self.next(index);
        index
    }

    /// The block the executor should work on, promoting it to Running on
    /// first sight. Idempotent until the block is finalised.
    pub fn current_run(&mut self) -> Option<usize> {
        let index = self.run;
        match self.blocks[index].state {
            BlockState::Queued | BlockState::Pending => {
                self.blocks[index].state = BlockState::Running;
                Some(index)
            }
            BlockState::Running => Some(index),
            _ => None,
        }
    }

    /// Release the running slot and advance, promoting the next queued block
    /// to Pending. Returns true when the queue is now empty.
    pub fn finalize_run(&mut self) -> bool {
        self.blocks[self.run] = PlanningBlock::default();
        self.run = self.next(self.run);
        if self.blocks[self.run].state == BlockState::Queued {
            self.blocks[self.run].state = BlockState::Pending;
        }
        self.write == self.run
    }

    /// First block of the active chain (the running block, if any).
    pub fn first(&mut self) -> Option<usize> {
        self.current_run()
    }

    /// Last block of the active chain: walk forward from the running block
    /// while successors are still live.
    pub fn last(&mut self) -> Option<usize> {
        let first = self.current_run()?;
        let mut bp = first;
        loop {
            let nx = self.next(bp);
            if self.blocks[nx].move_state == MoveState::Off || nx == first {
                return Some(bp);
            }
            bp = nx;
        }
    }

    /// Overwrite a slot with the contents of its successor. Used by hold
    /// planning to consume queue entries while reshaping the deceleration.
    pub(crate) fn copy_from_next(&mut self, index: usize) {
        let src = self.next(index);
        self.blocks[index] = self.blocks[src];
    }

    /// Drop everything that is not currently running and realign the
    /// cursors. A running block is left for the executor to finish.
    pub fn flush_queued(&mut self) {
        for block in &mut self.blocks {
            if block.state != BlockState::Running {
                *block = PlanningBlock::default();
            }
        }
        if self.blocks[self.run].state == BlockState::Running {
            self.queue = self.next(self.run);
            self.write = self.queue;
        } else {
            self.queue = self.run;
            self.write = self.run;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed(pool: &mut BufferPool, kind: BlockKind) -> usize {
        pool.try_acquire_write().expect("pool has space");
        pool.commit(kind)
    }

    #[test]
    fn acquire_commit_run_lifecycle() {
        let mut pool = BufferPool::new(8);
        assert!(pool.has_space());

        let idx = pool.try_acquire_write().unwrap();
        assert_eq!(pool.block(idx).state, BlockState::Loading);

        let committed = pool.commit(BlockKind::Line);
        assert_eq!(committed, idx);
        assert_eq!(pool.block(idx).state, BlockState::Queued);
        assert_eq!(pool.block(idx).move_state, MoveState::New);

        let run = pool.current_run().unwrap();
        assert_eq!(run, idx);
        assert_eq!(pool.block(idx).state, BlockState::Running);
        // repeated calls return the same block
        assert_eq!(pool.current_run(), Some(idx));

        assert!(pool.finalize_run());
        assert_eq!(pool.block(idx).state, BlockState::Empty);
        assert_eq!(pool.current_run(), None);
    }

    #[test]
    fn finalize_promotes_successor_to_pending() {
        let mut pool = BufferPool::new(8);
        let a = committed(&mut pool, BlockKind::Line);
        let b = committed(&mut pool, BlockKind::Line);

        assert_eq!(pool.current_run(), Some(a));
        assert!(!pool.finalize_run());
        assert_eq!(pool.block(b).state, BlockState::Pending);
        assert_eq!(pool.current_run(), Some(b));
    }

    #[test]
    fn release_write_rewinds_one_slot() {
        let mut pool = BufferPool::new(8);
        let idx = pool.try_acquire_write().unwrap();
        pool.release_write();
        assert_eq!(pool.block(idx).state, BlockState::Empty);
        // the same slot is handed out again
        assert_eq!(pool.try_acquire_write(), Some(idx));
    }

    #[test]
    fn pool_fills_and_wraps() {
        let mut pool = BufferPool::new(4);
        for _ in 0..4 {
            committed(&mut pool, BlockKind::Line);
        }
        assert!(!pool.has_space());
        assert!(pool.try_acquire_write().is_none());

        pool.current_run().unwrap();
        pool.finalize_run();
        assert!(pool.has_space());
        // freed slot is reused in ring order
        assert_eq!(pool.try_acquire_write(), Some(0));
    }

    #[test]
    fn last_walks_to_the_end_of_the_chain() {
        let mut pool = BufferPool::new(8);
        let _a = committed(&mut pool, BlockKind::AccelLine);
        let _b = committed(&mut pool, BlockKind::AccelLine);
        let c = committed(&mut pool, BlockKind::AccelLine);

        assert_eq!(pool.last(), Some(c));
    }

    #[test]
    fn flush_preserves_only_the_running_block() {
        let mut pool = BufferPool::new(8);
        let a = committed(&mut pool, BlockKind::AccelLine);
        let _b = committed(&mut pool, BlockKind::AccelLine);
        let _c = committed(&mut pool, BlockKind::AccelLine);

        pool.current_run().unwrap();
        pool.flush_queued();

        assert_eq!(pool.block(a).state, BlockState::Running);
        assert_eq!(pool.occupied(), 1);
        assert!(pool.has_space());

        // the running block still finalises normally, emptying the pool
        pool.finalize_run();
        assert_eq!(pool.occupied(), 0);
        assert_eq!(pool.current_run(), None);
    }
}
