//! Double-buffered state for iterated kernels.

use super::gpu_primitives::BufferId;

/// Two same-shaped buffers tagged current/next.
///
/// Each step reads only `current()` and writes only `next()`; `swap` then
/// retags them. After any number of steps `current()` holds the latest
/// state, and the two roles never name the same buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPong {
    buffers: [BufferId; 2],
    idx: usize,
    steps: u64,
}

impl PingPong {
    /// `initial` holds the starting state, `scratch` is overwritten first.
    pub fn new(initial: BufferId, scratch: BufferId) -> Self {
        Self {
            buffers: [initial, scratch],
            idx: 0,
            steps: 0,
        }
    }

    /// Buffer read by the next step.
    pub fn current(&self) -> BufferId {
        self.buffers[self.idx]
    }

    /// Buffer written by the next step.
    pub fn next(&self) -> BufferId {
        self.buffers[1 - self.idx]
    }

    pub fn swap(&mut self) {
        self.idx = 1 - self.idx;
        self.steps += 1;
    }

    /// Swaps performed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Both buffers, in allocation order.
    pub fn buffers(&self) -> [BufferId; 2] {
        self.buffers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_alternates() {
        let (a, b) = (BufferId(1), BufferId(2));
        let mut pp = PingPong::new(a, b);
        assert_eq!((pp.current(), pp.next()), (a, b));
        pp.swap();
        assert_eq!((pp.current(), pp.next()), (b, a));
        pp.swap();
        assert_eq!((pp.current(), pp.next()), (a, b));
        assert_eq!(pp.steps(), 2);
    }

    #[test]
    fn test_roles_never_alias() {
        let mut pp = PingPong::new(BufferId(5), BufferId(9));
        for _ in 0..7 {
            assert_ne!(pp.current(), pp.next());
            pp.swap();
        }
        // Odd step count leaves the result in the scratch buffer
        assert_eq!(pp.current(), BufferId(9));
    }
}
