// Hub-side partitioning of the object id space.
//
// One counter, only ever advanced by `next_block`. Because the hub mutates it
// exclusively from its execution context, no locking is needed. Peers carve
// their own ids out of the blocks they are given (see `IdBlock::next_id`).

use tandem_protocol::{IdBlock, UnitId};

#[derive(Debug, Default)]
pub struct IdAllocator {
    next: i32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a saved counter.
    pub fn starting_at(next: i32) -> Self {
        Self { next }
    }

    /// First id that has not been handed out yet.
    pub fn counter(&self) -> i32 {
        self.next
    }

    /// Hand out `[counter, counter + size)` and advance the counter.
    pub fn next_block(&mut self, size: i32, unit: UnitId) -> IdBlock {
        let block = IdBlock::new(self.next, size, unit);
        self.next = self.next.saturating_add(size);
        log::info!("New id block {} of size {}", block.range_start, size);
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn blocks_follow_each_other() {
        let mut ids = IdAllocator::new();
        let a = ids.next_block(30_000, UnitId::GLOBAL);
        let b = ids.next_block(30_000, UnitId(2));
        assert_eq!(a.range_start, 0);
        assert_eq!(a.range_end(), b.range_start);
        assert_eq!(b.owning_unit, UnitId(2));
        assert_eq!(b.cursor, 0);
        assert_eq!(ids.counter(), 60_000);
    }

    #[test]
    fn resumes_from_saved_counter() {
        let mut ids = IdAllocator::starting_at(500);
        assert_eq!(ids.next_block(10, UnitId::GLOBAL).range_start, 500);
    }

    proptest! {
        #[test]
        fn blocks_are_disjoint_and_gapless(sizes in proptest::collection::vec(1i32..10_000, 1..50)) {
            let mut ids = IdAllocator::new();
            let blocks: Vec<IdBlock> = sizes
                .iter()
                .map(|&size| ids.next_block(size, UnitId::GLOBAL))
                .collect();

            let mut expected_start = 0;
            for block in &blocks {
                prop_assert_eq!(block.range_start, expected_start);
                expected_start = block.range_end();
            }
            prop_assert_eq!(expected_start, ids.counter());
            prop_assert_eq!(ids.counter(), sizes.iter().sum::<i32>());
        }
    }
}
