//! Reordering buffer for block notifications.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::events::BlockEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    /// Nothing was added nor delivered yet.
    Unset,
    /// Follows the lowest buffered block until the first one is delivered.
    Floating(u64),
    Fixed(u64),
    /// The last possible block was delivered.
    Exhausted,
}

/// Buffer releasing blocks one by one in ascending, gapless order.
///
/// Blocks can be added in any order, including duplicates. A block is
/// released only once every block before it was released, and blocks below
/// the cursor are discarded as stale.
///
/// If no start block is given, the lowest block added before the first
/// delivery becomes the start.
#[derive(Debug)]
pub struct OrderedBlockQueue<B> {
    blocks: BTreeMap<u64, B>,
    cursor: Cursor,
}

impl<B> OrderedBlockQueue<B>
where
    B: BlockEvent,
{
    /// Create a queue, optionally releasing blocks from `start_block`.
    pub fn new(start_block: Option<u64>) -> Self {
        OrderedBlockQueue {
            blocks: BTreeMap::new(),
            cursor: match start_block {
                Some(start) => Cursor::Fixed(start),
                None => Cursor::Unset,
            },
        }
    }

    /// Buffer a block. Stale blocks are dropped.
    pub fn add_block(&mut self, block: B) {
        let number = block.block_number();

        match self.cursor {
            Cursor::Exhausted => {
                debug!("Discarding block {number}, no more blocks are expected");
                return;
            }
            Cursor::Fixed(next) if number < next => {
                trace!("Discarding stale block {number}, next block is {next}");
                return;
            }
            Cursor::Unset => self.cursor = Cursor::Floating(number),
            Cursor::Floating(next) if number < next => self.cursor = Cursor::Floating(number),
            _ => {}
        }

        self.blocks.insert(number, block);
    }

    /// Take the next block in sequence, if it already arrived.
    pub fn next_block(&mut self) -> Option<B> {
        let next = self.next_block_number()?;
        let block = self.blocks.remove(&next)?;

        self.cursor = match next.checked_add(1) {
            Some(next) => Cursor::Fixed(next),
            None => {
                self.blocks.clear();
                Cursor::Exhausted
            }
        };

        Some(block)
    }

    /// Number of the next block to be released.
    pub fn next_block_number(&self) -> Option<u64> {
        match self.cursor {
            Cursor::Floating(next) | Cursor::Fixed(next) => Some(next),
            Cursor::Unset | Cursor::Exhausted => None,
        }
    }

    /// Number of buffered blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl<B> Default for OrderedBlockQueue<B>
where
    B: BlockEvent,
{
    fn default() -> Self {
        OrderedBlockQueue::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BlockNotification;
    use rstest::rstest;

    fn block(number: u64) -> BlockNotification {
        BlockNotification::new(number, number.to_be_bytes())
    }

    fn drain(queue: &mut OrderedBlockQueue<BlockNotification>) -> Vec<u64> {
        std::iter::from_fn(|| queue.next_block())
            .map(|block| block.block_number)
            .collect()
    }

    #[test]
    fn empty_queue() {
        let mut queue = OrderedBlockQueue::<BlockNotification>::new(None);

        assert!(queue.next_block().is_none());
        assert_eq!(queue.next_block_number(), None);
        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn out_of_order_without_start() {
        let mut queue = OrderedBlockQueue::new(None);

        queue.add_block(block(3));
        queue.add_block(block(1));
        queue.add_block(block(2));

        assert_eq!(queue.next_block_number(), Some(1));
        assert_eq!(drain(&mut queue), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn first_block_sets_start() {
        let mut queue = OrderedBlockQueue::new(None);

        queue.add_block(block(7));
        assert_eq!(queue.next_block_number(), Some(7));
        assert_eq!(drain(&mut queue), vec![7]);

        // The start is now fixed.
        queue.add_block(block(5));
        assert!(queue.is_empty());
        assert_eq!(queue.next_block_number(), Some(8));
    }

    #[test]
    fn blocks_before_start_are_discarded() {
        let mut queue = OrderedBlockQueue::new(Some(2));

        queue.add_block(block(1));
        assert_eq!(queue.len(), 0);

        queue.add_block(block(2));
        queue.add_block(block(1));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn compares_against_cursor() {
        let mut queue = OrderedBlockQueue::new(Some(1));

        queue.add_block(block(2));
        queue.add_block(block(1));

        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn gap_holds_later_blocks() {
        let mut queue = OrderedBlockQueue::new(Some(10));

        queue.add_block(block(12));
        queue.add_block(block(11));

        assert!(queue.next_block().is_none());
        assert_eq!(queue.next_block_number(), Some(10));
        assert_eq!(queue.len(), 2);

        queue.add_block(block(10));
        assert_eq!(drain(&mut queue), vec![10, 11, 12]);
    }

    #[test]
    fn cursor_follows_delivered_block() {
        let mut queue = OrderedBlockQueue::new(Some(41));

        queue.add_block(block(41));
        queue.add_block(block(42));

        assert_eq!(queue.next_block().unwrap().block_number, 41);
        assert_eq!(queue.next_block_number(), Some(42));
        assert_eq!(queue.next_block().unwrap().block_number, 42);
        assert_eq!(queue.next_block_number(), Some(43));
    }

    #[test]
    fn delivered_blocks_never_recur() {
        let mut queue = OrderedBlockQueue::new(None);

        queue.add_block(block(1));
        assert_eq!(drain(&mut queue), vec![1]);

        queue.add_block(block(1));
        assert!(queue.is_empty());
        assert!(queue.next_block().is_none());
    }

    #[test]
    fn duplicate_replaces_buffered_block() {
        let mut queue = OrderedBlockQueue::new(Some(1));

        queue.add_block(BlockNotification::new(2, b"old".to_vec()));
        queue.add_block(BlockNotification::new(2, b"new".to_vec()));
        queue.add_block(block(1));

        assert_eq!(queue.len(), 2);
        queue.next_block().unwrap();
        assert_eq!(queue.next_block().unwrap().payload, b"new");
    }

    #[test]
    fn numbers_beyond_53_bits() {
        let start = (1u64 << 53) + 1;
        let mut queue = OrderedBlockQueue::new(Some(start));

        queue.add_block(block(start + 1));
        queue.add_block(block(start));
        queue.add_block(block(start - 1));

        assert_eq!(drain(&mut queue), vec![start, start + 1]);
        assert_eq!(queue.next_block_number(), Some(start + 2));
    }

    #[test]
    fn last_block_exhausts_queue() {
        let mut queue = OrderedBlockQueue::new(Some(u64::MAX - 1));

        queue.add_block(block(u64::MAX));
        queue.add_block(block(u64::MAX - 1));

        assert_eq!(drain(&mut queue), vec![u64::MAX - 1, u64::MAX]);
        assert_eq!(queue.next_block_number(), None);

        queue.add_block(block(0));
        queue.add_block(block(u64::MAX));
        assert!(queue.is_empty());
    }

    #[rstest]
    #[case(&[1, 2, 3, 4, 5])]
    #[case(&[5, 4, 3, 2, 1])]
    #[case(&[2, 4, 1, 5, 3])]
    #[case(&[3, 1, 5, 2, 4])]
    #[case(&[4, 5, 1, 3, 2])]
    fn any_permutation_drains_in_order(#[case] order: &[u64]) {
        let mut queue = OrderedBlockQueue::new(Some(1));

        for &number in order {
            queue.add_block(block(number));
        }

        assert_eq!(drain(&mut queue), vec![1, 2, 3, 4, 5]);
        assert_eq!(queue.next_block_number(), Some(6));
    }

    #[test]
    fn interleaved_add_and_drain() {
        let mut queue = OrderedBlockQueue::new(Some(100));
        let mut delivered = Vec::new();

        for number in [102, 100, 104, 101, 100, 103, 99, 105] {
            queue.add_block(block(number));
            delivered.extend(drain(&mut queue));
        }

        assert_eq!(delivered, (100..=105).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }
}
