use std::sync::Arc;

use futures::StreamExt;
use ledger_gateway::test_utils::MockBlockSource;
use ledger_gateway::{
    BlockListenerOptions, BlockNotification, BlockSubscription, Checkpointer, FileCheckpointer,
};
use tempfile::TempDir;

fn blocks(numbers: impl IntoIterator<Item = u64>) -> Vec<BlockNotification> {
    numbers
        .into_iter()
        .map(|n| BlockNotification::new(n, format!("block {n}")))
        .collect()
}

#[tokio::test]
async fn restart_resumes_after_checkpoint() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("checkpoint.json");

    // First session takes blocks 5..=7 and stops.
    {
        let checkpointer = Arc::new(FileCheckpointer::open(&path).await.unwrap());
        let source = Arc::new(MockBlockSource::new());
        let options = BlockListenerOptions::new()
            .with_start_block(5)
            .with_checkpointer(checkpointer.clone());

        let mut subscription = BlockSubscription::start(source.clone(), options)
            .await
            .unwrap();
        assert_eq!(source.subscribed_start(), Some(Some(5)));

        source.emit_all(blocks([7, 5, 9, 6, 8]));

        for expected in 5..=7 {
            let block = subscription.next().await.unwrap().unwrap();
            assert_eq!(block.block_number, expected);
            assert_eq!(block.payload, format!("block {expected}").into_bytes());
        }
        subscription.checkpoint().await.unwrap();

        assert_eq!(checkpointer.block_number().await.unwrap(), Some(7));
    }

    // Second session replays from the checkpoint, ignoring the configured start.
    let checkpointer = Arc::new(FileCheckpointer::open(&path).await.unwrap());
    let source = Arc::new(MockBlockSource::new());
    let options = BlockListenerOptions::new()
        .with_start_block(5)
        .with_checkpointer(checkpointer.clone());

    let subscription = BlockSubscription::start(source.clone(), options)
        .await
        .unwrap();
    assert_eq!(source.subscribed_start(), Some(Some(8)));

    source.emit_all(blocks([10, 6, 9, 8, 7, 11]));
    source.close();

    let numbers: Vec<_> = subscription
        .into_stream()
        .map(|block| block.unwrap().block_number)
        .collect()
        .await;

    assert_eq!(numbers, vec![8, 9, 10, 11]);
    assert_eq!(checkpointer.block_number().await.unwrap(), Some(11));
    assert_eq!(source.unsubscribed().len(), 1);
}

#[tokio::test]
async fn blocks_from_concurrent_producers() {
    let source = Arc::new(MockBlockSource::new());
    let mut subscription = BlockSubscription::start(source.clone(), BlockListenerOptions::new().with_start_block(0))
        .await
        .unwrap();

    let producers: Vec<_> = (0..4u64)
        .map(|producer| {
            let source = source.clone();
            tokio::spawn(async move {
                // Each producer sends every fourth block, backwards.
                let numbers: Vec<_> = (0..100u64).rev().filter(|n| n % 4 == producer).collect();
                source.emit_all(blocks(numbers));
            })
        })
        .collect();

    for producer in producers {
        producer.await.unwrap();
    }

    for expected in 0..100 {
        let block = subscription.next().await.unwrap().unwrap();
        assert_eq!(block.block_number, expected);
    }
    assert_eq!(subscription.next_block_number(), Some(100));
}
