use std::future::Future;

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Spawn a cancellable task in the current span.
///
/// The task stops at its next await point once `cancellation_token` is cancelled.
#[track_caller]
pub(crate) fn spawn_cancellable<F>(cancellation_token: CancellationToken, future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(
        async move {
            select! {
                // Run branches in order.
                biased;

                _ = cancellation_token.cancelled() => {}
                _ = future => {}
            }
        }
        .in_current_span(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::async_test;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::{sleep, Instant};

    #[async_test]
    async fn runs_to_completion() {
        let now = Instant::now();
        let (tx, rx) = oneshot::channel();

        spawn_cancellable(CancellationToken::new(), async move {
            sleep(Duration::from_millis(10)).await;
            tx.send(()).unwrap();
        });

        rx.await.unwrap();
        assert!(now.elapsed() >= Duration::from_millis(10));
    }

    #[async_test]
    async fn cancel_pending_task() {
        let token = CancellationToken::new();
        let (tx, rx) = oneshot::channel::<()>();

        spawn_cancellable(token.clone(), async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });

        token.cancel();

        // Sender is dropped together with the cancelled task.
        assert!(rx.await.is_err());
    }
}
