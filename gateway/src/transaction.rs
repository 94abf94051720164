//! Submit flow of a transaction.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::network::Network;
use crate::peer::TransactionId;
use crate::strategies::TxEventHandlerFactory;
use crate::{Error, Result};

/// Submit a transaction and wait for its commit.
///
/// The commit listener is set up before `submit` is polled, so no commit can be
/// missed. If submission fails, listening is cancelled and the submission error
/// is returned. Otherwise the outcome of the event handler created by `factory`
/// decides.
pub async fn submit_transaction<N, F, Fut, T, E>(
    factory: &F,
    transaction_id: TransactionId,
    network: Arc<N>,
    submit: Fut,
) -> Result<T>
where
    N: Network,
    F: TxEventHandlerFactory<N> + ?Sized,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let handler = factory.create_handler(transaction_id.clone(), network)?;

    handler.start_listening().await?;

    let value = match submit.await {
        Ok(value) => value,
        Err(e) => {
            warn!("Submission of transaction {transaction_id} failed: {e}");
            handler.cancel_listening();

            return Err(Error::Submit {
                transaction_id,
                message: e.to_string(),
            });
        }
    };

    debug!("Transaction {transaction_id} submitted, waiting for commit");
    handler.wait_for_events().await?;

    Ok(value)
}
