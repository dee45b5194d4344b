//! First-error-cancels fan-in over per-stage error channels.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use dataflow_shared::{DataflowError, Result};

/// Receiving end of one stage's error channel.
pub type ErrorStream = mpsc::Receiver<DataflowError>;

/// Capacity of each stage's error channel.
pub(crate) const ERROR_BUFFER: usize = 16;

/// Merge stage error streams into one.
///
/// One forwarder task drains each stream. The first forwarder to read an
/// error pushes it onto the merged stream and then cancels `cancel`; every
/// other forwarder stops at that point. The merged stream closes once all
/// forwarders have returned, so a clean close means no stage reported an
/// error.
pub fn merge_errors(cancel: CancellationToken, streams: Vec<ErrorStream>) -> ErrorStream {
    // Each forwarder sends at most once, so sends never wait.
    let (tx, rx) = mpsc::channel(streams.len().max(1));

    for (stage, mut stream) in streams.into_iter().enumerate() {
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let first = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = stream.recv() => next,
            };
            if let Some(err) = first {
                debug!(stage, error = %err, "stage reported error, cancelling run");
                let _ = tx.send(err).await;
                cancel.cancel();
            }
        });
    }

    rx
}

/// Block until the merged stream yields its first error or closes.
///
/// A close caused by cancellation from outside the fan-in is reported as
/// [`DataflowError::Cancelled`].
pub async fn wait_for_first_error(cancel: &CancellationToken, mut merged: ErrorStream) -> Result<()> {
    match merged.recv().await {
        Some(err) => Err(err),
        None if cancel.is_cancelled() => Err(DataflowError::Cancelled),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> (mpsc::Sender<DataflowError>, ErrorStream) {
        mpsc::channel(ERROR_BUFFER)
    }

    #[tokio::test]
    async fn all_closed_without_errors_is_success() {
        let cancel = CancellationToken::new();
        let (a_tx, a) = stream();
        let (b_tx, b) = stream();
        drop(a_tx);
        drop(b_tx);

        let merged = merge_errors(cancel.clone(), vec![a, b]);
        wait_for_first_error(&cancel, merged).await.unwrap();
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn no_streams_closes_immediately() {
        let cancel = CancellationToken::new();
        let merged = merge_errors(cancel.clone(), Vec::new());
        wait_for_first_error(&cancel, merged).await.unwrap();
    }

    #[tokio::test]
    async fn first_error_is_returned_and_cancels() {
        let cancel = CancellationToken::new();
        let (a_tx, a) = stream();
        let (_b_tx, b) = stream();

        let merged = merge_errors(cancel.clone(), vec![a, b]);
        a_tx.send(DataflowError::Store("disk full".into()))
            .await
            .unwrap();

        let err = wait_for_first_error(&cancel, merged).await.unwrap_err();
        assert!(matches!(err, DataflowError::Store(ref m) if m == "disk full"));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn later_errors_on_same_stream_are_dropped() {
        let cancel = CancellationToken::new();
        let (tx, rx) = stream();
        tx.send(DataflowError::validation("Title must not be empty."))
            .await
            .unwrap();
        tx.send(DataflowError::Cache("timeout".into())).await.unwrap();
        drop(tx);

        let mut merged = merge_errors(cancel.clone(), vec![rx]);
        assert!(matches!(
            merged.recv().await,
            Some(DataflowError::Validation { .. })
        ));
        assert!(merged.recv().await.is_none());
    }

    #[tokio::test]
    async fn outside_cancellation_reports_cancelled() {
        let cancel = CancellationToken::new();
        let (_tx, rx) = stream();

        let merged = merge_errors(cancel.clone(), vec![rx]);
        cancel.cancel();

        let err = wait_for_first_error(&cancel, merged).await.unwrap_err();
        assert!(matches!(err, DataflowError::Cancelled));
    }
}
