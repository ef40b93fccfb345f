//! The transient log-reader task: at most one running per host at any time.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::collaborators::Agent;
use crate::error::PeerError;
use crate::model::EntryValue;
use crate::model::LogEntry;
use crate::revision::Seqno;

/// What a reader delivers back to the host on success: the entries relevant to this RSM,
/// filtered and capped to `batch_size`, and the seqno up to which the log was actually
/// scanned (which may be short of `available_seqno` if the batch cap was hit).
pub struct ReaderDelivery<C> {
    pub high_seqno: Seqno,
    pub entries: Vec<LogEntry<C>>,
}

/// Spawn a one-shot task that fetches the log past `read_seqno`, filters it down to the
/// entries this RSM instance cares about, and returns at most `batch_size` of them.
///
/// A panic inside the task surfaces as a `JoinError` to the caller; an [`Agent`] error
/// surfaces as `Err(PeerError)`. The host treats both as fatal, per the reader-crash
/// invariant: there is no partial-progress retry here, a supervisor restarts the host.
pub fn spawn_reader<C>(
    agent: Arc<dyn Agent<C>>,
    name: String,
    read_seqno: Seqno,
    available_seqno: Seqno,
    batch_size: usize,
) -> JoinHandle<Result<ReaderDelivery<C>, PeerError>>
where
    C: Send + Sync + 'static,
{
    tokio::spawn(async move {
        let raw = agent.get_log(read_seqno).await?;
        let mut entries: Vec<LogEntry<C>> = raw
            .into_iter()
            .filter(|e| e.seqno > read_seqno && e.seqno <= available_seqno)
            .filter(|e| match &e.value {
                EntryValue::RsmCommand { rsm_name, .. } => rsm_name == &name,
                EntryValue::ConfigEntry(_) => true,
            })
            .collect();
        entries.sort_by_key(|e| e.seqno);

        let high_seqno = if entries.len() > batch_size {
            let capped = entries.split_off(batch_size);
            let high = entries.last().map(|e| e.seqno).unwrap_or(read_seqno);
            drop(capped);
            high
        } else {
            available_seqno
        };

        Ok(ReaderDelivery { high_seqno, entries })
    })
}

/// Await an in-flight reader if one exists, otherwise never resolve. Meant to be used
/// directly inside a `tokio::select!` branch each time the host's main loop iterates.
pub async fn poll_reader<C>(
    reader: &mut Option<JoinHandle<Result<ReaderDelivery<C>, PeerError>>>,
) -> Result<Result<ReaderDelivery<C>, PeerError>, tokio::task::JoinError>
where
    C: Send + Sync + 'static,
{
    match reader {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
