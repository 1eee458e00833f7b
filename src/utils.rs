//! Bounded waits over lazily-produced values.
//!
//! Several places in the runtime have to wait for an asynchronous side
//! effect to become visible in the local store: the decrypted body of an
//! encrypted message, or the membership state of a room that was just
//! received in an invite. These are exposed as streams of snapshots; this
//! module waits for the first snapshot matching a predicate, bounded by a
//! deadline.

use std::time::Duration;

use futures::{Stream, StreamExt, future, pin_mut};

/// Default deadline for [`first_with_timeout`].
pub const DEFAULT_WAIT: Duration = Duration::from_millis(3000);

/// Returns the first element of `stream` satisfying `predicate`, or `None`
/// if no such element is produced within [`DEFAULT_WAIT`].
///
/// The wait suspends only the calling task; other tasks keep running. The
/// stream is dropped as soon as a match is found or the deadline elapses,
/// which cancels the underlying subscription.
pub async fn first_with_timeout<S, P>(stream: S, predicate: P) -> Option<S::Item>
where
    S: Stream,
    P: FnMut(&S::Item) -> bool,
{
    first_with_custom_timeout(stream, DEFAULT_WAIT, predicate).await
}

/// Same as [`first_with_timeout`] with an explicit deadline.
pub async fn first_with_custom_timeout<S, P>(
    stream: S,
    timeout: Duration,
    mut predicate: P,
) -> Option<S::Item>
where
    S: Stream,
    P: FnMut(&S::Item) -> bool,
{
    let matches = stream.filter(|item| future::ready(predicate(item)));
    pin_mut!(matches);

    tokio::time::timeout(timeout, matches.next())
        .await
        .ok()
        .flatten()
}
