//! Generator Trait
//!
//! Contract between the relay and whatever produces text. A subscription is
//! a bounded channel of [`StreamEvent`]s: zero or more fragments, then one
//! terminal event. The channel capacity is the backpressure window; a
//! producer awaiting `send` is a producer that has been told the client is
//! not ready for more.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::UpstreamFailure;

/// One event on a generator subscription
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// One fragment of generated text, in arrival order
    Fragment(String),
    /// Generation finished; no further events follow
    Done,
    /// Generation failed; raised at most once, no further events follow
    Failed(String),
}

/// A source of incrementally generated text
///
/// # Cancellation
///
/// Dropping the subscription receiver cancels the subscription.
/// Implementations must notice closure promptly (select on
/// [`mpsc::Sender::closed`], not merely on a failed send) and stop producing,
/// releasing whatever upstream resources feed the stream.
#[async_trait]
pub trait TextGenerator: Send + Sync + 'static {
    /// Generator name for log lines
    fn name(&self) -> &str;

    /// Whether the generator looks reachable. Advisory only; callers log
    /// and carry on either way.
    async fn health_check(&self) -> bool;

    /// Open a subscription for `prompt`
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamFailure`] when the subscription cannot be opened at
    /// all. Failures after the subscription is open arrive in-band as
    /// [`StreamEvent::Failed`].
    async fn subscribe(&self, prompt: &str) -> Result<mpsc::Receiver<StreamEvent>, UpstreamFailure>;
}
