//! Seams to the outside world.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::PushMessage;

/// One endpoint able to deliver a message into a chat group.
///
/// Several equivalent endpoints may be configured; the dispatcher tries them
/// in order until one reports success.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs ("telegram", "webhook:ops").
    fn name(&self) -> &str;

    /// Deliver `message` to the chat group it is addressed to.
    async fn send(&self, message: &PushMessage) -> Result<()>;
}
