use async_trait::async_trait;

use crate::{domain::Notification, Result};

/// The messaging sink whose acceptance gates the dedup mark.
///
/// Implementations must be safe for concurrent sends from every feed group
/// task. Any `Err` means "not delivered".
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_item(&self, notification: &Notification) -> Result<()>;
}
