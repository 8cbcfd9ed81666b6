//! Notification inbox reads.

use std::sync::Arc;

use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::repos::NotificationsRepo;
use crate::domain::notifications::NotificationRecord;

pub struct NotificationService {
    notifications: Arc<dyn NotificationsRepo>,
}

impl NotificationService {
    pub fn new(notifications: Arc<dyn NotificationsRepo>) -> Self {
        Self { notifications }
    }

    pub async fn list(
        &self,
        user_id: Uuid,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>, AppError> {
        Ok(self.notifications.list_notifications(user_id, limit).await?)
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<u64, AppError> {
        Ok(self.notifications.unread_count(user_id).await?)
    }

    /// Errors with a conflict when there is nothing unread, so clients can
    /// tell an effective call from a redundant one.
    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<u64, AppError> {
        let flipped = self.notifications.mark_all_read(user_id).await?;
        if flipped == 0 {
            return Err(AppError::conflict("no unread notifications"));
        }
        Ok(flipped)
    }
}
