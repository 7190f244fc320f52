//! Message repository
//!
//! Messages are only ever inserted and listed.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::models::message::{self, Entity as Message, MessageDirection};

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub automation_id: Uuid,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: String,
    pub direction: MessageDirection,
    pub platform_message_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MessageRepository {
    pub db: Arc<DatabaseConnection>,
}

impl MessageRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn record(&self, new: NewMessage) -> Result<message::Model> {
        let model = message::ActiveModel {
            id: Set(Uuid::new_v4()),
            automation_id: Set(new.automation_id),
            sender_id: Set(new.sender_id),
            receiver_id: Set(new.receiver_id),
            text: Set(new.text),
            direction: Set(new.direction.as_str().to_string()),
            platform_message_id: Set(new.platform_message_id),
            created_at: Set(Utc::now().into()),
        };
        Ok(model.insert(&*self.db).await?)
    }

    /// Lists an automation's messages oldest first.
    pub async fn list_by_automation(
        &self,
        automation_id: &Uuid,
        limit: u64,
    ) -> Result<Vec<message::Model>> {
        Ok(Message::find()
            .filter(message::Column::AutomationId.eq(*automation_id))
            .order_by_asc(message::Column::CreatedAt)
            .order_by_asc(message::Column::Id)
            .limit(limit)
            .all(&*self.db)
            .await?)
    }

    pub async fn count_by_direction(
        &self,
        automation_id: &Uuid,
        direction: MessageDirection,
    ) -> Result<u64> {
        Ok(Message::find()
            .filter(message::Column::AutomationId.eq(*automation_id))
            .filter(message::Column::Direction.eq(direction.as_str()))
            .count(&*self.db)
            .await?)
    }
}
