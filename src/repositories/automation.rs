//! Automation repository

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::models::automation::{self, Entity as Automation};

#[derive(Debug, Clone)]
pub struct AutomationRepository {
    pub db: Arc<DatabaseConnection>,
}

impl AutomationRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        owner_user_id: &Uuid,
        name: &str,
        active: bool,
    ) -> Result<automation::Model> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let model = automation::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner_user_id: Set(*owner_user_id),
            name: Set(name.to_string()),
            active: Set(active),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(model.insert(&*self.db).await?)
    }

    pub async fn find_for_owner(
        &self,
        owner_user_id: &Uuid,
        id: &Uuid,
    ) -> Result<Option<automation::Model>> {
        Ok(Automation::find_by_id(*id)
            .filter(automation::Column::OwnerUserId.eq(*owner_user_id))
            .one(&*self.db)
            .await?)
    }

    pub async fn list_by_owner(&self, owner_user_id: &Uuid) -> Result<Vec<automation::Model>> {
        Ok(Automation::find()
            .filter(automation::Column::OwnerUserId.eq(*owner_user_id))
            .order_by_asc(automation::Column::CreatedAt)
            .order_by_asc(automation::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// The automation that receives the owner's inbound DMs: oldest active first.
    pub async fn first_active_for_owner(
        &self,
        owner_user_id: &Uuid,
    ) -> Result<Option<automation::Model>> {
        Ok(Automation::find()
            .filter(automation::Column::OwnerUserId.eq(*owner_user_id))
            .filter(automation::Column::Active.eq(true))
            .order_by_asc(automation::Column::CreatedAt)
            .order_by_asc(automation::Column::Id)
            .one(&*self.db)
            .await?)
    }

    /// Renames and/or toggles an automation; `None` when it is not the owner's.
    pub async fn update_for_owner(
        &self,
        owner_user_id: &Uuid,
        id: &Uuid,
        name: Option<String>,
        active: Option<bool>,
    ) -> Result<Option<automation::Model>> {
        let Some(existing) = self.find_for_owner(owner_user_id, id).await? else {
            return Ok(None);
        };

        let mut model: automation::ActiveModel = existing.into();
        if let Some(name) = name {
            model.name = Set(name);
        }
        if let Some(active) = active {
            model.active = Set(active);
        }
        model.updated_at = Set(Utc::now().into());

        Ok(Some(model.update(&*self.db).await?))
    }

    pub async fn delete_for_owner(&self, owner_user_id: &Uuid, id: &Uuid) -> Result<bool> {
        let result = Automation::delete_many()
            .filter(automation::Column::Id.eq(*id))
            .filter(automation::Column::OwnerUserId.eq(*owner_user_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
