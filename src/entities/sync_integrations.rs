//! `SeaORM` Entity for the sync_integrations table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_integrations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub provider: String,
    pub enabled: bool,
    pub calendar_id: Option<String>,
    pub calendar_name: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTimeWithTimeZone>,
    /// CSRF token for a pending OAuth connect; cleared on callback
    #[serde(skip_serializing)]
    pub oauth_state: Option<String>,
    pub last_synced_at: Option<DateTimeWithTimeZone>,
    pub last_error: Option<String>,
    pub error_count: i32,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
