//! `SeaORM` Entity for the sync_conflicts table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_conflicts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub entity_type: String,
    pub external_id: String,
    pub internal_id: Option<Uuid>,
    pub reason: String,
    pub source_of_truth: String,
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: Option<Json>,
    pub status: String,
    pub resolution: Option<String>,
    pub detected_at: DateTimeWithTimeZone,
    pub resolved_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
