//! `SeaORM` Entity for the import_jobs table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "import_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub kind: String,
    pub file_name: String,
    /// Raw upload, kept so the run phase replays the exact validated input
    #[serde(skip_serializing)]
    pub content: String,
    pub content_hash: String,
    /// Hash captured at validate time; run refuses to proceed when the
    /// current content no longer matches it
    pub validated_hash: Option<String>,
    pub status: String,
    pub total_rows: i32,
    pub ok_rows: i32,
    pub warning_rows: i32,
    pub error_rows: i32,
    pub to_create: i32,
    pub to_update: i32,
    pub created_count: i32,
    pub updated_count: i32,
    pub skipped_count: i32,
    pub failed_count: i32,
    #[sea_orm(column_type = "JsonBinary")]
    pub samples: Option<Json>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
