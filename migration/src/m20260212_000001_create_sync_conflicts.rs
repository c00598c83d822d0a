use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Audit trail of detected divergences; rows are never deleted,
        // only moved between open/resolved/ignored
        manager
            .create_table(
                Table::create()
                    .table(SyncConflicts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncConflicts::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncConflicts::ClinicId).uuid().not_null())
                    .col(
                        ColumnDef::new(SyncConflicts::EntityType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncConflicts::ExternalId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(ColumnDef::new(SyncConflicts::InternalId).uuid().null())
                    .col(
                        ColumnDef::new(SyncConflicts::Reason)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncConflicts::SourceOfTruth)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(SyncConflicts::Payload).json_binary().null())
                    .col(
                        ColumnDef::new(SyncConflicts::Status)
                            .string_len(16)
                            .not_null()
                            .default("open"),
                    )
                    .col(ColumnDef::new(SyncConflicts::Resolution).text().null())
                    .col(
                        ColumnDef::new(SyncConflicts::DetectedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncConflicts::ResolvedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_conflicts_clinic_status")
                    .table(SyncConflicts::Table)
                    .col(SyncConflicts::ClinicId)
                    .col(SyncConflicts::Status)
                    .to_owned(),
            )
            .await?;

        // Dedup key for idempotent conflict creation
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_conflicts_clinic_external_reason")
                    .table(SyncConflicts::Table)
                    .col(SyncConflicts::ClinicId)
                    .col(SyncConflicts::ExternalId)
                    .col(SyncConflicts::Reason)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncConflicts::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum SyncConflicts {
    Table,
    Id,
    ClinicId,
    EntityType,
    ExternalId,
    InternalId,
    Reason,
    SourceOfTruth,
    Payload,
    Status,
    Resolution,
    DetectedAt,
    ResolvedAt,
}
