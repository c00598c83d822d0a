use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ImportJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ImportJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ImportJobs::ClinicId).uuid().not_null())
                    .col(ColumnDef::new(ImportJobs::Kind).string_len(32).not_null())
                    .col(
                        ColumnDef::new(ImportJobs::FileName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(ImportJobs::Content).text().not_null())
                    .col(
                        ColumnDef::new(ImportJobs::ContentHash)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ImportJobs::ValidatedHash)
                            .string_len(64)
                            .null(),
                    )
                    .col(ColumnDef::new(ImportJobs::Status).string_len(16).not_null())
                    .col(
                        ColumnDef::new(ImportJobs::TotalRows)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ImportJobs::OkRows)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ImportJobs::WarningRows)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ImportJobs::ErrorRows)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ImportJobs::ToCreate)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ImportJobs::ToUpdate)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ImportJobs::CreatedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ImportJobs::UpdatedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ImportJobs::SkippedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ImportJobs::FailedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ImportJobs::Samples).json_binary().null())
                    .col(
                        ColumnDef::new(ImportJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ImportJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_import_jobs_clinic_created_at")
                    .table(ImportJobs::Table)
                    .col(ImportJobs::ClinicId)
                    .col(ImportJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ImportJobs::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ImportJobs {
    Table,
    Id,
    ClinicId,
    Kind,
    FileName,
    Content,
    ContentHash,
    ValidatedHash,
    Status,
    TotalRows,
    OkRows,
    WarningRows,
    ErrorRows,
    ToCreate,
    ToUpdate,
    CreatedCount,
    UpdatedCount,
    SkippedCount,
    FailedCount,
    Samples,
    CreatedAt,
    UpdatedAt,
}
