use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per clinic+provider, created on OAuth connect and
        // deleted on disconnect
        manager
            .create_table(
                Table::create()
                    .table(SyncIntegrations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncIntegrations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncIntegrations::ClinicId).uuid().not_null())
                    .col(
                        ColumnDef::new(SyncIntegrations::Provider)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncIntegrations::Enabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SyncIntegrations::CalendarId)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncIntegrations::CalendarName)
                            .string_len(255)
                            .null(),
                    )
                    .col(ColumnDef::new(SyncIntegrations::AccessToken).text().null())
                    .col(ColumnDef::new(SyncIntegrations::RefreshToken).text().null())
                    .col(
                        ColumnDef::new(SyncIntegrations::TokenExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncIntegrations::OauthState)
                            .string_len(64)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncIntegrations::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncIntegrations::LastError).text().null())
                    .col(
                        ColumnDef::new(SyncIntegrations::ErrorCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncIntegrations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncIntegrations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_integrations_clinic_provider")
                    .table(SyncIntegrations::Table)
                    .col(SyncIntegrations::ClinicId)
                    .col(SyncIntegrations::Provider)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // The OAuth callback arrives without a tenant header; the state
        // parameter is the only lookup key
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_integrations_oauth_state")
                    .table(SyncIntegrations::Table)
                    .col(SyncIntegrations::OauthState)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncIntegrations::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum SyncIntegrations {
    Table,
    Id,
    ClinicId,
    Provider,
    Enabled,
    CalendarId,
    CalendarName,
    AccessToken,
    RefreshToken,
    TokenExpiresAt,
    OauthState,
    LastSyncedAt,
    LastError,
    ErrorCount,
    CreatedAt,
    UpdatedAt,
}
