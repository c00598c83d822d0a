use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Cache of externally sourced events, keyed by the external event
        // id so a re-import updates instead of duplicating
        manager
            .create_table(
                Table::create()
                    .table(ImportedEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ImportedEvents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ImportedEvents::ClinicId).uuid().not_null())
                    .col(
                        ColumnDef::new(ImportedEvents::ExternalEventId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ImportedEvents::AppointmentId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ImportedEvents::ImportedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ImportedEvents::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_imported_events_appointment")
                            .from(ImportedEvents::Table, ImportedEvents::AppointmentId)
                            .to(Appointments::Table, Appointments::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_imported_events_clinic_external_event")
                    .table(ImportedEvents::Table)
                    .col(ImportedEvents::ClinicId)
                    .col(ImportedEvents::ExternalEventId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ImportedEvents::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ImportedEvents {
    Table,
    Id,
    ClinicId,
    ExternalEventId,
    AppointmentId,
    ImportedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Appointments {
    Table,
    Id,
}
