use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Appointments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Appointments::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Appointments::ClinicId).uuid().not_null())
                    .col(ColumnDef::new(Appointments::PatientId).uuid().null())
                    .col(
                        ColumnDef::new(Appointments::Title)
                            .string_len(200)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Appointments::StartsAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Appointments::EndsAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Appointments::Notes).text().null())
                    .col(
                        ColumnDef::new(Appointments::ExternalEventId)
                            .string_len(128)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Appointments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Appointments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_appointments_patient")
                            .from(Appointments::Table, Appointments::PatientId)
                            .to(Patients::Table, Patients::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_appointments_clinic_starts_at")
                    .table(Appointments::Table)
                    .col(Appointments::ClinicId)
                    .col(Appointments::StartsAt)
                    .to_owned(),
            )
            .await?;

        // Linkage to the mirrored Google event
        manager
            .create_index(
                Index::create()
                    .name("idx_appointments_clinic_external_event")
                    .table(Appointments::Table)
                    .col(Appointments::ClinicId)
                    .col(Appointments::ExternalEventId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Appointments::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Appointments {
    Table,
    Id,
    ClinicId,
    PatientId,
    Title,
    StartsAt,
    EndsAt,
    Notes,
    ExternalEventId,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Patients {
    Table,
    Id,
}
