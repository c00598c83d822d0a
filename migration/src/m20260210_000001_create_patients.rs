use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Patients::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Patients::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Patients::ClinicId).uuid().not_null())
                    .col(
                        ColumnDef::new(Patients::LastName)
                            .string_len(120)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Patients::FirstName)
                            .string_len(120)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Patients::DateOfBirth).date().not_null())
                    .col(ColumnDef::new(Patients::Sex).string_len(1).null())
                    .col(ColumnDef::new(Patients::Phone).string_len(40).null())
                    .col(ColumnDef::new(Patients::Email).string_len(254).null())
                    .col(ColumnDef::new(Patients::FileNumber).string_len(64).null())
                    .col(ColumnDef::new(Patients::NationalId).string_len(64).null())
                    .col(ColumnDef::new(Patients::Address).text().null())
                    .col(ColumnDef::new(Patients::PostalCode).string_len(16).null())
                    .col(ColumnDef::new(Patients::City).string_len(120).null())
                    .col(ColumnDef::new(Patients::Country).string_len(120).null())
                    .col(
                        ColumnDef::new(Patients::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Patients::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // File numbers are the clinic's own chart numbering; unique when present
        manager
            .create_index(
                Index::create()
                    .name("idx_patients_clinic_file_number")
                    .table(Patients::Table)
                    .col(Patients::ClinicId)
                    .col(Patients::FileNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Fallback natural key used by the CSV importer
        manager
            .create_index(
                Index::create()
                    .name("idx_patients_clinic_name_dob")
                    .table(Patients::Table)
                    .col(Patients::ClinicId)
                    .col(Patients::LastName)
                    .col(Patients::FirstName)
                    .col(Patients::DateOfBirth)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Patients::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Patients {
    Table,
    Id,
    ClinicId,
    LastName,
    FirstName,
    DateOfBirth,
    Sex,
    Phone,
    Email,
    FileNumber,
    NationalId,
    Address,
    PostalCode,
    City,
    Country,
    CreatedAt,
    UpdatedAt,
}
