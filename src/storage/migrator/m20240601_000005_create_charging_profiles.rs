//! Migration to create charging_profiles table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChargingProfiles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChargingProfiles::ProfileId)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ChargingProfiles::ConnectorId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChargingProfiles::Purpose)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChargingProfiles::ProfileJson)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChargingProfiles::InstalledAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_charging_profiles_connector")
                    .table(ChargingProfiles::Table)
                    .col(ChargingProfiles::ConnectorId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ChargingProfiles::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ChargingProfiles {
    Table,
    ProfileId,
    ConnectorId,
    Purpose,
    ProfileJson,
    InstalledAt,
}
