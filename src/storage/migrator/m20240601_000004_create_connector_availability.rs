//! Migration to create connector_availability table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ConnectorAvailability::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConnectorAvailability::ConnectorId)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ConnectorAvailability::Operative)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ConnectorAvailability::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ConnectorAvailability {
    Table,
    ConnectorId,
    Operative,
}
