//! Migration to create config_entries table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ConfigEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConfigEntries::Key)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ConfigEntries::Value).string().not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ConfigEntries::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ConfigEntries {
    Table,
    Key,
    Value,
}
