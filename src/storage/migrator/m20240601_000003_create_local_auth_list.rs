//! Migration to create local_auth_list table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(LocalAuthList::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LocalAuthList::IdTag)
                            .string_len(20)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(LocalAuthList::InfoJson).string().not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(LocalAuthList::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum LocalAuthList {
    Table,
    IdTag,
    InfoJson,
}
