//! Migration to create auth_cache table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AuthCache::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuthCache::IdTag)
                            .string_len(20)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AuthCache::InfoJson).string().not_null())
                    .col(
                        ColumnDef::new(AuthCache::CachedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AuthCache::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum AuthCache {
    Table,
    IdTag,
    InfoJson,
    CachedAt,
}
