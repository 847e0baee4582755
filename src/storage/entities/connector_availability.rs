//! Persisted per-connector availability

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connector_availability")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub connector_id: i32,
    pub operative: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
