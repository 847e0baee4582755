//! Authorization cache entry

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "auth_cache")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id_tag: String,
    /// `IdTagInfo` serialized as JSON.
    pub info_json: String,
    pub cached_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
