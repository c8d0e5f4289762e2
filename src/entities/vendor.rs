use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{QueryFilter, Select};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment terms granted by a vendor, as net days until a purchase order
/// falls due.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum PaymentTerms {
    #[sea_orm(string_value = "DAYS_7")]
    #[serde(rename = "DAYS_7")]
    Days7,
    #[sea_orm(string_value = "DAYS_15")]
    #[serde(rename = "DAYS_15")]
    Days15,
    #[default]
    #[sea_orm(string_value = "DAYS_30")]
    #[serde(rename = "DAYS_30")]
    Days30,
    #[sea_orm(string_value = "DAYS_45")]
    #[serde(rename = "DAYS_45")]
    Days45,
    #[sea_orm(string_value = "DAYS_60")]
    #[serde(rename = "DAYS_60")]
    Days60,
}

impl PaymentTerms {
    /// Net days added to a purchase order's date when deriving its due date.
    pub fn net_days(self) -> i64 {
        match self {
            PaymentTerms::Days7 => 7,
            PaymentTerms::Days15 => 15,
            PaymentTerms::Days30 => 30,
            PaymentTerms::Days45 => 45,
            PaymentTerms::Days60 => 60,
        }
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum VendorStatus {
    #[default]
    #[sea_orm(string_value = "Active")]
    Active,
    #[sea_orm(string_value = "Inactive")]
    Inactive,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "vendors")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Unique among non-deleted vendors.
    pub vendor_name: String,
    pub contact_person: String,
    /// Unique among non-deleted vendors.
    pub email: String,
    pub phone_number: Option<String>,
    pub payment_terms: PaymentTerms,
    pub status: VendorStatus,
    pub is_deleted: bool,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::purchase_order::Entity")]
    PurchaseOrders,
}

impl Related<super::purchase_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PurchaseOrders.def()
    }
}

impl Entity {
    /// Scopes business reads to non-deleted vendors. Soft-deleted rows stay
    /// queryable only through `find()` for audit and reference lookups.
    pub fn find_active() -> Select<Entity> {
        Self::find().filter(Column::IsDeleted.eq(false))
    }
}

impl ActiveModelBehavior for ActiveModel {}
