use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{QueryFilter, Select};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "Cash")]
    Cash,
    #[sea_orm(string_value = "Cheque")]
    Cheque,
    #[sea_orm(string_value = "NEFT")]
    #[serde(rename = "NEFT")]
    #[strum(serialize = "NEFT")]
    Neft,
    #[sea_orm(string_value = "RTGS")]
    #[serde(rename = "RTGS")]
    #[strum(serialize = "RTGS")]
    Rtgs,
    #[sea_orm(string_value = "UPI")]
    #[serde(rename = "UPI")]
    #[strum(serialize = "UPI")]
    Upi,
}

/// A payment recorded against a purchase order.
///
/// Voiding and deletion are independent flags, not one state enum: a voided
/// payment stays visible with its original amount as a made-then-reversed
/// entry, while a deleted payment is a retracted data-entry error. Both are
/// excluded identically from the valid-payment sums used everywhere else.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Generated `PAY-YYYYMMDD-NNN`, unique across all payments.
    pub reference_number: String,
    pub purchase_order_id: Uuid,
    pub payment_date: DateTime<Utc>,
    pub amount_paid: Decimal,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
    /// Irreversible; there is no un-void.
    pub is_voided: bool,
    pub is_deleted: bool,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::purchase_order::Entity",
        from = "Column::PurchaseOrderId",
        to = "super::purchase_order::Column::Id"
    )]
    PurchaseOrder,
}

impl Related<super::purchase_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PurchaseOrder.def()
    }
}

impl Entity {
    /// Scopes reads to non-deleted payments; voided payments are included
    /// (they remain part of the visible history).
    pub fn find_active() -> Select<Entity> {
        Self::find().filter(Column::IsDeleted.eq(false))
    }

    /// Payments that count toward a purchase order's paid total: neither
    /// deleted nor voided.
    pub fn find_valid() -> Select<Entity> {
        Self::find_active().filter(Column::IsVoided.eq(false))
    }
}

impl ActiveModelBehavior for ActiveModel {}
