//! Shared financial aggregation over the vendor → purchase orders → payments
//! chain. Vendor detail, the outstanding report, and the dashboard all read
//! through these helpers so the valid-payment reduce logic exists once.

use std::collections::HashMap;

use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    entities::{
        payment, purchase_order,
        purchase_order::PurchaseOrderStatus,
        vendor,
    },
    errors::ServiceError,
};

/// Aggregate financial position of one vendor across its live purchase
/// orders: sum of order totals, sum of valid payments, and the difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorFinancialSnapshot {
    pub total_purchase_orders: u64,
    pub total_po_amount: Decimal,
    pub total_paid_amount: Decimal,
    pub outstanding_amount: Decimal,
}

/// Sum of payment amounts.
pub fn sum_payments(payments: &[payment::Model]) -> Decimal {
    payments.iter().map(|p| p.amount_paid).sum()
}

/// Status a purchase order should hold given its total and the sum of its
/// valid payments. Draft is never changed here: Draft orders are not
/// payment-eligible, so the derived path leaves them alone. Unlike the
/// manual transition table, this may regress PartiallyPaid back to Approved
/// when voiding or deleting payments brings the paid sum to zero.
pub fn derive_status(
    current: PurchaseOrderStatus,
    total_amount: Decimal,
    total_paid: Decimal,
) -> PurchaseOrderStatus {
    if current == PurchaseOrderStatus::Draft {
        return PurchaseOrderStatus::Draft;
    }

    if total_paid >= total_amount {
        PurchaseOrderStatus::FullyPaid
    } else if total_paid > Decimal::ZERO {
        PurchaseOrderStatus::PartiallyPaid
    } else {
        PurchaseOrderStatus::Approved
    }
}

/// Valid (non-deleted, non-voided) payments for one purchase order.
pub async fn valid_payments<C: ConnectionTrait>(
    conn: &C,
    purchase_order_id: Uuid,
) -> Result<Vec<payment::Model>, ServiceError> {
    let payments = payment::Entity::find_valid()
        .filter(payment::Column::PurchaseOrderId.eq(purchase_order_id))
        .all(conn)
        .await?;
    Ok(payments)
}

/// Valid payments for a set of purchase orders, grouped by order id. One
/// query regardless of how many orders are asked about.
pub async fn valid_payments_by_order<C: ConnectionTrait>(
    conn: &C,
    purchase_order_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<payment::Model>>, ServiceError> {
    if purchase_order_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let payments = payment::Entity::find_valid()
        .filter(payment::Column::PurchaseOrderId.is_in(purchase_order_ids.iter().copied()))
        .all(conn)
        .await?;

    let mut grouped: HashMap<Uuid, Vec<payment::Model>> = HashMap::new();
    for p in payments {
        grouped.entry(p.purchase_order_id).or_default().push(p);
    }
    Ok(grouped)
}

fn snapshot_of(
    orders: &[&purchase_order::Model],
    payments: &HashMap<Uuid, Vec<payment::Model>>,
) -> VendorFinancialSnapshot {
    let total_po_amount: Decimal = orders.iter().map(|po| po.total_amount).sum();
    let total_paid_amount: Decimal = orders
        .iter()
        .map(|po| {
            payments
                .get(&po.id)
                .map(|p| sum_payments(p))
                .unwrap_or(Decimal::ZERO)
        })
        .sum();

    VendorFinancialSnapshot {
        total_purchase_orders: orders.len() as u64,
        total_po_amount,
        total_paid_amount,
        outstanding_amount: total_po_amount - total_paid_amount,
    }
}

/// Snapshot of one vendor's live purchase orders and their valid payments.
pub async fn vendor_snapshot<C: ConnectionTrait>(
    conn: &C,
    vendor_id: Uuid,
) -> Result<VendorFinancialSnapshot, ServiceError> {
    let orders = purchase_order::Entity::find_active()
        .filter(purchase_order::Column::VendorId.eq(vendor_id))
        .all(conn)
        .await?;

    let order_ids: Vec<Uuid> = orders.iter().map(|po| po.id).collect();
    let payments = valid_payments_by_order(conn, &order_ids).await?;
    let order_refs: Vec<&purchase_order::Model> = orders.iter().collect();

    Ok(snapshot_of(&order_refs, &payments))
}

/// Per-vendor snapshots for every non-deleted vendor, computed in one pass
/// over three queries.
pub async fn all_vendor_snapshots<C: ConnectionTrait>(
    conn: &C,
) -> Result<Vec<(vendor::Model, VendorFinancialSnapshot)>, ServiceError> {
    let vendors = vendor::Entity::find_active().all(conn).await?;
    let orders = purchase_order::Entity::find_active().all(conn).await?;

    let order_ids: Vec<Uuid> = orders.iter().map(|po| po.id).collect();
    let payments = valid_payments_by_order(conn, &order_ids).await?;

    let mut orders_by_vendor: HashMap<Uuid, Vec<&purchase_order::Model>> = HashMap::new();
    for po in &orders {
        orders_by_vendor.entry(po.vendor_id).or_default().push(po);
    }

    let empty: Vec<&purchase_order::Model> = Vec::new();
    let snapshots = vendors
        .into_iter()
        .map(|v| {
            let vendor_orders = orders_by_vendor.get(&v.id).unwrap_or(&empty);
            let snapshot = snapshot_of(vendor_orders, &payments);
            (v, snapshot)
        })
        .collect();

    Ok(snapshots)
}
