use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    clamp_paging,
    clock::Clock,
    db::DbPool,
    entities::{
        payment::{self, Column as PaymentColumn},
        purchase_order::{
            self, Column as PurchaseOrderColumn, Entity as PurchaseOrderEntity,
            Model as PurchaseOrderModel, PurchaseOrderStatus,
        },
        purchase_order_item::{
            self, Column as ItemColumn, Entity as ItemEntity, Model as ItemModel,
        },
        vendor::{
            Column as VendorColumn, Entity as VendorEntity, Model as VendorModel, PaymentTerms,
            VendorStatus,
        },
    },
    errors::ServiceError,
    events::{Event, EventSender},
    numbering::ReferenceNumberGenerator,
    services::finance,
    Page,
};

pub const PO_NUMBER_PREFIX: &str = "PO";

/// Attempts before a number-generation collision is reported as a conflict.
const MAX_NUMBER_ATTEMPTS: usize = 10;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateLineItem {
    #[validate(length(min = 1, max = 240, message = "Item description is required"))]
    pub description: String,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    #[validate(custom = "validate_unit_price")]
    pub unit_price: Decimal,
}

fn validate_unit_price(value: &Decimal) -> Result<(), ValidationError> {
    if *value < dec!(0.01) {
        return Err(ValidationError::new("unit_price_below_minimum"));
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreatePurchaseOrderRequest {
    pub vendor_id: Uuid,
    /// Defaults to the current instant.
    pub po_date: Option<DateTime<Utc>>,
    /// Draft unless Approved is requested explicitly; no other initial
    /// status is accepted.
    pub status: Option<PurchaseOrderStatus>,
    #[validate]
    pub items: Vec<CreateLineItem>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseOrderListQuery {
    pub vendor_id: Option<Uuid>,
    /// Single status or a set of them.
    pub status: Option<Vec<PurchaseOrderStatus>>,
    /// Case-insensitive substring over the PO number.
    pub search: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default = "crate::default_page")]
    pub page: u64,
    #[serde(default = "crate::default_limit")]
    pub limit: u64,
}

impl Default for PurchaseOrderListQuery {
    fn default() -> Self {
        Self {
            vendor_id: None,
            status: None,
            search: None,
            start_date: None,
            end_date: None,
            page: crate::default_page(),
            limit: crate::default_limit(),
        }
    }
}

/// Slim vendor reference carried on list rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorRef {
    pub id: Uuid,
    pub vendor_name: String,
    pub email: String,
}

impl From<&VendorModel> for VendorRef {
    fn from(v: &VendorModel) -> Self {
        Self {
            id: v.id,
            vendor_name: v.vendor_name.clone(),
            email: v.email.clone(),
        }
    }
}

/// List row: the order enriched with read-time payment totals. The totals
/// are always derived, never stored.
#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseOrderSummary {
    pub purchase_order: PurchaseOrderModel,
    pub vendor: Option<VendorRef>,
    pub total_paid: Decimal,
    pub outstanding_amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseOrderDetail {
    pub purchase_order: PurchaseOrderModel,
    pub vendor: VendorModel,
    pub items: Vec<ItemModel>,
    pub total_paid: Decimal,
    pub outstanding_amount: Decimal,
    /// All non-deleted payments including voided ones, newest first.
    pub payment_history: Vec<payment::Model>,
}

/// Purchase order engine: creation with derived totals and due dates, the
/// manual status transition table, and the payment-driven recalculation.
#[derive(Clone)]
pub struct PurchaseOrderService {
    db: Arc<DbPool>,
    clock: Arc<dyn Clock>,
    numbers: Arc<dyn ReferenceNumberGenerator>,
    event_sender: Option<Arc<EventSender>>,
}

impl PurchaseOrderService {
    pub fn new(
        db: Arc<DbPool>,
        clock: Arc<dyn Clock>,
        numbers: Arc<dyn ReferenceNumberGenerator>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            clock,
            numbers,
            event_sender,
        }
    }

    #[instrument(skip(self, request), fields(vendor_id = %request.vendor_id))]
    pub async fn create(
        &self,
        request: CreatePurchaseOrderRequest,
        actor: Uuid,
    ) -> Result<PurchaseOrderDetail, ServiceError> {
        request.validate()?;
        if request.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "At least one line item is required".to_string(),
            ));
        }

        let initial_status = match request.status {
            None | Some(PurchaseOrderStatus::Draft) => PurchaseOrderStatus::Draft,
            Some(PurchaseOrderStatus::Approved) => PurchaseOrderStatus::Approved,
            Some(other) => {
                return Err(ServiceError::ValidationError(format!(
                    "A purchase order cannot be created as {}",
                    other
                )))
            }
        };

        let db = &*self.db;
        let vendor = VendorEntity::find_active()
            .filter(VendorColumn::Id.eq(request.vendor_id))
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Vendor {} not found", request.vendor_id))
            })?;

        if vendor.status == VendorStatus::Inactive {
            return Err(ServiceError::InvalidState(
                "Cannot create purchase order for inactive vendor".to_string(),
            ));
        }

        let now = self.clock.now();
        let po_date = request.po_date.unwrap_or(now);
        let due_date = due_date_for(po_date, vendor.payment_terms);
        let total_amount: Decimal = request
            .items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum();

        let po_number = self.unique_po_number(db).await?;
        let po_id = Uuid::new_v4();

        // The order and its line items land together or not at all.
        let txn = db.begin().await?;

        let created = purchase_order::ActiveModel {
            id: Set(po_id),
            po_number: Set(po_number),
            vendor_id: Set(vendor.id),
            po_date: Set(po_date),
            due_date: Set(due_date),
            total_amount: Set(total_amount),
            status: Set(initial_status),
            is_deleted: Set(false),
            created_by: Set(Some(actor)),
            updated_by: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let stored = purchase_order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                purchase_order_id: Set(po_id),
                description: Set(item.description.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            items.push(stored);
        }

        txn.commit().await?;

        info!(
            purchase_order_id = %created.id,
            po_number = %created.po_number,
            total_amount = %created.total_amount,
            "purchase order created"
        );
        self.emit(Event::PurchaseOrderCreated(created.id)).await;

        let outstanding_amount = created.total_amount;
        Ok(PurchaseOrderDetail {
            purchase_order: created,
            vendor,
            items,
            total_paid: Decimal::ZERO,
            outstanding_amount,
            payment_history: Vec::new(),
        })
    }

    #[instrument(skip(self, query))]
    pub async fn find_all(
        &self,
        query: PurchaseOrderListQuery,
    ) -> Result<Page<PurchaseOrderSummary>, ServiceError> {
        let (page, limit) = clamp_paging(query.page, query.limit);
        let db = &*self.db;

        let mut select =
            PurchaseOrderEntity::find_active().order_by_desc(PurchaseOrderColumn::CreatedAt);

        if let Some(vendor_id) = query.vendor_id {
            select = select.filter(PurchaseOrderColumn::VendorId.eq(vendor_id));
        }
        if let Some(statuses) = query.status.filter(|s| !s.is_empty()) {
            select = select.filter(PurchaseOrderColumn::Status.is_in(statuses));
        }
        if let Some(term) = query.search.as_deref().filter(|t| !t.is_empty()) {
            let pattern = format!("%{}%", term.to_lowercase());
            select = select.filter(
                Expr::expr(Func::lower(Expr::col(PurchaseOrderColumn::PoNumber)))
                    .like(pattern.as_str()),
            );
        }
        if let Some(start) = query.start_date {
            select = select.filter(PurchaseOrderColumn::PoDate.gte(start));
        }
        if let Some(end) = query.end_date {
            select = select.filter(PurchaseOrderColumn::PoDate.lte(end));
        }

        let paginator = select.paginate(db, limit);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        let order_ids: Vec<Uuid> = orders.iter().map(|po| po.id).collect();
        let payments = finance::valid_payments_by_order(db, &order_ids).await?;

        // Vendor references are looked up without the soft-delete scope so a
        // deleted vendor still labels its historical orders.
        let vendor_ids: Vec<Uuid> = orders.iter().map(|po| po.vendor_id).collect();
        let vendors: std::collections::HashMap<Uuid, VendorRef> = if vendor_ids.is_empty() {
            std::collections::HashMap::new()
        } else {
            VendorEntity::find()
                .filter(VendorColumn::Id.is_in(vendor_ids))
                .all(db)
                .await?
                .iter()
                .map(|v| (v.id, VendorRef::from(v)))
                .collect()
        };

        let items = orders
            .into_iter()
            .map(|po| {
                let total_paid = payments
                    .get(&po.id)
                    .map(|p| finance::sum_payments(p))
                    .unwrap_or(Decimal::ZERO);
                let outstanding_amount = po.total_amount - total_paid;
                let vendor = vendors.get(&po.vendor_id).cloned();
                PurchaseOrderSummary {
                    purchase_order: po,
                    vendor,
                    total_paid,
                    outstanding_amount,
                }
            })
            .collect();

        Ok(Page::new(items, total, page, limit))
    }

    #[instrument(skip(self), fields(purchase_order_id = %id))]
    pub async fn find_by_id(&self, id: Uuid) -> Result<PurchaseOrderDetail, ServiceError> {
        let db = &*self.db;

        let po = PurchaseOrderEntity::find_active()
            .filter(PurchaseOrderColumn::Id.eq(id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase Order {} not found", id)))?;

        let vendor = VendorEntity::find_by_id(po.vendor_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Vendor {} missing for purchase order {}",
                    po.vendor_id, po.id
                ))
            })?;

        let items = ItemEntity::find()
            .filter(ItemColumn::PurchaseOrderId.eq(po.id))
            .order_by_asc(ItemColumn::CreatedAt)
            .all(db)
            .await?;

        let payment_history = payment::Entity::find_active()
            .filter(PaymentColumn::PurchaseOrderId.eq(po.id))
            .order_by_desc(PaymentColumn::PaymentDate)
            .all(db)
            .await?;

        let total_paid: Decimal = payment_history
            .iter()
            .filter(|p| !p.is_voided)
            .map(|p| p.amount_paid)
            .sum();
        let outstanding_amount = po.total_amount - total_paid;

        Ok(PurchaseOrderDetail {
            purchase_order: po,
            vendor,
            items,
            total_paid,
            outstanding_amount,
            payment_history,
        })
    }

    /// Manual, user-initiated status change. Validated against the explicit
    /// transition table; never touches payments.
    #[instrument(skip(self), fields(purchase_order_id = %id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        id: Uuid,
        new_status: PurchaseOrderStatus,
        actor: Uuid,
    ) -> Result<PurchaseOrderModel, ServiceError> {
        let db = &*self.db;

        let po = PurchaseOrderEntity::find_active()
            .filter(PurchaseOrderColumn::Id.eq(id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase Order {} not found", id)))?;

        let old_status = po.status;
        if !manual_transition_allowed(old_status, new_status) {
            return Err(ServiceError::InvalidTransition {
                from: old_status.to_string(),
                to: new_status.to_string(),
            });
        }

        let mut active: purchase_order::ActiveModel = po.into();
        active.status = Set(new_status);
        active.updated_by = Set(Some(actor));
        active.updated_at = Set(Some(self.clock.now()));
        let updated = active.update(db).await?;

        info!(
            purchase_order_id = %updated.id,
            old_status = %old_status,
            new_status = %new_status,
            "purchase order status updated"
        );
        self.emit(Event::PurchaseOrderStatusChanged {
            purchase_order_id: updated.id,
            old_status,
            new_status,
        })
        .await;

        Ok(updated)
    }

    /// Derived status recalculation, invoked after every payment create,
    /// void, or delete. See [`recalculate_status_on`].
    pub async fn recalculate_status(
        &self,
        purchase_order_id: Uuid,
    ) -> Result<Option<PurchaseOrderStatus>, ServiceError> {
        recalculate_status_on(&*self.db, purchase_order_id).await
    }

    /// Soft-deletes the order. Payment history is left in place.
    #[instrument(skip(self), fields(purchase_order_id = %id))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db;

        let po = PurchaseOrderEntity::find_active()
            .filter(PurchaseOrderColumn::Id.eq(id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase Order {} not found", id)))?;

        let mut active: purchase_order::ActiveModel = po.into();
        active.is_deleted = Set(true);
        active.updated_at = Set(Some(self.clock.now()));
        active.update(db).await?;

        info!(purchase_order_id = %id, "purchase order soft-deleted");
        self.emit(Event::PurchaseOrderDeleted(id)).await;

        Ok(())
    }

    async fn unique_po_number<C: ConnectionTrait>(&self, conn: &C) -> Result<String, ServiceError> {
        for _ in 0..MAX_NUMBER_ATTEMPTS {
            let candidate = self.numbers.generate(PO_NUMBER_PREFIX, self.clock.now());
            let exists = PurchaseOrderEntity::find()
                .filter(PurchaseOrderColumn::PoNumber.eq(candidate.as_str()))
                .one(conn)
                .await?
                .is_some();
            if !exists {
                return Ok(candidate);
            }
        }
        Err(ServiceError::Conflict(format!(
            "Could not allocate a unique PO number after {} attempts",
            MAX_NUMBER_ATTEMPTS
        )))
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to send purchase order event");
            }
        }
    }
}

/// Recalculates a purchase order's status from its valid payments on the
/// given connection, so payment operations can run it inside their own
/// transaction. Draft orders are left untouched. Writes only when the
/// derived status differs from the stored one; returns the resulting status,
/// or `None` when the order is missing or deleted.
pub async fn recalculate_status_on<C: ConnectionTrait>(
    conn: &C,
    purchase_order_id: Uuid,
) -> Result<Option<PurchaseOrderStatus>, ServiceError> {
    let Some(po) = PurchaseOrderEntity::find_active()
        .filter(PurchaseOrderColumn::Id.eq(purchase_order_id))
        .one(conn)
        .await?
    else {
        return Ok(None);
    };

    let payments = finance::valid_payments(conn, po.id).await?;
    let total_paid = finance::sum_payments(&payments);
    let derived = finance::derive_status(po.status, po.total_amount, total_paid);

    if derived != po.status {
        let old_status = po.status;
        let mut active: purchase_order::ActiveModel = po.into();
        active.status = Set(derived);
        active.update(conn).await?;
        info!(
            purchase_order_id = %purchase_order_id,
            old_status = %old_status,
            new_status = %derived,
            "purchase order status recalculated"
        );
    }

    Ok(Some(derived))
}

/// The explicit transition table for user-initiated status changes. The
/// derived recalculation path deliberately bypasses this table.
fn manual_transition_allowed(from: PurchaseOrderStatus, to: PurchaseOrderStatus) -> bool {
    use PurchaseOrderStatus::*;
    matches!(
        (from, to),
        (Draft, Approved)
            | (Approved, PartiallyPaid)
            | (Approved, FullyPaid)
            | (PartiallyPaid, FullyPaid)
    )
}

fn due_date_for(po_date: DateTime<Utc>, terms: PaymentTerms) -> DateTime<Utc> {
    po_date + Duration::days(terms.net_days())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use PurchaseOrderStatus::*;

    #[rstest]
    #[case(Draft, Approved, true)]
    #[case(Approved, PartiallyPaid, true)]
    #[case(Approved, FullyPaid, true)]
    #[case(PartiallyPaid, FullyPaid, true)]
    #[case(Draft, PartiallyPaid, false)]
    #[case(Draft, FullyPaid, false)]
    #[case(Approved, Draft, false)]
    #[case(PartiallyPaid, Approved, false)]
    #[case(PartiallyPaid, Draft, false)]
    #[case(FullyPaid, Draft, false)]
    #[case(FullyPaid, Approved, false)]
    #[case(FullyPaid, PartiallyPaid, false)]
    #[case(Draft, Draft, false)]
    #[case(FullyPaid, FullyPaid, false)]
    fn manual_transition_table(
        #[case] from: PurchaseOrderStatus,
        #[case] to: PurchaseOrderStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(manual_transition_allowed(from, to), allowed);
    }

    #[test]
    fn due_date_adds_net_days_exactly() {
        let po_date = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            due_date_for(po_date, PaymentTerms::Days30),
            Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap()
        );
        assert_eq!(
            due_date_for(po_date, PaymentTerms::Days7),
            Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn unit_price_floor_is_one_cent() {
        assert!(validate_unit_price(&dec!(0.01)).is_ok());
        assert!(validate_unit_price(&dec!(0.009)).is_err());
        assert!(validate_unit_price(&Decimal::ZERO).is_err());
    }
}
