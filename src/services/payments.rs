use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    clamp_paging,
    clock::Clock,
    db::DbPool,
    entities::{
        payment::{
            self, Column as PaymentColumn, Entity as PaymentEntity, Model as PaymentModel,
            PaymentMethod,
        },
        purchase_order::{
            Column as PurchaseOrderColumn, Entity as PurchaseOrderEntity,
            Model as PurchaseOrderModel, PurchaseOrderStatus,
        },
        purchase_order_item::{Column as ItemColumn, Entity as ItemEntity, Model as ItemModel},
        vendor::{Column as VendorColumn, Entity as VendorEntity, Model as VendorModel, VendorStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    numbering::ReferenceNumberGenerator,
    services::{finance, purchase_orders::recalculate_status_on, purchase_orders::VendorRef},
    Page,
};

pub const PAYMENT_REFERENCE_PREFIX: &str = "PAY";

const MAX_NUMBER_ATTEMPTS: usize = 10;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    pub purchase_order_id: Uuid,
    /// Defaults to the current instant.
    pub payment_date: Option<DateTime<Utc>>,
    /// Must be positive and within the order's outstanding balance; checked
    /// against the ledger, not by field validation.
    pub amount_paid: Decimal,
    pub payment_method: PaymentMethod,
    #[validate(length(max = 1000, message = "Notes are limited to 1000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentListQuery {
    pub purchase_order_id: Option<Uuid>,
    pub payment_method: Option<PaymentMethod>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default = "crate::default_page")]
    pub page: u64,
    #[serde(default = "crate::default_limit")]
    pub limit: u64,
}

impl Default for PaymentListQuery {
    fn default() -> Self {
        Self {
            purchase_order_id: None,
            payment_method: None,
            start_date: None,
            end_date: None,
            page: crate::default_page(),
            limit: crate::default_limit(),
        }
    }
}

/// Slim purchase order reference carried on list rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseOrderRef {
    pub id: Uuid,
    pub po_number: String,
    pub total_amount: Decimal,
    pub vendor: Option<VendorRef>,
}

/// List row: a payment with its order for context.
#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub payment: PaymentModel,
    pub purchase_order: Option<PurchaseOrderRef>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentDetail {
    pub payment: PaymentModel,
    pub purchase_order: PurchaseOrderModel,
    pub vendor: VendorModel,
    pub items: Vec<ItemModel>,
    /// Sibling valid payments of the same order, oldest first.
    pub related_payments: Vec<PaymentModel>,
}

/// Payment ledger: records, voids, and deletes payments against purchase
/// orders, keeping each order's status consistent with its valid payments.
/// Every mutation runs the status recalculation inside the same database
/// transaction, so a payment is never observable without its order
/// reflecting it.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
    clock: Arc<dyn Clock>,
    numbers: Arc<dyn ReferenceNumberGenerator>,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentService {
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

    #[instrument(
        skip(self, request),
        fields(purchase_order_id = %request.purchase_order_id, amount = %request.amount_paid)
    )]
    pub async fn create(
        &self,
        request: CreatePaymentRequest,
        actor: Uuid,
    ) -> Result<PaymentModel, ServiceError> {
        request.validate()?;

        let db = &*self.db;
        let txn = db.begin().await?;

        let po = PurchaseOrderEntity::find_active()
            .filter(PurchaseOrderColumn::Id.eq(request.purchase_order_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Purchase Order {} not found",
                    request.purchase_order_id
                ))
            })?;

        let vendor = VendorEntity::find_by_id(po.vendor_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Vendor {} missing for purchase order {}",
                    po.vendor_id, po.id
                ))
            })?;

        if vendor.status == VendorStatus::Inactive {
            return Err(ServiceError::InvalidState(
                "Cannot record payment for inactive vendor".to_string(),
            ));
        }
        if po.status == PurchaseOrderStatus::Draft {
            return Err(ServiceError::InvalidState(
                "Cannot record payment for a Draft purchase order. Approve the purchase order first."
                    .to_string(),
            ));
        }

        let valid = finance::valid_payments(&txn, po.id).await?;
        let outstanding = po.total_amount - finance::sum_payments(&valid);

        if request.amount_paid <= Decimal::ZERO {
            return Err(ServiceError::InvalidAmount(
                "Payment amount must be positive".to_string(),
            ));
        }
        if request.amount_paid > outstanding {
            return Err(ServiceError::InvalidAmount(format!(
                "Payment amount ({}) exceeds outstanding amount ({})",
                request.amount_paid,
                outstanding.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            )));
        }

        let reference_number = self.unique_reference(&txn).await?;
        let now = self.clock.now();

        let created = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            reference_number: Set(reference_number),
            purchase_order_id: Set(po.id),
            payment_date: Set(request.payment_date.unwrap_or(now)),
            amount_paid: Set(request.amount_paid),
            payment_method: Set(request.payment_method),
            notes: Set(request.notes),
            is_voided: Set(false),
            is_deleted: Set(false),
            created_by: Set(Some(actor)),
            updated_by: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await?;

        recalculate_status_on(&txn, po.id).await?;
        txn.commit().await?;

        info!(
            payment_id = %created.id,
            reference_number = %created.reference_number,
            amount = %created.amount_paid,
            "payment recorded"
        );
        self.emit(Event::PaymentRecorded {
            payment_id: created.id,
            purchase_order_id: po.id,
        })
        .await;

        Ok(created)
    }

    #[instrument(skip(self, query))]
    pub async fn find_all(
        &self,
        query: PaymentListQuery,
    ) -> Result<Page<PaymentSummary>, ServiceError> {
        let (page, limit) = clamp_paging(query.page, query.limit);
        let db = &*self.db;

        let mut select = PaymentEntity::find_active().order_by_desc(PaymentColumn::PaymentDate);

        if let Some(purchase_order_id) = query.purchase_order_id {
            select = select.filter(PaymentColumn::PurchaseOrderId.eq(purchase_order_id));
        }
        if let Some(method) = query.payment_method {
            select = select.filter(PaymentColumn::PaymentMethod.eq(method));
        }
        if let Some(start) = query.start_date {
            select = select.filter(PaymentColumn::PaymentDate.gte(start));
        }
        if let Some(end) = query.end_date {
            select = select.filter(PaymentColumn::PaymentDate.lte(end));
        }

        let paginator = select.paginate(db, limit);
        let total = paginator.num_items().await?;
        let payments = paginator.fetch_page(page - 1).await?;

        let order_refs = self.order_refs(db, &payments).await?;

        let items = payments
            .into_iter()
            .map(|p| {
                let purchase_order = order_refs.get(&p.purchase_order_id).cloned();
                PaymentSummary {
                    payment: p,
                    purchase_order,
                }
            })
            .collect();

        Ok(Page::new(items, total, page, limit))
    }

    #[instrument(skip(self), fields(payment_id = %id))]
    pub async fn find_by_id(&self, id: Uuid) -> Result<PaymentDetail, ServiceError> {
        let db = &*self.db;

        let found = PaymentEntity::find_active()
            .filter(PaymentColumn::Id.eq(id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", id)))?;

        let po = PurchaseOrderEntity::find_by_id(found.purchase_order_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Purchase order {} missing for payment {}",
                    found.purchase_order_id, found.id
                ))
            })?;

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

        let related_payments = PaymentEntity::find_valid()
            .filter(PaymentColumn::PurchaseOrderId.eq(po.id))
            .order_by_asc(PaymentColumn::PaymentDate)
            .all(db)
            .await?;

        Ok(PaymentDetail {
            payment: found,
            purchase_order: po,
            vendor,
            items,
            related_payments,
        })
    }

    /// Marks the payment as voided: a payment made and then reversed, kept
    /// visible for the audit trail. Irreversible. The order's status is
    /// recalculated in the same transaction and may regress.
    #[instrument(skip(self), fields(payment_id = %id))]
    pub async fn void_payment(&self, id: Uuid, actor: Uuid) -> Result<PaymentModel, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let found = PaymentEntity::find_active()
            .filter(PaymentColumn::Id.eq(id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", id)))?;

        if found.is_voided {
            return Err(ServiceError::InvalidState(
                "Payment is already voided".to_string(),
            ));
        }

        let purchase_order_id = found.purchase_order_id;
        let mut active: payment::ActiveModel = found.into();
        active.is_voided = Set(true);
        active.updated_by = Set(Some(actor));
        active.updated_at = Set(Some(self.clock.now()));
        let voided = active.update(&txn).await?;

        recalculate_status_on(&txn, purchase_order_id).await?;
        txn.commit().await?;

        info!(payment_id = %voided.id, purchase_order_id = %purchase_order_id, "payment voided");
        self.emit(Event::PaymentVoided {
            payment_id: voided.id,
            purchase_order_id,
        })
        .await;

        Ok(voided)
    }

    /// Soft-deletes the payment: a retracted data-entry error, as opposed to
    /// a void. The order's status is recalculated in the same transaction.
    #[instrument(skip(self), fields(payment_id = %id))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let found = PaymentEntity::find_active()
            .filter(PaymentColumn::Id.eq(id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", id)))?;

        let purchase_order_id = found.purchase_order_id;
        let payment_id = found.id;
        let mut active: payment::ActiveModel = found.into();
        active.is_deleted = Set(true);
        active.updated_at = Set(Some(self.clock.now()));
        active.update(&txn).await?;

        recalculate_status_on(&txn, purchase_order_id).await?;
        txn.commit().await?;

        info!(payment_id = %payment_id, purchase_order_id = %purchase_order_id, "payment soft-deleted");
        self.emit(Event::PaymentDeleted {
            payment_id,
            purchase_order_id,
        })
        .await;

        Ok(())
    }

    async fn order_refs(
        &self,
        db: &DbPool,
        payments: &[PaymentModel],
    ) -> Result<HashMap<Uuid, PurchaseOrderRef>, ServiceError> {
        let order_ids: Vec<Uuid> = payments.iter().map(|p| p.purchase_order_id).collect();
        if order_ids.is_empty() {
            return Ok(HashMap::new());
        }

        // Reference lookups skip the soft-delete scope so payments against a
        // deleted order still carry their context.
        let orders = PurchaseOrderEntity::find()
            .filter(PurchaseOrderColumn::Id.is_in(order_ids))
            .all(db)
            .await?;

        let vendor_ids: Vec<Uuid> = orders.iter().map(|po| po.vendor_id).collect();
        let vendors: HashMap<Uuid, VendorRef> = if vendor_ids.is_empty() {
            HashMap::new()
        } else {
            VendorEntity::find()
                .filter(VendorColumn::Id.is_in(vendor_ids))
                .all(db)
                .await?
                .iter()
                .map(|v| (v.id, VendorRef::from(v)))
                .collect()
        };

        Ok(orders
            .into_iter()
            .map(|po| {
                let vendor = vendors.get(&po.vendor_id).cloned();
                (
                    po.id,
                    PurchaseOrderRef {
                        id: po.id,
                        po_number: po.po_number,
                        total_amount: po.total_amount,
                        vendor,
                    },
                )
            })
            .collect())
    }

    async fn unique_reference<C: ConnectionTrait>(&self, conn: &C) -> Result<String, ServiceError> {
        for _ in 0..MAX_NUMBER_ATTEMPTS {
            let candidate = self
                .numbers
                .generate(PAYMENT_REFERENCE_PREFIX, self.clock.now());
            let exists = PaymentEntity::find()
                .filter(PaymentColumn::ReferenceNumber.eq(candidate.as_str()))
                .one(conn)
                .await?
                .is_some();
            if !exists {
                return Ok(candidate);
            }
        }
        Err(ServiceError::Conflict(format!(
            "Could not allocate a unique payment reference after {} attempts",
            MAX_NUMBER_ATTEMPTS
        )))
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to send payment event");
            }
        }
    }
}
