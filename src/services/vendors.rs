use std::sync::Arc;

use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    clamp_paging,
    clock::Clock,
    db::DbPool,
    entities::vendor::{
        self, Column as VendorColumn, Entity as VendorEntity, Model as VendorModel, PaymentTerms,
        VendorStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::finance::{self, VendorFinancialSnapshot},
    Page,
};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateVendorRequest {
    #[validate(length(min = 1, max = 120, message = "Vendor name is required"))]
    pub vendor_name: String,
    #[validate(length(min = 1, max = 120, message = "Contact person is required"))]
    pub contact_person: String,
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    pub phone_number: Option<String>,
    #[serde(default)]
    pub payment_terms: PaymentTerms,
    #[serde(default)]
    pub status: VendorStatus,
}

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct UpdateVendorRequest {
    #[validate(length(min = 1, max = 120, message = "Vendor name must not be empty"))]
    pub vendor_name: Option<String>,
    #[validate(length(min = 1, max = 120, message = "Contact person must not be empty"))]
    pub contact_person: Option<String>,
    #[validate(email(message = "A valid email is required"))]
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub payment_terms: Option<PaymentTerms>,
    pub status: Option<VendorStatus>,
}

#[derive(Debug, Deserialize)]
pub struct VendorListQuery {
    pub status: Option<VendorStatus>,
    /// Case-insensitive substring over name, email, and contact person.
    pub search: Option<String>,
    #[serde(default = "crate::default_page")]
    pub page: u64,
    #[serde(default = "crate::default_limit")]
    pub limit: u64,
}

impl Default for VendorListQuery {
    fn default() -> Self {
        Self {
            status: None,
            search: None,
            page: crate::default_page(),
            limit: crate::default_limit(),
        }
    }
}

/// Vendor plus its aggregate payment position.
#[derive(Debug, Serialize, Deserialize)]
pub struct VendorDetail {
    pub vendor: VendorModel,
    pub payment_summary: VendorFinancialSnapshot,
}

/// Registry of vendors: CRUD with soft deletion and uniqueness gating.
#[derive(Clone)]
pub struct VendorService {
    db: Arc<DbPool>,
    clock: Arc<dyn Clock>,
    event_sender: Option<Arc<EventSender>>,
}

impl VendorService {
    pub fn new(db: Arc<DbPool>, clock: Arc<dyn Clock>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db,
            clock,
            event_sender,
        }
    }

    #[instrument(skip(self, request), fields(vendor_name = %request.vendor_name, email = %request.email))]
    pub async fn create(
        &self,
        request: CreateVendorRequest,
        actor: Uuid,
    ) -> Result<VendorModel, ServiceError> {
        request.validate()?;

        let db = &*self.db;
        check_uniqueness(
            db,
            Some(request.email.as_str()),
            Some(request.vendor_name.as_str()),
            None,
        )
        .await?;

        let now = self.clock.now();
        let model = vendor::ActiveModel {
            id: Set(Uuid::new_v4()),
            vendor_name: Set(request.vendor_name),
            contact_person: Set(request.contact_person),
            email: Set(request.email),
            phone_number: Set(request.phone_number),
            payment_terms: Set(request.payment_terms),
            status: Set(request.status),
            is_deleted: Set(false),
            created_by: Set(Some(actor)),
            updated_by: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
        };

        let created = model.insert(db).await?;

        info!(vendor_id = %created.id, "vendor created");
        self.emit(Event::VendorCreated(created.id)).await;

        Ok(created)
    }

    #[instrument(skip(self, query))]
    pub async fn find_all(&self, query: VendorListQuery) -> Result<Page<VendorModel>, ServiceError> {
        let (page, limit) = clamp_paging(query.page, query.limit);
        let db = &*self.db;

        let mut select = VendorEntity::find_active().order_by_desc(VendorColumn::CreatedAt);

        if let Some(status) = query.status {
            select = select.filter(VendorColumn::Status.eq(status));
        }

        if let Some(term) = query.search.as_deref().filter(|t| !t.is_empty()) {
            let pattern = format!("%{}%", term.to_lowercase());
            select = select.filter(
                Condition::any()
                    .add(
                        Expr::expr(Func::lower(Expr::col(VendorColumn::VendorName)))
                            .like(pattern.as_str()),
                    )
                    .add(
                        Expr::expr(Func::lower(Expr::col(VendorColumn::Email)))
                            .like(pattern.as_str()),
                    )
                    .add(
                        Expr::expr(Func::lower(Expr::col(VendorColumn::ContactPerson)))
                            .like(pattern.as_str()),
                    ),
            );
        }

        let paginator = select.paginate(db, limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;

        Ok(Page::new(items, total, page, limit))
    }

    #[instrument(skip(self), fields(vendor_id = %id))]
    pub async fn find_by_id(&self, id: Uuid) -> Result<VendorDetail, ServiceError> {
        let db = &*self.db;

        let vendor = VendorEntity::find_active()
            .filter(VendorColumn::Id.eq(id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Vendor {} not found", id)))?;

        let payment_summary = finance::vendor_snapshot(db, vendor.id).await?;

        Ok(VendorDetail {
            vendor,
            payment_summary,
        })
    }

    #[instrument(skip(self, request), fields(vendor_id = %id))]
    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateVendorRequest,
        actor: Uuid,
    ) -> Result<VendorModel, ServiceError> {
        request.validate()?;

        let db = &*self.db;
        let vendor = VendorEntity::find_active()
            .filter(VendorColumn::Id.eq(id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Vendor {} not found", id)))?;

        if request.email.is_some() || request.vendor_name.is_some() {
            check_uniqueness(
                db,
                request.email.as_deref(),
                request.vendor_name.as_deref(),
                Some(id),
            )
            .await?;
        }

        let mut active: vendor::ActiveModel = vendor.into();
        if let Some(vendor_name) = request.vendor_name {
            active.vendor_name = Set(vendor_name);
        }
        if let Some(contact_person) = request.contact_person {
            active.contact_person = Set(contact_person);
        }
        if let Some(email) = request.email {
            active.email = Set(email);
        }
        if let Some(phone_number) = request.phone_number {
            active.phone_number = Set(Some(phone_number));
        }
        if let Some(payment_terms) = request.payment_terms {
            active.payment_terms = Set(payment_terms);
        }
        if let Some(status) = request.status {
            active.status = Set(status);
        }
        active.updated_by = Set(Some(actor));
        active.updated_at = Set(Some(self.clock.now()));

        let updated = active.update(db).await?;

        info!(vendor_id = %updated.id, "vendor updated");
        self.emit(Event::VendorUpdated(updated.id)).await;

        Ok(updated)
    }

    /// Soft-deletes the vendor. Purchase orders and payments referencing it
    /// are left untouched.
    #[instrument(skip(self), fields(vendor_id = %id))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db;

        let vendor = VendorEntity::find_active()
            .filter(VendorColumn::Id.eq(id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Vendor {} not found", id)))?;

        let mut active: vendor::ActiveModel = vendor.into();
        active.is_deleted = Set(true);
        active.updated_at = Set(Some(self.clock.now()));
        active.update(db).await?;

        info!(vendor_id = %id, "vendor soft-deleted");
        self.emit(Event::VendorDeleted(id)).await;

        Ok(())
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to send vendor event");
            }
        }
    }
}

/// Single OR query over non-deleted vendors; the email collision wins the
/// message when both fields match.
async fn check_uniqueness(
    db: &DbPool,
    email: Option<&str>,
    vendor_name: Option<&str>,
    exclude: Option<Uuid>,
) -> Result<(), ServiceError> {
    if email.is_none() && vendor_name.is_none() {
        return Ok(());
    }

    let mut condition = Condition::any();
    if let Some(email) = email {
        condition = condition.add(VendorColumn::Email.eq(email));
    }
    if let Some(vendor_name) = vendor_name {
        condition = condition.add(VendorColumn::VendorName.eq(vendor_name));
    }

    let mut select = VendorEntity::find_active().filter(condition);
    if let Some(id) = exclude {
        select = select.filter(VendorColumn::Id.ne(id));
    }

    if let Some(existing) = select.one(db).await? {
        let message = if email.map_or(false, |e| existing.email == e) {
            "Vendor with this email already exists"
        } else {
            "Vendor with this name already exists"
        };
        return Err(ServiceError::Conflict(message.to_string()));
    }

    Ok(())
}
