use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::MigratorTrait;
use uuid::Uuid;

use vendorpay_api::{
    clock::FixedClock,
    config::AppConfig,
    entities::{
        payment::{self, PaymentMethod},
        vendor::{self, PaymentTerms, VendorStatus},
    },
    migrator::Migrator,
    numbering::SequentialNumberGenerator,
    services::{
        analytics::AnalyticsService,
        payments::{CreatePaymentRequest, PaymentService},
        purchase_orders::{
            CreateLineItem, CreatePurchaseOrderRequest, PurchaseOrderDetail, PurchaseOrderService,
        },
        vendors::{CreateVendorRequest, VendorService},
    },
    AppState,
};

/// Harness wiring the full service graph over a fresh in-memory SQLite
/// database, with a pinned clock and deterministic reference numbers.
pub struct TestApp {
    pub state: AppState,
    pub clock: Arc<FixedClock>,
    pub actor: Uuid,
}

#[allow(dead_code)]
impl TestApp {
    pub async fn new() -> Self {
        let mut options = ConnectOptions::new("sqlite::memory:".to_owned());
        options
            .max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);

        let db = Database::connect(options)
            .await
            .expect("failed to open in-memory sqlite");
        Migrator::up(&db, None)
            .await
            .expect("failed to run migrations");

        let clock = Arc::new(FixedClock::new(test_now()));
        let state = AppState::with_capabilities(
            Arc::new(db),
            AppConfig::new("sqlite::memory:", "test"),
            None,
            clock.clone(),
            Arc::new(SequentialNumberGenerator::default()),
        );

        Self {
            state,
            clock,
            actor: Uuid::new_v4(),
        }
    }

    pub fn vendors(&self) -> &VendorService {
        &self.state.services.vendors
    }

    pub fn purchase_orders(&self) -> &PurchaseOrderService {
        &self.state.services.purchase_orders
    }

    pub fn payments(&self) -> &PaymentService {
        &self.state.services.payments
    }

    pub fn analytics(&self) -> &AnalyticsService {
        &self.state.services.analytics
    }

    pub fn now(&self) -> DateTime<Utc> {
        use vendorpay_api::clock::Clock;
        self.clock.now()
    }

    /// Creates an Active vendor with the given payment terms.
    pub async fn seed_vendor(&self, name: &str, terms: PaymentTerms) -> vendor::Model {
        self.vendors()
            .create(
                CreateVendorRequest {
                    vendor_name: name.to_string(),
                    contact_person: "Asha Rao".to_string(),
                    email: format!("{}@example.com", slug(name)),
                    phone_number: Some("+91-98100-00000".to_string()),
                    payment_terms: terms,
                    status: VendorStatus::Active,
                },
                self.actor,
            )
            .await
            .expect("seed vendor")
    }

    /// Creates a Draft purchase order with the given (quantity, unit price)
    /// line items, dated now.
    pub async fn seed_draft_po(
        &self,
        vendor_id: Uuid,
        item_spec: &[(i32, Decimal)],
    ) -> PurchaseOrderDetail {
        self.purchase_orders()
            .create(
                CreatePurchaseOrderRequest {
                    vendor_id,
                    po_date: None,
                    status: None,
                    items: items(item_spec),
                },
                self.actor,
            )
            .await
            .expect("seed draft purchase order")
    }

    /// Creates a purchase order directly in Approved status, dated now.
    pub async fn seed_approved_po(
        &self,
        vendor_id: Uuid,
        item_spec: &[(i32, Decimal)],
    ) -> PurchaseOrderDetail {
        self.seed_approved_po_dated(vendor_id, item_spec, None).await
    }

    /// Creates an Approved purchase order with an explicit order date, so
    /// tests can position its due date relative to "today".
    pub async fn seed_approved_po_dated(
        &self,
        vendor_id: Uuid,
        item_spec: &[(i32, Decimal)],
        po_date: Option<DateTime<Utc>>,
    ) -> PurchaseOrderDetail {
        self.purchase_orders()
            .create(
                CreatePurchaseOrderRequest {
                    vendor_id,
                    po_date,
                    status: Some(
                        vendorpay_api::entities::purchase_order::PurchaseOrderStatus::Approved,
                    ),
                    items: items(item_spec),
                },
                self.actor,
            )
            .await
            .expect("seed approved purchase order")
    }

    /// Records a NEFT payment dated now.
    pub async fn pay(&self, purchase_order_id: Uuid, amount: Decimal) -> payment::Model {
        self.pay_with(purchase_order_id, amount, PaymentMethod::Neft, None)
            .await
    }

    pub async fn pay_with(
        &self,
        purchase_order_id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
        payment_date: Option<DateTime<Utc>>,
    ) -> payment::Model {
        self.payments()
            .create(
                CreatePaymentRequest {
                    purchase_order_id,
                    payment_date,
                    amount_paid: amount,
                    payment_method: method,
                    notes: None,
                },
                self.actor,
            )
            .await
            .expect("record payment")
    }
}

/// The harness default "today": 2024-06-15 12:00 UTC.
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
}

pub fn items(spec: &[(i32, Decimal)]) -> Vec<CreateLineItem> {
    spec.iter()
        .enumerate()
        .map(|(index, (quantity, unit_price))| CreateLineItem {
            description: format!("Line item {}", index + 1),
            quantity: *quantity,
            unit_price: *unit_price,
        })
        .collect()
}

fn slug(name: &str) -> String {
    name.to_lowercase().replace(' ', ".")
}
