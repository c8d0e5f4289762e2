//! Vendor-payment bookkeeping core.
//!
//! Tracks vendors, purchase orders, and payments against those orders, and
//! derives outstanding-balance, aging, and trend reports. The heart of the
//! crate is the purchase-order financial state machine: the rules that keep
//! an order's status, total, paid, and outstanding amounts consistent as
//! payments are recorded, voided, or deleted.
//!
//! The crate is consumed through its service structs ([`AppState`] wires
//! them); HTTP routing, authentication, and UI rendering are external
//! collaborators.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod clock;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod migrator;
pub mod numbering;
pub mod services;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::numbering::{RandomSuffixGenerator, ReferenceNumberGenerator};
use crate::services::{
    analytics::AnalyticsService, payments::PaymentService, purchase_orders::PurchaseOrderService,
    vendors::VendorService,
};

/// The wired service graph.
#[derive(Clone)]
pub struct AppServices {
    pub vendors: Arc<VendorService>,
    pub purchase_orders: Arc<PurchaseOrderService>,
    pub payments: Arc<PaymentService>,
    pub analytics: Arc<AnalyticsService>,
}

/// Composition root handed to whatever transport fronts this crate.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: config::AppConfig,
    pub event_sender: Option<Arc<events::EventSender>>,
    pub services: AppServices,
}

impl AppState {
    /// Wires the services with production defaults: system clock and
    /// random-suffix reference numbers.
    pub fn new(
        db: Arc<db::DbPool>,
        config: config::AppConfig,
        event_sender: Option<Arc<events::EventSender>>,
    ) -> Self {
        Self::with_capabilities(
            db,
            config,
            event_sender,
            Arc::new(SystemClock),
            Arc::new(RandomSuffixGenerator),
        )
    }

    /// Wires the services with explicit clock and number-generation
    /// capabilities.
    pub fn with_capabilities(
        db: Arc<db::DbPool>,
        config: config::AppConfig,
        event_sender: Option<Arc<events::EventSender>>,
        clock: Arc<dyn Clock>,
        numbers: Arc<dyn ReferenceNumberGenerator>,
    ) -> Self {
        let services = AppServices {
            vendors: Arc::new(VendorService::new(
                db.clone(),
                clock.clone(),
                event_sender.clone(),
            )),
            purchase_orders: Arc::new(PurchaseOrderService::new(
                db.clone(),
                clock.clone(),
                numbers.clone(),
                event_sender.clone(),
            )),
            payments: Arc::new(PaymentService::new(
                db.clone(),
                clock.clone(),
                numbers,
                event_sender.clone(),
            )),
            analytics: Arc::new(AnalyticsService::new(db.clone(), clock)),
        };

        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}

/// Hard cap applied to every list query.
pub const MAX_PAGE_SIZE: u64 = 100;

pub(crate) fn default_page() -> u64 {
    1
}

pub(crate) fn default_limit() -> u64 {
    20
}

/// Normalizes caller-supplied paging: pages start at 1, limits are capped.
pub(crate) fn clamp_paging(page: u64, limit: u64) -> (u64, u64) {
    (page.max(1), limit.clamp(1, MAX_PAGE_SIZE))
}

/// One page of a list result, with the totals the caller needs to render
/// pagination.
#[derive(Debug, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, limit: u64) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            total.div_ceil(limit)
        };
        Self {
            items,
            total,
            page,
            limit,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_is_clamped_to_bounds() {
        assert_eq!(clamp_paging(0, 0), (1, 1));
        assert_eq!(clamp_paging(3, 20), (3, 20));
        assert_eq!(clamp_paging(1, 500), (1, MAX_PAGE_SIZE));
    }

    #[test]
    fn total_pages_round_up() {
        let page: Page<u8> = Page::new(Vec::new(), 41, 1, 20);
        assert_eq!(page.total_pages, 3);

        let exact: Page<u8> = Page::new(Vec::new(), 40, 1, 20);
        assert_eq!(exact.total_pages, 2);

        let empty: Page<u8> = Page::new(Vec::new(), 0, 1, 20);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn pages_serialize_with_pagination_metadata() {
        let page = Page::new(vec!["a", "b"], 12, 2, 2);
        let json = serde_json::to_value(&page).expect("serialize page");
        assert_eq!(json["items"], serde_json::json!(["a", "b"]));
        assert_eq!(json["total"], 12);
        assert_eq!(json["page"], 2);
        assert_eq!(json["total_pages"], 6);
    }
}
