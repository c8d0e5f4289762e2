use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Months, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    clock::Clock,
    db::DbPool,
    entities::{
        payment::{Column as PaymentColumn, Entity as PaymentEntity},
        purchase_order::{
            Column as PurchaseOrderColumn, Entity as PurchaseOrderEntity, PurchaseOrderStatus,
        },
        vendor::{Column as VendorColumn, Entity as VendorEntity, VendorStatus},
    },
    errors::ServiceError,
    services::finance,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct VendorOutstandingRow {
    pub vendor_id: Uuid,
    pub vendor_name: String,
    pub email: String,
    pub status: VendorStatus,
    pub total_purchase_orders: u64,
    pub total_po_amount: Decimal,
    pub total_paid_amount: Decimal,
    pub outstanding_amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VendorOutstandingSummary {
    pub total_vendors: u64,
    pub total_outstanding: Decimal,
    pub total_paid: Decimal,
    pub vendors_with_outstanding: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VendorOutstandingReport {
    pub summary: VendorOutstandingSummary,
    pub vendors: Vec<VendorOutstandingRow>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgingPurchaseOrder {
    pub po_number: String,
    pub vendor_name: String,
    pub total_amount: Decimal,
    pub outstanding: Decimal,
    pub due_date: DateTime<Utc>,
    /// Clamped to zero for display; bucketing uses the raw value.
    pub days_overdue: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgingBucket {
    pub label: String,
    pub amount: Decimal,
    pub count: u64,
    pub purchase_orders: Vec<AgingPurchaseOrder>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentAgingSummary {
    pub total_outstanding: Decimal,
    pub total_purchase_orders: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentAgingReport {
    pub summary: PaymentAgingSummary,
    pub buckets: Vec<AgingBucket>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MonthlyTrend {
    /// Calendar month key, `YYYY-MM`.
    pub month: String,
    pub total_amount: Decimal,
    pub payment_count: u64,
    pub average_payment: Decimal,
    pub by_method: BTreeMap<String, Decimal>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentTrendsSummary {
    pub total_payments: Decimal,
    pub total_transactions: u64,
    pub average_monthly: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentTrendsReport {
    pub summary: PaymentTrendsSummary,
    pub trends: Vec<MonthlyTrend>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VendorCounts {
    pub total: u64,
    pub active: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseOrderCounts {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentTotals {
    pub total: u64,
    pub total_amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FinancialTotals {
    pub total_po_amount: Decimal,
    pub total_paid: Decimal,
    pub total_outstanding: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub vendors: VendorCounts,
    pub purchase_orders: PurchaseOrderCounts,
    pub payments: PaymentTotals,
    pub financial: FinancialTotals,
}

/// Read-only reporting over vendors, purchase orders, and payments. Every
/// report is recomputed from the store on each call; amounts are rounded to
/// two places only here, at the aggregation boundary.
#[derive(Clone)]
pub struct AnalyticsService {
    db: Arc<DbPool>,
    clock: Arc<dyn Clock>,
}

impl AnalyticsService {
    pub fn new(db: Arc<DbPool>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Outstanding balance per vendor, largest first.
    #[instrument(skip(self))]
    pub async fn get_vendor_outstanding(&self) -> Result<VendorOutstandingReport, ServiceError> {
        let db = &*self.db;
        let snapshots = finance::all_vendor_snapshots(db).await?;

        let mut vendors: Vec<VendorOutstandingRow> = snapshots
            .into_iter()
            .map(|(vendor, snapshot)| VendorOutstandingRow {
                vendor_id: vendor.id,
                vendor_name: vendor.vendor_name,
                email: vendor.email,
                status: vendor.status,
                total_purchase_orders: snapshot.total_purchase_orders,
                total_po_amount: round2(snapshot.total_po_amount),
                total_paid_amount: round2(snapshot.total_paid_amount),
                outstanding_amount: round2(snapshot.outstanding_amount),
            })
            .collect();

        vendors.sort_by(|a, b| b.outstanding_amount.cmp(&a.outstanding_amount));

        let summary = VendorOutstandingSummary {
            total_vendors: vendors.len() as u64,
            total_outstanding: round2(vendors.iter().map(|v| v.outstanding_amount).sum()),
            total_paid: round2(vendors.iter().map(|v| v.total_paid_amount).sum()),
            vendors_with_outstanding: vendors
                .iter()
                .filter(|v| v.outstanding_amount > Decimal::ZERO)
                .count() as u64,
        };

        info!(vendors = summary.total_vendors, "vendor outstanding report computed");

        Ok(VendorOutstandingReport { summary, vendors })
    }

    /// Outstanding balances bucketed by how far past due they are. Draft
    /// orders carry no due obligation and FullyPaid orders have nothing
    /// outstanding, so only Approved and PartiallyPaid orders contribute.
    #[instrument(skip(self))]
    pub async fn get_payment_aging(&self) -> Result<PaymentAgingReport, ServiceError> {
        let db = &*self.db;
        let today = self.clock.now();

        let orders = PurchaseOrderEntity::find_active()
            .filter(PurchaseOrderColumn::Status.is_in([
                PurchaseOrderStatus::Approved,
                PurchaseOrderStatus::PartiallyPaid,
            ]))
            .all(db)
            .await?;

        let order_ids: Vec<Uuid> = orders.iter().map(|po| po.id).collect();
        let payments = finance::valid_payments_by_order(db, &order_ids).await?;

        let vendor_ids: Vec<Uuid> = orders.iter().map(|po| po.vendor_id).collect();
        let vendor_names: HashMap<Uuid, String> = if vendor_ids.is_empty() {
            HashMap::new()
        } else {
            VendorEntity::find()
                .filter(VendorColumn::Id.is_in(vendor_ids))
                .all(db)
                .await?
                .into_iter()
                .map(|v| (v.id, v.vendor_name))
                .collect()
        };

        let mut buckets: Vec<AgingBucket> = BUCKET_LABELS
            .iter()
            .map(|label| AgingBucket {
                label: (*label).to_string(),
                amount: Decimal::ZERO,
                count: 0,
                purchase_orders: Vec::new(),
            })
            .collect();

        for po in &orders {
            let total_paid = payments
                .get(&po.id)
                .map(|p| finance::sum_payments(p))
                .unwrap_or(Decimal::ZERO);
            let outstanding = po.total_amount - total_paid;
            if outstanding <= Decimal::ZERO {
                continue;
            }

            let days_overdue = (today - po.due_date).num_days();
            let bucket = &mut buckets[bucket_index(days_overdue)];
            bucket.amount += outstanding;
            bucket.count += 1;
            bucket.purchase_orders.push(AgingPurchaseOrder {
                po_number: po.po_number.clone(),
                vendor_name: vendor_names
                    .get(&po.vendor_id)
                    .cloned()
                    .unwrap_or_default(),
                total_amount: po.total_amount,
                outstanding,
                due_date: po.due_date,
                days_overdue: days_overdue.max(0),
            });
        }

        for bucket in &mut buckets {
            bucket.amount = round2(bucket.amount);
        }

        let summary = PaymentAgingSummary {
            total_outstanding: round2(buckets.iter().map(|b| b.amount).sum()),
            total_purchase_orders: buckets.iter().map(|b| b.count).sum(),
        };

        Ok(PaymentAgingReport { summary, buckets })
    }

    /// Valid payments over the trailing six calendar months, grouped by
    /// month with a per-method breakdown.
    #[instrument(skip(self))]
    pub async fn get_payment_trends(&self) -> Result<PaymentTrendsReport, ServiceError> {
        let db = &*self.db;
        let window_start = trailing_window_start(self.clock.now());

        let payments = PaymentEntity::find_valid()
            .filter(PaymentColumn::PaymentDate.gte(window_start))
            .order_by_asc(PaymentColumn::PaymentDate)
            .all(db)
            .await?;

        struct MonthAccumulator {
            total: Decimal,
            count: u64,
            by_method: BTreeMap<String, Decimal>,
        }

        let mut months: BTreeMap<String, MonthAccumulator> = BTreeMap::new();
        for p in &payments {
            let entry = months
                .entry(month_key(p.payment_date))
                .or_insert_with(|| MonthAccumulator {
                    total: Decimal::ZERO,
                    count: 0,
                    by_method: BTreeMap::new(),
                });
            entry.total += p.amount_paid;
            entry.count += 1;
            *entry
                .by_method
                .entry(p.payment_method.to_string())
                .or_insert(Decimal::ZERO) += p.amount_paid;
        }

        let trends: Vec<MonthlyTrend> = months
            .into_iter()
            .map(|(month, acc)| MonthlyTrend {
                month,
                total_amount: round2(acc.total),
                payment_count: acc.count,
                average_payment: round2(acc.total / Decimal::from(acc.count)),
                by_method: acc
                    .by_method
                    .into_iter()
                    .map(|(method, amount)| (method, round2(amount)))
                    .collect(),
            })
            .collect();

        let total_payments: Decimal = trends.iter().map(|t| t.total_amount).sum();
        let total_transactions: u64 = trends.iter().map(|t| t.payment_count).sum();
        let month_count = Decimal::from(trends.len().max(1) as u64);

        let summary = PaymentTrendsSummary {
            total_payments: round2(total_payments),
            total_transactions,
            average_monthly: round2(total_payments / month_count),
        };

        Ok(PaymentTrendsReport { summary, trends })
    }

    /// Counts and financial totals in one pass over the snapshot capability.
    #[instrument(skip(self))]
    pub async fn get_dashboard_summary(&self) -> Result<DashboardSummary, ServiceError> {
        let db = &*self.db;

        let snapshots = finance::all_vendor_snapshots(db).await?;
        let vendors = VendorCounts {
            total: snapshots.len() as u64,
            active: snapshots
                .iter()
                .filter(|(v, _)| v.status == VendorStatus::Active)
                .count() as u64,
        };

        let orders = PurchaseOrderEntity::find_active().all(db).await?;
        let mut by_status: BTreeMap<String, u64> = BTreeMap::new();
        for po in &orders {
            *by_status.entry(po.status.to_string()).or_insert(0) += 1;
        }
        let purchase_orders = PurchaseOrderCounts {
            total: orders.len() as u64,
            by_status,
        };

        // Valid payment count spans the whole ledger, including payments on
        // orders whose vendor or order record has since been soft-deleted;
        // the financial totals below cover only live vendors and orders.
        let valid_payment_count = PaymentEntity::find_valid().count(db).await?;

        let total_po_amount: Decimal = snapshots.iter().map(|(_, s)| s.total_po_amount).sum();
        let total_paid: Decimal = snapshots.iter().map(|(_, s)| s.total_paid_amount).sum();

        let payments = PaymentTotals {
            total: valid_payment_count,
            total_amount: round2(total_paid),
        };

        let financial = FinancialTotals {
            total_po_amount: round2(total_po_amount),
            total_paid: round2(total_paid),
            total_outstanding: round2(total_po_amount - total_paid),
        };

        Ok(DashboardSummary {
            vendors,
            purchase_orders,
            payments,
            financial,
        })
    }
}

const BUCKET_LABELS: [&str; 4] = ["0-30 days", "31-60 days", "61-90 days", "90+ days"];

/// Bucket selection uses the raw days-overdue value; not-yet-due balances
/// (negative values) fall into the first bucket.
fn bucket_index(days_overdue: i64) -> usize {
    if days_overdue <= 30 {
        0
    } else if days_overdue <= 60 {
        1
    } else if days_overdue <= 90 {
        2
    } else {
        3
    }
}

fn month_key(date: DateTime<Utc>) -> String {
    format!("{}-{:02}", date.year(), date.month())
}

/// First instant of the calendar month six months before `now`.
fn trailing_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let anchor = now
        .date_naive()
        .checked_sub_months(Months::new(6))
        .unwrap_or_else(|| now.date_naive());
    anchor
        .with_day(1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(-10, 0)]
    #[case(0, 0)]
    #[case(30, 0)]
    #[case(31, 1)]
    #[case(45, 1)]
    #[case(60, 1)]
    #[case(61, 2)]
    #[case(90, 2)]
    #[case(91, 3)]
    #[case(400, 3)]
    fn bucket_boundaries(#[case] days_overdue: i64, #[case] expected: usize) {
        assert_eq!(bucket_index(days_overdue), expected);
    }

    #[test]
    fn trailing_window_starts_on_the_first() {
        let now = Utc.with_ymd_and_hms(2024, 7, 15, 9, 30, 0).unwrap();
        assert_eq!(
            trailing_window_start(now),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn trailing_window_crosses_year_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(
            trailing_window_start(now),
            Utc.with_ymd_and_hms(2023, 9, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn month_keys_are_zero_padded() {
        let date = Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap();
        assert_eq!(month_key(date), "2024-03");
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round2(dec!(10.005)), dec!(10.01));
        assert_eq!(round2(dec!(10.004)), dec!(10.00));
    }
}
