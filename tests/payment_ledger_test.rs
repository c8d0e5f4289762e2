//! Integration tests for the payment ledger: the outstanding-amount
//! invariant, void/delete semantics, and the atomic status recalculation.

mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use uuid::Uuid;
use vendorpay_api::{
    entities::{
        payment::PaymentMethod,
        purchase_order::PurchaseOrderStatus,
        vendor::{PaymentTerms, VendorStatus},
    },
    errors::ServiceError,
    services::{
        payments::{CreatePaymentRequest, PaymentListQuery},
        vendors::UpdateVendorRequest,
    },
};

fn payment_request(purchase_order_id: Uuid, amount: rust_decimal::Decimal) -> CreatePaymentRequest {
    CreatePaymentRequest {
        purchase_order_id,
        payment_date: None,
        amount_paid: amount,
        payment_method: PaymentMethod::Neft,
        notes: None,
    }
}

#[tokio::test]
async fn draft_orders_reject_payments_regardless_of_amount() {
    let app = TestApp::new().await;
    let vendor = app.seed_vendor("Acme Supplies", PaymentTerms::Days30).await;
    let draft = app.seed_draft_po(vendor.id, &[(1, dec!(100))]).await;

    for amount in [dec!(0.01), dec!(100), dec!(5000)] {
        let err = app
            .payments()
            .create(payment_request(draft.purchase_order.id, amount), app.actor)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InvalidState(msg) if msg.contains("Draft"));
    }
}

#[tokio::test]
async fn inactive_vendors_reject_payments() {
    let app = TestApp::new().await;
    let vendor = app.seed_vendor("Acme Supplies", PaymentTerms::Days30).await;
    let po = app.seed_approved_po(vendor.id, &[(1, dec!(100))]).await;

    app.vendors()
        .update(
            vendor.id,
            UpdateVendorRequest {
                status: Some(VendorStatus::Inactive),
                ..Default::default()
            },
            app.actor,
        )
        .await
        .expect("deactivate vendor");

    let err = app
        .payments()
        .create(payment_request(po.purchase_order.id, dec!(50)), app.actor)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidState(msg) if msg.contains("inactive"));
}

#[tokio::test]
async fn amounts_must_be_positive_and_within_outstanding() {
    let app = TestApp::new().await;
    let vendor = app.seed_vendor("Acme Supplies", PaymentTerms::Days30).await;
    let po = app
        .seed_approved_po(vendor.id, &[(2, dec!(100)), (1, dec!(50))])
        .await;
    let po_id = po.purchase_order.id;

    let err = app
        .payments()
        .create(payment_request(po_id, dec!(0)), app.actor)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidAmount(_));

    let err = app
        .payments()
        .create(payment_request(po_id, dec!(-10)), app.actor)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidAmount(_));

    // One cent over the outstanding balance is rejected, naming both values.
    let err = app
        .payments()
        .create(payment_request(po_id, dec!(250.01)), app.actor)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InvalidAmount(msg)
            if msg.contains("250.01") && msg.contains("250")
    );

    // Exactly the outstanding amount succeeds and settles the order.
    app.pay(po_id, dec!(250)).await;
    let detail = app
        .purchase_orders()
        .find_by_id(po_id)
        .await
        .expect("detail");
    assert_eq!(detail.purchase_order.status, PurchaseOrderStatus::FullyPaid);
    assert_eq!(detail.outstanding_amount, dec!(0));

    // Nothing outstanding: any further payment is rejected.
    let err = app
        .payments()
        .create(payment_request(po_id, dec!(0.01)), app.actor)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidAmount(_));
}

#[tokio::test]
async fn reference_numbers_are_generated_and_unique() {
    let app = TestApp::new().await;
    let vendor = app.seed_vendor("Acme Supplies", PaymentTerms::Days30).await;
    let po = app.seed_approved_po(vendor.id, &[(1, dec!(300))]).await;

    let first = app.pay(po.purchase_order.id, dec!(100)).await;
    let second = app.pay(po.purchase_order.id, dec!(100)).await;

    assert!(first.reference_number.starts_with("PAY-20240615-"));
    assert_ne!(first.reference_number, second.reference_number);
}

#[tokio::test]
async fn voiding_regresses_the_order_status() {
    let app = TestApp::new().await;
    let vendor = app.seed_vendor("Acme Supplies", PaymentTerms::Days30).await;
    let po = app.seed_approved_po(vendor.id, &[(1, dec!(1000))]).await;
    let po_id = po.purchase_order.id;

    let payment = app.pay(po_id, dec!(600)).await;
    let partially = app
        .purchase_orders()
        .find_by_id(po_id)
        .await
        .expect("detail");
    assert_eq!(
        partially.purchase_order.status,
        PurchaseOrderStatus::PartiallyPaid
    );
    assert_eq!(partially.outstanding_amount, dec!(400));

    let voided = app
        .payments()
        .void_payment(payment.id, app.actor)
        .await
        .expect("void payment");
    assert!(voided.is_voided);

    // The derived path walks the status back to Approved, which the manual
    // transition table would never allow.
    let after_void = app
        .purchase_orders()
        .find_by_id(po_id)
        .await
        .expect("detail after void");
    assert_eq!(
        after_void.purchase_order.status,
        PurchaseOrderStatus::Approved
    );
    assert_eq!(after_void.total_paid, dec!(0));
    assert_eq!(after_void.outstanding_amount, dec!(1000));

    // The voided payment stays visible in the history.
    assert_eq!(after_void.payment_history.len(), 1);
    assert!(after_void.payment_history[0].is_voided);
}

#[tokio::test]
async fn voiding_twice_is_rejected() {
    let app = TestApp::new().await;
    let vendor = app.seed_vendor("Acme Supplies", PaymentTerms::Days30).await;
    let po = app.seed_approved_po(vendor.id, &[(1, dec!(500))]).await;

    let payment = app.pay(po.purchase_order.id, dec!(200)).await;
    app.payments()
        .void_payment(payment.id, app.actor)
        .await
        .expect("first void");

    let err = app
        .payments()
        .void_payment(payment.id, app.actor)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidState(msg) if msg.contains("already voided"));
}

#[tokio::test]
async fn deleting_a_payment_recalculates_and_hides_it() {
    let app = TestApp::new().await;
    let vendor = app.seed_vendor("Acme Supplies", PaymentTerms::Days30).await;
    let po = app.seed_approved_po(vendor.id, &[(1, dec!(500))]).await;
    let po_id = po.purchase_order.id;

    let payment = app.pay(po_id, dec!(500)).await;
    let settled = app
        .purchase_orders()
        .find_by_id(po_id)
        .await
        .expect("detail");
    assert_eq!(settled.purchase_order.status, PurchaseOrderStatus::FullyPaid);

    app.payments().delete(payment.id).await.expect("delete payment");

    let after_delete = app
        .purchase_orders()
        .find_by_id(po_id)
        .await
        .expect("detail after delete");
    assert_eq!(
        after_delete.purchase_order.status,
        PurchaseOrderStatus::Approved
    );
    // Unlike a void, a deleted payment disappears from the history too.
    assert!(after_delete.payment_history.is_empty());

    let err = app.payments().find_by_id(payment.id).await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    // Freed-up outstanding balance accepts new payments again.
    app.pay(po_id, dec!(500)).await;
}

#[tokio::test]
async fn find_all_filters_and_keeps_voided_rows() {
    let app = TestApp::new().await;
    let vendor = app.seed_vendor("Acme Supplies", PaymentTerms::Days30).await;
    let po = app.seed_approved_po(vendor.id, &[(10, dec!(100))]).await;
    let po_id = po.purchase_order.id;

    let cash = app
        .pay_with(po_id, dec!(100), PaymentMethod::Cash, None)
        .await;
    let neft = app.pay(po_id, dec!(200)).await;
    app.payments()
        .void_payment(neft.id, app.actor)
        .await
        .expect("void");
    let deleted = app.pay(po_id, dec!(300)).await;
    app.payments().delete(deleted.id).await.expect("delete");

    let all = app
        .payments()
        .find_all(PaymentListQuery {
            purchase_order_id: Some(po_id),
            ..Default::default()
        })
        .await
        .expect("list");
    // The voided payment stays listed; the deleted one does not.
    assert_eq!(all.total, 2);
    assert!(all
        .items
        .iter()
        .any(|row| row.payment.id == neft.id && row.payment.is_voided));

    let by_method = app
        .payments()
        .find_all(PaymentListQuery {
            payment_method: Some(PaymentMethod::Cash),
            ..Default::default()
        })
        .await
        .expect("list by method");
    assert_eq!(by_method.total, 1);
    assert_eq!(by_method.items[0].payment.id, cash.id);

    let order_ref = by_method.items[0]
        .purchase_order
        .as_ref()
        .expect("order ref");
    assert_eq!(order_ref.id, po_id);
    assert_eq!(
        order_ref.vendor.as_ref().expect("vendor ref").vendor_name,
        "Acme Supplies"
    );
}

#[tokio::test]
async fn find_by_id_returns_full_context() {
    let app = TestApp::new().await;
    let vendor = app.seed_vendor("Acme Supplies", PaymentTerms::Days30).await;
    let po = app
        .seed_approved_po(vendor.id, &[(2, dec!(100)), (1, dec!(50))])
        .await;
    let po_id = po.purchase_order.id;

    let first = app
        .pay_with(
            po_id,
            dec!(100),
            PaymentMethod::Cheque,
            Some(app.now() - chrono::Duration::days(3)),
        )
        .await;
    let second = app.pay(po_id, dec!(50)).await;

    let detail = app
        .payments()
        .find_by_id(second.id)
        .await
        .expect("payment detail");

    assert_eq!(detail.payment.id, second.id);
    assert_eq!(detail.purchase_order.id, po_id);
    assert_eq!(detail.vendor.id, vendor.id);
    assert_eq!(detail.items.len(), 2);
    // Sibling valid payments, oldest first.
    assert_eq!(detail.related_payments.len(), 2);
    assert_eq!(detail.related_payments[0].id, first.id);

    let err = app.payments().find_by_id(Uuid::new_v4()).await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}
