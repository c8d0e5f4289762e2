use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::entities::purchase_order::PurchaseOrderStatus;

/// Domain events emitted by the service layer after a successful commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Vendor registry events
    VendorCreated(Uuid),
    VendorUpdated(Uuid),
    VendorDeleted(Uuid),

    // Purchase order events
    PurchaseOrderCreated(Uuid),
    PurchaseOrderStatusChanged {
        purchase_order_id: Uuid,
        old_status: PurchaseOrderStatus,
        new_status: PurchaseOrderStatus,
    },
    PurchaseOrderDeleted(Uuid),

    // Payment ledger events
    PaymentRecorded {
        payment_id: Uuid,
        purchase_order_id: Uuid,
    },
    PaymentVoided {
        payment_id: Uuid,
        purchase_order_id: Uuid,
    },
    PaymentDeleted {
        payment_id: Uuid,
        purchase_order_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel, logging each event. Downstream consumers
/// (notifications, webhooks) hook in here.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::PurchaseOrderStatusChanged {
                purchase_order_id,
                old_status,
                new_status,
            } => {
                info!(
                    purchase_order_id = %purchase_order_id,
                    old_status = %old_status,
                    new_status = %new_status,
                    "purchase order status changed"
                );
            }
            Event::PaymentRecorded {
                payment_id,
                purchase_order_id,
            } => {
                info!(
                    payment_id = %payment_id,
                    purchase_order_id = %purchase_order_id,
                    "payment recorded"
                );
            }
            other => {
                info!(event = ?other, "event processed");
            }
        }
    }

    info!("Event channel closed, stopping event processing loop");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_through_the_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let id = Uuid::new_v4();

        sender
            .send(Event::VendorCreated(id))
            .await
            .expect("send event");

        match rx.recv().await {
            Some(Event::VendorCreated(received)) => assert_eq!(received, id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_fails_when_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        let result = sender.send(Event::VendorDeleted(Uuid::new_v4())).await;
        assert!(result.is_err());
    }
}
