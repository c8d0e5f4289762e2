// Core services
pub mod payments;
pub mod purchase_orders;
pub mod vendors;

// Shared financial-snapshot aggregation used by vendor detail and reports
pub mod finance;

// Read-only reporting
pub mod analytics;
