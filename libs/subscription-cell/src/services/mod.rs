pub mod entitlement;

pub use entitlement::EntitlementTracker;
