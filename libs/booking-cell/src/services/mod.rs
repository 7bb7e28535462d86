// libs/booking-cell/src/services/mod.rs
pub mod coordinator;
pub mod notify;

pub use coordinator::BookingCoordinator;
pub use notify::BookingNotifier;
