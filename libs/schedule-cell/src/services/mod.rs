pub mod slots;
pub mod timezone;

pub use slots::SlotStore;
pub use timezone::LocalWindow;
