pub mod booking;
pub mod payment;

pub use booking::*;
pub use payment::*;
