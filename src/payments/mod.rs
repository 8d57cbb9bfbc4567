pub mod flutterwave;
pub mod gateway;
pub mod paystack;
pub mod provider;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;

pub use flutterwave::FlutterwaveProvider;
pub use gateway::{PaymentGateway, ProviderKind};
pub use paystack::PaystackProvider;
pub use provider::{from_subunit, to_subunit, PaymentProvider};
pub use types::*;

#[cfg(any(test, feature = "test-utils"))]
pub use fake::FakeProvider;
