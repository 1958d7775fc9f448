pub mod executor;
pub mod providers;
pub mod selector;

pub use executor::{FallbackEvent, FallbackState};
pub use providers::{
    encode_callback_data, fee_for, CallbackHop, FlashLoanProvider, LendingQuoteSource, LoanReceipt,
};
pub use selector::{fee_score, liquidity_score, LoanAggregator, LoanSelection};
