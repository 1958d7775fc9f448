pub mod common;
pub mod stats;
pub mod router;
pub mod flashloan;

pub use common::{weighted_score, LiquiditySource, RawVenueQuote, VenueQuoteSource, MAX_SCORE};
pub use stats::{InMemoryProviderStats, ProviderStatsStore, SharedStatsStore};
pub use router::RouteOptimizer;
pub use flashloan::{
    encode_callback_data, CallbackHop, FallbackEvent, FallbackState, FlashLoanProvider,
    LendingQuoteSource, LoanAggregator, LoanReceipt, LoanSelection,
};
