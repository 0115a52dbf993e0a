pub mod composer;
pub mod factors;
pub mod quote;

pub use composer::PricingComposer;
pub use factors::RegionalTable;
pub use quote::{AdjustmentKind, PriceAdjustment, PriceQuote};
