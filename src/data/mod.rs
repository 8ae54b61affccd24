pub mod dataset;
pub mod market;

pub use dataset::{run_pipeline, Dataset, RawSeries};
pub use market::{MarketDataClient, PriceRecord};
