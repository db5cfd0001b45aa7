pub mod billing;
pub mod error;
pub mod window;

pub use billing::BillingSummary;
pub use error::QueryError;
pub use window::{
    bucket_by_day, bucket_by_month, DailyBucket, DayWindow, DetailEntry, MonthlyBucket, Period,
    QueryAggregator,
};
