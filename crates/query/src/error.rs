use thiserror::Error;

use wattline_store::StoreError;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid period '{0}' (choose 30m / 1d / 1w / 1m / 1y)")]
    InvalidPeriod(String),

    #[error("invalid month '{0}': expected format YYYY-MM")]
    InvalidMonth(String),

    #[error("no billing data found for meter {meter_id} in month {month}")]
    NoBillingData { meter_id: String, month: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
