//! HTTP analysis layer
//!
//! Issues analysis requests and normalizes everything - including
//! transport failures - into a uniform response record.

pub mod analyzer;
pub mod response;
pub mod retry;

pub use analyzer::{HttpAnalyzer, TokioWaiter, Waiter};
pub use response::{ResponseData, STATUS_UNREACHABLE};
pub use retry::{CountingRetryPolicy, DefaultRetryPolicy, RetryPolicy};
