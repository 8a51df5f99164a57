pub mod admin_service;
pub mod http;
pub mod metrics_defs;
#[cfg(any(test, feature = "test-support"))]
pub mod testutils;
