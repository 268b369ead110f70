//! 用例服务

pub mod call_service;
pub mod pin_service;

#[cfg(test)]
mod pin_service_tests;

pub use call_service::{CallService, CallServiceDependencies, SignalKind};
pub use pin_service::{PinService, PinServiceDependencies};
