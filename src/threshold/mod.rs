pub mod service;

pub use service::ThresholdSigningService;
