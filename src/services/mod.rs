pub mod client;
pub mod collaborators;
pub mod error;
pub mod types;

pub use client::ServiceClient;
pub use collaborators::{
    Detector, HttpDetector, HttpImageSource, HttpReportStore, ImageSource, ReportStore,
};
pub use error::ServiceError;
pub use types::{CaptureMetadata, DetectionResult, DetectionSource, Snapshot, StoreReceipt};
