//! Built-in pipeline stages.

pub mod feedback;
pub mod logger;
pub mod offline;
pub mod operation;
pub mod persist;
pub mod request;

pub use feedback::FeedbackStage;
pub use logger::LoggerStage;
pub use offline::OfflineStage;
pub use operation::OptimisticStage;
pub use persist::PersistStage;
pub use request::{RequestStage, Transport};
