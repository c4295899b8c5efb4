pub mod backend;
pub mod flow;
pub mod indexer;
pub mod report;
pub mod scanner;

pub use backend::{Backend, BackendError};
pub use flow::FlowClient;
pub use indexer::{IndexError, Indexer};
pub use report::write_groups;
pub use scanner::{ScanError, ScanReport, Scanner};
