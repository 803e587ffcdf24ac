//! Shared request and response shapes

pub mod input;
pub mod pagination;
pub mod report;

pub use input::Versioned;
pub use pagination::{Paginated, Pagination, PaginationParams};
pub use report::{ImportReport, SkippedRow};
