pub mod approval;
pub mod principal;
pub mod query;
