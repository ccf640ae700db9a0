pub mod api;
pub mod redirect;
pub mod session;
pub mod storage;
