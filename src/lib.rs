// Library exports for the CLI and integration tests
pub mod config;
pub mod errors;
pub mod models;
pub mod services;

pub use config::Config;
pub use errors::{RequestError, SessionError};
pub use models::{
    auth::Token,
    session::{Portal, Session},
    user::{UserProfile, UserRole},
};
pub use services::{
    api::ApiClient,
    redirect::{LogRedirect, LoginRedirect},
    session::SessionStore,
    storage::{FileStorage, MemoryStorage, SessionStorage, StoredSession},
};
