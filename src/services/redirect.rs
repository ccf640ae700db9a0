use crate::models::session::Portal;

/// Side effect fired when a session is force-closed: send the user to the
/// login screen of the portal they were using.
pub trait LoginRedirect: Send + Sync {
    fn redirect_to_login(&self, portal: Portal);
}

/// Reports the redirect through tracing; used by headless callers such as the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRedirect;

impl LoginRedirect for LogRedirect {
    fn redirect_to_login(&self, portal: Portal) {
        tracing::warn!(
            %portal,
            route = portal.login_route(),
            "Session expired, sign in again"
        );
    }
}
