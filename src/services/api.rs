use std::sync::Arc;

use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    errors::RequestError,
    models::{
        auth::{LoginForm, LoginResponse, RefreshRequest, RefreshResponse},
        session::Portal,
        user::UserProfile,
    },
    services::{redirect::LoginRedirect, session::SessionStore},
};

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh";
const LOGOUT_PATH: &str = "/auth/logout";
const PROFILE_PATH: &str = "/auth/me";

const SESSION_EXPIRED: &str = "Session expired, please sign in again";

/// Single choke point for backend calls. Attaches the current bearer token,
/// turns non-2xx responses into [`RequestError`] and runs the
/// refresh-then-retry-once flow on 401.
///
/// Cloning is cheap; clones share the session and the refresh gate.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    session: Arc<SessionStore>,
    redirect: Arc<dyn LoginRedirect>,
    portal: Portal,
    /// Serializes refresh attempts across every clone of this client.
    refresh_gate: Arc<Mutex<()>>,
}

/// A caller's request, kept so it can be replayed after a refresh.
struct PendingRequest<'a> {
    method: Method,
    path: &'a str,
    body: Option<Value>,
    /// Set on the replay; a replay never triggers another refresh.
    retried: bool,
}

impl PendingRequest<'_> {
    /// A 401 from the refresh endpoint belongs to the caller, never to the refresh flow.
    fn targets_refresh(&self) -> bool {
        let path = self.path.split('?').next().unwrap_or_default();
        path.trim_matches('/') == REFRESH_PATH.trim_matches('/')
    }
}

impl ApiClient {
    pub fn new(
        config: &Config,
        session: Arc<SessionStore>,
        redirect: Arc<dyn LoginRedirect>,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            session,
            redirect,
            portal: config.portal,
            refresh_gate: Arc::new(Mutex::new(())),
        })
    }

    /// Same session, but forced logouts send the user to `portal`'s login screen.
    pub fn for_portal(&self, portal: Portal) -> Self {
        Self {
            portal,
            ..self.clone()
        }
    }

    pub fn portal(&self) -> Portal {
        self.portal
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RequestError> {
        self.send(Method::GET, path, None::<&()>).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::POST, path, Some(body)).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::PUT, path, Some(body)).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, RequestError> {
        self.send(Method::DELETE, path, None::<&()>).await
    }

    /// Exchange credentials for a session. The login endpoint takes a form body
    /// (`username`, `password`) and is never subject to the refresh flow.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, RequestError> {
        let response = self
            .http
            .post(self.url(LOGIN_PATH))
            .form(&LoginForm {
                username: email,
                password,
            })
            .send()
            .await
            .map_err(RequestError::Network)?;
        let login: LoginResponse = read_json(response).await?;

        self.session.set_session(
            &login.access_token,
            Some(&login.refresh_token),
            login.expires_in,
            login.user.clone(),
        )?;
        info!(user_id = login.user.id, role = %login.user.role, portal = %self.portal, "Signed in");
        Ok(login.user)
    }

    /// Tell the backend the session is over, then clear it locally whatever
    /// the backend answered. The backend's answer is still returned.
    pub async fn logout(&self) -> Result<(), RequestError> {
        let outcome = match self.session.refresh_token() {
            Some(refresh_token) => {
                let mut builder = self.http.post(self.url(LOGOUT_PATH)).json(&RefreshRequest {
                    refresh_token: &refresh_token,
                });
                if let Some(access_token) = self.session.access_token() {
                    builder = builder.bearer_auth(access_token);
                }
                match builder.send().await {
                    Ok(response) => read_json::<Value>(response).await.map(|_| ()),
                    Err(e) => Err(RequestError::Network(e)),
                }
            }
            None => Ok(()),
        };

        self.session.clear()?;
        if let Err(e) = &outcome {
            warn!(error = %e, "Logout call failed; local session cleared");
        }
        info!(portal = %self.portal, "Signed out");
        outcome
    }

    /// Explicitly mint a new access token. A rejected refresh closes the session.
    pub async fn refresh(&self) -> Result<(), RequestError> {
        let _gate = self.refresh_gate.lock().await;
        self.refresh_locked().await.map(|_| ())
    }

    /// Re-read the profile from the backend and replace the cached snapshot.
    pub async fn fetch_profile(&self) -> Result<UserProfile, RequestError> {
        let user: UserProfile = self.get(PROFILE_PATH).await?;
        self.session.set_user(user.clone())?;
        Ok(user)
    }

    async fn send<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(RequestError::Encode)?;
        let mut request = PendingRequest {
            method,
            path,
            body,
            retried: false,
        };
        let mut token = self.session.access_token();

        loop {
            let response = self.dispatch(&request, token.as_deref()).await?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return read_json(response).await;
            }

            if request.targets_refresh() {
                debug!(path = request.path, "Refresh endpoint rejected the caller's token");
                return Err(read_error(response).await);
            }

            if request.retried {
                let rejected = read_error(response).await;
                warn!(
                    method = %request.method,
                    path = request.path,
                    "Replayed request rejected again, closing session"
                );
                self.force_logout()?;
                return Err(rejected);
            }

            debug!(method = %request.method, path = request.path, "Unauthorized, refreshing access token");
            token = Some(self.recover_from_unauthorized(token.as_deref()).await?);
            request.retried = true;
        }
    }

    /// Obtain a token worth replaying with after a 401 on a request sent with
    /// `sent_with`. If a concurrent request already refreshed while this one
    /// waited on the gate, its token is reused instead of spending the refresh
    /// token again.
    async fn recover_from_unauthorized(&self, sent_with: Option<&str>) -> Result<String, RequestError> {
        let _gate = self.refresh_gate.lock().await;

        match self.session.access_token() {
            Some(current) if sent_with != Some(current.as_str()) => {
                debug!("Access token already refreshed by a concurrent request");
                Ok(current)
            }
            // Closed while this request waited; whoever closed it already redirected.
            None if sent_with.is_some() => {
                debug!("Session closed by a concurrent request");
                Err(RequestError::Authentication {
                    message: SESSION_EXPIRED.into(),
                })
            }
            _ => self.refresh_locked().await,
        }
    }

    /// Caller must hold `refresh_gate`.
    async fn refresh_locked(&self) -> Result<String, RequestError> {
        let Some(refresh_token) = self.session.refresh_token() else {
            debug!("No refresh token held, closing session");
            self.force_logout()?;
            return Err(RequestError::Authentication {
                message: SESSION_EXPIRED.into(),
            });
        };

        match self.exchange_refresh_token(&refresh_token).await {
            Ok(access_token) => Ok(access_token),
            // No answer from the server says nothing about the refresh token.
            Err(e @ (RequestError::Network(_) | RequestError::Session(_))) => Err(e),
            Err(e) => {
                warn!(error = %e, "Token refresh rejected, closing session");
                self.force_logout()?;
                Err(e)
            }
        }
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<String, RequestError> {
        let response = self
            .http
            .post(self.url(REFRESH_PATH))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(RequestError::Network)?;
        let refreshed: RefreshResponse = read_json(response).await?;

        if refreshed.refresh_token.is_some() {
            debug!("Refresh response carried a refresh token; keeping the current one");
        }
        self.session
            .update_access_token(&refreshed.access_token, refreshed.expires_in)?;
        debug!(expires_in = refreshed.expires_in, "Access token refreshed");
        Ok(refreshed.access_token)
    }

    /// Clear the session and fire the login redirect, even if the wipe failed.
    fn force_logout(&self) -> Result<(), RequestError> {
        let cleared = self.session.clear();
        self.redirect.redirect_to_login(self.portal);
        cleared.map_err(RequestError::from)
    }

    async fn dispatch(
        &self,
        request: &PendingRequest<'_>,
        token: Option<&str>,
    ) -> Result<Response, RequestError> {
        debug!(
            method = %request.method,
            path = request.path,
            retried = request.retried,
            authenticated = token.is_some(),
            "Sending request"
        );

        let mut builder = self.http.request(request.method.clone(), self.url(request.path));
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder.send().await.map_err(RequestError::Network)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Decode a response, treating an empty body as JSON `null`.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, RequestError> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(RequestError::Network)?;
    if !status.is_success() {
        return Err(RequestError::from_response(status, &bytes));
    }

    let parsed = if bytes.is_empty() {
        serde_json::from_value(Value::Null)
    } else {
        serde_json::from_slice(&bytes)
    };
    parsed.map_err(RequestError::Decode)
}

async fn read_error(response: Response) -> RequestError {
    let status = response.status();
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => {
            warn!(status = status.as_u16(), error = %e, "Could not read error response body");
            Default::default()
        }
    };
    RequestError::from_response(status, &body)
}
