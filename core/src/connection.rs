use secrecy::{ExposeSecret, SecretString};

/// Endpoint and credentials handed to every backend invocation. Owned by the session;
/// this crate never persists it.
#[derive(Debug)]
pub struct Connection {
    pub repository_url: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
}

impl Connection {
    pub fn new(repository_url: impl Into<String>) -> Self {
        Self {
            repository_url: repository_url.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: SecretString) -> Self {
        self.username = Some(username.into());
        self.password = Some(password);
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some() || self.password.is_some()
    }

    /// Backend arguments carrying the credentials. Caching is disabled whenever any
    /// credential is supplied so no secret outlives this connection.
    pub(crate) fn auth_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(username) = &self.username {
            args.push("--username".to_string());
            args.push(username.clone());
        }
        if let Some(password) = &self.password {
            args.push("--password".to_string());
            args.push(password.expose_secret().to_string());
        }
        if self.has_credentials() {
            args.push("--no-auth-cache".to_string());
        }
        args
    }
}
