use std::sync::Arc;

use session_client::{
    AuthClient, AuthRequest, ClearCredentials, CredentialKey, CredentialStore, FileCredentialStore,
    SessionTeardown,
};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::{AppError, Result};

/// Clears the stored session and tells the user to sign in again.
struct CliTeardown {
    clear: ClearCredentials,
}

#[async_trait::async_trait]
impl SessionTeardown for CliTeardown {
    async fn on_session_invalid(&self, reason: &str) {
        self.clear.on_session_invalid(reason).await;
        eprintln!("Session expired ({reason}). Run `sesh login` to sign in again.");
    }
}

pub struct CommandExecutor {
    config: AppConfig,
    store: Arc<FileCredentialStore>,
}

impl CommandExecutor {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let store = FileCredentialStore::open(config.credentials_path()).await?;
        debug!(path = %store.path().display(), "Using credential file");
        Ok(Self {
            config,
            store: Arc::new(store),
        })
    }

    pub async fn login(&self, token: &str, refresh_id: &str) -> Result<()> {
        if token.trim().is_empty() || refresh_id.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "token and refresh id must not be empty".to_string(),
            ));
        }
        self.store.set(CredentialKey::AccessToken, token).await?;
        self.store.set(CredentialKey::RefreshId, refresh_id).await?;
        info!("Session stored");
        println!("✓ Signed in");
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        self.store.clear().await?;
        println!("✓ Signed out");
        Ok(())
    }

    pub async fn status(&self) -> Result<()> {
        let token = self.store.get(CredentialKey::AccessToken).await?;
        let refresh_id = self.store.get(CredentialKey::RefreshId).await?;
        match (token, refresh_id) {
            (Some(token), Some(refresh_id)) => {
                println!("Signed in");
                println!("  access token: {}", mask(&token));
                println!("  refresh id:   {refresh_id}");
                println!("  stored in:    {}", self.store.path().display());
                Ok(())
            }
            _ => Err(AppError::NotSignedIn),
        }
    }

    pub async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &[String],
        data: Option<&str>,
        include: bool,
        timeout: Option<u64>,
    ) -> Result<()> {
        let client = self.build_client(timeout)?;
        let request = build_request(method, url, headers, data)?;

        let response = client.send(request).await?;
        if response.was_retried() {
            info!("Request succeeded after refreshing the session");
        }

        if include {
            println!("{}", response.status);
            for (name, value) in &response.headers {
                println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
            }
            println!();
        }

        // Pretty-print JSON bodies, pass anything else through.
        match serde_json::from_slice::<serde_json::Value>(&response.body) {
            Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
            Err(_) => println!("{}", response.text()),
        }
        Ok(())
    }

    fn build_client(&self, timeout: Option<u64>) -> Result<AuthClient> {
        let store: Arc<dyn CredentialStore> = self.store.clone();
        let teardown = CliTeardown {
            clear: ClearCredentials::new(Arc::clone(&store)),
        };
        Ok(AuthClient::builder(self.config.client_config(timeout)?)
            .store(store)
            .teardown(Arc::new(teardown))
            .build()?)
    }
}

fn build_request(
    method: &str,
    url: &str,
    headers: &[String],
    data: Option<&str>,
) -> Result<AuthRequest> {
    let method = reqwest_method(method)?;
    let mut request = AuthRequest::new(method, url);

    for raw in headers {
        let (name, value) = raw
            .split_once(':')
            .ok_or_else(|| AppError::InvalidInput(format!("header `{raw}` must be `Name: value`")))?;
        request = request.with_header(name.trim(), value.trim())?;
    }

    if let Some(data) = data {
        let json: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| AppError::InvalidInput(format!("--data is not valid JSON: {e}")))?;
        request = request.with_json(&json)?;
    }

    Ok(request)
}

fn reqwest_method(method: &str) -> Result<session_client::Method> {
    session_client::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| AppError::InvalidInput(format!("invalid HTTP method `{method}`")))
}

/// Show only the edges of a secret.
fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}
