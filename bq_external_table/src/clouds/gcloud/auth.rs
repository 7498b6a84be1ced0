//! Authentication support for Google Cloud.

use gcp_auth::CustomServiceAccount;
use std::sync::Arc;

use crate::common::*;
use crate::credentials::Credentials;

pub(crate) use gcp_auth::{Token as AccessToken, TokenProvider};

/// Something that hands out OAuth2 tokens.
pub(crate) type Authenticator = Arc<dyn TokenProvider>;

/// Build an authenticator from an explicit service account key.
#[instrument(level = "trace", skip(credentials), fields(email = %credentials.client_email()))]
pub(crate) fn authenticator(credentials: &Credentials) -> Result<Authenticator> {
    let service_account = CustomServiceAccount::from_json(credentials.key_json())
        .context("failed to create authenticator")?;
    Ok(Arc::new(service_account))
}
