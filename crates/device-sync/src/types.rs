//! Request and response bodies of the server's client API.

use serde::{Deserialize, Serialize};

use tandem_core::accounts::AccountProfile;
use tandem_core::mutations::{Mutation, MutationPushResult};

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSyncRequest<'a> {
    pub device_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSyncResponse {
    pub account: AccountProfile,
}

#[derive(Debug, Clone, Serialize)]
pub struct MutationsPushRequest<'a> {
    pub mutations: &'a [Mutation],
}

#[derive(Debug, Clone, Deserialize)]
pub struct MutationsPushResponse {
    pub results: Vec<MutationPushResult>,
}
