use serde::{Deserialize, Serialize};

/// Signed-in account on one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub server: String,
    pub email: String,
    pub name: String,
    pub avatar: Option<String>,
    #[serde(skip_serializing)]
    pub token: String,
    pub device_id: String,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub synced_at: Option<String>,
}

/// Central server an account belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub domain: String,
    pub name: String,
    pub version: String,
    pub available: bool,
    pub created_at: String,
    pub synced_at: Option<String>,
}

/// Token of a signed-out account, kept until the server confirms revocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedToken {
    pub token: String,
    pub account_id: String,
    pub server: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProfile {
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
}
