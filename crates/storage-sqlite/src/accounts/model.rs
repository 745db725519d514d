//! Database models for accounts, servers and parked tokens.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use tandem_core::accounts::{Account, DeletedToken, Server};

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::accounts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AccountDB {
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

impl From<&Account> for AccountDB {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            server: account.server.clone(),
            email: account.email.clone(),
            name: account.name.clone(),
            avatar: account.avatar.clone(),
            token: account.token.clone(),
            device_id: account.device_id.clone(),
            created_at: account.created_at.clone(),
            updated_at: account.updated_at.clone(),
            synced_at: account.synced_at.clone(),
        }
    }
}

impl From<AccountDB> for Account {
    fn from(row: AccountDB) -> Self {
        Account {
            id: row.id,
            server: row.server,
            email: row.email,
            name: row.name,
            avatar: row.avatar,
            token: row.token,
            device_id: row.device_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            synced_at: row.synced_at,
        }
    }
}

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(primary_key(domain))]
#[diesel(table_name = crate::schema::servers)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ServerDB {
    pub domain: String,
    pub name: String,
    pub version: String,
    pub available: bool,
    pub created_at: String,
    pub synced_at: Option<String>,
}

impl From<&Server> for ServerDB {
    fn from(server: &Server) -> Self {
        Self {
            domain: server.domain.clone(),
            name: server.name.clone(),
            version: server.version.clone(),
            available: server.available,
            created_at: server.created_at.clone(),
            synced_at: server.synced_at.clone(),
        }
    }
}

impl From<ServerDB> for Server {
    fn from(row: ServerDB) -> Self {
        Server {
            domain: row.domain,
            name: row.name,
            version: row.version,
            available: row.available,
            created_at: row.created_at,
            synced_at: row.synced_at,
        }
    }
}

#[derive(Queryable, Identifiable, Insertable, Selectable, Debug, Clone)]
#[diesel(primary_key(token))]
#[diesel(table_name = crate::schema::deleted_tokens)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DeletedTokenDB {
    pub token: String,
    pub account_id: String,
    pub server: String,
    pub created_at: String,
}

impl From<DeletedTokenDB> for DeletedToken {
    fn from(row: DeletedTokenDB) -> Self {
        DeletedToken {
            token: row.token,
            account_id: row.account_id,
            server: row.server,
            created_at: row.created_at,
        }
    }
}
