use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::SqliteConnection;
use log::info;

use tandem_core::accounts::{Account, AccountProfile, AccountRepositoryTrait, DeletedToken, Server};
use tandem_core::Result;

use super::model::{AccountDB, DeletedTokenDB, ServerDB};
use crate::db::{get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{accounts, deleted_tokens, servers};

fn load_account(conn: &mut SqliteConnection, account_id: &str) -> Result<Option<Account>> {
    let row = accounts::table
        .find(account_id)
        .select(AccountDB::as_select())
        .first::<AccountDB>(conn)
        .optional()
        .map_err(StorageError::from)?;
    Ok(row.map(Account::from))
}

pub struct AccountRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl AccountRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl AccountRepositoryTrait for AccountRepository {
    fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        let mut conn = get_connection(&self.pool)?;
        load_account(&mut conn, account_id)
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = accounts::table
            .order(accounts::created_at.asc())
            .select(AccountDB::as_select())
            .load::<AccountDB>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(Account::from).collect())
    }

    async fn insert_account(&self, account: Account) -> Result<Account> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Account> {
                diesel::insert_into(accounts::table)
                    .values(AccountDB::from(&account))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(account)
            })
            .await
    }

    async fn update_account_profile(
        &self,
        account_id: &str,
        profile: AccountProfile,
        synced_at: String,
    ) -> Result<Option<Account>> {
        let account_id = account_id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Option<Account>> {
                let updated = diesel::update(accounts::table.find(&account_id))
                    .set((
                        accounts::name.eq(profile.name),
                        accounts::email.eq(profile.email),
                        accounts::avatar.eq(profile.avatar),
                        accounts::updated_at.eq(Some(synced_at.clone())),
                        accounts::synced_at.eq(Some(synced_at)),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if updated == 0 {
                    return Ok(None);
                }
                load_account(conn, &account_id)
            })
            .await
    }

    async fn delete_account(&self, account_id: &str) -> Result<Option<DeletedToken>> {
        let account_id = account_id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Option<DeletedToken>> {
                let Some(account) = load_account(conn, &account_id)? else {
                    return Ok(None);
                };
                diesel::delete(accounts::table.find(&account.id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                let parked = DeletedTokenDB {
                    token: account.token,
                    account_id: account.id,
                    server: account.server,
                    created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                };
                diesel::insert_into(deleted_tokens::table)
                    .values(&parked)
                    .on_conflict_do_nothing()
                    .execute(conn)
                    .map_err(StorageError::from)?;
                info!("[Storage] Removed account {}, token parked for revocation", parked.account_id);
                Ok(Some(DeletedToken::from(parked)))
            })
            .await
    }

    fn get_server(&self, domain: &str) -> Result<Option<Server>> {
        let mut conn = get_connection(&self.pool)?;
        let row = servers::table
            .find(domain)
            .select(ServerDB::as_select())
            .first::<ServerDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(row.map(Server::from))
    }

    async fn upsert_server(&self, server: Server) -> Result<Server> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Server> {
                let row = ServerDB::from(&server);
                // created_at is kept from the first insert.
                diesel::insert_into(servers::table)
                    .values(&row)
                    .on_conflict(servers::domain)
                    .do_update()
                    .set((
                        servers::name.eq(&row.name),
                        servers::version.eq(&row.version),
                        servers::available.eq(row.available),
                        servers::synced_at.eq(row.synced_at.clone()),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                let stored = servers::table
                    .find(&row.domain)
                    .select(ServerDB::as_select())
                    .first::<ServerDB>(conn)
                    .map_err(StorageError::from)?;
                Ok(Server::from(stored))
            })
            .await
    }

    fn list_deleted_tokens(&self) -> Result<Vec<DeletedToken>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = deleted_tokens::table
            .order(deleted_tokens::created_at.asc())
            .select(DeletedTokenDB::as_select())
            .load::<DeletedTokenDB>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(DeletedToken::from).collect())
    }

    async fn delete_deleted_token(&self, token: &str) -> Result<bool> {
        let token = token.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<bool> {
                let removed = diesel::delete(deleted_tokens::table.find(&token))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(removed > 0)
            })
            .await
    }
}
