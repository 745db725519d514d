use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::SqliteConnection;
use log::debug;

use tandem_core::errors::MutationError;
use tandem_core::nodes::{
    Collaboration, Node, NodeCreateWrite, NodeDeleteWrite, NodeRepositoryTrait, NodeUpdateWrite,
};
use tandem_core::Result;

use super::model::{CollaborationDB, NodeDB};
use crate::db::{get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::mutations::insert_mutation;
use crate::schema::{collaborations, downloads, interaction_events, interactions, nodes, uploads};
use crate::transfers::{DownloadDB, UploadDB};

fn load_node(conn: &mut SqliteConnection, node_id: &str) -> Result<Option<Node>> {
    nodes::table
        .find(node_id)
        .select(NodeDB::as_select())
        .first::<NodeDB>(conn)
        .optional()
        .map_err(StorageError::from)?
        .map(Node::try_from)
        .transpose()
}

/// Removes every row that hangs off the given nodes, except the nodes
/// themselves.
fn delete_dependents(conn: &mut SqliteConnection, node_ids: &[String]) -> Result<()> {
    diesel::delete(collaborations::table.filter(collaborations::node_id.eq_any(node_ids)))
        .execute(conn)
        .map_err(StorageError::from)?;
    diesel::delete(uploads::table.filter(uploads::file_id.eq_any(node_ids)))
        .execute(conn)
        .map_err(StorageError::from)?;
    diesel::delete(downloads::table.filter(downloads::file_id.eq_any(node_ids)))
        .execute(conn)
        .map_err(StorageError::from)?;
    diesel::delete(interactions::table.filter(interactions::node_id.eq_any(node_ids)))
        .execute(conn)
        .map_err(StorageError::from)?;
    diesel::delete(interaction_events::table.filter(interaction_events::node_id.eq_any(node_ids)))
        .execute(conn)
        .map_err(StorageError::from)?;
    Ok(())
}

pub struct NodeRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl NodeRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl NodeRepositoryTrait for NodeRepository {
    fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        let mut conn = get_connection(&self.pool)?;
        load_node(&mut conn, node_id)
    }

    fn list_children(&self, parent_id: &str) -> Result<Vec<Node>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = nodes::table
            .filter(nodes::parent_id.eq(parent_id))
            .order(nodes::id.asc())
            .select(NodeDB::as_select())
            .load::<NodeDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(Node::try_from).collect()
    }

    fn get_collaboration(&self, node_id: &str, collaborator_id: &str) -> Result<Option<Collaboration>> {
        let mut conn = get_connection(&self.pool)?;
        let row = collaborations::table
            .find((node_id, collaborator_id))
            .select(CollaborationDB::as_select())
            .first::<CollaborationDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(row.map(Collaboration::from))
    }

    async fn create_node(&self, write: NodeCreateWrite) -> Result<Node> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Node> {
                let existing = nodes::table
                    .find(&write.node.id)
                    .select(nodes::id)
                    .first::<String>(conn)
                    .optional()
                    .map_err(StorageError::from)?;
                if existing.is_some() {
                    return Err(MutationError::AlreadyExists(write.node.id.clone()).into());
                }

                diesel::insert_into(nodes::table)
                    .values(&NodeDB::from_domain(&write.node)?)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if let Some(mutation) = &write.mutation {
                    insert_mutation(conn, mutation)?;
                }
                if let Some(upload) = &write.upload {
                    diesel::insert_into(uploads::table)
                        .values(&UploadDB::from_domain(upload)?)
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                if let Some(download) = &write.download {
                    diesel::insert_into(downloads::table)
                        .values(&DownloadDB::from_domain(download)?)
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                Ok(write.node)
            })
            .await
    }

    async fn update_node(&self, write: NodeUpdateWrite) -> Result<Option<Node>> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Option<Node>> {
                let attributes = serde_json::to_string(&write.attributes)?;
                let updated = diesel::update(
                    nodes::table
                        .filter(nodes::id.eq(&write.node_id))
                        .filter(nodes::local_revision.eq(write.expected_revision)),
                )
                .set((
                    nodes::attributes.eq(attributes),
                    nodes::state.eq(write.state.clone()),
                    nodes::local_revision.eq(nodes::local_revision + 1),
                    nodes::updated_at.eq(Some(write.updated_at.clone())),
                    nodes::updated_by.eq(Some(write.updated_by.clone())),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;

                if updated == 0 {
                    debug!(
                        "[Mutations] Stale write to {} at revision {}",
                        write.node_id, write.expected_revision
                    );
                    return Ok(None);
                }

                if let Some(revision) = write.server_revision {
                    diesel::update(nodes::table.find(&write.node_id))
                        .set(nodes::server_revision.eq(revision))
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                if let Some(mutation) = &write.mutation {
                    insert_mutation(conn, mutation)?;
                }
                load_node(conn, &write.node_id)
            })
            .await
    }

    async fn delete_node(&self, write: NodeDeleteWrite) -> Result<bool> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<bool> {
                let deleted = diesel::delete(nodes::table.find(&write.node_id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if deleted == 0 {
                    return Ok(false);
                }
                delete_dependents(conn, std::slice::from_ref(&write.node_id))?;
                if let Some(mutation) = &write.mutation {
                    insert_mutation(conn, mutation)?;
                }
                Ok(true)
            })
            .await
    }

    async fn delete_nodes_by_root(&self, root_id: &str) -> Result<usize> {
        let root_id = root_id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                let ids = nodes::table
                    .filter(nodes::root_id.eq(&root_id))
                    .select(nodes::id)
                    .load::<String>(conn)
                    .map_err(StorageError::from)?;
                if ids.is_empty() {
                    return Ok(0);
                }
                delete_dependents(conn, &ids)?;
                let deleted = diesel::delete(nodes::table.filter(nodes::id.eq_any(&ids)))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(deleted)
            })
            .await
    }

    async fn upsert_collaboration(&self, collaboration: Collaboration) -> Result<()> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                let row = CollaborationDB::from(collaboration);
                diesel::insert_into(collaborations::table)
                    .values(&row)
                    .on_conflict((collaborations::node_id, collaborations::collaborator_id))
                    .do_update()
                    .set((
                        collaborations::role.eq(&row.role),
                        collaborations::revision.eq(row.revision),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn delete_collaboration(&self, node_id: &str, collaborator_id: &str) -> Result<bool> {
        let node_id = node_id.to_string();
        let collaborator_id = collaborator_id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<bool> {
                let deleted = diesel::delete(collaborations::table.find((&node_id, &collaborator_id)))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(deleted > 0)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::mutations::MutationRepository;
    use serde_json::json;
    use tandem_core::mutations::{MutationData, MutationRepositoryTrait, NewMutation};
    use tandem_core::nodes::NodeType;
    use tandem_core::transfers::{TransferRepositoryTrait, Upload};
    use tandem_core::utils::time::now_db_timestamp;

    fn node(id: &str, node_type: NodeType, parent_id: Option<&str>, root_id: &str) -> Node {
        Node {
            id: id.to_string(),
            node_type,
            parent_id: parent_id.map(str::to_string),
            root_id: root_id.to_string(),
            workspace_id: "w1".to_string(),
            attributes: json!({ "type": node_type.as_str(), "name": id })
                .as_object()
                .cloned()
                .expect("object"),
            state: vec![1, 2, 3],
            local_revision: 1,
            server_revision: 0,
            created_at: now_db_timestamp(),
            created_by: "alice".to_string(),
            updated_at: None,
            updated_by: None,
        }
    }

    fn create(node: Node) -> NodeCreateWrite {
        NodeCreateWrite {
            mutation: Some(NewMutation::new(
                "w1",
                MutationData::NodeCreate {
                    node_id: node.id.clone(),
                    node_type: node.node_type.as_str().to_string(),
                    parent_id: node.parent_id.clone(),
                    root_id: node.root_id.clone(),
                    state: String::new(),
                    created_at: node.created_at.clone(),
                    created_by: node.created_by.clone(),
                },
                now_db_timestamp(),
            )),
            node,
            upload: None,
            download: None,
        }
    }

    fn rename(node_id: &str, expected_revision: i64, name: &str) -> NodeUpdateWrite {
        NodeUpdateWrite {
            node_id: node_id.to_string(),
            expected_revision,
            attributes: json!({ "type": "page", "name": name })
                .as_object()
                .cloned()
                .expect("object"),
            state: vec![9],
            updated_at: now_db_timestamp(),
            updated_by: "alice".to_string(),
            server_revision: None,
            mutation: None,
        }
    }

    #[tokio::test]
    async fn create_writes_node_and_change_record_together() {
        let (_dir, pool, writer) = test_db::setup();
        let repo = NodeRepository::new(pool.clone(), writer.clone());
        let outbox = MutationRepository::new(pool, writer);

        let created = repo
            .create_node(create(node("space", NodeType::Space, None, "space")))
            .await
            .expect("create");
        let stored = repo.get_node("space").expect("read").expect("node");
        assert_eq!(stored, created);
        assert_eq!(outbox.count_mutations_for_node("space").expect("count"), 1);

        let duplicate = repo
            .create_node(create(node("space", NodeType::Space, None, "space")))
            .await;
        assert!(matches!(
            duplicate,
            Err(tandem_core::Error::Mutation(MutationError::AlreadyExists(_)))
        ));
        assert_eq!(outbox.count_mutations_for_node("space").expect("count"), 1);
    }

    #[tokio::test]
    async fn stale_revision_is_rejected() {
        let (_dir, pool, writer) = test_db::setup();
        let repo = NodeRepository::new(pool, writer);
        repo.create_node(create(node("page", NodeType::Page, Some("space"), "space")))
            .await
            .expect("create");

        let updated = repo
            .update_node(rename("page", 1, "first"))
            .await
            .expect("update")
            .expect("applied");
        assert_eq!(updated.local_revision, 2);
        assert_eq!(updated.attributes["name"], json!("first"));
        assert_eq!(updated.state, vec![9]);

        let stale = repo.update_node(rename("page", 1, "second")).await.expect("update");
        assert!(stale.is_none());
        let stored = repo.get_node("page").expect("read").expect("node");
        assert_eq!(stored.attributes["name"], json!("first"));
        assert_eq!(stored.local_revision, 2);
    }

    #[tokio::test]
    async fn server_revision_moves_with_the_write() {
        let (_dir, pool, writer) = test_db::setup();
        let repo = NodeRepository::new(pool, writer);
        repo.create_node(create(node("page", NodeType::Page, Some("space"), "space")))
            .await
            .expect("create");

        let mut write = rename("page", 1, "remote");
        write.server_revision = Some(42);
        let updated = repo.update_node(write).await.expect("update").expect("applied");
        assert_eq!(updated.server_revision, 42);
    }

    #[tokio::test]
    async fn delete_takes_dependents_along() {
        let (_dir, pool, writer) = test_db::setup();
        let repo = NodeRepository::new(pool.clone(), writer.clone());
        let transfers = crate::transfers::TransferRepository::new(pool.clone(), writer.clone());
        let outbox = MutationRepository::new(pool, writer);

        let mut write = create(node("file", NodeType::File, Some("page"), "space"));
        write.upload = Some(Upload::new("file", "w1", now_db_timestamp()));
        repo.create_node(write).await.expect("create");
        repo.upsert_collaboration(Collaboration {
            node_id: "file".to_string(),
            collaborator_id: "bob".to_string(),
            role: "editor".to_string(),
            revision: 1,
            created_at: now_db_timestamp(),
        })
        .await
        .expect("collaboration");
        assert!(transfers.get_upload("file").expect("read").is_some());

        let deleted = repo
            .delete_node(NodeDeleteWrite {
                node_id: "file".to_string(),
                mutation: Some(NewMutation::new(
                    "w1",
                    MutationData::NodeDelete {
                        node_id: "file".to_string(),
                        root_id: "space".to_string(),
                        deleted_at: now_db_timestamp(),
                        deleted_by: "alice".to_string(),
                    },
                    now_db_timestamp(),
                )),
            })
            .await
            .expect("delete");

        assert!(deleted);
        assert!(repo.get_node("file").expect("read").is_none());
        assert!(transfers.get_upload("file").expect("read").is_none());
        assert!(repo.get_collaboration("file", "bob").expect("read").is_none());
        assert_eq!(outbox.count_mutations_for_node("file").expect("count"), 2);

        let again = repo
            .delete_node(NodeDeleteWrite {
                node_id: "file".to_string(),
                mutation: None,
            })
            .await
            .expect("delete");
        assert!(!again);
    }

    #[tokio::test]
    async fn revoked_root_removes_the_whole_tree_without_change_records() {
        let (_dir, pool, writer) = test_db::setup();
        let repo = NodeRepository::new(pool.clone(), writer.clone());
        let outbox = MutationRepository::new(pool, writer);
        for (id, node_type, parent) in [
            ("space", NodeType::Space, None),
            ("page", NodeType::Page, Some("space")),
            ("folder", NodeType::Folder, Some("space")),
        ] {
            let mut write = create(node(id, node_type, parent, "space"));
            write.mutation = None;
            repo.create_node(write).await.expect("create");
        }
        repo.create_node(create(node("other", NodeType::Space, None, "other")))
            .await
            .expect("create");

        assert_eq!(repo.list_children("space").expect("children").len(), 2);
        assert_eq!(repo.delete_nodes_by_root("space").await.expect("delete"), 3);
        assert!(repo.get_node("page").expect("read").is_none());
        assert!(repo.get_node("other").expect("read").is_some());
        assert_eq!(outbox.list_pending_mutations("w1", 10).expect("list").len(), 1);
    }

    #[tokio::test]
    async fn collaborations_are_upserted_by_key() {
        let (_dir, pool, writer) = test_db::setup();
        let repo = NodeRepository::new(pool, writer);
        let mut grant = Collaboration {
            node_id: "space".to_string(),
            collaborator_id: "bob".to_string(),
            role: "viewer".to_string(),
            revision: 1,
            created_at: now_db_timestamp(),
        };
        repo.upsert_collaboration(grant.clone()).await.expect("insert");
        grant.role = "admin".to_string();
        grant.revision = 2;
        repo.upsert_collaboration(grant.clone()).await.expect("update");

        let stored = repo.get_collaboration("space", "bob").expect("read").expect("row");
        assert_eq!(stored.role, "admin");
        assert_eq!(stored.revision, 2);
        assert!(repo.delete_collaboration("space", "bob").await.expect("delete"));
        assert!(!repo.delete_collaboration("space", "bob").await.expect("delete"));
    }
}
