use surrealdb::{opt::PatchOp, sql::Datetime as SurrealDatetime};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::chat_message::ChatMessage;

/// Titles derived from the first query are cut to this many characters.
const DERIVED_TITLE_MAX_CHARS: usize = 60;

stored_object!(ChatSession, "chat_session", {
    owner_id: String,
    title: String,
    /// Soft delete hides the session from listings; messages and audit
    /// records stay where they are.
    is_deleted: bool
});

impl ChatSession {
    pub fn new(owner_id: String, title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            owner_id,
            title: title.unwrap_or_default(),
            is_deleted: false,
        }
    }

    pub async fn create_session(
        owner_id: String,
        title: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<ChatSession, AppError> {
        let session = ChatSession::new(owner_id, title);
        db.store_item(session.clone()).await?;
        Ok(session)
    }

    /// Fetch and owner-check a session in one step.
    pub async fn get_owned(
        id: &str,
        owner_id: &str,
        db: &SurrealDbClient,
    ) -> Result<ChatSession, AppError> {
        let session: ChatSession = db
            .get_item(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Chat session not found".to_string()))?;

        if session.owner_id != owner_id {
            return Err(AppError::Auth(
                "You don't have access to this chat session".to_string(),
            ));
        }

        Ok(session)
    }

    pub async fn get_with_messages(
        id: &str,
        owner_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(ChatSession, Vec<ChatMessage>), AppError> {
        let session = Self::get_owned(id, owner_id, db).await?;
        let messages = ChatMessage::list_for_session(id, db).await?;
        Ok((session, messages))
    }

    pub async fn list_for_owner(
        owner_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<ChatSession>, AppError> {
        let sessions: Vec<ChatSession> = db
            .client
            .query(
                "SELECT * FROM type::table($table) \
                 WHERE owner_id = $owner_id AND is_deleted = false \
                 ORDER BY updated_at DESC",
            )
            .bind(("table", Self::table_name()))
            .bind(("owner_id", owner_id.to_string()))
            .await?
            .take(0)?;

        Ok(sessions)
    }

    /// Idempotent: deleting an already-deleted session succeeds quietly.
    pub async fn soft_delete(
        id: &str,
        owner_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let session = Self::get_owned(id, owner_id, db).await?;
        if session.is_deleted {
            return Ok(());
        }

        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/is_deleted", true))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }

    pub async fn patch_title(
        id: &str,
        owner_id: &str,
        new_title: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        Self::get_owned(id, owner_id, db).await?;

        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/title", new_title.to_string()))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }

    /// Set the title from the first query when none was given explicitly.
    /// A session that already carries a title is left alone.
    pub async fn derive_title_if_empty(
        id: &str,
        first_query: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let session: Option<ChatSession> = db.get_item(id).await?;
        let Some(session) = session else {
            return Err(AppError::NotFound("Chat session not found".to_string()));
        };
        if !session.title.is_empty() {
            return Ok(());
        }

        db.client
            .query(
                "UPDATE type::thing($table, $id) SET title = $title, updated_at = $now",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("title", truncate_title(first_query)))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?
            .check()?;

        Ok(())
    }
}

fn truncate_title(query: &str) -> String {
    let trimmed = query.trim();
    if trimmed.chars().count() <= DERIVED_TITLE_MAX_CHARS {
        return trimmed.to_string();
    }

    let mut title: String = trimmed.chars().take(DERIVED_TITLE_MAX_CHARS).collect();
    title.push('…');
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory(namespace, &database)
            .await
            .expect("in-memory surrealdb")
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let db = memory_db().await;

        let session = ChatSession::create_session("user_1".into(), Some("Budget".into()), &db)
            .await
            .expect("create");

        let listed = ChatSession::list_for_owner("user_1", &db).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, session.id);
        assert_eq!(listed[0].title, "Budget");
    }

    #[tokio::test]
    async fn test_soft_delete_hides_from_listing_and_is_idempotent() {
        let db = memory_db().await;
        let session = ChatSession::create_session("user_1".into(), None, &db)
            .await
            .expect("create");

        ChatSession::soft_delete(&session.id, "user_1", &db)
            .await
            .expect("first delete");
        ChatSession::soft_delete(&session.id, "user_1", &db)
            .await
            .expect("second delete is a no-op");

        let listed = ChatSession::list_for_owner("user_1", &db).await.expect("list");
        assert!(listed.is_empty());

        // The record itself survives; only the listing hides it.
        let raw: Option<ChatSession> = db.get_item(&session.id).await.expect("get");
        assert!(raw.expect("session exists").is_deleted);
    }

    #[tokio::test]
    async fn test_soft_delete_is_owner_checked() {
        let db = memory_db().await;
        let session = ChatSession::create_session("owner".into(), None, &db)
            .await
            .expect("create");

        let result = ChatSession::soft_delete(&session.id, "intruder", &db).await;
        match result {
            Err(AppError::Auth(_)) => {}
            other => panic!("expected Auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_title_derivation_from_first_query() {
        let db = memory_db().await;
        let session = ChatSession::create_session("user_1".into(), None, &db)
            .await
            .expect("create");

        ChatSession::derive_title_if_empty(&session.id, "  What is our parental leave policy?  ", &db)
            .await
            .expect("derive");

        let updated: ChatSession = db
            .get_item(&session.id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(updated.title, "What is our parental leave policy?");

        // A second append must not overwrite the derived title.
        ChatSession::derive_title_if_empty(&session.id, "Different question", &db)
            .await
            .expect("derive again");
        let unchanged: ChatSession = db
            .get_item(&session.id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(unchanged.title, "What is our parental leave policy?");
    }

    #[tokio::test]
    async fn test_long_titles_are_truncated() {
        let long_query = "word ".repeat(40);
        let title = truncate_title(&long_query);
        assert!(title.chars().count() <= DERIVED_TITLE_MAX_CHARS + 1);
        assert!(title.ends_with('…'));
    }

    #[tokio::test]
    async fn test_patch_title_owner_checked() {
        let db = memory_db().await;
        let session = ChatSession::create_session("owner".into(), Some("Old".into()), &db)
            .await
            .expect("create");

        ChatSession::patch_title(&session.id, "owner", "New", &db)
            .await
            .expect("patch");
        let updated: ChatSession = db
            .get_item(&session.id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(updated.title, "New");

        let denied = ChatSession::patch_title(&session.id, "intruder", "Hacked", &db).await;
        assert!(matches!(denied, Err(AppError::Auth(_))));
    }
}
