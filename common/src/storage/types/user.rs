use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::security::{resolve_clearance, SecurityLevel, UserRole};

stored_object!(User, "user", {
    email: String,
    name: String,
    /// Raw role tag. Kept as a string so a value the enum does not know
    /// deserializes fine and resolves to an empty clearance set.
    role: String,
    is_active: bool
});

impl User {
    pub fn new(email: String, name: String, role: UserRole) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            email,
            name,
            role: role.as_str().to_string(),
            is_active: true,
        }
    }

    /// Clearance is a pure function of the role tag; it is never stored
    /// denormalized and there are no per-document overrides.
    pub fn clearance(&self) -> &'static [SecurityLevel] {
        resolve_clearance(&self.role)
    }

    pub async fn create_new(
        email: String,
        name: String,
        role: UserRole,
        db: &SurrealDbClient,
    ) -> Result<User, AppError> {
        if email.trim().is_empty() {
            return Err(AppError::Validation("email must not be empty".into()));
        }
        if User::find_by_email(&email, db).await?.is_some() {
            return Err(AppError::Validation(format!(
                "a user with email '{email}' already exists"
            )));
        }

        let user = User::new(email, name, role);
        db.store_item(user.clone()).await?;
        Ok(user)
    }

    pub async fn find_by_email(
        email: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<User>, AppError> {
        let mut result = db
            .client
            .query("SELECT * FROM type::table($table) WHERE email = $email LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("email", email.to_string()))
            .await?;

        let users: Vec<User> = result.take(0)?;
        Ok(users.into_iter().next())
    }
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
    async fn test_create_and_find_by_email() {
        let db = memory_db().await;

        let created = User::create_new(
            "ada@example.com".into(),
            "Ada".into(),
            UserRole::Employee,
            &db,
        )
        .await
        .expect("create user");

        assert_eq!(created.role, "EMPLOYEE");
        assert!(created.is_active);

        let found = User::find_by_email("ada@example.com", &db)
            .await
            .expect("find")
            .expect("user exists");
        assert_eq!(found.id, created.id);
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let db = memory_db().await;

        User::create_new("x@example.com".into(), "X".into(), UserRole::Guest, &db)
            .await
            .expect("first create");

        let result =
            User::create_new("x@example.com".into(), "X2".into(), UserRole::Guest, &db).await;
        match result {
            Err(AppError::Validation(_)) => {}
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clearance_follows_role() {
        let user = User::new("m@example.com".into(), "M".into(), UserRole::Manager);
        assert_eq!(
            user.clearance(),
            &[SecurityLevel::Low, SecurityLevel::Mid, SecurityLevel::High]
        );
    }

    #[tokio::test]
    async fn test_unknown_role_has_no_clearance() {
        let mut user = User::new("g@example.com".into(), "G".into(), UserRole::Guest);
        user.role = "SUPER_ADMIN".into();
        assert!(user.clearance().is_empty());
    }
}
