use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::db::schema::users;
use crate::db::{now_ts, Database};
use crate::domains::user::{normalize_email, NewUser, User};
use crate::error::Result;
use crate::interfaces::identity::IdentityService;

mod ops;
use ops::UserRow;

/// Identity anchor for the engine: the `users` table.
#[derive(Clone)]
pub struct UserStore {
    db: Database,
}

impl UserStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create_user(&self, new: NewUser) -> Result<User> {
        new.validate()?;
        let email = normalize_email(&new.email)?;
        let NewUser {
            hashed_password,
            name,
            ..
        } = new;
        let now = now_ts();
        let user = self
            .db
            .write("create_user", move |conn| {
                ops::insert_user(conn, &email, &hashed_password, name.as_deref(), now)
            })
            .await?;
        tracing::info!(user_id = user.id, "user registered");
        Ok(user)
    }

    pub async fn get_user(&self, user_id: i32) -> Result<Option<User>> {
        let db = self.db.clone();
        self.db
            .run("get_user", async move {
                let mut conn = db.conn().await?;
                let row: Option<UserRow> = users::table
                    .filter(users::id.eq(user_id))
                    .first(&mut conn)
                    .await
                    .optional()?;
                Ok(row.map(ops::map_row))
            })
            .await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = normalize_email(email)?;
        let db = self.db.clone();
        self.db
            .run("find_user_by_email", async move {
                let mut conn = db.conn().await?;
                let row: Option<UserRow> = users::table
                    .filter(users::email.eq(&email))
                    .first(&mut conn)
                    .await
                    .optional()?;
                Ok(row.map(ops::map_row))
            })
            .await
    }

    /// Soft-disable (or re-enable) a user. Derived state is kept.
    pub async fn set_active(&self, user_id: i32, active: bool) -> Result<User> {
        self.db
            .write("set_user_active", move |conn| {
                ops::update_active(conn, user_id, active)
            })
            .await
    }

    pub async fn record_login(&self, user_id: i32, at: i64) -> Result<User> {
        self.db
            .write("record_login", move |conn| ops::update_login(conn, user_id, at))
            .await
    }
}

#[async_trait]
impl IdentityService for UserStore {
    async fn user_exists(&self, user_id: i32) -> Result<bool> {
        let db = self.db.clone();
        self.db
            .run("user_exists", async move {
                let mut conn = db.conn().await?;
                let count: i64 = users::table
                    .filter(users::id.eq(user_id))
                    .count()
                    .get_result(&mut conn)
                    .await?;
                Ok(count > 0)
            })
            .await
    }
}
