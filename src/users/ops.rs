use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use crate::db::schema::users;
use crate::domains::user::User;
use crate::error::{CompanionError, Result};

#[derive(Queryable)]
pub(super) struct UserRow {
    id: i32,
    email: String,
    hashed_password: String,
    name: Option<String>,
    is_active: bool,
    created_at: i64,
    last_login_at: Option<i64>,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUserRow<'a> {
    email: &'a str,
    hashed_password: &'a str,
    name: Option<&'a str>,
    is_active: bool,
    created_at: i64,
    last_login_at: Option<i64>,
}

/// `email` must already be normalized.
pub(super) fn insert_user(
    conn: &mut SqliteConnection,
    email: &str,
    hashed_password: &str,
    name: Option<&str>,
    now: i64,
) -> Result<User> {
    let taken: i64 = users::table
        .filter(users::email.eq(email))
        .count()
        .get_result(conn)?;
    if taken > 0 {
        return Err(CompanionError::ConstraintViolation(format!(
            "email {email} is already registered"
        )));
    }

    diesel::insert_into(users::table)
        .values(&NewUserRow {
            email,
            hashed_password,
            name,
            is_active: true,
            created_at: now,
            last_login_at: None,
        })
        .execute(conn)?;

    let row: UserRow = users::table.filter(users::email.eq(email)).first(conn)?;
    Ok(map_row(row))
}

pub(super) fn update_active(
    conn: &mut SqliteConnection,
    user_id: i32,
    active: bool,
) -> Result<User> {
    let count = diesel::update(users::table.filter(users::id.eq(user_id)))
        .set(users::is_active.eq(active))
        .execute(conn)?;
    load_existing(conn, user_id, count)
}

pub(super) fn update_login(conn: &mut SqliteConnection, user_id: i32, at: i64) -> Result<User> {
    let count = diesel::update(users::table.filter(users::id.eq(user_id)))
        .set(users::last_login_at.eq(Some(at)))
        .execute(conn)?;
    load_existing(conn, user_id, count)
}

fn load_existing(conn: &mut SqliteConnection, user_id: i32, updated: usize) -> Result<User> {
    if updated == 0 {
        return Err(CompanionError::Reference(format!(
            "user {user_id} does not exist"
        )));
    }
    let row: UserRow = users::table.filter(users::id.eq(user_id)).first(conn)?;
    Ok(map_row(row))
}

pub(super) fn map_row(row: UserRow) -> User {
    User {
        id: row.id,
        email: row.email,
        hashed_password: row.hashed_password,
        name: row.name,
        is_active: row.is_active,
        created_at: row.created_at,
        last_login_at: row.last_login_at,
    }
}
