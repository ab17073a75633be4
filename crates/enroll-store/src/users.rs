use rusqlite::{params, ErrorCode};
use tracing::{debug, instrument};

use enroll_core::{Credentials, User, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{collect_rows, user_from_row};

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user. User names are unique.
    #[instrument(skip(self, credentials), fields(user_name = %credentials.user_name))]
    pub fn add(&self, credentials: &Credentials) -> Result<User, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (user_name, password) VALUES (?1, ?2)",
                params![credentials.user_name, credentials.password],
            )
            .map_err(|e| match e.sqlite_error_code() {
                Some(ErrorCode::ConstraintViolation) => {
                    StoreError::Conflict(format!("user name {} is taken", credentials.user_name))
                }
                _ => StoreError::from(e),
            })?;
            Ok(User {
                id: conn.last_insert_rowid().into(),
                user_name: credentials.user_name.clone(),
                password: credentials.password.clone(),
            })
        })
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub fn update(&self, user: &User) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET user_name = ?1, password = ?2 WHERE id = ?3",
                params![user.user_name, user.password, user.id.get()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("user {}", user.id)));
            }
            Ok(())
        })
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn remove(&self, id: UserId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM users WHERE id = ?1", [id.get()])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("user {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn get_all(&self) -> Result<Vec<User>, StoreError> {
        self.db.with_conn(|conn| {
            collect_rows(
                conn,
                "SELECT id, user_name, password FROM users ORDER BY id",
                [],
                user_from_row,
            )
        })
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.db.with_conn(|conn| {
            let found = collect_rows(
                conn,
                "SELECT id, user_name, password FROM users WHERE id = ?1",
                [id.get()],
                user_from_row,
            )?;
            Ok(found.into_iter().next())
        })
    }

    /// The user whose name and password both match, if any.
    #[instrument(skip(self, credentials), fields(user_name = %credentials.user_name))]
    pub fn authenticate(&self, credentials: &Credentials) -> Result<Option<User>, StoreError> {
        let user = self.db.with_conn(|conn| {
            let found = collect_rows(
                conn,
                "SELECT id, user_name, password FROM users WHERE user_name = ?1 AND password = ?2",
                params![credentials.user_name, credentials.password],
                user_from_row,
            )?;
            Ok(found.into_iter().next())
        })?;
        debug!(matched = user.is_some(), "authentication checked");
        Ok(user)
    }
}
