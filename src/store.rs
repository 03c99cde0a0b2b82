use async_trait::async_trait;
use mongodb::{
    bson::{doc, oid::ObjectId, Document},
    error::{ErrorKind, WriteFailure},
    options::ReturnDocument,
    Collection,
};
use thiserror::Error;

use crate::models::user::UserDoc;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key")]
    Duplicate,

    #[error("{0}")]
    Backend(String),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(e: mongodb::error::Error) -> Self {
        if is_duplicate_key(&e) {
            StoreError::Duplicate
        } else {
            StoreError::Backend(e.to_string())
        }
    }
}

// Inserts report a unique-index violation as a write error,
// find_one_and_update reports the same violation as a command error.
fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    match e.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == 11000,
        ErrorKind::Command(ce) => ce.code == 11000,
        _ => false,
    }
}

/// Which image URL field on the user record an upload targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageField {
    Avatar,
    CoverImage,
}

impl ImageField {
    pub fn field_name(&self) -> &'static str {
        match self {
            ImageField::Avatar => "avatar",
            ImageField::CoverImage => "cover_image",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ImageField::Avatar => "avatar image",
            ImageField::CoverImage => "cover image",
        }
    }
}

/// Boundary to the user record store. All session state lives here, so the
/// token manager carries no in-memory state of its own and tests can swap in
/// an in-memory implementation.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: ObjectId) -> Result<Option<UserDoc>, StoreError>;

    /// Matches on either field; passing `None` for both yields `None`.
    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<UserDoc>, StoreError>;

    async fn insert(&self, user: &UserDoc) -> Result<(), StoreError>;

    /// `Some` overwrites the stored refresh token, `None` unsets it.
    async fn set_refresh_token(
        &self,
        id: ObjectId,
        token: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn set_password_hash(&self, id: ObjectId, hash: &str) -> Result<(), StoreError>;

    /// Returns the updated document, or `None` for an unknown id. Moving to
    /// an email another user already holds fails with `Duplicate`.
    async fn update_account(
        &self,
        id: ObjectId,
        full_name: &str,
        email: &str,
    ) -> Result<Option<UserDoc>, StoreError>;

    async fn set_image(
        &self,
        id: ObjectId,
        field: ImageField,
        url: &str,
    ) -> Result<Option<UserDoc>, StoreError>;
}

pub struct MongoUserStore {
    users: Collection<UserDoc>,
}

impl MongoUserStore {
    pub fn new(users: Collection<UserDoc>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl UserStore for MongoUserStore {
    async fn find_by_id(&self, id: ObjectId) -> Result<Option<UserDoc>, StoreError> {
        Ok(self.users.find_one(doc! { "_id": id }).await?)
    }

    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<UserDoc>, StoreError> {
        let mut or = Vec::new();
        if let Some(u) = username {
            or.push(doc! { "username": u });
        }
        if let Some(e) = email {
            or.push(doc! { "email": e });
        }
        if or.is_empty() {
            return Ok(None);
        }

        Ok(self.users.find_one(doc! { "$or": or }).await?)
    }

    async fn insert(&self, user: &UserDoc) -> Result<(), StoreError> {
        self.users.insert_one(user).await?;
        Ok(())
    }

    async fn set_refresh_token(
        &self,
        id: ObjectId,
        token: Option<&str>,
    ) -> Result<(), StoreError> {
        let update = match token {
            Some(t) => doc! { "$set": { "refresh_token": t } },
            None => doc! { "$unset": { "refresh_token": "" } },
        };

        self.users.update_one(doc! { "_id": id }, update).await?;
        Ok(())
    }

    async fn set_password_hash(&self, id: ObjectId, hash: &str) -> Result<(), StoreError> {
        self.users
            .update_one(doc! { "_id": id }, doc! { "$set": { "password_hash": hash } })
            .await?;
        Ok(())
    }

    async fn update_account(
        &self,
        id: ObjectId,
        full_name: &str,
        email: &str,
    ) -> Result<Option<UserDoc>, StoreError> {
        Ok(self
            .users
            .find_one_and_update(
                doc! { "_id": id },
                doc! { "$set": { "full_name": full_name, "email": email } },
            )
            .return_document(ReturnDocument::After)
            .await?)
    }

    async fn set_image(
        &self,
        id: ObjectId,
        field: ImageField,
        url: &str,
    ) -> Result<Option<UserDoc>, StoreError> {
        let mut set = Document::new();
        set.insert(field.field_name(), url);

        Ok(self
            .users
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await?)
    }
}
