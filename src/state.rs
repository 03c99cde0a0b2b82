use std::sync::Arc;

use mongodb::{
    options::{ClientOptions, IndexOptions},
    Client, Collection, IndexModel,
};

use crate::{
    auth::jwt::TokenKeys,
    config::Config,
    media::{CloudinaryStore, MediaStore},
    models::user::UserDoc,
    store::{MongoUserStore, UserStore},
};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub keys: TokenKeys,
    pub store: Arc<dyn UserStore>,
    pub media: Arc<dyn MediaStore>,
}

impl AppState {
    pub async fn new(cfg: &Config) -> mongodb::error::Result<Self> {
        let mut opts = ClientOptions::parse(&cfg.mongodb_uri).await?;
        opts.app_name = Some("vidtube-backend".to_string());
        let client = Client::with_options(opts)?;
        let db = client.database(&cfg.db_name);
        let users: Collection<UserDoc> = db.collection("users");

        let username_index = IndexModel::builder()
            .keys(mongodb::bson::doc! { "username": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        let _ = users.create_index(username_index).await?;

        let email_index = IndexModel::builder()
            .keys(mongodb::bson::doc! { "email": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        let _ = users.create_index(email_index).await?;

        Ok(Self {
            cfg: Arc::new(cfg.clone()),
            keys: TokenKeys::from_config(cfg),
            store: Arc::new(MongoUserStore::new(users)),
            media: Arc::new(CloudinaryStore::new(cfg.cloudinary.clone())),
        })
    }
}

#[cfg(test)]
impl AppState {
    pub(crate) fn for_tests(store: Arc<dyn UserStore>, media: Arc<dyn MediaStore>) -> Self {
        Self::for_tests_in(store, media, std::env::temp_dir())
    }

    pub(crate) fn for_tests_in(
        store: Arc<dyn UserStore>,
        media: Arc<dyn MediaStore>,
        temp_dir: std::path::PathBuf,
    ) -> Self {
        let cfg = Config {
            mongodb_uri: String::new(),
            db_name: "test".into(),
            access_token_secret: "access-secret-for-tests".into(),
            refresh_token_secret: "refresh-secret-for-tests".into(),
            access_token_ttl_seconds: 15 * 60,
            refresh_token_ttl_seconds: 10 * 24 * 60 * 60,
            cors_origin: None,
            public_dir: "public".into(),
            temp_dir,
            cloudinary: crate::config::CloudinaryConfig {
                cloud_name: String::new(),
                api_key: String::new(),
                api_secret: String::new(),
            },
        };

        Self {
            keys: TokenKeys::from_config(&cfg),
            cfg: Arc::new(cfg),
            store,
            media,
        }
    }
}
