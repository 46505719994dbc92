//! Authentication of the dashboard users

use crate::endpoint::{Endpoint, Method};
use crate::error::{ApiError, ApiResult};
use crate::module::{Joinable, Module, Services};
use crate::query::Params;
use chrono::{Duration, Utc};
use greenhouse_core::{NewUser, User, UserType};
use greenhouse_db::DbError;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub const NAME: &str = "UserModule";

/// Signed token payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Random marker making every token unique
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

fn invalid_credentials(message: &str) -> ApiError {
    ApiError::InvalidCredentials {
        message: message.to_string(),
    }
}

async fn hash_password(password: String, cost: u32) -> ApiResult<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(ApiError::unexpected)?
        .map_err(ApiError::unexpected)
}

async fn verify_password(password: String, hash: String) -> ApiResult<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(ApiError::unexpected)?
        .map_err(ApiError::unexpected)
}

pub struct UserModule {
    services: Services,
}

impl UserModule {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    fn secret(&self) -> &[u8] {
        self.services.config.security.secret.as_bytes()
    }

    /// Sign a fresh token for `user`
    pub fn mint_token(&self, user: &User) -> ApiResult<String> {
        let now = Utc::now();
        let hours = self.services.config.security.token_ttl_hours;
        let expires = Duration::try_hours(hours)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| ApiError::unexpected(format!("invalid token lifetime: {hours}h")))?;
        let claims = Claims {
            sub: user.id.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: expires.timestamp(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret()),
        )
        .map_err(ApiError::unexpected)
    }

    /// User owning `token`, provided the signature is valid and the token
    /// is the one currently stored for that user
    pub async fn verify_token(&self, token: &str) -> ApiResult<User> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| {
            warn!(error = %e, "token rejected");
            invalid_credentials("Invalid token")
        })?;

        let id: i64 = data
            .claims
            .sub
            .parse()
            .map_err(|_| invalid_credentials("Invalid token"))?;
        let user = self
            .services
            .db
            .find_user_by_id(id)
            .await?
            .ok_or_else(|| invalid_credentials("No user matching the given token"))?;

        if user.token.as_deref() != Some(token) {
            return Err(invalid_credentials("Token is no longer valid"));
        }
        Ok(user)
    }

    /// Check the password and open a new session
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, email: &str, password: &str) -> ApiResult<User> {
        let rejected = || invalid_credentials("No user matching the given credentials");

        let Some(mut user) = self.services.db.find_user_by_email(email).await? else {
            return Err(rejected());
        };
        if !verify_password(password.to_string(), user.password_hash.clone()).await? {
            return Err(rejected());
        }

        let token = self.mint_token(&user)?;
        self.services.db.set_user_token(user.id, Some(&token)).await?;
        user.token = Some(token);
        info!(user = user.id, "user logged in");
        Ok(user)
    }

    pub async fn login(&self, params: &Params) -> ApiResult<Value> {
        params.require(&["email", "password"])?;
        let user = self
            .authenticate(&params.string("email")?, &params.string("password")?)
            .await?;
        Ok(json!({ "message": "success", "user": user.to_client() }))
    }

    /// Create a user on behalf of an administrator
    pub async fn register(&self, params: &Params) -> ApiResult<Value> {
        params.require(&["email", "password", "token"])?;
        let user_type: UserType = params.parse("type")?.unwrap_or_default();

        let creator = self.verify_token(&params.string("token")?).await?;
        if !creator.is_admin() {
            return Err(ApiError::InsufficientPermissions {
                message: "Only administrators can register new users".to_string(),
            });
        }

        let email = params.string("email")?;
        let user = self
            .create_user(email, params.string("password")?, user_type)
            .await?;
        info!(creator = creator.id, user = user.id, "user registered");
        Ok(json!({ "message": "success", "user": user.to_client() }))
    }

    pub async fn logout(&self, params: &Params) -> ApiResult<Value> {
        params.require(&["token"])?;
        let user = self.verify_token(&params.string("token")?).await?;
        self.services.db.set_user_token(user.id, None).await?;
        info!(user = user.id, "user logged out");
        Ok(json!({ "message": "success" }))
    }

    async fn create_user(
        &self,
        email: String,
        password: String,
        user_type: UserType,
    ) -> ApiResult<User> {
        let already_exists = || ApiError::AlreadyExists {
            message: format!("A user with email \"{email}\" already exists"),
        };
        if self.services.db.find_user_by_email(&email).await?.is_some() {
            return Err(already_exists());
        }

        let password_hash =
            hash_password(password, self.services.config.security.salt_rounds).await?;
        let new_user = NewUser {
            email: email.clone(),
            password_hash,
            user_type,
        };
        match self.services.db.insert_user(&new_user).await {
            Ok(user) => Ok(user),
            Err(DbError::ConstraintViolation(_)) => Err(already_exists()),
            Err(e) => Err(e.into()),
        }
    }

    fn endpoint<F, Fut>(self: &Arc<Self>, path: &str, handle: F) -> Endpoint
    where
        F: Fn(Arc<Self>, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResult<Value>> + Send + 'static,
    {
        let module = Arc::clone(self);
        Endpoint::http(Method::POST, path, move |params| {
            handle(Arc::clone(&module), params)
        })
    }
}

impl Joinable for UserModule {}

#[async_trait::async_trait]
impl Module for UserModule {
    fn name(&self) -> &str {
        NAME
    }

    fn endpoints(self: Arc<Self>) -> Vec<Endpoint> {
        vec![
            self.endpoint("/login", |module, params| async move {
                module.login(&params).await
            }),
            self.endpoint("/register", |module, params| async move {
                module.register(&params).await
            }),
            self.endpoint("/logout", |module, params| async move {
                module.logout(&params).await
            }),
        ]
    }

    /// Create the configured administrator when there is no user yet
    async fn init(&self) -> anyhow::Result<()> {
        if self.services.db.count_users().await? > 0 {
            return Ok(());
        }
        let security = &self.services.config.security;
        let (Some(email), Some(password)) = (&security.admin_email, &security.admin_password)
        else {
            warn!("no user registered and no administrator configured");
            return Ok(());
        };

        let admin = self
            .create_user(email.clone(), password.clone(), UserType::Admin)
            .await
            .map_err(|e| anyhow::anyhow!("failed to create administrator: {e}"))?;
        info!(user = admin.id, email = %admin.email, "administrator created");
        Ok(())
    }
}
