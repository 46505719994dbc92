//! Dashboard users

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Placeholder sent to clients instead of the password hash
pub const HIDDEN_PASSWORD: &str = "********";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserType {
    Admin,
    #[default]
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown user type: {0}")]
pub struct UnknownUserType(pub String);

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Admin => "ADMIN",
            UserType::User => "USER",
        }
    }
}

impl FromStr for UserType {
    type Err = UnknownUserType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ADMIN" => Ok(UserType::Admin),
            "USER" => Ok(UserType::User),
            _ => Err(UnknownUserType(s.to_string())),
        }
    }
}

/// Stored user. Deliberately not `Serialize`: use [`User::to_client`].
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub user_type: UserType,
    pub token: Option<String>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.user_type == UserType::Admin
    }

    /// Client representation with the password blanked out
    pub fn to_client(&self) -> ClientUser {
        ClientUser {
            email: self.email.clone(),
            password: HIDDEN_PASSWORD.to_string(),
            user_type: self.user_type,
            token: self.token.clone(),
        }
    }
}

/// User as sent over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientUser {
    pub email: String,
    pub password: String,
    #[serde(rename = "type")]
    pub user_type: UserType,
    pub token: Option<String>,
}

/// User about to be inserted
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub user_type: UserType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_user_hides_password() {
        let user = User {
            id: 1,
            email: "a@b.com".into(),
            password_hash: "$2b$04$abcdefghijklmnopqrstuv".into(),
            user_type: UserType::User,
            token: None,
        };

        let json = serde_json::to_value(user.to_client()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "email": "a@b.com",
                "password": "********",
                "type": "USER",
                "token": null
            })
        );
    }

    #[test]
    fn test_user_type_parsing() {
        assert_eq!("admin".parse::<UserType>(), Ok(UserType::Admin));
        assert_eq!("USER".parse::<UserType>(), Ok(UserType::User));
        assert!("root".parse::<UserType>().is_err());
    }
}
