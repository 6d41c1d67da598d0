use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{Error, Result};

pub const DEFAULT_HOSTNAME: &str = "https://fcutappli.frisquet.com/api/v1";
pub const DEFAULT_APP_ID: &str = "fsmFOoGzGEz0q6MPLtvA_z";
pub const DEFAULT_USER_AGENT: &str =
    "Frisquet Connect/2.6.1 (com.frisquetsa.connect; build:54; iOS 26.1.0) Alamofire/5.9.1";

pub const LOGIN_PATH: &str = "authentifications";
pub const TOKEN_PARAM: &str = "token";
pub const APP_ID_PARAM: &str = "appId";

const LOCALE: &str = "fr";
const CLIENT_TYPE: &str = "IOS";

pub fn site_path(site_id: &str) -> String {
    format!("sites/{site_id}")
}

pub fn login_body(email: &str, password: &str) -> Value {
    json!({
        "locale": LOCALE,
        "email": email,
        "password": password,
        "type_client": CLIENT_TYPE
    })
}

/// A boiler installation as listed on the user's account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRef {
    pub identifiant_chaudiere: String,
    #[serde(default)]
    pub nom: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub sites: Vec<SiteRef>,
}

impl User {
    /// The first site of the account; the one the controller drives.
    pub fn primary_site_id(&self) -> Option<&str> {
        self.sites.first().map(|s| s.identifiant_chaudiere.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

#[derive(Deserialize)]
struct RawLoginResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    utilisateur: User,
}

pub fn parse_login_response(body: &str) -> Result<LoginResponse> {
    let raw: RawLoginResponse = serde_json::from_str(body)?;
    match raw.token {
        Some(token) if !token.is_empty() => Ok(LoginResponse {
            token,
            user: raw.utilisateur,
        }),
        _ => Err(Error::MissingToken),
    }
}
