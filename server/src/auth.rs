/// Connection and request authentication.
///
/// A bearer credential is verified once when a connection is opened; the
/// identity it yields is bound to the connection for its whole lifetime and
/// is the only sender identity the router ever sees for it.
///
/// The credential service and the account directory are external
/// collaborators, modelled as traits. `TokenVerifier` is the default
/// credential service: compact HS256 tokens carrying `{"id", "exp"}` claims.
use crate::error::{ChatError, Result};
use actix_web::dev::Payload;
use actix_web::error::InternalError;
use actix_web::{web, FromRequest, HttpRequest, HttpResponse};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures::future::{ready, Ready};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Verifies a bearer credential and returns the identity it was issued to.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<String>;
}

/// Answers whether an identity belongs to a registered account.
pub trait AccountDirectory: Send + Sync {
    fn contains(&self, identity: &str) -> bool;
}

/// Directory that accepts every identity. Used when account existence is
/// enforced upstream.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenDirectory;

impl AccountDirectory for OpenDirectory {
    fn contains(&self, _identity: &str) -> bool {
        true
    }
}

impl AccountDirectory for HashSet<String> {
    fn contains(&self, identity: &str) -> bool {
        HashSet::contains(self, identity)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    #[serde(default)]
    typ: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    id: String,
    exp: i64,
}

/// HS256 bearer-token verifier
pub struct TokenVerifier {
    secret: Vec<u8>,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(ChatError::Config("access secret must not be empty".to_string()));
        }
        Ok(TokenVerifier {
            secret: secret.as_bytes().to_vec(),
        })
    }

    /// Issue a token for `identity` valid for `ttl`.
    pub fn issue(&self, identity: &str, ttl: chrono::Duration) -> Result<String> {
        let header = TokenHeader {
            alg: "HS256".to_string(),
            typ: Some("JWT".to_string()),
        };
        let claims = Claims {
            id: identity.to_string(),
            exp: (chrono::Utc::now() + ttl).timestamp(),
        };

        let header = URL_SAFE_NO_PAD.encode(serialize(&header)?);
        let claims = URL_SAFE_NO_PAD.encode(serialize(&claims)?);
        let signing_input = format!("{}.{}", header, claims);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(&signing_input)?.finalize().into_bytes());

        Ok(format!("{}.{}", signing_input, signature))
    }

    fn mac(&self, signing_input: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ChatError::Config(e.to_string()))?;
        mac.update(signing_input.as_bytes());
        Ok(mac)
    }
}

impl CredentialVerifier for TokenVerifier {
    fn verify(&self, credential: &str) -> Result<String> {
        let mut parts = credential.split('.');
        let (Some(header), Some(claims), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ChatError::Auth("malformed token".to_string()));
        };

        let header: TokenHeader = decode_segment(header)?;
        if header.alg != "HS256" {
            return Err(ChatError::Auth(format!("unsupported algorithm {}", header.alg)));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| ChatError::Auth("malformed signature".to_string()))?;
        let signing_input = &credential[..credential.len() - signature_len(credential)];
        self.mac(signing_input)?
            .verify_slice(&signature)
            .map_err(|_| ChatError::Auth("bad signature".to_string()))?;

        let claims: Claims = decode_segment(claims)?;
        if claims.exp <= chrono::Utc::now().timestamp() {
            return Err(ChatError::Auth("token expired".to_string()));
        }
        if claims.id.is_empty() {
            return Err(ChatError::Auth("token carries no identity".to_string()));
        }

        Ok(claims.id)
    }
}

/// Length of the trailing `.signature` part, dot included.
fn signature_len(credential: &str) -> usize {
    credential.rfind('.').map_or(0, |dot| credential.len() - dot)
}

fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| ChatError::Auth(e.to_string()))
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| ChatError::Auth("malformed token segment".to_string()))?;
    serde_json::from_slice(&bytes).map_err(|_| ChatError::Auth("malformed token segment".to_string()))
}

/// An authenticated connection. The identity cannot change after creation.
#[derive(Debug, Clone)]
pub struct Session {
    identity: String,
    connection_id: Uuid,
}

impl Session {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }
}

pub struct SessionAuthenticator {
    verifier: Arc<dyn CredentialVerifier>,
}

impl SessionAuthenticator {
    pub fn new(verifier: Arc<dyn CredentialVerifier>) -> Self {
        SessionAuthenticator { verifier }
    }

    /// Resolve a credential to an identity
    pub fn identify(&self, credential: Option<&str>) -> Result<String> {
        let credential = credential
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ChatError::Auth("missing credential".to_string()))?;
        self.verifier.verify(credential)
    }

    /// Authenticate a new connection and bind its identity
    pub fn authenticate(&self, credential: Option<&str>) -> Result<Session> {
        let identity = self.identify(credential)?;
        Ok(Session {
            identity,
            connection_id: Uuid::new_v4(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Bearer credential from the `Authorization` header, falling back to the
/// `token` query parameter (browsers cannot set headers on WebSocket
/// upgrades).
pub fn bearer_credential(req: &HttpRequest) -> Option<String> {
    let from_header = req
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(|token| token.trim().to_string());

    from_header.or_else(|| {
        web::Query::<TokenQuery>::from_query(req.query_string())
            .ok()
            .and_then(|query| query.into_inner().token)
    })
}

/// Identity of the caller of a REST endpoint.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = Ready<std::result::Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let Some(authenticator) = req.app_data::<web::Data<SessionAuthenticator>>() else {
            log::error!("SessionAuthenticator missing from app data");
            return ready(Err(InternalError::from_response(
                "authenticator not configured",
                HttpResponse::InternalServerError().json(json!({ "error": "Server misconfigured" })),
            )
            .into()));
        };

        let result: std::result::Result<Self, Self::Error> = authenticator
            .identify(bearer_credential(req).as_deref())
            .map(AuthenticatedUser)
            .map_err(|e| {
                log::debug!("Rejected request to {}: {}", req.path(), e);
                InternalError::from_response(
                    "unauthorized",
                    HttpResponse::Unauthorized().json(json!({ "error": "Unauthorized" })),
                )
                .into()
            });
        ready(result)
    }
}
