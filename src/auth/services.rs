pub(crate) use crate::auth::dto::{Claims, JwtKeys, TokenKind};
use crate::auth::dto::{ChangePasswordRequest, ProfileUpdateRequest, RegisterRequest};
use crate::auth::repo_types::ProfileChanges;
use crate::config::JwtConfig;
use crate::error::{ApiError, FieldErrors, NON_FIELD_ERRORS};
use crate::state::AppState;
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::{async_trait, extract::{FromRef, FromRequestParts}, http::request::Parts};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use regex::Regex;
use std::time::Duration;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, error, warn};
use uuid::Uuid;

pub const USERNAME_MAX_CHARS: usize = 150;
pub const NAME_MAX_CHARS: usize = 30;
pub const PASSWORD_MIN_CHARS: usize = 8;

const REQUIRED: &str = "This field is required.";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[\w.@+-]+$").unwrap();
    }
    USERNAME_RE.is_match(username)
}

fn too_long(max: usize) -> String {
    format!("Ensure this field has no more than {max} characters.")
}

pub(crate) fn clean_username(raw: &str) -> Result<String, String> {
    let username = raw.trim();
    if username.is_empty() {
        return Err(REQUIRED.into());
    }
    if username.chars().count() > USERNAME_MAX_CHARS {
        return Err(too_long(USERNAME_MAX_CHARS));
    }
    if !is_valid_username(username) {
        return Err("Enter a valid username. This value may contain only letters, numbers, \
                    and @/./+/-/_ characters."
            .into());
    }
    Ok(username.to_string())
}

/// Trimmed, lowercased email.
pub(crate) fn clean_email(raw: &str) -> Result<String, String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err(REQUIRED.into());
    }
    if !is_valid_email(&email) {
        return Err("Enter a valid email address.".into());
    }
    Ok(email)
}

fn clean_name(raw: &str) -> Result<String, String> {
    let name = raw.trim();
    if name.chars().count() > NAME_MAX_CHARS {
        return Err(too_long(NAME_MAX_CHARS));
    }
    Ok(name.to_string())
}

/// Password strength rules; every violated rule yields a message.
pub(crate) fn password_problems(password: &str, username: &str) -> Vec<String> {
    let mut problems = Vec::new();
    if password.chars().count() < PASSWORD_MIN_CHARS {
        problems.push(format!(
            "This password is too short. It must contain at least {PASSWORD_MIN_CHARS} characters."
        ));
    }
    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        problems.push("This password is entirely numeric.".into());
    }
    if !username.is_empty() && password.eq_ignore_ascii_case(username) {
        problems.push("The password is too similar to the username.".into());
    }
    problems
}

fn record<T>(errors: &mut FieldErrors, field: &str, result: Result<T, String>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(msg) => {
            errors.add(field, msg);
            None
        }
    }
}

/// Registration input that passed field validation; uniqueness is checked
/// against the database by the handler.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

impl RegisterRequest {
    pub fn validate(self) -> Result<Registration, ApiError> {
        let mut errors = FieldErrors::new();
        let username = record(&mut errors, "username", clean_username(&self.username));
        let email = record(&mut errors, "email", clean_email(&self.email));
        let first_name = record(&mut errors, "first_name", clean_name(&self.first_name));
        let last_name = record(&mut errors, "last_name", clean_name(&self.last_name));

        if self.password.is_empty() {
            errors.add("password", REQUIRED);
        } else {
            for problem in password_problems(&self.password, self.username.trim()) {
                errors.add("password", problem);
            }
        }
        if self.password_confirm.is_empty() {
            errors.add("password_confirm", REQUIRED);
        }
        if errors.is_empty() && self.password != self.password_confirm {
            errors.add(NON_FIELD_ERRORS, "Passwords don't match.");
        }

        match (username, email, first_name, last_name) {
            (Some(username), Some(email), Some(first_name), Some(last_name)) if errors.is_empty() => {
                Ok(Registration {
                    username,
                    email,
                    password: self.password,
                    first_name,
                    last_name,
                })
            }
            _ => Err(ApiError::Validation(errors)),
        }
    }
}

impl ProfileUpdateRequest {
    /// `partial` selects PATCH semantics: email is only required on PUT.
    pub fn validate(self, partial: bool) -> Result<ProfileChanges, ApiError> {
        let mut errors = FieldErrors::new();
        let email = match self.email.as_deref() {
            Some(raw) => record(&mut errors, "email", clean_email(raw)),
            None => {
                if !partial {
                    errors.add("email", REQUIRED);
                }
                None
            }
        };
        let first_name = self
            .first_name
            .as_deref()
            .and_then(|raw| record(&mut errors, "first_name", clean_name(raw)));
        let last_name = self
            .last_name
            .as_deref()
            .and_then(|raw| record(&mut errors, "last_name", clean_name(raw)));
        errors.into_result(ProfileChanges {
            email,
            first_name,
            last_name,
        })
    }
}

impl ChangePasswordRequest {
    /// Field checks that do not need the stored hash. The old password is
    /// verified by the handler.
    pub fn validate(&self, username: &str) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if self.old_password.is_empty() {
            errors.add("old_password", REQUIRED);
        }
        if self.new_password.is_empty() {
            errors.add("new_password", REQUIRED);
        } else {
            for problem in password_problems(&self.new_password, username) {
                errors.add("new_password", problem);
            }
        }
        if self.new_password_confirm.is_empty() {
            errors.add("new_password_confirm", REQUIRED);
        }
        if errors.is_empty() && self.new_password != self.new_password_confirm {
            errors.add(NON_FIELD_ERRORS, "New passwords don't match.");
        }
        errors.into_result(())
    }
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let JwtConfig {
            secret,
            issuer,
            audience,
            ttl_minutes,
            refresh_ttl_minutes,
        } = state.config.jwt.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            access_ttl: Duration::from_secs((ttl_minutes as u64) * 60),
            refresh_ttl: Duration::from_secs((refresh_ttl_minutes as u64) * 60),
        }
    }
}

impl JwtKeys {
    fn sign_with_kind(&self, user_id: Uuid, kind: TokenKind) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            jti: Uuid::new_v4(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn sign_access(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.sign_with_kind(user_id, TokenKind::Access)
    }
    pub fn sign_refresh(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.sign_with_kind(user_id, TokenKind::Refresh)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, kind = ?data.claims.kind, "jwt verified");
        Ok(data.claims)
    }

    pub fn verify_refresh(&self, token: &str) -> anyhow::Result<Claims> {
        let claims = self.verify(token)?;
        if claims.kind != TokenKind::Refresh {
            anyhow::bail!("not a refresh token");
        }
        Ok(claims)
    }
}

impl Claims {
    pub fn expires_at(&self) -> anyhow::Result<OffsetDateTime> {
        Ok(OffsetDateTime::from_unix_timestamp(self.exp as i64)?)
    }
}

/// Verified caller identity taken from an access token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ApiError::Unauthorized("Authentication credentials were not provided.".into())
            })?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .or_else(|| auth_header.strip_prefix("bearer "))
            .ok_or_else(|| ApiError::Unauthorized("Invalid Authorization header".into()))?;

        let claims = match keys.verify(token) {
            Ok(c) => c,
            Err(_) => {
                warn!("invalid or expired token");
                return Err(ApiError::Unauthorized("Invalid or expired token".into()));
            }
        };

        if claims.kind != TokenKind::Access {
            return Err(ApiError::Unauthorized("Access token required".into()));
        }

        Ok(AuthUser(claims.sub))
    }
}

#[cfg(test)]
mod password_tests {
    use super::*;

    #[test]
    fn hashes_are_salted_argon2id() {
        let first = hash_password("analytical-engine").unwrap();
        let second = hash_password("analytical-engine").unwrap();
        assert!(first.starts_with("$argon2id$"));
        assert_ne!(first, second);
        assert!(verify_password("analytical-engine", &first).unwrap());
        assert!(verify_password("analytical-engine", &second).unwrap());
        assert!(!verify_password("difference-engine", &first).unwrap());
    }

    #[test]
    fn malformed_stored_hash_is_an_error_not_a_mismatch() {
        assert!(verify_password("anything", "plaintext-in-the-column").is_err());
    }

    #[test]
    fn password_rules() {
        assert!(password_problems("long enough pass", "ada").is_empty());
        assert_eq!(password_problems("short", "ada").len(), 1);
        assert_eq!(password_problems("12345678", "ada"), vec!["This password is entirely numeric."]);
        assert_eq!(password_problems("AdaLovelace", "adalovelace").len(), 1);
    }
}
