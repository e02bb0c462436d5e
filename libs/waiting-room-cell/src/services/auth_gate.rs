// libs/waiting-room-cell/src/services/auth_gate.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::JwtClaims;
use shared_utils::jwt::decode_claims;

use crate::error::AuthError;
use crate::models::{AuthenticatedIdentity, ConsultationRecord, HandshakeCredentials, Role};
use crate::services::directory::ConsultationDirectory;

/// Verifies session tokens issued by the identity provider.
#[async_trait]
pub trait SessionTokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<JwtClaims, AuthError>;
}

/// HS256 verification with the Supabase JWT secret.
pub struct JwtSessionVerifier {
    jwt_secret: String,
}

impl JwtSessionVerifier {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            jwt_secret: config.supabase_jwt_secret.clone(),
        }
    }
}

#[async_trait]
impl SessionTokenVerifier for JwtSessionVerifier {
    async fn verify(&self, token: &str) -> Result<JwtClaims, AuthError> {
        decode_claims(token, &self.jwt_secret).map_err(|reason| {
            if reason == "Token expired" {
                AuthError::Expired
            } else {
                AuthError::InvalidToken(reason)
            }
        })
    }
}

/// Admits connections before they can reach the signaling router.
pub struct AuthenticationGate {
    verifier: Arc<dyn SessionTokenVerifier>,
    directory: Arc<dyn ConsultationDirectory>,
}

impl AuthenticationGate {
    pub fn new(verifier: Arc<dyn SessionTokenVerifier>, directory: Arc<dyn ConsultationDirectory>) -> Self {
        Self { verifier, directory }
    }

    pub async fn authenticate(
        &self,
        credentials: &HandshakeCredentials,
        now: DateTime<Utc>,
    ) -> Result<AuthenticatedIdentity, AuthError> {
        let declared_role = match non_empty(&credentials.role) {
            Some(raw) => Some(Role::parse(raw).ok_or(AuthError::RoleMismatch)?),
            None => None,
        };

        if let Some(link_token) = non_empty(&credentials.consultation_token) {
            if declared_role == Some(Role::Doctor) {
                warn!("Rejected consultation-link handshake declaring the doctor role");
                return Err(AuthError::RoleMismatch);
            }
            return self.authenticate_link(link_token, now).await;
        }

        let token = non_empty(&credentials.token).ok_or(AuthError::MissingCredentials)?;
        let role = declared_role.ok_or(AuthError::MissingCredentials)?;

        let claims = self.verifier.verify(token).await?;

        if let Some(claimed) = claims.role.as_deref().and_then(Role::parse) {
            if claimed != role {
                warn!("Token for {} claims role {} but {} was declared", claims.sub, claimed.as_str(), role.as_str());
                return Err(AuthError::RoleMismatch);
            }
        }

        let identity = identity_from_claims(&claims, role)
            .ok_or_else(|| AuthError::InvalidToken("token has no subject".to_string()))?;

        info!("Authenticated {} {}", role.as_str(), identity);
        Ok(AuthenticatedIdentity {
            identity,
            role,
            consultation_id: None,
        })
    }

    async fn authenticate_link(&self, link_token: &str, now: DateTime<Utc>) -> Result<AuthenticatedIdentity, AuthError> {
        let record = self
            .directory
            .find_by_link_token(link_token)
            .await
            .map_err(|e| AuthError::Lookup(e.to_string()))?
            .ok_or(AuthError::Invalid)?;

        if record.is_expired(now) {
            debug!("Consultation link for {} expired", record.id);
            return Err(AuthError::Expired);
        }

        info!("Authenticated consultation-link patient for consultation {}", record.id);
        Ok(AuthenticatedIdentity {
            identity: consultation_identity(record.id),
            role: Role::Patient,
            consultation_id: Some(record.id),
        })
    }
}

/// Picks the subject for the declared role, trying the claim names each issuer uses.
pub fn identity_from_claims(claims: &JwtClaims, role: Role) -> Option<String> {
    let candidates = match role {
        Role::Doctor => vec![
            claims.doctor_id.clone(),
            metadata_string(&claims.app_metadata, "doctor_id"),
            Some(claims.sub.clone()),
        ],
        Role::Patient => vec![
            claims.patient_id.clone(),
            claims.user_id.clone(),
            Some(claims.sub.clone()),
        ],
    };

    candidates
        .into_iter()
        .flatten()
        .find(|candidate| !candidate.trim().is_empty())
}

pub fn consultation_identity(consultation_id: Uuid) -> String {
    format!("consultation:{}", consultation_id)
}

/// Checks that the principal is one of the parties the consultation names.
pub fn authorize_join(identity: &AuthenticatedIdentity, record: &ConsultationRecord) -> Result<(), AuthError> {
    if let Some(consultation_id) = identity.consultation_id {
        return if consultation_id == record.id {
            Ok(())
        } else {
            Err(AuthError::NotAuthorized)
        };
    }

    let authorized = match identity.role {
        Role::Patient => record.patient_id.as_deref(),
        Role::Doctor => record.doctor_id.as_deref(),
    };

    match authorized {
        Some(expected) if expected != identity.identity => Err(AuthError::NotAuthorized),
        _ => Ok(()),
    }
}

fn metadata_string(metadata: &Option<serde_json::Value>, key: &str) -> Option<String> {
    metadata
        .as_ref()
        .and_then(|value| value.get(key))
        .and_then(|value| value.as_str())
        .map(str::to_string)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
