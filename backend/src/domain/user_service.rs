use anyhow::{Context, Result};
use chrono::Utc;
use shared::{
    LoginRequest, LoginResponse, RegisterUserRequest, RegisterUserResponse, SessionUser,
    StoredUser, UserProfile,
};
use tracing::{debug, info, warn};

use super::session::SessionContext;
use super::sync_service::SyncService;
use crate::storage::collections::{SelectedChildren, Users};
use crate::storage::remote::{Mutation, RemoteError, RemoteGateway};
use crate::storage::RecordStore;

async fn hash_password(password: &str, cost: u32) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .context("Password hashing task failed")?
        .context("Failed to hash password")
}

async fn verify_password(password: &str, hash: &str) -> bool {
    let (password, hash) = (password.to_string(), hash.to_string());
    match tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await {
        Ok(Ok(valid)) => valid,
        Ok(Err(e)) => {
            warn!("Stored password hash is unusable: {}", e);
            false
        }
        Err(e) => {
            warn!("Password verification task failed: {}", e);
            false
        }
    }
}

/// Registration and login against the remote user store, with the local
/// cache as offline fallback
#[derive(Clone)]
pub struct UserService {
    store: RecordStore,
    gateway: RemoteGateway,
    sync: SyncService,
    bcrypt_cost: u32,
}

impl UserService {
    pub fn new(store: RecordStore, gateway: RemoteGateway, sync: SyncService, bcrypt_cost: u32) -> Self {
        Self {
            store,
            gateway,
            sync,
            bcrypt_cost,
        }
    }

    pub async fn register(&self, request: RegisterUserRequest) -> Result<RegisterUserResponse> {
        let user_id = request.user_id.trim().to_string();
        info!("Registering user {}", user_id);

        if user_id.is_empty() || request.password.is_empty() || request.display_name.trim().is_empty() {
            return Ok(registration_failure("User id, password and name are required"));
        }

        let user = StoredUser {
            user_id: user_id.clone(),
            password_hash: hash_password(&request.password, self.bcrypt_cost).await?,
            display_name: request.display_name.trim().to_string(),
            created_at: Utc::now().to_rfc3339(),
            registration_conflict: false,
        };

        let pushed = match self.gateway.create_user(&user).await {
            Ok(()) => true,
            Err(RemoteError::UserExists(_)) => {
                info!("User id {} already taken remotely", user_id);
                return Ok(registration_failure("User id is already taken"));
            }
            Err(e) => {
                warn!("Remote registration failed, registering {} locally only: {}", user_id, e);
                false
            }
        };

        let local_user = user.clone();
        let inserted = self
            .store
            .modify::<Users, _, _>(move |users| {
                if users.contains_key(&local_user.user_id) {
                    return false;
                }
                users.insert(local_user.user_id.clone(), local_user);
                true
            })
            .await?;
        if !inserted {
            return Ok(registration_failure("User id is already taken"));
        }

        if !pushed {
            self.sync.commit_local_mutation(Mutation::CreateUser { user }).await;
        }

        Ok(RegisterUserResponse {
            success: true,
            message: "Registration complete".to_string(),
        })
    }

    /// Remote credentials decide whenever the remote knows the user (the
    /// local copy is refreshed on success). The local copy is consulted only
    /// when the remote is unreachable or has not seen the user yet.
    pub async fn authenticate(&self, user_id: &str, password: &str) -> Result<Option<UserProfile>> {
        match self.gateway.get_user(user_id).await {
            Ok(Some(remote)) => {
                if !verify_password(password, &remote.password_hash).await {
                    info!("Remote rejected the password of {}", user_id);
                    return Ok(None);
                }
                let profile = UserProfile::from(&remote);
                self.store.put::<Users, _>(user_id, remote).await?;
                return Ok(Some(profile));
            }
            Ok(None) => debug!("{} not registered remotely yet, checking local users", user_id),
            Err(e) => warn!("Remote authentication unavailable, checking local users: {}", e),
        }

        let local = match self.store.find::<Users, _>(user_id).await? {
            Some(local) => local,
            None => return Ok(None),
        };
        if local.registration_conflict {
            warn!("Local account {} lost its id to another registration", user_id);
            return Ok(None);
        }
        if verify_password(password, &local.password_hash).await {
            Ok(Some(UserProfile::from(&local)))
        } else {
            Ok(None)
        }
    }

    /// Authenticate, then pull the user's records
    pub async fn login(&self, request: LoginRequest) -> Result<(LoginResponse, Option<SessionContext>)> {
        let profile = match self.authenticate(request.user_id.trim(), &request.password).await? {
            Some(profile) => profile,
            None => {
                info!("Login rejected for {}", request.user_id);
                let response = LoginResponse {
                    success: false,
                    message: "Invalid user id or password".to_string(),
                    user: None,
                    synced: false,
                };
                return Ok((response, None));
            }
        };

        let user = SessionUser {
            user_id: profile.user_id.clone(),
            display_name: profile.display_name.clone(),
        };
        let selected = self.store.find::<SelectedChildren, _>(&user.user_id).await?;
        let ctx = SessionContext::new(user, selected);

        let outcome = self.sync.sync_from_remote(&ctx).await;
        let message = if outcome.is_synced() {
            "Logged in".to_string()
        } else {
            "Logged in offline, showing cached records".to_string()
        };

        info!("{} logged in", profile.user_id);
        Ok((
            LoginResponse {
                success: true,
                message,
                user: Some(profile),
                synced: outcome.is_synced(),
            },
            Some(ctx),
        ))
    }
}

fn registration_failure(message: &str) -> RegisterUserResponse {
    RegisterUserResponse {
        success: false,
        message: message.to_string(),
    }
}
