use crate::application_port::AuthError;
use crate::broker::{RpcClient, patterns};
use crate::domain_model::UserId;
use crate::domain_port::{NewUser, UserDirectory, UserRecord};
use serde_json::json;
use std::sync::Arc;

/// User lookups served by the user service over the broker.
pub struct RpcUserDirectory {
    rpc: Arc<RpcClient>,
}

impl RpcUserDirectory {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        for pattern in [
            patterns::USER_EXISTS,
            patterns::USER_GET_BY_EMAIL,
            patterns::USER_GET_BY_ID,
            patterns::USER_CREATE,
        ] {
            rpc.subscribe_to_response_of(pattern);
        }
        Self { rpc }
    }
}

#[async_trait::async_trait]
impl UserDirectory for RpcUserDirectory {
    async fn exists(&self, email: &str, username: &str) -> Result<bool, AuthError> {
        let exists = self
            .rpc
            .send(
                patterns::USER_EXISTS,
                &json!({"email": email, "username": username}),
            )
            .await?;
        Ok(exists)
    }

    async fn find_by_identifier(
        &self,
        username_or_email: &str,
    ) -> Result<Option<UserRecord>, AuthError> {
        let result: Result<Option<UserRecord>, _> = self
            .rpc
            .send(
                patterns::USER_GET_BY_EMAIL,
                &json!({"usernameOrEmail": username_or_email}),
            )
            .await;

        match result.map_err(AuthError::from) {
            Ok(user) => Ok(user),
            Err(AuthError::UserNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, AuthError> {
        let result: Result<Option<UserRecord>, _> = self
            .rpc
            .send(patterns::USER_GET_BY_ID, &json!({"id": id}))
            .await;

        match result.map_err(AuthError::from) {
            Ok(user) => Ok(user),
            Err(AuthError::UserNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, AuthError> {
        let created = self.rpc.send(patterns::USER_CREATE, &user).await?;
        Ok(created)
    }
}
