use crate::application_port::AuthError;
use crate::domain_model::UserId;
use crate::domain_port::{NewUser, UserDirectory, UserRecord};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

// Minimal fake for tests and demos: an in-memory directory instead of the
// remote user service.
pub struct FakeUserDirectory {
    users: DashMap<UserId, UserRecord>,
    lookups: AtomicUsize,
}

impl FakeUserDirectory {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn seed(&self, record: UserRecord) {
        self.users.insert(record.id, record);
    }

    pub fn seeded_count(&self) -> usize {
        self.users.len()
    }

    /// How many directory calls were made; lets tests assert that
    /// validation rejects before any lookup happens.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl Default for FakeUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl UserDirectory for FakeUserDirectory {
    async fn exists(&self, email: &str, username: &str) -> Result<bool, AuthError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .users
            .iter()
            .any(|u| u.email == email || u.username == username))
    }

    async fn find_by_identifier(
        &self,
        username_or_email: &str,
    ) -> Result<Option<UserRecord>, AuthError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .users
            .iter()
            .find(|u| u.username == username_or_email || u.email == username_or_email)
            .map(|u| u.clone()))
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, AuthError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, AuthError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.exists(&user.email, &user.username).await? {
            return Err(AuthError::Conflict("duplicate identity".to_string()));
        }

        let record = UserRecord {
            id: UserId(uuid::Uuid::new_v4()),
            username: user.username,
            email: user.email,
            password: Some(user.password),
            first_name: None,
            last_name: None,
            is_verified: user.is_verified,
            status: user.status,
            roles: user.roles,
        };
        self.users.insert(record.id, record.clone());
        Ok(record)
    }
}
