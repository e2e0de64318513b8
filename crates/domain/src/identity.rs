use serde::{Deserialize, Serialize};

/// Authenticated principal supplied by the auth collaborator. The messaging
/// core trusts this identity and performs no credential checks of its own.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActorIdentity {
    pub user_id: String,
    pub display_name: String,
}

impl ActorIdentity {
    pub fn with_user_id(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            user_id: user_id.clone(),
            display_name: user_id,
        }
    }
}
