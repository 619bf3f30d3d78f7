use serde::{Deserialize, Serialize};

/// Avatar used until a client uploads or links its own.
pub const DEFAULT_AVATAR: &str = "https://placehold.co/512x512";

// -- Profile --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub display_name: String,
    pub profile_picture: String,
}
