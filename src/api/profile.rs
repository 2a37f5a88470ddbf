//! `/users/me/profile` endpoints.

use crate::client::{ApiRequest, SessionClient, SessionError};

use super::models::{ProfileUpdate, UserProfile};

pub const PROFILE_PATH: &str = "/users/me/profile";

pub async fn get(client: &SessionClient) -> Result<UserProfile, SessionError> {
    client.send_json(ApiRequest::get(PROFILE_PATH)).await
}

pub async fn update(
    client: &SessionClient,
    update: &ProfileUpdate,
) -> Result<UserProfile, SessionError> {
    client
        .send_json(ApiRequest::put(PROFILE_PATH).json(update)?)
        .await
}
