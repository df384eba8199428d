//! `POST /token`: exchange username/password for a bearer token (§4.11).

use axum::extract::{Form, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::hash_password;
use crate::error::PiwError;
use crate::persistence::queries;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

pub async fn issue_token(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Json<TokenResponse>, PiwError> {
    let conn = state.pool.get_reader().await;
    let found = state.query_metrics.timed("find_user_password_hash", || queries::find_user_password_hash(&conn, &form.username))?;
    drop(conn);

    let Some((_, stored_hash)) = found else {
        return Err(PiwError::Unauthorized);
    };
    if stored_hash != hash_password(&form.password) {
        return Err(PiwError::Unauthorized);
    }

    let access_token = state.tokens.issue().await;
    Ok(Json(TokenResponse { access_token, token_type: "bearer" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_password_hash_does_not_match() {
        assert_ne!(hash_password("correct"), hash_password("wrong"));
    }
}
