use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tokio::sync::oneshot;

use super::AppState;
use crate::models::entries::NewSignup;
use crate::services::waitlist::WaitlistRequest;
use crate::services::ServiceError;

type Reply<T> = oneshot::Sender<Result<T, ServiceError>>;

async fn dispatch<T>(
    state: &AppState,
    request: impl FnOnce(Reply<T>) -> WaitlistRequest,
) -> Result<T, ServiceError> {
    let (response_tx, response_rx) = oneshot::channel();

    state
        .waitlist_channel
        .send(request(response_tx))
        .await
        .map_err(|e| ServiceError::Communication("HTTP => Waitlist".to_string(), e.to_string()))?;

    response_rx
        .await
        .map_err(|e| ServiceError::Communication("Waitlist => HTTP".to_string(), e.to_string()))?
}

pub async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<NewSignup>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let Json(signup) = payload.map_err(|e| ServiceError::Validation(e.body_text()))?;
    let email = signup
        .email
        .ok_or_else(|| ServiceError::Validation("Email address is required".to_string()))?;

    let outcome = dispatch(&state, |response| WaitlistRequest::Signup {
        email,
        referral_code: signup.referral_code,
        response,
    })
    .await?;

    let message = if outcome.already_joined {
        "You are already on the waitlist!"
    } else {
        "Successfully added to the waitlist!"
    };

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": message,
            "user": {
                "email": outcome.entry.email,
                "referralCode": outcome.entry.referral_code,
            }
        })),
    ))
}

pub async fn get_entry(
    State(state): State<AppState>,
    Path(referral_code): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = dispatch(&state, |response| WaitlistRequest::GetEntry {
        referral_code,
        response,
    })
    .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "user": {
                "email": details.entry.email,
                "referralCode": details.entry.referral_code,
                "referralCount": details.entry.referral_count,
                "position": details.standing.people_ahead,
                "potentialJump": details.standing.potential_jump,
            }
        })),
    ))
}

pub async fn remove_entry(
    State(state): State<AppState>,
    Path(referral_code): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    dispatch(&state, |response| WaitlistRequest::RemoveEntry {
        referral_code,
        response,
    })
    .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Entry removed",
        })),
    ))
}

pub async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    let stats = dispatch(&state, |response| WaitlistRequest::Stats { response }).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "stats": stats,
        })),
    ))
}
