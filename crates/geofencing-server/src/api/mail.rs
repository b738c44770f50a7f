//! Mail opt-in links.
//!
//! These are the targets of the links in the verification mail, opened in
//! a browser, so they answer with small HTML pages instead of JSON.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use geofencing_core::GeofencingError;

use crate::state::SharedState;

/// Creates the router for the verification and unsubscribe links.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/verification/{address}", get(verify_address))
        .route("/unsubscribe/{address}", get(unsubscribe_address))
}

fn page(title: &str, message: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body><h1>{title}</h1><p>{message}</p></body></html>\n",
        title = html_escape::encode_text(title),
        message = html_escape::encode_text(message),
    ))
}

/// Confirm a mail address from its verification link.
#[utoipa::path(
    get,
    path = "/verification/{address}",
    tag = "mail",
    operation_id = "verifyAddress",
    summary = "Confirm a mail address",
    params(("address" = String, Path, description = "Mail address to confirm")),
    responses(
        (status = 200, description = "Address confirmed", content_type = "text/html", body = String),
        (status = 404, description = "No pending request for the address", content_type = "text/html", body = String),
        (status = 410, description = "The verification link has expired", content_type = "text/html", body = String)
    )
)]
pub async fn verify_address(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> (StatusCode, Html<String>) {
    match state.engine().confirm_mail_address(&address) {
        Ok(true) => (
            StatusCode::OK,
            page(
                "Address confirmed",
                &format!("{address} will now receive geofence notifications."),
            ),
        ),
        Ok(false) => (
            StatusCode::GONE,
            page(
                "Link expired",
                &format!("The verification link for {address} has expired."),
            ),
        ),
        Err(GeofencingError::MailAddressNotFound(_)) => (
            StatusCode::NOT_FOUND,
            page(
                "Unknown address",
                &format!("There is no verification request for {address}."),
            ),
        ),
        Err(e) => {
            tracing::error!(address = %address, error = %e, "Verification failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                page("Verification failed", "Please try again later."),
            )
        }
    }
}

/// Unsubscribe a confirmed mail address.
#[utoipa::path(
    get,
    path = "/unsubscribe/{address}",
    tag = "mail",
    operation_id = "unsubscribeAddress",
    summary = "Unsubscribe a mail address",
    params(("address" = String, Path, description = "Mail address to unsubscribe")),
    responses(
        (status = 200, description = "Address unsubscribed", content_type = "text/html", body = String),
        (status = 404, description = "Address is not subscribed", content_type = "text/html", body = String)
    )
)]
pub async fn unsubscribe_address(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> (StatusCode, Html<String>) {
    match state.engine().unregister_mail_address(&address) {
        Ok(()) => (
            StatusCode::OK,
            page(
                "Unsubscribed",
                &format!("{address} will no longer receive geofence notifications."),
            ),
        ),
        Err(GeofencingError::MailAddressNotFound(_)) => (
            StatusCode::NOT_FOUND,
            page(
                "Unknown address",
                &format!("{address} is not subscribed."),
            ),
        ),
        Err(e) => {
            tracing::error!(address = %address, error = %e, "Unsubscribe failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                page("Unsubscribe failed", "Please try again later."),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_escapes_markup() {
        let Html(body) = page("Hi", "<script>alert('x')</script> & more");
        assert!(body.contains("&lt;script&gt;alert('x')&lt;/script&gt; &amp; more"));
        assert!(!body.contains("<script>"));
    }
}
