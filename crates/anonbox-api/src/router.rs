use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::{require_auth, resolve_viewer};
use crate::state::AppState;
use crate::{accept, auth, messages, registration, suggest, verification};

/// Full HTTP surface. Session routes sit behind `require_auth`; message
/// delivery is public but goes through `resolve_viewer` so a signed-in
/// sender can be recorded.
pub fn app(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/sign-up", post(registration::sign_up))
        .route("/verify-code", post(verification::verify_code))
        .route("/sign-in", post(auth::sign_in))
        .route("/check-username-unique", get(registration::check_username_unique))
        .route("/get-user-by-username", get(registration::get_user_by_username))
        .route("/get-user-by-username/{username}", get(registration::get_user_by_username_path))
        .route("/suggest-messages", post(suggest::suggest_messages))
        .with_state(state.clone());

    let visitor_routes = Router::new()
        .route("/send-message", post(messages::send_message))
        .layer(middleware::from_fn_with_state(state.clone(), resolve_viewer))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route(
            "/accept-messages",
            get(accept::get_accept_messages).post(accept::update_accept_messages),
        )
        .route("/get-messages", get(messages::get_messages))
        .route("/delete-message/{message_id}", delete(messages::delete_message))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(visitor_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
