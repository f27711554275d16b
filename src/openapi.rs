use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::handlers;

struct BearerAuthAddon;

impl Modify for BearerAuthAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health_check,
        handlers::auth::register,
        handlers::auth::login,
        handlers::auth::refresh,
        handlers::auth::logout,
        handlers::auth::validate,
        handlers::auth::request_password_reset,
        handlers::auth::confirm_password_reset,
        handlers::users::get_current_user,
        handlers::users::get_user_by_id,
        handlers::conversations::create_conversation,
        handlers::conversations::list_my_conversations,
        handlers::conversations::get_conversation,
        handlers::messages::send_message,
        handlers::messages::list_messages,
        handlers::calls::initiate_call,
        handlers::calls::ice_servers,
        handlers::storage::issue_upload_url,
        handlers::storage::issue_download_url,
        handlers::push_tokens::register_push_token,
        handlers::push_tokens::delete_push_token,
    ),
    modifiers(&BearerAuthAddon),
    tags(
        (name = "auth", description = "Registration, login, and session lifecycle"),
        (name = "users", description = "User profiles"),
        (name = "conversations", description = "Direct and group conversations"),
        (name = "messages", description = "Conversation messages"),
        (name = "calls", description = "Voice/video call signaling and TURN credentials"),
        (name = "storage", description = "Pre-signed blob upload/download"),
        (name = "push-tokens", description = "Push notification device tokens"),
    ),
)]
pub struct ApiDoc;
