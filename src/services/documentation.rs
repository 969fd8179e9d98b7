use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the invitation service.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::feed::invitation_stream,
        crate::routes::invites::create_invite,
        crate::routes::invites::get_invite,
        crate::routes::invites::accept_invite,
        crate::routes::invites::decline_invite,
        crate::routes::invites::cancel_invite,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::invite::CreateInviteRequest,
            crate::dto::invite::ActingUserRequest,
            crate::dto::invite::AcceptResponse,
            crate::dto::invite::InvitationRecord,
            crate::dto::invite::InviteStatusDto,
            crate::dto::feed::ChangeEvent,
            crate::dto::feed::ChangeKind,
            crate::error::ErrorBody,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "invites", description = "Invitation lifecycle and guarded transitions"),
        (name = "feed", description = "Server-sent invitation change feed"),
    )
)]
/// OpenAPI document of the REST surface and the change feed.
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<_> = doc.paths.paths.keys().cloned().collect();
        for expected in [
            "/healthcheck",
            "/feed/invitations",
            "/invites",
            "/invites/{id}",
            "/invites/{id}/accept",
            "/invites/{id}/decline",
            "/invites/{id}/cancel",
        ] {
            assert!(paths.iter().any(|path| path == expected), "missing {expected}");
        }
    }
}
