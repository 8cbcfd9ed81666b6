pub mod auth;
pub mod comments;
pub mod follow;
pub mod notifications;
pub mod profile;
pub mod taxonomy;

pub use auth::{AuthService, OAuthPolicy};
pub use comments::CommentService;
pub use follow::FollowService;
pub use notifications::NotificationService;
pub use profile::ProfileService;
pub use taxonomy::TaxonomyService;
