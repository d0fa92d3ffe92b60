use chrono::Duration;

pub const COLLECTIONS_TABLE: &str = "_collections";
pub const FIELDS_TABLE: &str = "_fields";
pub const ADMINS_TABLE: &str = "_admins";
pub const REFRESH_TOKENS_TABLE: &str = "_refresh_tokens";
pub const VERIFICATION_TOKENS_TABLE: &str = "_verification_tokens";
pub const FILES_TABLE: &str = "_files";

// Public APIs.
pub const RECORD_API_PATH: &str = "api/collections";
pub const FILES_API_PATH: &str = "api/files";
pub const REALTIME_API_PATH: &str = "api/realtime";
pub const ADMIN_API_PATH: &str = "_/api";

pub const ADMIN_TOKEN_TTL: Duration = Duration::hours(24);
pub const ACCESS_TOKEN_TTL: Duration = Duration::minutes(15);
pub const REFRESH_TOKEN_TTL: Duration = Duration::days(7);
pub const VERIFICATION_TOKEN_TTL: Duration = Duration::hours(24);
pub const PASSWORD_RESET_TOKEN_TTL: Duration = Duration::hours(1);

pub(crate) const REFRESH_TOKEN_ID_LENGTH: usize = 32;
pub(crate) const VERIFICATION_TOKEN_LENGTH: usize = 64;

pub const DEFAULT_PER_PAGE: u64 = 30;
pub const MAX_PER_PAGE: u64 = 500;

pub(crate) const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;
pub(crate) const DEFAULT_ADMIN_EMAIL: &str = "admin@localhost";

pub(crate) const SSE_HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
pub(crate) const SSE_INACTIVITY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

pub(crate) const MAX_REQUEST_BODY_SIZE: usize = 32 * 1024 * 1024;
