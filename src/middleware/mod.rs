mod admin;
mod origin;

pub use admin::admin_auth_middleware;
pub use origin::origin_allowlist_middleware;
