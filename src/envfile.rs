//! Per-stack environment: the default key schema and the flat `KEY=value` file.
//!
//! The file is always written whole from the stored config entries, never patched, so the
//! file and the store cannot drift apart.

use std::io;
use std::path::Path;

use crate::alloc::{Allocation, PortRole};
use crate::credentials::CredentialSet;
use crate::util::fs::write_atomic;

/// How a default value is produced for a new stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    Literal(&'static str),
    Secret(SecretSlot),
    Port(PortRole),
    /// `{host_url}:{port}` for the given port role.
    HostUrl(PortRole),
    TenantId,
}

/// Named slots of a [`CredentialSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSlot {
    JwtSecret,
    AnonKey,
    ServiceRoleKey,
    PostgresPassword,
    DashboardPassword,
    SecretKeyBase,
    VaultEncKey,
    PgMetaCryptoKey,
    LogflarePublic,
    LogflarePrivate,
}

impl SecretSlot {
    fn take(self, creds: &CredentialSet) -> &str {
        match self {
            SecretSlot::JwtSecret => &creds.jwt_secret,
            SecretSlot::AnonKey => &creds.tokens.anon_key,
            SecretSlot::ServiceRoleKey => &creds.tokens.service_role_key,
            SecretSlot::PostgresPassword => &creds.postgres_password,
            SecretSlot::DashboardPassword => &creds.dashboard_password,
            SecretSlot::SecretKeyBase => &creds.secret_key_base,
            SecretSlot::VaultEncKey => &creds.vault_enc_key,
            SecretSlot::PgMetaCryptoKey => &creds.pg_meta_crypto_key,
            SecretSlot::LogflarePublic => &creds.logflare_public_token,
            SecretSlot::LogflarePrivate => &creds.logflare_private_token,
        }
    }
}

use DefaultValue::{HostUrl, Literal, Port, Secret, TenantId};

/// Ordered default environment for every new stack.
pub const DEFAULT_SCHEMA: &[(&str, DefaultValue)] = &[
    ("POSTGRES_PASSWORD", Secret(SecretSlot::PostgresPassword)),
    ("JWT_SECRET", Secret(SecretSlot::JwtSecret)),
    ("ANON_KEY", Secret(SecretSlot::AnonKey)),
    ("SERVICE_ROLE_KEY", Secret(SecretSlot::ServiceRoleKey)),
    ("DASHBOARD_USERNAME", Literal("supabase")),
    ("DASHBOARD_PASSWORD", Secret(SecretSlot::DashboardPassword)),
    ("SECRET_KEY_BASE", Secret(SecretSlot::SecretKeyBase)),
    ("VAULT_ENC_KEY", Secret(SecretSlot::VaultEncKey)),
    ("PG_META_CRYPTO_KEY", Secret(SecretSlot::PgMetaCryptoKey)),
    ("POSTGRES_PORT", Port(PortRole::Postgres)),
    ("POOLER_PROXY_PORT_TRANSACTION", Port(PortRole::Pooler)),
    ("KONG_HTTP_PORT", Port(PortRole::KongHttp)),
    ("KONG_HTTPS_PORT", Port(PortRole::KongHttps)),
    ("ANALYTICS_PORT", Port(PortRole::Analytics)),
    ("POSTGRES_HOST", Literal("db")),
    ("POSTGRES_DB", Literal("postgres")),
    ("POOLER_DEFAULT_POOL_SIZE", Literal("20")),
    ("POOLER_MAX_CLIENT_CONN", Literal("100")),
    ("POOLER_TENANT_ID", TenantId),
    ("POOLER_DB_POOL_SIZE", Literal("5")),
    ("PGRST_DB_SCHEMAS", Literal("public,storage,graphql_public")),
    ("SITE_URL", HostUrl(PortRole::KongHttp)),
    ("ADDITIONAL_REDIRECT_URLS", Literal("")),
    ("JWT_EXPIRY", Literal("3600")),
    ("DISABLE_SIGNUP", Literal("false")),
    ("API_EXTERNAL_URL", HostUrl(PortRole::KongHttp)),
    ("MAILER_URLPATHS_CONFIRMATION", Literal("/auth/v1/verify")),
    ("MAILER_URLPATHS_INVITE", Literal("/auth/v1/verify")),
    ("MAILER_URLPATHS_RECOVERY", Literal("/auth/v1/verify")),
    ("MAILER_URLPATHS_EMAIL_CHANGE", Literal("/auth/v1/verify")),
    ("ENABLE_EMAIL_SIGNUP", Literal("true")),
    ("ENABLE_EMAIL_AUTOCONFIRM", Literal("false")),
    ("SMTP_ADMIN_EMAIL", Literal("admin@example.com")),
    ("SMTP_HOST", Literal("supabase-mail")),
    ("SMTP_PORT", Literal("2500")),
    ("SMTP_USER", Literal("fake_mail_user")),
    ("SMTP_PASS", Literal("fake_mail_password")),
    ("SMTP_SENDER_NAME", Literal("fake_sender")),
    ("ENABLE_ANONYMOUS_USERS", Literal("false")),
    ("ENABLE_PHONE_SIGNUP", Literal("true")),
    ("ENABLE_PHONE_AUTOCONFIRM", Literal("true")),
    ("STUDIO_DEFAULT_ORGANIZATION", Literal("Default Organization")),
    ("STUDIO_DEFAULT_PROJECT", Literal("Default Project")),
    ("STUDIO_PORT", Port(PortRole::Studio)),
    ("SUPABASE_PUBLIC_URL", HostUrl(PortRole::KongHttp)),
    ("IMGPROXY_ENABLE_WEBP_DETECTION", Literal("true")),
    ("OPENAI_API_KEY", Literal("")),
    ("FUNCTIONS_VERIFY_JWT", Literal("false")),
    ("LOGFLARE_PUBLIC_ACCESS_TOKEN", Secret(SecretSlot::LogflarePublic)),
    ("LOGFLARE_PRIVATE_ACCESS_TOKEN", Secret(SecretSlot::LogflarePrivate)),
    ("DOCKER_SOCKET_LOCATION", Literal("/var/run/docker.sock")),
    ("GOOGLE_PROJECT_ID", Literal("GOOGLE_PROJECT_ID")),
    ("GOOGLE_PROJECT_NUMBER", Literal("GOOGLE_PROJECT_NUMBER")),
];

/// Resolve [`DEFAULT_SCHEMA`] into concrete, ordered key/value pairs.
pub fn default_entries(
    alloc: &Allocation,
    creds: &CredentialSet,
    host_url: &str,
) -> Vec<(String, String)> {
    let host_url = host_url.trim_end_matches('/');
    DEFAULT_SCHEMA
        .iter()
        .map(|(key, def)| {
            let value = match *def {
                Literal(v) => v.to_string(),
                Secret(slot) => slot.take(creds).to_string(),
                Port(role) => alloc.ports.port(role).to_string(),
                HostUrl(role) => format!("{host_url}:{}", alloc.ports.port(role)),
                TenantId => alloc.tenant_id(),
            };
            (key.to_string(), value)
        })
        .collect()
}

/// Render entries as `KEY=value` lines with a trailing newline.
///
/// Keys must be non-empty and free of `=`; no key or value may contain CR, LF or NUL.
pub fn render(entries: &[(String, String)]) -> io::Result<String> {
    let mut out = String::new();
    for (i, (key, value)) in entries.iter().enumerate() {
        let bad = |s: &str| s.contains('\n') || s.contains('\r') || s.contains('\0');
        if key.is_empty() || key.contains('=') || bad(key) || bad(value) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("env entry {i} ({key:?}) cannot be written as a single KEY=value line"),
            ));
        }
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    Ok(out)
}

pub fn write_env_file(path: &Path, entries: &[(String, String)]) -> io::Result<()> {
    let text = render(entries)?;
    write_atomic(path, text.as_bytes())
}

/// Read an env file back into ordered pairs.
pub fn read_env_file(path: &Path) -> io::Result<Vec<(String, String)>> {
    let iter = dotenvy::from_path_iter(path).map_err(dotenv_to_io)?;
    iter.map(|item| item.map_err(dotenv_to_io)).collect()
}

fn dotenv_to_io(e: dotenvy::Error) -> io::Error {
    match e {
        dotenvy::Error::Io(ioe) => ioe,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}
