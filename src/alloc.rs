//! Slug and port allocation for new stacks.
//!
//! A stack's slug is its lower-cased name with every character outside `[a-z0-9]` replaced by
//! `-`, suffixed with the creation timestamp in milliseconds. Ports are a fixed offset table
//! around a base port of `8000 + (seed mod 10000)`, where the seed starts at the timestamp.
//!
//! The modulus repeats every ten thousand milliseconds of seed, so two stacks can land on the same
//! block. [`PortLedger`] closes that gap by checking the block against every port already
//! recorded for other stacks and advancing the seed until the block is disjoint.

use std::collections::BTreeSet;

use thiserror::Error;

pub const BASE_PORT: u16 = 8000;
pub const PORT_SPAN: u64 = 10_000;
const MAX_SEED_ATTEMPTS: u64 = PORT_SPAN;

/// Services that get a published port, with their env key and offset from the base port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PortRole {
    KongHttp,
    Studio,
    KongHttps,
    Analytics,
    Postgres,
    Pooler,
}

impl PortRole {
    pub const ALL: [PortRole; 6] = [
        PortRole::KongHttp,
        PortRole::Studio,
        PortRole::KongHttps,
        PortRole::Analytics,
        PortRole::Postgres,
        PortRole::Pooler,
    ];

    pub fn offset(self) -> u16 {
        match self {
            PortRole::KongHttp => 0,
            PortRole::Studio => 100,
            PortRole::KongHttps => 443,
            PortRole::Analytics => 1000,
            PortRole::Postgres => 2000,
            PortRole::Pooler => 3000,
        }
    }

    pub fn env_key(self) -> &'static str {
        match self {
            PortRole::KongHttp => "KONG_HTTP_PORT",
            PortRole::Studio => "STUDIO_PORT",
            PortRole::KongHttps => "KONG_HTTPS_PORT",
            PortRole::Analytics => "ANALYTICS_PORT",
            PortRole::Postgres => "POSTGRES_PORT",
            PortRole::Pooler => "POOLER_PROXY_PORT_TRANSACTION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAllocation {
    pub base: u16,
}

impl PortAllocation {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            base: BASE_PORT + (seed % PORT_SPAN) as u16,
        }
    }

    pub fn port(&self, role: PortRole) -> u16 {
        self.base + role.offset()
    }

    pub fn kong_http(&self) -> u16 {
        self.port(PortRole::KongHttp)
    }

    pub fn studio(&self) -> u16 {
        self.port(PortRole::Studio)
    }

    pub fn postgres(&self) -> u16 {
        self.port(PortRole::Postgres)
    }

    pub fn ports(&self) -> impl Iterator<Item = (PortRole, u16)> + '_ {
        PortRole::ALL.into_iter().map(|r| (r, self.port(r)))
    }
}

/// Everything derived for a new stack before any credentials or files exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub slug: String,
    pub timestamp_ms: u64,
    pub ports: PortAllocation,
}

impl Allocation {
    /// Pooler tenant identifier, stable for the stack's lifetime.
    pub fn tenant_id(&self) -> String {
        format!("project-{}", self.timestamp_ms)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocError {
    #[error("stack name must not be empty")]
    EmptyName,
    #[error("slug {0} is already in use")]
    SlugTaken(String),
    #[error("no free port block found after {0} attempts")]
    PortsExhausted(u64),
}

pub fn slugify(name: &str, timestamp_ms: u64) -> String {
    let body: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{body}-{timestamp_ms}")
}

/// Pure allocation: slug and ports straight from the timestamp.
pub fn allocate(name: &str, timestamp_ms: u64) -> Result<Allocation, AllocError> {
    if name.trim().is_empty() {
        return Err(AllocError::EmptyName);
    }
    Ok(Allocation {
        slug: slugify(name, timestamp_ms),
        timestamp_ms,
        ports: PortAllocation::from_seed(timestamp_ms),
    })
}

/// Ports and slugs already handed out to existing stacks.
#[derive(Debug, Default, Clone)]
pub struct PortLedger {
    used_ports: BTreeSet<u16>,
    used_slugs: BTreeSet<String>,
}

impl PortLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_slug(&mut self, slug: impl Into<String>) {
        self.used_slugs.insert(slug.into());
    }

    pub fn record_port(&mut self, port: u16) {
        self.used_ports.insert(port);
    }

    /// Record every value of a port env key found in a stack's config entries.
    pub fn record_config<'a, I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (key, value) in entries {
            if PortRole::ALL.iter().any(|r| r.env_key() == key) {
                if let Ok(p) = value.trim().parse::<u16>() {
                    self.used_ports.insert(p);
                }
            }
        }
    }

    fn is_free(&self, ports: &PortAllocation) -> bool {
        ports.ports().all(|(_, p)| !self.used_ports.contains(&p))
    }

    /// Allocate like [`allocate`], then advance the port seed until the block is disjoint from
    /// every recorded port. The slug keeps the real timestamp.
    pub fn allocate(&self, name: &str, timestamp_ms: u64) -> Result<Allocation, AllocError> {
        let mut alloc = allocate(name, timestamp_ms)?;
        if self.used_slugs.contains(&alloc.slug) {
            return Err(AllocError::SlugTaken(alloc.slug));
        }
        for attempt in 0..MAX_SEED_ATTEMPTS {
            let ports = PortAllocation::from_seed(timestamp_ms.wrapping_add(attempt));
            if self.is_free(&ports) {
                if attempt > 0 {
                    tracing::info!(
                        slug = %alloc.slug,
                        attempt,
                        base = ports.base,
                        "port block moved to avoid a collision"
                    );
                }
                alloc.ports = ports;
                return Ok(alloc);
            }
        }
        Err(AllocError::PortsExhausted(MAX_SEED_ATTEMPTS))
    }
}
