//! Tenant identity extraction from serialized job arguments
//!
//! Best effort and size bounded: oversized or unparseable arguments yield no
//! identity, which the middleware treats as a system job.

use serde_json::{Map, Value};
use specforge_domain::{TenantId, TierName};

/// Tenant identity carried by a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobIdentity {
    pub tenant_id: TenantId,
    /// Tier embedded in the arguments, if any
    pub tier: Option<TierName>,
}

/// Pure, size-bounded extractor for job arguments encoded as a JSON object
///
/// The tenant is read from `tenant_id`, or `user_id` when `tenant_id` is
/// absent. String and integer ids are accepted.
#[derive(Debug, Clone, Copy)]
pub struct ArgsExtractor {
    max_bytes: usize,
}

impl ArgsExtractor {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Tenant id and optional tier in a single parse
    pub fn extract(&self, raw: &[u8]) -> Option<JobIdentity> {
        let fields = self.parse(raw)?;
        let tenant_id = fields
            .get("tenant_id")
            .and_then(scalar_to_string)
            .or_else(|| fields.get("user_id").and_then(scalar_to_string))
            .and_then(|raw| TenantId::parse(&raw))?;
        let tier = fields.get("tier").and_then(tier_from_value);
        Some(JobIdentity { tenant_id, tier })
    }

    pub fn extract_tenant_id(&self, raw: &[u8]) -> Option<TenantId> {
        self.extract(raw).map(|identity| identity.tenant_id)
    }

    pub fn extract_tier(&self, raw: &[u8]) -> Option<TierName> {
        self.parse(raw)?.get("tier").and_then(tier_from_value)
    }

    /// Top-level JSON object, or `None` for anything else
    fn parse(&self, raw: &[u8]) -> Option<Map<String, Value>> {
        if raw.is_empty() || raw.len() > self.max_bytes {
            return None;
        }
        match serde_json::from_slice(raw).ok()? {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

fn tier_from_value(value: &Value) -> Option<TierName> {
    let name = value.as_str()?.trim();
    (!name.is_empty()).then(|| TierName::new(name))
}
