//! Maps cluster members to provider resource IDs.
//!
//! Each infrastructure provider identifies the machine behind a member
//! differently. Resolvers never guess: a missing or empty attribute is an
//! error, because a wrong ID would terminate the wrong instance.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use poolscale_core::{ClusterMember, NodeInfo, ResolveError};

pub const AWS_INSTANCE_ID_ATTR: &str = "unique.platform.aws.instance-id";
pub const AZURE_VM_NAME_ATTR: &str = "unique.platform.azure.name";
pub const GCE_ZONE_ATTR: &str = "platform.gce.zone";
pub const GCE_HOSTNAME_ATTR: &str = "unique.platform.gce.hostname";
pub const HOSTNAME_ATTR: &str = "unique.hostname";

/// Maps one member to the provider's resource identifier.
pub trait RemoteIdResolver: Send + Sync {
    /// Provider tag this resolver is registered under.
    fn provider(&self) -> &str;

    fn resolve(&self, member: &ClusterMember, info: &NodeInfo) -> Result<String, ResolveError>;
}

fn non_empty<'a>(values: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    values
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn required_attribute<'a>(info: &'a NodeInfo, member: &ClusterMember, key: &str) -> Result<&'a str, ResolveError> {
    non_empty(&info.attributes, key).ok_or_else(|| ResolveError::AttributeNotFound {
        node_id: member.id.clone(),
        attribute: key.to_string(),
    })
}

/// First piece of a split attribute, which must not be empty.
fn leading_piece<'a>(
    mut pieces: impl Iterator<Item = &'a str>,
    member: &ClusterMember,
    key: &str,
) -> Result<&'a str, ResolveError> {
    pieces
        .next()
        .filter(|piece| !piece.trim().is_empty())
        .ok_or_else(|| ResolveError::AttributeNotFound {
            node_id: member.id.clone(),
            attribute: key.to_string(),
        })
}

/// Reads the ID straight out of one node attribute.
#[derive(Debug, Clone)]
pub struct AttributeLookup {
    provider: String,
    attribute: String,
}

impl AttributeLookup {
    pub fn new(provider: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            attribute: attribute.into(),
        }
    }
}

impl RemoteIdResolver for AttributeLookup {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn resolve(&self, member: &ClusterMember, info: &NodeInfo) -> Result<String, ResolveError> {
        required_attribute(info, member, &self.attribute).map(str::to_string)
    }
}

/// EC2 instance ID from the AWS fingerprint.
#[derive(Debug, Clone, Copy, Default)]
pub struct AwsInstanceId;

impl RemoteIdResolver for AwsInstanceId {
    fn provider(&self) -> &str {
        "aws"
    }

    fn resolve(&self, member: &ClusterMember, info: &NodeInfo) -> Result<String, ResolveError> {
        required_attribute(info, member, AWS_INSTANCE_ID_ATTR).map(str::to_string)
    }
}

/// Azure VM name. Falls back to node metadata under the same key when
/// cloud fingerprinting is disabled on the client.
#[derive(Debug, Clone, Copy, Default)]
pub struct AzureVmName;

impl RemoteIdResolver for AzureVmName {
    fn provider(&self) -> &str {
        "azure"
    }

    fn resolve(&self, member: &ClusterMember, info: &NodeInfo) -> Result<String, ResolveError> {
        non_empty(&info.attributes, AZURE_VM_NAME_ATTR)
            .or_else(|| non_empty(&info.meta, AZURE_VM_NAME_ATTR))
            .map(str::to_string)
            .ok_or_else(|| ResolveError::AttributeNotFound {
                node_id: member.id.clone(),
                attribute: AZURE_VM_NAME_ATTR.to_string(),
            })
    }
}

/// GCE instance path: `zones/{zone}/instances/{name}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GceInstance;

impl RemoteIdResolver for GceInstance {
    fn provider(&self) -> &str {
        "gce"
    }

    fn resolve(&self, member: &ClusterMember, info: &NodeInfo) -> Result<String, ResolveError> {
        let zone = required_attribute(info, member, GCE_ZONE_ATTR)?;
        let hostname = required_attribute(info, member, GCE_HOSTNAME_ATTR)?;
        // The zone attribute may be a full resource path.
        let zone = leading_piece(zone.rsplit('/'), member, GCE_ZONE_ATTR)?;
        let name = leading_piece(hostname.split('.'), member, GCE_HOSTNAME_ATTR)?;
        Ok(format!("zones/{zone}/instances/{name}"))
    }
}

/// Hetzner Cloud server name, which is the node hostname.
#[derive(Debug, Clone, Copy, Default)]
pub struct HetznerServer;

impl RemoteIdResolver for HetznerServer {
    fn provider(&self) -> &str {
        "hetzner"
    }

    fn resolve(&self, member: &ClusterMember, info: &NodeInfo) -> Result<String, ResolveError> {
        required_attribute(info, member, HOSTNAME_ATTR).map(str::to_string)
    }
}

/// Resolvers keyed by provider tag.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: BTreeMap<String, Arc<dyn RemoteIdResolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in cloud providers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AwsInstanceId));
        registry.register(Arc::new(AzureVmName));
        registry.register(Arc::new(GceInstance));
        registry.register(Arc::new(HetznerServer));
        registry
    }

    /// Add or replace the resolver for its provider tag.
    pub fn register(&mut self, resolver: Arc<dyn RemoteIdResolver>) {
        self.resolvers.insert(resolver.provider().to_string(), resolver);
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn RemoteIdResolver>> {
        self.resolvers.get(provider).cloned()
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.resolvers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.resolvers.keys()).finish()
    }
}
