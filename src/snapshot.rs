//! Session snapshot of the cache
//!
//! ```json
//! {
//!   "resources": [
//!     { "id": "…", "name": "rock", "type": "Mesh", "behaviorFlags": "REMOVABLE",
//!       "path": "meshes/rock.json" }
//!   ],
//!   "maxCostBudget": 536870912
//! }
//! ```

use crate::cache::BudgetStatus;
use crate::error::{ResourceError, Result};
use crate::resources::{BehaviorFlags, Resource, ResourceHandle, ResourceType};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Serialized form of one handle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleSnapshot {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub behavior_flags: BehaviorFlags,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_paths: Vec<PathBuf>,
    /// Embedded payload snapshot for handles rebuilt from their snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<serde_json::Value>,
}

impl HandleSnapshot {
    /// Capture `handle`, embedding its payload when it is rebuilt from a
    /// snapshot rather than from disk
    pub fn capture(handle: &ResourceHandle) -> Self {
        let resource = if handle.uses_snapshot() {
            let fresh = handle.payload().and_then(|p| p.to_snapshot());
            if fresh.is_some() {
                handle.set_snapshot(fresh.clone());
            }
            fresh.or_else(|| handle.snapshot())
        } else {
            None
        };

        Self {
            id: handle.id(),
            name: handle.name(),
            resource_type: handle.resource_type(),
            behavior_flags: handle.behavior_flags(),
            path: handle.path(),
            additional_paths: handle.additional_paths(),
            resource,
        }
    }

    /// Unregistered handle carrying this snapshot's identity and metadata
    pub fn to_handle(&self) -> ResourceHandle {
        let handle = ResourceHandle::with_id(self.id, self.resource_type)
            .named(self.name.clone())
            .with_flags(self.behavior_flags);
        if let Some(path) = &self.path {
            handle.set_path(path.clone());
        }
        for path in &self.additional_paths {
            handle.push_additional_path(path.clone());
        }
        match &self.resource {
            Some(resource) => handle.with_snapshot(resource.clone()),
            None => handle,
        }
    }

    /// Whether a reload can rebuild the payload
    pub fn is_loadable(&self) -> bool {
        let uses_snapshot = self
            .behavior_flags
            .intersects(BehaviorFlags::USES_SNAPSHOT | BehaviorFlags::RUNTIME_GENERATED);
        if uses_snapshot {
            self.resource.is_some()
        } else {
            self.path.is_some()
        }
    }
}

/// Serialized form of the whole cache
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub resources: Vec<HandleSnapshot>,
    pub max_cost_budget: u64,
}

/// Handles recreated from a [`CacheSnapshot`]
#[derive(Debug)]
pub struct SnapshotReload {
    /// In reload order
    pub handles: Vec<Arc<ResourceHandle>>,
    /// Outcome of evicting down to the snapshot's budget
    pub budget: BudgetStatus,
}

impl CacheSnapshot {
    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let json = if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        };
        json.map_err(|e| ResourceError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ResourceError::Deserialization(e.to_string()))
    }

    /// Sort into reload order: dependencies first, then by name
    pub fn sort_for_reload(&mut self) {
        self.resources
            .sort_by(|a, b| a.resource_type.cmp(&b.resource_type).then_with(|| a.name.cmp(&b.name)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Image, ResourcePayload};

    #[test]
    fn test_field_names() {
        let snapshot = CacheSnapshot {
            resources: vec![HandleSnapshot {
                id: Uuid::new_v4(),
                name: "rock".to_string(),
                resource_type: ResourceType::Mesh,
                behavior_flags: BehaviorFlags::REMOVABLE,
                path: Some(PathBuf::from("meshes/rock.json")),
                additional_paths: Vec::new(),
                resource: None,
            }],
            max_cost_budget: 64,
        };
        let value: serde_json::Value =
            serde_json::from_str(&snapshot.to_json(false).unwrap()).unwrap();

        assert_eq!(value["maxCostBudget"], 64);
        assert_eq!(value["resources"][0]["type"], "Mesh");
        assert!(value["resources"][0].get("behaviorFlags").is_some());
        assert!(value["resources"][0].get("resource").is_none());
        assert_eq!(CacheSnapshot::from_json(&snapshot.to_json(true).unwrap()).unwrap(), snapshot);
    }

    #[test]
    fn test_capture_embeds_procedural_payload() {
        let handle = ResourceHandle::new(ResourceType::Image)
            .named("noise")
            .with_flags(BehaviorFlags::RUNTIME_GENERATED)
            .with_payload(ResourcePayload::from(Image::new(1, 1, vec![9])))
            .unwrap();

        let captured = HandleSnapshot::capture(&handle);
        assert!(captured.is_loadable());
        assert_eq!(captured.resource.as_ref(), handle.snapshot().as_ref());

        let rebuilt = captured.to_handle();
        assert_eq!(rebuilt.id(), handle.id());
        assert_eq!(rebuilt.name(), "noise");
        assert!(rebuilt.uses_snapshot());
        assert!(!rebuilt.has_payload());
    }

    #[test]
    fn test_reload_order() {
        let entry = |name: &str, ty| HandleSnapshot {
            id: Uuid::new_v4(),
            name: name.to_string(),
            resource_type: ty,
            behavior_flags: BehaviorFlags::REMOVABLE,
            path: None,
            additional_paths: Vec::new(),
            resource: None,
        };
        let mut snapshot = CacheSnapshot {
            resources: vec![
                entry("a", ResourceType::Model),
                entry("b", ResourceType::Mesh),
                entry("a", ResourceType::Material),
            ],
            max_cost_budget: 0,
        };
        snapshot.sort_for_reload();
        let order: Vec<_> = snapshot.resources.iter().map(|r| r.resource_type).collect();
        assert_eq!(
            order,
            vec![ResourceType::Material, ResourceType::Mesh, ResourceType::Model]
        );
    }
}
