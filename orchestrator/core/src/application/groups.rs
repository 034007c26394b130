// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

//! Swarm Group Service
//!
//! Named sets of swarm IDs used as batch targets. Groups live in process
//! memory; names are unique and membership is deduplicated.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** CRUD for swarm groups

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::info;

use crate::application::batch::BatchError;
use crate::domain::batch::{dedupe, GroupId, GroupUpdate, NewSwarmGroup, SwarmGroup};
use crate::domain::swarm::SwarmId;

#[derive(Default)]
pub struct SwarmGroupService {
    groups: RwLock<HashMap<GroupId, SwarmGroup>>,
}

impl SwarmGroupService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_group(&self, request: NewSwarmGroup) -> Result<SwarmGroup, BatchError> {
        let name = normalize_name(&request.name)?;
        let mut groups = self.groups.write();
        ensure_unique(&groups, &name, None)?;

        let group = SwarmGroup::new(name, request.description, request.swarm_ids);
        groups.insert(group.group_id, group.clone());
        info!(
            group_id = %group.group_id,
            name = %group.name,
            members = group.swarm_ids.len(),
            "Created swarm group"
        );
        Ok(group)
    }

    pub fn get_group(&self, group_id: &GroupId) -> Result<SwarmGroup, BatchError> {
        self.groups
            .read()
            .get(group_id)
            .cloned()
            .ok_or(BatchError::GroupNotFound(*group_id))
    }

    /// All groups, oldest first.
    pub fn list_groups(&self) -> Vec<SwarmGroup> {
        let mut groups: Vec<SwarmGroup> = self.groups.read().values().cloned().collect();
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        groups
    }

    pub fn update_group(
        &self,
        group_id: &GroupId,
        update: GroupUpdate,
    ) -> Result<SwarmGroup, BatchError> {
        let name = update.name.as_deref().map(normalize_name).transpose()?;

        let mut groups = self.groups.write();
        if let Some(name) = &name {
            ensure_unique(&groups, name, Some(group_id))?;
        }
        let group = groups
            .get_mut(group_id)
            .ok_or(BatchError::GroupNotFound(*group_id))?;

        if let Some(name) = name {
            group.name = name;
        }
        if let Some(description) = update.description {
            group.description = Some(description);
        }
        if let Some(swarm_ids) = update.swarm_ids {
            group.swarm_ids = dedupe(swarm_ids);
        }
        group.updated_at = Utc::now();
        Ok(group.clone())
    }

    pub fn delete_group(&self, group_id: &GroupId) -> Result<(), BatchError> {
        self.groups
            .write()
            .remove(group_id)
            .map(|group| info!(group_id = %group_id, name = %group.name, "Deleted swarm group"))
            .ok_or(BatchError::GroupNotFound(*group_id))
    }

    pub fn add_swarms(
        &self,
        group_id: &GroupId,
        swarm_ids: Vec<SwarmId>,
    ) -> Result<SwarmGroup, BatchError> {
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(group_id)
            .ok_or(BatchError::GroupNotFound(*group_id))?;
        group.add_swarms(swarm_ids);
        Ok(group.clone())
    }

    pub fn remove_swarms(
        &self,
        group_id: &GroupId,
        swarm_ids: &[SwarmId],
    ) -> Result<SwarmGroup, BatchError> {
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(group_id)
            .ok_or(BatchError::GroupNotFound(*group_id))?;
        group.remove_swarms(swarm_ids);
        Ok(group.clone())
    }
}

fn normalize_name(name: &str) -> Result<String, BatchError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(BatchError::InvalidGroup("group name must not be empty".to_string()));
    }
    Ok(name.to_string())
}

fn ensure_unique(
    groups: &HashMap<GroupId, SwarmGroup>,
    name: &str,
    except: Option<&GroupId>,
) -> Result<(), BatchError> {
    let taken = groups
        .values()
        .any(|g| g.name == name && Some(&g.group_id) != except);
    if taken {
        return Err(BatchError::InvalidGroup(format!(
            "a group named '{}' already exists",
            name
        )));
    }
    Ok(())
}
