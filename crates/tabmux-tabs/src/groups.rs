//! Sync groups: logical grouping of tabs for UI input broadcast. Each tab
//! id appears in at most one group; empty groups are garbage-collected,
//! enforced here rather than left to callers.

use std::collections::{HashMap, HashSet};
use tabmux_core::TabId;

#[derive(Debug, Clone)]
pub struct SyncGroupInfo {
    pub group_id: u32,
    pub label: String,
    pub color: String,
    pub members: Vec<TabId>,
}

#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: HashMap<u32, (String, HashSet<TabId>)>,
    tab_group: HashMap<TabId, u32>,
    next_id: u32,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display label for a group, `"G<n>"`.
    pub fn label(group_id: u32) -> String {
        format!("G{group_id}")
    }

    pub fn create_group(&mut self, color: String) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.groups.insert(id, (color, HashSet::new()));
        id
    }

    /// Moves `tab_id` into `group_id`, evicting it from any prior group
    /// first so the "at most one group" invariant always holds.
    pub fn add_member(&mut self, group_id: u32, tab_id: TabId) -> bool {
        if !self.groups.contains_key(&group_id) {
            return false;
        }
        self.remove_member(&tab_id);
        self.groups.get_mut(&group_id).expect("checked above").1.insert(tab_id.clone());
        self.tab_group.insert(tab_id, group_id);
        true
    }

    /// Removes `tab_id` from whichever group it belongs to, if any,
    /// garbage-collecting the group if it becomes empty.
    pub fn remove_member(&mut self, tab_id: &TabId) {
        if let Some(group_id) = self.tab_group.remove(tab_id) {
            if let Some((_, members)) = self.groups.get_mut(&group_id) {
                members.remove(tab_id);
                if members.is_empty() {
                    self.groups.remove(&group_id);
                }
            }
        }
    }

    pub fn group_of(&self, tab_id: &TabId) -> Option<u32> {
        self.tab_group.get(tab_id).copied()
    }

    pub fn members(&self, group_id: u32) -> Vec<TabId> {
        self.groups.get(&group_id).map(|(_, m)| m.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn info(&self, group_id: u32) -> Option<SyncGroupInfo> {
        self.groups.get(&group_id).map(|(color, members)| SyncGroupInfo {
            group_id,
            label: Self::label(group_id),
            color: color.clone(),
            members: members.iter().cloned().collect(),
        })
    }

    pub fn list(&self) -> Vec<SyncGroupInfo> {
        self.groups
            .keys()
            .copied()
            .filter_map(|id| self.info(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tab_moves_between_groups_without_duplication() {
        let mut registry = GroupRegistry::new();
        let g1 = registry.create_group("red".into());
        let g2 = registry.create_group("blue".into());

        registry.add_member(g1, "T1".into());
        assert_eq!(registry.group_of(&"T1".to_string()), Some(g1));

        registry.add_member(g2, "T1".into());
        assert_eq!(registry.group_of(&"T1".to_string()), Some(g2));
        assert!(registry.members(g1).is_empty());
        assert_eq!(registry.members(g2), vec!["T1".to_string()]);
    }

    #[test]
    fn empty_group_is_garbage_collected_on_last_member_removal() {
        let mut registry = GroupRegistry::new();
        let g1 = registry.create_group("red".into());
        registry.add_member(g1, "T1".into());
        registry.remove_member(&"T1".to_string());
        assert!(registry.info(g1).is_none());
    }

    #[test]
    fn label_format() {
        assert_eq!(GroupRegistry::label(3), "G3");
    }
}
