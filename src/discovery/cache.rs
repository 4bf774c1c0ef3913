use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::TargetGroup;

/// Latest file SD target groups, keyed by group source
#[derive(Debug, Default)]
pub struct Cache {
    groups: RwLock<BTreeMap<String, TargetGroup>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the groups of every source carried by `groups`.
    ///
    /// Sources that are not part of the update keep their targets.
    pub fn update(&self, groups: Vec<TargetGroup>) {
        let mut cached = self.groups.write();
        for group in groups {
            if group.targets.is_empty() {
                cached.remove(&group.source);
            } else {
                cached.insert(group.source.clone(), group);
            }
        }
    }

    /// Every cached target, ordered by source.
    pub fn addresses(&self) -> Vec<String> {
        self.groups
            .read()
            .values()
            .flat_map(|group| group.targets.iter().cloned())
            .collect()
    }
}
