//! Resource-group hierarchy lookups.

use crate::id::ResourceGroupId;

/// Read access to the resource-group hierarchy.
pub trait ResourceGroupCatalog: Send + Sync {
    /// Returns the groups from the root down to `group`, inclusive.
    fn path_to_root(&self, group: &ResourceGroupId) -> Vec<ResourceGroupId>;
}

/// Catalog that derives the hierarchy from the group ID segments.
#[derive(Debug, Clone, Copy, Default)]
pub struct HierarchicalResourceGroupCatalog;

impl ResourceGroupCatalog for HierarchicalResourceGroupCatalog {
    fn path_to_root(&self, group: &ResourceGroupId) -> Vec<ResourceGroupId> {
        let mut path = vec![group.clone()];
        let mut current = group.parent();
        while let Some(parent) = current {
            current = parent.parent();
            path.push(parent);
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_runs_from_root_to_leaf() {
        let leaf: ResourceGroupId = "global.adhoc.alice".parse().unwrap();
        let path: Vec<String> = HierarchicalResourceGroupCatalog
            .path_to_root(&leaf)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(path, ["global", "global.adhoc", "global.adhoc.alice"]);
    }

    #[test]
    fn root_path_is_itself() {
        let root = ResourceGroupId::root("global").unwrap();
        assert_eq!(
            HierarchicalResourceGroupCatalog.path_to_root(&root),
            vec![root]
        );
    }
}
