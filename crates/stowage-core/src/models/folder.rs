use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

/// Folder model for organizing files hierarchically.
///
/// `ancestor_folder_ids` holds the full chain of ancestor ids ordered from
/// root to immediate parent, so subtree membership and scoping checks are
/// single array-membership queries. Its length always equals the folder's
/// depth, and a folder's own id never appears in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct Folder {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub ancestor_folder_ids: Vec<Uuid>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Folder {
    /// Depth in the tree; root folders have depth 0.
    pub fn depth(&self) -> usize {
        self.ancestor_folder_ids.len()
    }

    /// Whether this folder sits inside the subtree rooted at `folder_id`.
    pub fn is_descendant_of(&self, folder_id: Uuid) -> bool {
        self.ancestor_folder_ids.contains(&folder_id)
    }

    /// The ancestor path a direct child of this folder must carry.
    pub fn child_ancestor_path(&self) -> Vec<Uuid> {
        let mut path = self.ancestor_folder_ids.clone();
        path.push(self.id);
        path
    }
}

/// Request DTO for creating a new folder
#[derive(Debug, Deserialize, Validate)]
pub struct CreateFolderRequest {
    #[validate(length(
        min = 1,
        max = 255,
        message = "Folder name must be between 1 and 255 characters"
    ))]
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

/// Computes the rewritten ancestor path for one folder of a moved subtree.
///
/// `own_ancestors` is the folder's current path, `root_depth` the depth of the
/// subtree root before the move, and `destination_path` the destination
/// folder's path already extended with the destination's own id (empty when
/// moving to workspace root). The suffix below the subtree root is preserved.
pub fn rewrite_ancestor_path(
    own_ancestors: &[Uuid],
    root_depth: usize,
    destination_path: &[Uuid],
) -> Vec<Uuid> {
    let mut path = destination_path.to_vec();
    path.extend_from_slice(&own_ancestors[root_depth.min(own_ancestors.len())..]);
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(id: Uuid, ancestors: Vec<Uuid>) -> Folder {
        Folder {
            id,
            workspace_id: Uuid::new_v4(),
            name: "test".to_string(),
            parent_id: ancestors.last().copied(),
            ancestor_folder_ids: ancestors,
            deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_depth_equals_ancestor_count() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(folder(Uuid::new_v4(), vec![]).depth(), 0);
        assert_eq!(folder(Uuid::new_v4(), vec![a]).depth(), 1);
        assert_eq!(folder(Uuid::new_v4(), vec![a, b]).depth(), 2);
    }

    #[test]
    fn test_is_descendant_of() {
        let root = Uuid::new_v4();
        let mid = Uuid::new_v4();
        let leaf = folder(Uuid::new_v4(), vec![root, mid]);
        assert!(leaf.is_descendant_of(root));
        assert!(leaf.is_descendant_of(mid));
        assert!(!leaf.is_descendant_of(Uuid::new_v4()));
    }

    #[test]
    fn test_child_ancestor_path_appends_own_id() {
        let root = Uuid::new_v4();
        let id = Uuid::new_v4();
        let f = folder(id, vec![root]);
        assert_eq!(f.child_ancestor_path(), vec![root, id]);
    }

    #[test]
    fn test_rewrite_root_of_subtree() {
        // Subtree root at depth 2 moved under a destination at depth 1.
        let old = [Uuid::new_v4(), Uuid::new_v4()];
        let dest_path = [Uuid::new_v4(), Uuid::new_v4()];
        let rewritten = rewrite_ancestor_path(&old, 2, &dest_path);
        assert_eq!(rewritten, dest_path.to_vec());
    }

    #[test]
    fn test_rewrite_descendant_keeps_suffix() {
        let a = Uuid::new_v4();
        let root = Uuid::new_v4();
        let mid = Uuid::new_v4();
        // Descendant two levels below a subtree root that sat at depth 1.
        let own = [a, root, mid];
        let dest = Uuid::new_v4();
        let rewritten = rewrite_ancestor_path(&own, 1, &[dest]);
        assert_eq!(rewritten, vec![dest, root, mid]);
    }

    #[test]
    fn test_rewrite_to_workspace_root() {
        let a = Uuid::new_v4();
        let root = Uuid::new_v4();
        let own = [a, root];
        let rewritten = rewrite_ancestor_path(&own, 1, &[]);
        assert_eq!(rewritten, vec![root]);
    }
}
