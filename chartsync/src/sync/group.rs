use std::collections::HashMap;
use std::path::Path;

use super::paths::group_dir;
use super::reconcile::ResolvedEntry;

pub const ROOT_GROUP_NAME: &str = "(root)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    New,
    Update,
}

impl GroupStatus {
    pub fn label(self) -> &'static str {
        match self {
            GroupStatus::New => "NEW",
            GroupStatus::Update => "UPDATE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadGroup {
    pub group_key: String,
    pub display_name: String,
    pub status: GroupStatus,
    pub files: Vec<ResolvedEntry>,
}

impl DownloadGroup {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|file| file.entry.size).sum()
    }
}

pub fn group_entries(pending: Vec<ResolvedEntry>, local_root: &Path) -> Vec<DownloadGroup> {
    let mut groups: Vec<DownloadGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for resolved in pending {
        let key = resolved.entry.relative_path.clone();
        match index.get(&key) {
            Some(&slot) => groups[slot].files.push(resolved),
            None => {
                let exists = group_dir(local_root, &key)
                    .map(|dir| dir.is_dir())
                    .unwrap_or(false);
                index.insert(key.clone(), groups.len());
                groups.push(DownloadGroup {
                    display_name: display_name(&key),
                    status: if exists {
                        GroupStatus::Update
                    } else {
                        GroupStatus::New
                    },
                    group_key: key,
                    files: vec![resolved],
                });
            }
        }
    }
    groups
}

pub fn flatten_selection(groups: &[DownloadGroup]) -> Vec<ResolvedEntry> {
    groups
        .iter()
        .flat_map(|group| group.files.iter().cloned())
        .collect()
}

fn display_name(group_key: &str) -> String {
    match group_key.rsplit('/').next() {
        Some(last) if !last.is_empty() => last.to_string(),
        _ if group_key.is_empty() => ROOT_GROUP_NAME.to_string(),
        _ => group_key.to_string(),
    }
}
