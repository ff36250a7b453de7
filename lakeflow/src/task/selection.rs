//! Enabled-subtask resolution and subtask classification.

use std::collections::HashSet;

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};

use crate::models::{SubtaskDescriptor, SyncPolicy};
use crate::plugin::SubtaskMeta;

/// Names of the subtasks that will run, in catalog order.
///
/// 1. start from each entry's default
/// 2. a non-empty `requested` list is authoritative; an unknown name fails
/// 3. `skip_collectors` disables names containing "collect" (case-insensitive)
/// 4. required entries are always enabled
pub fn resolve_enabled_subtasks(
    plugin: &str,
    metas: &[SubtaskMeta],
    requested: &[String],
    policy: &SyncPolicy,
) -> LakeflowResult<Vec<String>> {
    if let Some(unknown) = requested
        .iter()
        .find(|name| !metas.iter().any(|m| &m.name == *name))
    {
        return Err(LakeflowError::UnknownSubtask {
            plugin: plugin.to_string(),
            subtask: unknown.clone(),
        });
    }
    let requested: HashSet<&str> = requested.iter().map(String::as_str).collect();

    Ok(metas
        .iter()
        .filter(|meta| {
            let mut enabled = if requested.is_empty() {
                meta.enabled_by_default
            } else {
                requested.contains(meta.name.as_str())
            };
            if policy.skip_collectors && contains_ignore_case(&meta.name, "collect") {
                enabled = false;
            }
            enabled || meta.required
        })
        .map(|meta| meta.name.clone())
        .collect())
}

/// Collectors pull raw data from the remote tool.
pub fn is_collector(name: &str) -> bool {
    contains_ignore_case(name, "collect") || contains_ignore_case(name, "clone git repo")
}

/// One descriptor per catalog entry, numbered from 1 within its kind.
pub fn subtask_descriptors(metas: &[SubtaskMeta]) -> Vec<SubtaskDescriptor> {
    let mut collectors = 0;
    let mut others = 0;
    metas
        .iter()
        .map(|meta| {
            let is_collector = is_collector(&meta.name);
            let counter = if is_collector {
                &mut collectors
            } else {
                &mut others
            };
            *counter += 1;
            SubtaskDescriptor {
                name: meta.name.clone(),
                number: *counter,
                is_collector,
            }
        })
        .collect()
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> SubtaskMeta {
        SubtaskMeta::new(name, |_ctx| async { Ok(()) })
    }

    fn catalog() -> Vec<SubtaskMeta> {
        vec![
            meta("collectIssues"),
            meta("extractIssues"),
            meta("convertIssues"),
            meta("collectChangelogs").disabled_by_default(),
            meta("enrichIssues").disabled_by_default().required(),
        ]
    }

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let enabled =
            resolve_enabled_subtasks("jira", &catalog(), &[], &SyncPolicy::default()).unwrap();
        assert_eq!(
            enabled,
            names(&["collectIssues", "extractIssues", "convertIssues", "enrichIssues"])
        );
    }

    #[test]
    fn test_explicit_list_is_authoritative() {
        let enabled = resolve_enabled_subtasks(
            "jira",
            &catalog(),
            &names(&["collectChangelogs", "convertIssues"]),
            &SyncPolicy::default(),
        )
        .unwrap();
        assert_eq!(
            enabled,
            names(&["convertIssues", "collectChangelogs", "enrichIssues"])
        );
    }

    #[test]
    fn test_unknown_subtask_fails() {
        let err = resolve_enabled_subtasks(
            "jira",
            &catalog(),
            &names(&["collectSprints"]),
            &SyncPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LakeflowError::UnknownSubtask { ref plugin, ref subtask }
                if plugin == "jira" && subtask == "collectSprints"
        ));
    }

    #[test]
    fn test_skip_collectors() {
        let metas = vec![meta("collectIssues"), meta("convertIssues")];
        let policy = SyncPolicy {
            skip_collectors: true,
            ..Default::default()
        };
        let enabled = resolve_enabled_subtasks("jira", &metas, &[], &policy).unwrap();
        assert_eq!(enabled, names(&["convertIssues"]));
    }

    #[test]
    fn test_required_overrides_skip_collectors_and_selection() {
        let metas = vec![
            meta("CollectAccounts").required(),
            meta("collectIssues"),
            meta("convertIssues"),
        ];
        let policy = SyncPolicy {
            skip_collectors: true,
            ..Default::default()
        };
        let enabled =
            resolve_enabled_subtasks("jira", &metas, &names(&["convertIssues"]), &policy).unwrap();
        assert_eq!(enabled, names(&["CollectAccounts", "convertIssues"]));
    }

    #[test]
    fn test_descriptors_numbered_per_kind() {
        let metas = vec![
            meta("Clone Git Repo"),
            meta("extractCommits"),
            meta("collectMrs"),
            meta("convertCommits"),
        ];
        let descriptors = subtask_descriptors(&metas);
        let summary: Vec<_> = descriptors
            .iter()
            .map(|d| (d.name.as_str(), d.number, d.is_collector))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Clone Git Repo", 1, true),
                ("extractCommits", 1, false),
                ("collectMrs", 2, true),
                ("convertCommits", 2, false),
            ]
        );
    }
}
