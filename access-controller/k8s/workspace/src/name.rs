/// Workspace names are DNS labels.
const MAX_NAME_LEN: usize = 63;

/// Derives the workspace name for a project.
///
/// The mapping is deterministic so that repeated creation attempts for the
/// same project always address the same workspace.
pub fn workspace_name(project: &str) -> String {
    let name = project
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect::<String>();

    let mut name = name.trim_matches('-').to_string();
    name.truncate(MAX_NAME_LEN);
    name.trim_end_matches('-').to_string()
}
