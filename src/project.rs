// ABOUTME: Project resolution: matches the configured project ID against the
// server's folder list and auto-detects the relative path from the working directory

use crate::protocol::FolderConfig;

/// Looks up a project by ID. A miss is deliberately not an error: the
/// request is still sent and the server rejects unknown IDs itself.
pub fn find_project<'a>(folders: &'a [FolderConfig], project_id: &str) -> Option<&'a FolderConfig> {
    folders.iter().find(|f| f.id == project_id)
}

/// Derives the relative path into the project from the current working
/// directory. `fragment` is the project's relative-path component as
/// stored on the server; it must occur exactly once in `cwd`, at a path
/// segment boundary. Returns `None` when no unambiguous match exists,
/// which leaves the build at the project root.
pub fn detect_relative_path(cwd: &str, fragment: &str) -> Option<String> {
    if fragment.is_empty() {
        return None;
    }
    let needle = format!("/{fragment}");
    let mut matches = cwd.match_indices(&needle);
    let (pos, _) = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    let rest = &cwd[pos + needle.len()..];
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    Some(rest.trim_matches('/').to_string())
}

/// Error text for a missing project ID, listing the IDs the server knows
/// about so the user can pick one.
pub fn missing_id_message(folders: &[FolderConfig]) -> String {
    let mut msg = String::from("XDS_PROJECT_ID environment variable must be set !\n");
    if !folders.is_empty() {
        msg.push_str("\nList of existing projects:\n");
        for folder in folders {
            msg.push_str(&format!("  {}\n", folder.id));
        }
    }
    msg
}
