/// Split an absolute path into its non-empty segments.
pub fn path_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a path into its parent directory and final entry name.
///
/// Returns an empty parent for a path with a single segment.
pub fn split_parent(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => (trimmed[..idx].to_string(), trimmed[idx + 1..].to_string()),
        None => (String::new(), trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_ignore_empty_components() {
        assert_eq!(
            path_segments("/realtimeviewer/model/collab.realtime"),
            vec!["realtimeviewer", "model", "collab.realtime"]
        );
        assert_eq!(path_segments("//a//b/"), vec!["a", "b"]);
        assert!(path_segments("/").is_empty());
        assert!(path_segments("").is_empty());
    }

    #[test]
    fn split_parent_handles_single_segment() {
        assert_eq!(
            split_parent("/realtimeviewer/data/file.nii"),
            ("/realtimeviewer/data".to_string(), "file.nii".to_string())
        );
        assert_eq!(split_parent("file.nii"), (String::new(), "file.nii".to_string()));
    }
}
