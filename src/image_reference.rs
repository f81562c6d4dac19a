static LATEST_TAG: &str = "latest";

/// Tag component of an image reference: everything after the last `:`.
///
/// No attempt is made to tell a registry port or a digest apart from a tag,
/// so `registry:5000/app` yields `5000/app` and `app@sha256:abc` yields `abc`.
pub fn tag(image: &str) -> Option<&str> {
    image.rfind(':').map(|pos| &image[pos + 1..])
}

/// An image is unpinned when it carries no tag at all (implicit `latest`)
/// or is explicitly tagged `latest`.
pub fn is_unpinned(image: &str) -> bool {
    match tag(image) {
        None => true,
        Some(tag) => tag == LATEST_TAG,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_is_unpinned() {
        assert!(is_unpinned("nginx"));
        assert!(is_unpinned("registry.io/app"));
        assert!(is_unpinned("registry.io/team/app"));
    }

    #[test]
    fn test_latest_is_unpinned() {
        assert!(is_unpinned("nginx:latest"));
        assert!(is_unpinned("registry.io/app:latest"));
    }

    #[test]
    fn test_explicit_tag_is_pinned() {
        assert!(!is_unpinned("nginx:1.21"));
        assert!(!is_unpinned("registry.io/app:v2.0.0"));
        assert!(!is_unpinned("app:latest-alpine"));
        assert!(!is_unpinned("app:Latest"));
    }

    #[test]
    fn test_latest_in_repository_name_is_not_a_tag() {
        assert!(!is_unpinned("latest/app:1.0"));
        assert!(is_unpinned("registry.io/latest-builds/app"));
    }

    #[test]
    fn test_digest_reference_is_pinned() {
        assert!(!is_unpinned(
            "registry.io/app@sha256:0b1f3e6f2c7a1d4e5b9a8c7d6e5f4a3b2c1d0e9f8a7b6c5d4e3f2a1b0c9d8e7f"
        ));
    }

    #[test]
    fn test_registry_port_without_tag() {
        assert_eq!(tag("registry:5000/app"), Some("5000/app"));
        assert!(!is_unpinned("registry:5000/app"));
        assert!(is_unpinned("registry:5000/app:latest"));
    }

    #[test]
    fn test_tag() {
        assert_eq!(tag("nginx"), None);
        assert_eq!(tag("nginx:1.21"), Some("1.21"));
        assert_eq!(tag("nginx:"), Some(""));
    }
}
