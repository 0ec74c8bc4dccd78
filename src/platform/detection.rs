//! Remote URL parsing

use crate::error::{Error, Result};
use crate::types::{GitRemote, PlatformConfig};
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

/// `git@host:owner/repo(.git)`
static SCP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[\w.-]+@)?([\w.-]+):([\w.-]+)/([\w.-]+?)(?:\.git)?/?$")
        .expect("scp regex is valid")
});

/// Extract owner and repo from a remote URL.
///
/// Accepts `https://host/owner/repo(.git)`, `ssh://git@host/owner/repo(.git)`
/// and the scp-like `git@host:owner/repo(.git)`. `host` restricts matching to
/// one GitHub Enterprise host; `None` means github.com.
pub fn parse_repo_info(remote_url: &str, host: Option<&str>) -> Option<PlatformConfig> {
    let expected_host = host.unwrap_or("github.com");

    let (found_host, owner, repo) = if let Ok(url) = Url::parse(remote_url)
        && url.has_host()
    {
        let found_host = url.host_str()?.to_string();
        let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
        let owner = segments.next()?.to_string();
        let repo = segments.next()?.to_string();
        if segments.next().is_some() {
            return None;
        }
        (found_host, owner, repo)
    } else {
        let caps = SCP_RE.captures(remote_url)?;
        (caps[1].to_string(), caps[2].to_string(), caps[3].to_string())
    };

    if !found_host.eq_ignore_ascii_case(expected_host) {
        return None;
    }

    let repo = repo.strip_suffix(".git").unwrap_or(&repo).to_string();
    Some(PlatformConfig {
        owner,
        repo,
        host: host.map(ToString::to_string),
    })
}

/// Pick the configured remote and derive repository coordinates from it
pub fn detect_platform(
    remotes: &[GitRemote],
    remote_name: &str,
    host: Option<&str>,
) -> Result<PlatformConfig> {
    let remote = remotes
        .iter()
        .find(|r| r.name == remote_name)
        .ok_or_else(|| Error::RemoteNotFound(remote_name.to_string()))?;
    parse_repo_info(&remote.url, host).ok_or(Error::NoSupportedRemotes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_url() {
        let config = parse_repo_info("https://github.com/owner/repo.git", None).unwrap();
        assert_eq!(config.owner, "owner");
        assert_eq!(config.repo, "repo");
        assert_eq!(config.host, None);
    }

    #[test]
    fn test_scp_url() {
        let config = parse_repo_info("git@github.com:owner/my.repo.git", None).unwrap();
        assert_eq!(config.owner, "owner");
        assert_eq!(config.repo, "my.repo");
    }

    #[test]
    fn test_ssh_url() {
        let config = parse_repo_info("ssh://git@github.com/owner/repo", None).unwrap();
        assert_eq!(config.repo, "repo");
    }

    #[test]
    fn test_enterprise_host_must_match() {
        assert!(parse_repo_info("https://github.com/owner/repo", Some("ghe.corp.com")).is_none());
        let config =
            parse_repo_info("git@ghe.corp.com:team/repo.git", Some("ghe.corp.com")).unwrap();
        assert_eq!(config.host.as_deref(), Some("ghe.corp.com"));
    }

    #[test]
    fn test_non_github_rejected() {
        assert!(parse_repo_info("https://gitlab.com/owner/repo.git", None).is_none());
        assert!(parse_repo_info("/local/path/repo", None).is_none());
    }

    #[test]
    fn test_detect_platform_missing_remote() {
        let remotes = vec![GitRemote {
            name: "origin".to_string(),
            url: "https://github.com/o/r".to_string(),
        }];
        assert!(matches!(
            detect_platform(&remotes, "upstream", None),
            Err(Error::RemoteNotFound(_))
        ));
        assert_eq!(detect_platform(&remotes, "origin", None).unwrap().repo, "r");
    }
}
