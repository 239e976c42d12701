// Locator classification.
//
// A user-supplied string is a local path, a remote object id (bare or inside a
// share link), or something for the external download agent. The resolver
// never guesses a default folder: anything it cannot classify is Unparseable.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::drive_error::DriveError;
use super::drive_models::ExternalSource;

const DEFAULT_REMOTE_HOSTS: [&str; 3] = [
    "drive.google.com",
    "docs.google.com",
    "drive.usercontent.google.com",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    RemoteId(String),
    Local(PathBuf),
    External(ExternalSource),
    Unparseable(String),
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?:https?|ftp)://([^/?#:@]+)(?::\d+)?([^\s]*)$").unwrap())
}

fn id_param_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[?&]id=([A-Za-z0-9_-]+)").unwrap())
}

fn path_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(?:file/)?d/([A-Za-z0-9_-]+)").unwrap())
}

fn folders_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/folders/([A-Za-z0-9_-]+)").unwrap())
}

fn view_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/([A-Za-z0-9_-]+)/view").unwrap())
}

/// True for strings shaped like a remote object id: only `[A-Za-z0-9_-]`, and at
/// least one digit, hyphen or underscore so plain words are not mistaken for ids.
pub fn looks_like_id(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && candidate
            .chars()
            .any(|c| c.is_ascii_digit() || c == '-' || c == '_')
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    remote_hosts: Vec<String>,
    base_dir: Option<PathBuf>,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PathResolver {
    pub fn new() -> Self {
        Self {
            remote_hosts: DEFAULT_REMOTE_HOSTS.iter().map(|h| h.to_string()).collect(),
            base_dir: None,
        }
    }

    /// Replace the hosts whose links carry remote object ids.
    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remote_hosts = hosts
            .into_iter()
            .map(|h| h.into().to_ascii_lowercase())
            .collect();
        self
    }

    /// Resolve relative local paths against `dir` instead of the working directory.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn resolve(&self, raw: &str) -> Locator {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Locator::Unparseable(raw.to_string());
        }

        // An existing path is authoritative, even when it also looks like an id.
        if let Some(path) = self.existing_path(trimmed) {
            let is_torrent = path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("torrent"));
            return if is_torrent {
                Locator::External(ExternalSource::TorrentFile(path))
            } else {
                Locator::Local(path)
            };
        }

        if let Some(caps) = url_regex().captures(trimmed) {
            let host = caps[1].to_ascii_lowercase();
            if self.is_remote_host(&host) {
                return match extract_remote_id(&caps[2]) {
                    Some(id) => Locator::RemoteId(id),
                    None => Locator::Unparseable(raw.to_string()),
                };
            }
            return Locator::External(ExternalSource::Uri(trimmed.to_string()));
        }

        if looks_like_id(trimmed) {
            return Locator::RemoteId(trimmed.to_string());
        }

        if trimmed.to_ascii_lowercase().starts_with("magnet:?") {
            return Locator::External(ExternalSource::Uri(trimmed.to_string()));
        }

        Locator::Unparseable(raw.to_string())
    }

    /// Validate a folder locator and return the folder id.
    ///
    /// File links (`uc?id=`) are rejected, as is anything that is neither a
    /// folder link nor a bare id.
    pub fn resolve_container(&self, raw: &str) -> Result<String, DriveError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DriveError::InvalidInput("empty folder locator".to_string()));
        }
        if trimmed.contains("uc?id=") {
            return Err(DriveError::InvalidInput(format!(
                "`{}` is a file link, not a folder",
                trimmed
            )));
        }

        if let Some(caps) = url_regex().captures(trimmed) {
            let rest = &caps[2];
            let by_pattern = folders_regex()
                .captures(rest)
                .or_else(|| {
                    (rest.contains("open?") || rest.contains("folderview?"))
                        .then(|| id_param_regex().captures(rest))
                        .flatten()
                })
                .or_else(|| view_regex().captures(rest));
            return by_pattern
                .map(|c| c[1].to_string())
                .ok_or_else(|| DriveError::InvalidInput(format!("`{}` is not a folder link", trimmed)));
        }

        if looks_like_id(trimmed) {
            return Ok(trimmed.to_string());
        }
        Err(DriveError::InvalidInput(format!(
            "`{}` is not a folder link or id",
            trimmed
        )))
    }

    fn existing_path(&self, raw: &str) -> Option<PathBuf> {
        let candidate = Path::new(raw);
        let path = match &self.base_dir {
            Some(base) if candidate.is_relative() => base.join(candidate),
            _ => candidate.to_path_buf(),
        };
        path.exists().then_some(path)
    }

    fn is_remote_host(&self, host: &str) -> bool {
        self.remote_hosts.iter().any(|h| h == host)
    }
}

fn extract_remote_id(path_and_query: &str) -> Option<String> {
    [path_id_regex(), folders_regex(), id_param_regex()]
        .iter()
        .find_map(|re| re.captures(path_and_query))
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PathResolver {
        PathResolver::new().with_hosts(["drive.example.com"])
    }

    #[test]
    fn extracts_id_from_uc_link() {
        assert_eq!(
            resolver().resolve("https://drive.example.com/uc?id=ABC123"),
            Locator::RemoteId("ABC123".to_string())
        );
        assert_eq!(
            resolver().resolve("https://drive.example.com/uc?id=ABC123&export=download"),
            Locator::RemoteId("ABC123".to_string())
        );
    }

    #[test]
    fn extracts_id_from_file_view_link() {
        assert_eq!(
            resolver().resolve("https://drive.example.com/file/d/XYZ/view"),
            Locator::RemoteId("XYZ".to_string())
        );
        assert_eq!(
            resolver().resolve("https://drive.example.com/file/d/XYZ/view?usp=sharing"),
            Locator::RemoteId("XYZ".to_string())
        );
    }

    #[test]
    fn extracts_id_from_folder_and_open_links() {
        let r = resolver();
        assert_eq!(
            r.resolve("https://drive.example.com/drive/folders/F0LD-3R?usp=sharing"),
            Locator::RemoteId("F0LD-3R".to_string())
        );
        assert_eq!(
            r.resolve("https://drive.example.com/open?id=open_1"),
            Locator::RemoteId("open_1".to_string())
        );
        assert_eq!(
            r.resolve("https://drive.example.com/folderview?id=fv9"),
            Locator::RemoteId("fv9".to_string())
        );
    }

    #[test]
    fn existing_local_path_wins_over_id_heuristic() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("1AbC_dEf-23")).unwrap();
        let r = resolver().with_base_dir(tmp.path());

        assert_eq!(
            r.resolve("1AbC_dEf-23"),
            Locator::Local(tmp.path().join("1AbC_dEf-23"))
        );
        // Same shape but nothing on disk: treated as an id.
        assert_eq!(
            r.resolve("9ZyX_wVu-87"),
            Locator::RemoteId("9ZyX_wVu-87".to_string())
        );
    }

    #[test]
    fn torrent_files_go_to_the_agent() {
        let tmp = tempfile::tempdir().unwrap();
        let torrent = tmp.path().join("linux.torrent");
        std::fs::write(&torrent, b"d4:infoe").unwrap();

        assert_eq!(
            resolver().resolve(torrent.to_str().unwrap()),
            Locator::External(ExternalSource::TorrentFile(torrent))
        );
    }

    #[test]
    fn other_urls_and_magnets_are_external() {
        let r = resolver();
        assert_eq!(
            r.resolve("https://mirror.example.org/iso/disk.iso"),
            Locator::External(ExternalSource::Uri(
                "https://mirror.example.org/iso/disk.iso".to_string()
            ))
        );
        assert!(matches!(
            r.resolve("magnet:?xt=urn:btih:abcdef"),
            Locator::External(ExternalSource::Uri(_))
        ));
    }

    #[test]
    fn remote_host_without_id_is_unparseable() {
        assert!(matches!(
            resolver().resolve("https://drive.example.com/drive/my-drive"),
            Locator::Unparseable(_)
        ));
    }

    #[test]
    fn plain_words_are_unparseable() {
        assert!(matches!(resolver().resolve("hello"), Locator::Unparseable(_)));
        assert!(matches!(resolver().resolve("   "), Locator::Unparseable(_)));
        assert!(matches!(resolver().resolve("not an id!"), Locator::Unparseable(_)));
    }

    #[test]
    fn default_hosts_resolve_google_links() {
        assert_eq!(
            PathResolver::new().resolve("https://drive.google.com/file/d/1a2B3c/view"),
            Locator::RemoteId("1a2B3c".to_string())
        );
    }

    #[test]
    fn container_locators() {
        let r = resolver();
        assert_eq!(
            r.resolve_container("https://drive.example.com/drive/folders/abc123").unwrap(),
            "abc123"
        );
        assert_eq!(
            r.resolve_container("https://drive.example.com/open?id=abc_1").unwrap(),
            "abc_1"
        );
        assert_eq!(
            r.resolve_container("https://drive.example.com/file/d/abc-9/view").unwrap(),
            "abc-9"
        );
        assert_eq!(r.resolve_container("0AbCdEf12").unwrap(), "0AbCdEf12");
    }

    #[test]
    fn container_rejects_file_links_and_junk() {
        let r = resolver();
        assert!(matches!(
            r.resolve_container("https://drive.example.com/uc?id=abc123"),
            Err(DriveError::InvalidInput(_))
        ));
        assert!(r.resolve_container("folder name").is_err());
        assert!(r.resolve_container("").is_err());
    }
}
