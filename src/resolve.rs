//! Turns link targets into absolute URLs for a site served from a sub-path.

use reqwest::Url;
use tracing::{debug, warn};

use crate::config::ResolverConfig;
use crate::links::has_scheme;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlResolver {
    page: Url,
    /// Deployment sub-path, either empty or `/segment` without a trailing slash.
    base_path: String,
    content_folders: Vec<String>,
}

impl UrlResolver {
    pub fn new(page: Url, config: &ResolverConfig) -> Self {
        let base_path = match config.base_path.as_deref() {
            Some(configured) => normalize_base_path(configured),
            None => detect_base_path(&page),
        };
        Self {
            page,
            base_path,
            content_folders: config
                .content_folders
                .iter()
                .map(|folder| folder.trim_matches('/').to_ascii_lowercase())
                .filter(|folder| !folder.is_empty())
                .collect(),
        }
    }

    pub fn page(&self) -> &Url {
        &self.page
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn resolve(&self, raw_target: &str) -> Url {
        let target = raw_target.trim();

        if has_scheme(target)
            && let Ok(absolute) = Url::parse(target)
        {
            return absolute;
        }

        let joined = if target.starts_with("//") {
            self.page.join(target)
        } else if target.starts_with('/') {
            self.page.join(&self.under_base(target.trim_start_matches('/')))
        } else if self.looks_like_content_path(target) {
            self.page.join(&self.under_base(target))
        } else {
            self.page.join(target)
        };

        match joined {
            Ok(url) => {
                debug!(target = %target, resolved = %url, "resolved link target");
                url
            }
            Err(error) => {
                warn!(target = %target, error = %error, "link target did not resolve; using page url");
                self.page.clone()
            }
        }
    }

    /// `/base/relative`, without doubling the base when the target already
    /// starts with it.
    fn under_base(&self, relative: &str) -> String {
        let base_segment = self.base_path.trim_start_matches('/');
        if !base_segment.is_empty()
            && let Some(rest) = relative.strip_prefix(base_segment)
            && (rest.is_empty() || rest.starts_with('/'))
        {
            return format!("/{relative}");
        }
        format!("{}/{relative}", self.base_path)
    }

    fn looks_like_content_path(&self, target: &str) -> bool {
        if !target.contains('/') || target.starts_with("./") || target.starts_with("../") {
            return false;
        }

        let segments: Vec<&str> = target.split('/').filter(|part| !part.is_empty()).collect();
        let Some(first) = segments.first() else {
            return false;
        };
        let first_lower = first.to_ascii_lowercase();

        if self.content_folders.iter().any(|folder| *folder == first_lower) {
            return true;
        }
        if segments.iter().any(|segment| segment.starts_with('-')) {
            return true;
        }
        page_directories(&self.page)
            .iter()
            .any(|directory| directory == first)
    }
}

fn normalize_base_path(configured: &str) -> String {
    let trimmed = configured.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// First path segment of the page URL, when the page does not sit at the
/// site root.
fn detect_base_path(page: &Url) -> String {
    let directories = page_directories(page);
    match directories.first() {
        Some(first) => format!("/{first}"),
        None => String::new(),
    }
}

/// Directory segments of the page path, i.e. everything except the file name.
fn page_directories(page: &Url) -> Vec<String> {
    let Some(segments) = page.path_segments() else {
        return Vec::new();
    };
    let segments: Vec<&str> = segments.collect();
    let directory_count = segments.len().saturating_sub(1);
    segments[..directory_count]
        .iter()
        .filter(|segment| !segment.is_empty())
        .map(|segment| (*segment).to_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use reqwest::Url;

    use crate::config::ResolverConfig;
    use crate::fetch::with_page_extension;

    use super::UrlResolver;

    fn resolver_for(page: &str, folders: &[&str]) -> UrlResolver {
        UrlResolver::new(
            Url::parse(page).expect("page url should parse"),
            &ResolverConfig {
                content_folders: folders.iter().map(|folder| (*folder).to_owned()).collect(),
                base_path: None,
            },
        )
    }

    #[test]
    fn bare_name_resolves_next_to_current_page() {
        let resolver = resolver_for("https://site.io/Repo/rules/page.html", &[]);
        let resolved = resolver.resolve("monsters");
        assert_eq!(resolved.as_str(), "https://site.io/Repo/rules/monsters");
        assert_eq!(
            with_page_extension(&resolved, ".html").as_str(),
            "https://site.io/Repo/rules/monsters.html"
        );
    }

    #[test]
    fn absolute_urls_pass_through_unchanged() {
        let resolver = resolver_for("https://site.io/Repo/rules/page.html", &[]);
        assert_eq!(
            resolver.resolve("https://other.example/page.html").as_str(),
            "https://other.example/page.html"
        );
    }

    #[test]
    fn site_root_target_gets_deployment_sub_path() {
        let resolver = resolver_for("https://site.io/Repo/rules/page.html", &[]);
        assert_eq!(resolver.base_path(), "/Repo");
        assert_eq!(
            resolver.resolve("/items/sword").as_str(),
            "https://site.io/Repo/items/sword"
        );
        assert_eq!(
            resolver.resolve("/Repo/items/sword").as_str(),
            "https://site.io/Repo/items/sword"
        );
    }

    #[test]
    fn content_folder_targets_resolve_from_deployment_root() {
        let resolver = resolver_for("https://site.io/Repo/rules/page.html", &["Monsters"]);
        assert_eq!(
            resolver.resolve("monsters/goblin.html").as_str(),
            "https://site.io/Repo/monsters/goblin.html"
        );
    }

    #[test]
    fn target_sharing_a_page_directory_resolves_from_deployment_root() {
        let resolver = resolver_for("https://site.io/Repo/rules/page.html", &[]);
        assert_eq!(
            resolver.resolve("rules/combat").as_str(),
            "https://site.io/Repo/rules/combat"
        );
    }

    #[test]
    fn hyphen_prefixed_segment_resolves_from_deployment_root() {
        let resolver = resolver_for("https://site.io/Repo/rules/page.html", &[]);
        assert_eq!(
            resolver.resolve("lore/-drafts/dragons").as_str(),
            "https://site.io/Repo/lore/-drafts/dragons"
        );
    }

    #[test]
    fn plain_relative_paths_stay_relative() {
        let resolver = resolver_for("https://site.io/Repo/rules/page.html", &[]);
        assert_eq!(
            resolver.resolve("sub/topic").as_str(),
            "https://site.io/Repo/rules/sub/topic"
        );
        assert_eq!(
            resolver.resolve("../index.html").as_str(),
            "https://site.io/Repo/index.html"
        );
    }

    #[test]
    fn page_at_site_root_has_no_deployment_sub_path() {
        let resolver = resolver_for("https://site.io/page.html", &[]);
        assert_eq!(resolver.base_path(), "");
        assert_eq!(
            resolver.resolve("/items/sword").as_str(),
            "https://site.io/items/sword"
        );
    }

    #[test]
    fn configured_base_path_overrides_detection() {
        let resolver = UrlResolver::new(
            Url::parse("https://site.io/a/b/page.html").expect("page url should parse"),
            &ResolverConfig {
                content_folders: Vec::new(),
                base_path: Some("wiki/".to_owned()),
            },
        );
        assert_eq!(resolver.base_path(), "/wiki");
        assert_eq!(
            resolver.resolve("/start").as_str(),
            "https://site.io/wiki/start"
        );
    }
}
