use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, ensure};

use crate::layout::{PlacementConfig, Size};

pub const DEFAULT_SHOW_DELAY_MS: u64 = 300;
pub const DEFAULT_NESTED_SHOW_DELAY_MS: u64 = 500;
pub const DEFAULT_HIDE_DELAY_MS: u64 = 300;
pub const DEFAULT_STABLE_GRACE_MS: u64 = 200;
pub const DEFAULT_VIEWPORT_MARGIN: f64 = 10.0;
pub const DEFAULT_ANCHOR_GAP: f64 = 10.0;
pub const DEFAULT_POPUP_WIDTH: f64 = 500.0;
pub const DEFAULT_POPUP_HEIGHT: f64 = 400.0;
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_PAGE_EXTENSION: &str = ".html";

/// Show/hide delays driving the popup lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewTiming {
    pub show_delay: Duration,
    /// Links inside another popup wait longer so a pointer passing over them
    /// does not open a cascade.
    pub nested_show_delay: Duration,
    pub hide_delay: Duration,
    pub stable_grace: Duration,
}

impl Default for PreviewTiming {
    fn default() -> Self {
        Self {
            show_delay: Duration::from_millis(DEFAULT_SHOW_DELAY_MS),
            nested_show_delay: Duration::from_millis(DEFAULT_NESTED_SHOW_DELAY_MS),
            hide_delay: Duration::from_millis(DEFAULT_HIDE_DELAY_MS),
            stable_grace: Duration::from_millis(DEFAULT_STABLE_GRACE_MS),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Top-level folders of the exported wiki, matched case-insensitively.
    pub content_folders: Vec<String>,
    /// Overrides the deployment sub-path detected from the page URL.
    pub base_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewSettings {
    pub timing: PreviewTiming,
    pub placement: PlacementConfig,
    pub popup_size: Size,
    pub fetch_timeout_ms: u64,
    pub page_extension: String,
    pub resolver: ResolverConfig,
    pub session_file: Option<PathBuf>,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            timing: PreviewTiming::default(),
            placement: PlacementConfig {
                margin: DEFAULT_VIEWPORT_MARGIN,
                gap: DEFAULT_ANCHOR_GAP,
            },
            popup_size: Size {
                width: DEFAULT_POPUP_WIDTH,
                height: DEFAULT_POPUP_HEIGHT,
            },
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            page_extension: DEFAULT_PAGE_EXTENSION.to_owned(),
            resolver: ResolverConfig::default(),
            session_file: None,
        }
    }
}

impl PreviewSettings {
    pub fn from_env() -> Result<Self> {
        // Load .env if present, but do not fail if file does not exist.
        let _ = dotenvy::dotenv();

        let show_delay_ms = parse_u64_env("PREVIEW_SHOW_DELAY_MS", DEFAULT_SHOW_DELAY_MS)?;
        let nested_show_delay_ms =
            parse_u64_env("PREVIEW_NESTED_SHOW_DELAY_MS", DEFAULT_NESTED_SHOW_DELAY_MS)?;
        ensure!(
            nested_show_delay_ms >= show_delay_ms,
            "PREVIEW_NESTED_SHOW_DELAY_MS must not be shorter than PREVIEW_SHOW_DELAY_MS"
        );
        let hide_delay_ms = parse_u64_env("PREVIEW_HIDE_DELAY_MS", DEFAULT_HIDE_DELAY_MS)?;
        let stable_grace_ms = parse_u64_env("PREVIEW_STABLE_GRACE_MS", DEFAULT_STABLE_GRACE_MS)?;

        let margin = parse_f64_env("PREVIEW_VIEWPORT_MARGIN", DEFAULT_VIEWPORT_MARGIN)?;
        ensure!(margin >= 0.0, "PREVIEW_VIEWPORT_MARGIN cannot be negative");
        let gap = parse_f64_env("PREVIEW_ANCHOR_GAP", DEFAULT_ANCHOR_GAP)?;
        ensure!(gap >= 0.0, "PREVIEW_ANCHOR_GAP cannot be negative");

        let width = parse_f64_env("PREVIEW_POPUP_WIDTH", DEFAULT_POPUP_WIDTH)?;
        let height = parse_f64_env("PREVIEW_POPUP_HEIGHT", DEFAULT_POPUP_HEIGHT)?;
        ensure!(
            width > 0.0 && height > 0.0,
            "PREVIEW_POPUP_WIDTH and PREVIEW_POPUP_HEIGHT must be greater than 0"
        );

        let fetch_timeout_ms = parse_u64_env("PREVIEW_FETCH_TIMEOUT_MS", DEFAULT_FETCH_TIMEOUT_MS)?;
        ensure!(
            fetch_timeout_ms > 0,
            "PREVIEW_FETCH_TIMEOUT_MS must be greater than 0"
        );

        let page_extension = read_optional_env("PREVIEW_PAGE_EXTENSION")
            .unwrap_or_else(|| DEFAULT_PAGE_EXTENSION.to_owned());
        ensure!(
            page_extension.starts_with('.') && page_extension.len() > 1,
            "PREVIEW_PAGE_EXTENSION must look like `.html`"
        );

        let content_folders = read_optional_env("PREVIEW_CONTENT_FOLDERS")
            .map(|raw| parse_csv_list(&raw))
            .unwrap_or_default();
        let base_path = read_optional_env("PREVIEW_BASE_PATH");
        let session_file = read_optional_env("PREVIEW_SESSION_FILE").map(PathBuf::from);

        Ok(Self {
            timing: PreviewTiming {
                show_delay: Duration::from_millis(show_delay_ms),
                nested_show_delay: Duration::from_millis(nested_show_delay_ms),
                hide_delay: Duration::from_millis(hide_delay_ms),
                stable_grace: Duration::from_millis(stable_grace_ms),
            },
            placement: PlacementConfig { margin, gap },
            popup_size: Size { width, height },
            fetch_timeout_ms,
            page_extension,
            resolver: ResolverConfig {
                content_folders,
                base_path,
            },
            session_file,
        })
    }
}

fn read_optional_env(name: &str) -> Option<String> {
    env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    })
}

fn parse_u64_env(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("failed to parse {name} as u64")),
        Err(_) => Ok(default),
    }
}

fn parse_f64_env(name: &str, default: f64) -> Result<f64> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw
                .trim()
                .parse::<f64>()
                .with_context(|| format!("failed to parse {name} as a number"))?;
            ensure!(value.is_finite(), "{name} must be a finite number");
            Ok(value)
        }
        Err(_) => Ok(default),
    }
}

fn parse_csv_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_owned)
        .collect()
}
