use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_path(prefix: &str) -> PathBuf {
    let now_ns = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "wikipeek_{prefix}_{}_{}",
        std::process::id(),
        now_ns
    ))
}

pub fn remove_dir_if_exists(path: &Path) {
    let _ = std::fs::remove_dir_all(path);
}

/// Keeps a spawned `wikipeek` quiet and its file log inside `log_dir`.
pub fn apply_quiet_test_env(command: &mut Command, log_dir: &Path) {
    command.env("RUST_LOG", "error");
    command.env("WIKIPEEK_FILE_LOG", "error");
    command.env("WIKIPEEK_LOG_DIR", log_dir.as_os_str());
    command.env_remove("PREVIEW_BASE_PATH");
    command.env_remove("PREVIEW_CONTENT_FOLDERS");
    command.env_remove("PREVIEW_SESSION_FILE");
}

pub const FIXTURE_INDEX: &str = r#"<!doctype html>
<html><head><title>Repo Home</title></head>
<body><div class="markdown-preview-sizer">
<p>Read about <a class="internal-link" href="rules/monsters">Monsters</a>.</p>
<p>Or check [[Attack Power]] first.</p>
<p>Nothing at <a class="internal-link" href="missing">Missing</a>.</p>
</div></body></html>
"#;

pub const FIXTURE_MONSTERS: &str = r#"<!doctype html>
<html><head><title>Monsters</title><script>alert("x")</script></head>
<body><nav>menu</nav><div class="markdown-preview-sizer">
<h1>Monsters</h1>
<p onclick="steal()">Ogres hit hard. See <a class="internal-link" data-href="Attack Power">Attack Power</a>.</p>
<script>document.cookie</script>
</div></body></html>
"#;

pub const FIXTURE_ATTACK_POWER: &str = r#"<!doctype html>
<html><head><title>Attack Power</title></head>
<body><main><p>Attack power grows 7% per accuracy point.</p></main></body></html>
"#;

/// Writes a three-page wiki exported under the `Repo` sub-path.
pub fn write_fixture_site(root: &Path) -> io::Result<()> {
    let repo = root.join("Repo");
    fs::create_dir_all(repo.join("rules"))?;
    fs::write(repo.join("index.html"), FIXTURE_INDEX)?;
    fs::write(repo.join("rules").join("monsters.html"), FIXTURE_MONSTERS)?;
    fs::write(repo.join("attack-power.html"), FIXTURE_ATTACK_POWER)?;
    Ok(())
}
