//! Watch directories and print changes

use crate::settings;
use anyhow::{Context, Result};
use clap::ValueEnum;
use owo_colors::OwoColorize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use watcher::{Backend, ChangeKind, FileChangeEvent, FileWatcher, WatchCenter};

/// `--backend` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Poll,
    Native,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Poll => Backend::Poll,
            BackendArg::Native => Backend::Native,
        }
    }
}

/// Command-line overrides for `dw watch`
pub struct WatchOptions {
    pub dirs: Vec<PathBuf>,
    pub contains: Option<String>,
    pub backend: Option<BackendArg>,
    pub interval_ms: Option<u64>,
    pub json: bool,
}

/// Prints every event it is interested in to stdout
pub struct PrintWatcher {
    contains: Option<String>,
    json: bool,
}

impl PrintWatcher {
    pub fn new(contains: Option<String>, json: bool) -> Self {
        Self { contains, json }
    }

    fn render(&self, event: &FileChangeEvent) -> Result<String> {
        if self.json {
            return Ok(serde_json::to_string(event)?);
        }

        let label = format!("{:<9}", event.kind().as_str());
        let label = match event.kind() {
            ChangeKind::Created => label.green().to_string(),
            ChangeKind::Modified => label.yellow().to_string(),
            ChangeKind::Deleted => label.red().to_string(),
            ChangeKind::OverflowUnknown | ChangeKind::DirectoryRemoved => label.magenta().bold().to_string(),
        };
        let target = if event.kind().is_directory_wide() {
            event.directory().display().to_string()
        } else {
            event.path().display().to_string()
        };
        Ok(format!("{} {}", label, target))
    }
}

impl FileWatcher for PrintWatcher {
    fn interest(&self, file_name: &str) -> bool {
        match &self.contains {
            Some(needle) => file_name.contains(needle.as_str()),
            None => true,
        }
    }

    fn on_change(&self, event: &FileChangeEvent) -> Result<()> {
        println!("{}", self.render(event)?);
        Ok(())
    }
}

/// Drop directories that name the same place as an earlier one
///
/// Paths that cannot be resolved are kept as given so registration reports them.
fn unique_dirs(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    dirs.iter()
        .filter(|dir| seen.insert(dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf())))
        .cloned()
        .collect()
}

pub async fn run(config_path: Option<&Path>, options: WatchOptions) -> Result<()> {
    let (mut config, _) = settings::load(config_path)?;
    if let Some(backend) = options.backend {
        config.backend = backend.into();
    }
    if let Some(interval_ms) = options.interval_ms {
        config.poll_interval_ms = interval_ms;
    }

    let center = WatchCenter::new(config).context("Invalid watch configuration")?;
    let printer: Arc<dyn FileWatcher> = Arc::new(PrintWatcher::new(options.contains, options.json));

    let dirs = unique_dirs(&options.dirs);
    for dir in &dirs {
        center
            .register_watcher(dir, printer.clone())
            .with_context(|| format!("Cannot watch {}", dir.display()))?;
    }

    if !options.json {
        let backend = format!("{:?}", center.config().backend).to_lowercase();
        for dir in center.watched_directories() {
            eprintln!(
                "{} {} {}",
                "Watching".bold(),
                dir.display().to_string().cyan(),
                format!("({})", backend).dimmed()
            );
        }
        eprintln!("{}", "Press Ctrl-C to stop".dimmed());
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    for dir in &dirs {
        center.deregister_watcher(dir, &printer);
    }
    center.shutdown();
    tracing::info!("Stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interest_filter() {
        let all = PrintWatcher::new(None, false);
        assert!(all.interest("anything"));

        let logs = PrintWatcher::new(Some(".log".to_string()), false);
        assert!(logs.interest("server.log"));
        assert!(!logs.interest("server.txt"));
    }

    #[test]
    fn test_same_directory_listed_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let other = tempfile::TempDir::new().unwrap();
        let dirs = vec![
            dir.path().to_path_buf(),
            dir.path().join("."),
            other.path().to_path_buf(),
            dir.path().to_path_buf(),
        ];

        let unique = unique_dirs(&dirs);
        assert_eq!(unique, vec![dir.path().to_path_buf(), other.path().to_path_buf()]);
    }

    #[test]
    fn test_unresolvable_directories_kept() {
        let dirs = vec![PathBuf::from("/no/such/dir"), PathBuf::from("/no/such/dir")];
        assert_eq!(unique_dirs(&dirs), vec![PathBuf::from("/no/such/dir")]);
    }

    #[test]
    fn test_backend_arg_maps_to_backend() {
        assert_eq!(Backend::from(BackendArg::Poll), Backend::Poll);
        assert_eq!(Backend::from(BackendArg::Native), Backend::Native);
    }

    #[test]
    fn test_render_json() {
        let printer = PrintWatcher::new(None, true);
        let event = FileChangeEvent::new("/tmp/d", "f.txt", ChangeKind::Deleted);

        let line = printer.render(&event).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["kind"], "deleted");
        assert_eq!(value["file_name"], "f.txt");
    }

    #[test]
    fn test_render_text_mentions_path() {
        let printer = PrintWatcher::new(None, false);
        let event = FileChangeEvent::new("/tmp/d", "f.txt", ChangeKind::Created);

        let line = printer.render(&event).unwrap();
        assert!(line.contains("created"));
        assert!(line.contains("f.txt"));
    }
}
