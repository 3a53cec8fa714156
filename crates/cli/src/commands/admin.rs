//! Config and shell-completion commands

use std::path::{Path, PathBuf};

use aftershock_core::Config;
use anyhow::{Context, Result};

/// Print the effective configuration as TOML.
pub fn cmd_config_show(path: Option<&Path>) -> Result<()> {
  let (config, source) = match path {
    Some(path) => (
      Config::load(path).with_context(|| format!("failed to load config from {}", path.display()))?,
      path.display().to_string(),
    ),
    None => match Config::user_config_path() {
      Some(path) if path.exists() => (
        Config::load(&path).with_context(|| format!("failed to load config from {}", path.display()))?,
        path.display().to_string(),
      ),
      _ => (Config::default(), "built-in defaults".to_string()),
    },
  };

  println!("# {source}");
  print!("{}", toml::to_string_pretty(&config).context("failed to render config")?);
  Ok(())
}

/// Write a commented default config file.
pub fn cmd_config_init(path: Option<PathBuf>, force: bool) -> Result<()> {
  let path = path
    .or_else(Config::user_config_path)
    .context("no config directory on this system, give --path")?;

  if path.exists() && !force {
    anyhow::bail!("{} already exists, use --force to overwrite", path.display());
  }

  if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
    std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
  }

  std::fs::write(&path, Config::template()).with_context(|| format!("failed to write {}", path.display()))?;
  println!("Wrote default config to {}", path.display());
  Ok(())
}

/// Generate shell completions on stdout.
pub fn cmd_completions(shell: clap_complete::Shell) {
  use clap::CommandFactory;

  let mut command = crate::Cli::command();
  clap_complete::generate(shell, &mut command, "aftershock", &mut std::io::stdout());
}
