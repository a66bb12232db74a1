//! `sitewatch serve` command implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use sitewatch_config::{CliSettings, Config};
use sitewatch_server::{BoxError, ErrorRenderer, LiveReloadServer, ServerConfig, ServerError};

use crate::build;
use crate::error::CliError;
use crate::output::Output;

/// Arguments for the serve command.
#[derive(Args)]
pub(crate) struct ServeArgs {
    /// Path to configuration file (default: auto-discover sitewatch.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory with the generated site (overrides config).
    #[arg(short, long)]
    site_dir: Option<PathBuf>,

    /// Host to bind to (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind to (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// URL prefix to serve the site under (overrides config).
    #[arg(long)]
    mount_path: Option<String>,

    /// Shell command that builds the site (overrides config).
    #[arg(short, long, env = "SITEWATCH_BUILD_COMMAND")]
    build_command: Option<String>,

    /// Source path to watch; repeat for several (overrides config).
    #[arg(short, long = "watch", value_name = "PATH")]
    watch: Vec<PathBuf>,

    /// Enable verbose output (request and rebuild logs).
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServeArgs {
    /// Execute the serve command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or the server fails to start.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Output::new();

        let cli_settings = CliSettings {
            host: self.host,
            port: self.port,
            mount_path: self.mount_path,
            site_dir: self.site_dir,
            build_command: self.build_command,
            watch: (!self.watch.is_empty()).then_some(self.watch),
        };
        let config = Config::load(self.config.as_deref(), Some(&cli_settings))?;

        let project_dir = match config.config_path.as_deref().and_then(Path::parent) {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir()?,
        };
        let builder = build::callback(config.build_resolved.command.clone(), project_dir);

        if let Some(command) = &config.build_resolved.command {
            output.info(&format!("Building site: {command}"));
            match builder() {
                Ok(()) => output.success("Initial build finished"),
                Err(err) => output.warning(&format!("Initial build failed: {err}")),
            }
        }
        std::fs::create_dir_all(&config.site_resolved.dir)?;

        output.field("Site directory", config.site_resolved.dir.display());
        if config.build_resolved.command.is_none() {
            output.field("Build", "none (serving and reloading only)");
        }

        let server_config = ServerConfig {
            host: config.server.host.clone(),
            port: config.server.port,
            root: config.site_resolved.dir.clone(),
            mount_path: config.server.mount_path.clone(),
            build_delay: config.live_reload.build_delay(),
            poll_response_timeout: config.live_reload.poll_timeout(),
            error_renderer: Some(not_found_page(&config.site_resolved.dir)),
        };
        let server = LiveReloadServer::start(server_config, builder)?;

        for path in &config.build_resolved.watch {
            match server.watch(path, None) {
                Ok(()) => output.field("Watching", path.display()),
                Err(err @ ServerError::Watch { .. }) => output.warning(&format!("{err}")),
                Err(err) => return Err(err.into()),
            }
        }

        output.url(&format!(
            "http://{}:{}{}",
            config.server.host,
            config.server.port,
            server.mount_path()
        ));

        server.serve(shutdown_signal()).await?;
        Ok(())
    }
}

/// Render 404 responses with the site's own `404.html`.
///
/// The page is read on every error, so one produced by a later build is
/// used as soon as it exists.
fn not_found_page(site_dir: &Path) -> ErrorRenderer {
    let page = site_dir.join("404.html");
    Arc::new(move |code: u16| -> Result<Vec<u8>, BoxError> {
        if code == 404 {
            match std::fs::read(&page) {
                Ok(content) => return Ok(content),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(format!("<h1>Error {code}</h1>").into_bytes())
    })
}

/// Wait for shutdown signal (Ctrl-C).
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_not_found_page_absent_uses_plain_body() {
        let dir = tempfile::tempdir().unwrap();

        let render = not_found_page(dir.path());

        assert_eq!(render(404).unwrap(), b"<h1>Error 404</h1>");
    }

    #[test]
    fn test_not_found_page_renders_site_page() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("404.html"), "<h1>Lost</h1>").unwrap();

        let render = not_found_page(dir.path());

        assert_eq!(render(404).unwrap(), b"<h1>Lost</h1>");
        assert_eq!(render(500).unwrap(), b"<h1>Error 500</h1>");
    }

    #[test]
    fn test_not_found_page_created_after_start_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let render = not_found_page(dir.path());
        assert_eq!(render(404).unwrap(), b"<h1>Error 404</h1>");

        std::fs::write(dir.path().join("404.html"), "<h1>Built later</h1>").unwrap();

        assert_eq!(render(404).unwrap(), b"<h1>Built later</h1>");
    }
}
