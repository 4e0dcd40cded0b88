use clap::{Parser, Subcommand};
use std::path::PathBuf;

use signbridge::config;

#[derive(Parser, Debug)]
#[command(name = "signbridge")]
#[command(author = "Signbridge Team")]
#[command(version = "0.1.0")]
#[command(about = "Video calls with live sign-language detection", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/signbridge.toml")]
    pub config: PathBuf,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Mode,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Run the rendezvous server
    Serve {
        /// Bind address
        #[arg(long)]
        host: Option<String>,

        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory whose sub-directories name the sign classes
        #[arg(long)]
        classes_dir: Option<PathBuf>,
    },

    /// Join a call as a headless client with a synthetic camera
    Call {
        /// Signaling server URL (ws:// or wss://)
        #[arg(short, long)]
        server: Option<String>,

        /// Create a new room
        #[arg(long, action, conflicts_with = "join")]
        create: bool,

        /// Join an existing room
        #[arg(long, value_name = "ROOM")]
        join: Option<String>,

        /// Start sign detection once connected
        #[arg(long, action)]
        detect: bool,

        /// Detection frames per second
        #[arg(long)]
        fps: Option<u32>,
    },
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }

    /// Apply command line overrides on top of the file configuration
    pub fn apply_overrides(&self, config: &mut config::Config) {
        match self.command {
            Mode::Serve {
                ref host,
                port,
                ref classes_dir,
            } => {
                if let Some(host) = host {
                    config.server.host = host.clone();
                }
                if let Some(port) = port {
                    config.server.port = port;
                }
                if let Some(dir) = classes_dir {
                    config.server.classes_dir = Some(dir.clone());
                }
            }
            Mode::Call { ref server, fps, .. } => {
                if let Some(url) = server {
                    config.signaling.url = url.clone();
                }
                if let Some(fps) = fps {
                    config.detection.fps = fps;
                }
            }
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_overrides_server_url() {
        let args = Args::parse_from(["signbridge", "call", "--server", "wss://example.org/ws", "--join", "ab12cd34"]);
        let mut config = config::Config::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.signaling.url, "wss://example.org/ws");
        match args.command {
            Mode::Call { join, create, .. } => {
                assert_eq!(join.as_deref(), Some("ab12cd34"));
                assert!(!create);
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn create_and_join_conflict() {
        assert!(Args::try_parse_from(["signbridge", "call", "--create", "--join", "x"]).is_err());
    }

    #[test]
    fn serve_overrides_port() {
        let args = Args::parse_from(["signbridge", "-v", "serve", "--port", "8080"]);
        let mut config = config::Config::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.level, "debug");
    }
}
