//! Process configuration (§10.2): a `clap`-derived struct reading flags
//! with environment-variable fallbacks, in the style of the pack's
//! `clap::Parser` CLIs.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "xreg-server")]
#[command(about = "A schema-driven xRegistry service", long_about = None)]
pub struct Config {
    /// Address to bind the HTTP listener to.
    #[arg(long, env = "XREG_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Port to bind the HTTP listener to.
    #[arg(long, env = "XREG_PORT", default_value_t = 4242)]
    pub port: u16,

    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// UID of the registry served when a request omits `reg-<uid>`.
    #[arg(long, env = "XREG_DEFAULT_REGISTRY", default_value = "default")]
    pub default_registry_uid: String,

    /// Path to a JSON file holding the Model to load at startup.
    #[arg(long, env = "XREG_MODEL")]
    pub model: Option<String>,

    /// Load and validate `--model`, print the outcome, then exit without
    /// starting the HTTP server. Exit code 0 on a valid model, 2 on an
    /// invalid one.
    #[arg(long)]
    pub verify_only: bool,

    /// Repeat for more verbose logging (`-v` = debug, `-vv` = trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Connection pool size.
    #[arg(long, env = "XREG_POOL_SIZE", default_value_t = 10)]
    pub pool_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_apply_with_only_the_required_flag() {
        let cfg = Config::parse_from(["xreg-server", "--database-url", "postgres://x"]);
        assert_eq!(cfg.bind, "0.0.0.0");
        assert_eq!(cfg.port, 4242);
        assert_eq!(cfg.default_registry_uid, "default");
        assert_eq!(cfg.pool_size, 10);
        assert!(!cfg.verify_only);
        assert_eq!(cfg.verbose, 0);
        assert!(cfg.model.is_none());
    }

    #[test]
    fn explicit_flags_override_defaults() {
        let cfg = Config::parse_from([
            "xreg-server",
            "--database-url",
            "postgres://x",
            "--bind",
            "127.0.0.1",
            "--port",
            "9999",
            "--model",
            "model.json",
            "--verify-only",
            "-vv",
        ]);
        assert_eq!(cfg.bind, "127.0.0.1");
        assert_eq!(cfg.port, 9999);
        assert_eq!(cfg.model.as_deref(), Some("model.json"));
        assert!(cfg.verify_only);
        assert_eq!(cfg.verbose, 2);
    }

    #[test]
    fn missing_required_database_url_is_rejected() {
        assert!(Config::try_parse_from(["xreg-server"]).is_err());
    }
}
