//! CLI argument definitions using clap derive

use crate::cache::key::{DEFAULT_KEY_LENGTH, MAX_KEY_LENGTH};
use crate::config::modules::LATEST;
use crate::config::{ModuleKind, ModuleRef};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Kiln - layer-cached valkey container image builds
///
/// Builds valkey core and runtime images with buildah, reusing a
/// content-addressed cache of intermediate layers between runs.
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Build spec file path
    #[arg(short, long, global = true, env = "KILN_SPEC")]
    pub spec: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build or clean the core image (valkey compiled from source)
    Core(CoreArgs),

    /// Build or clean the runtime image
    Runtime(RuntimeArgs),

    /// Build or clean an optional module (valkey-json, valkey-search, valkey-bloom)
    Module(ModuleArgs),

    /// Delete every cache image whose name contains PREFIX
    Prune(PruneArgs),

    /// Print the cache key a step would get
    Key(KeyArgs),
}

/// Arguments for the core command
#[derive(Parser, Debug)]
pub struct CoreArgs {
    #[command(subcommand)]
    pub action: CoreAction,
}

/// Core subcommands
#[derive(Subcommand, Debug)]
pub enum CoreAction {
    /// Build the core image
    Build {
        /// Cache namespace (defaults to <project>/cache/core/<version>)
        #[arg(short, long)]
        cache_prefix: Option<String>,
    },

    /// Delete cached core layers
    DeleteCache(DeleteCacheArgs),
}

/// Arguments for the runtime command
#[derive(Parser, Debug)]
pub struct RuntimeArgs {
    #[command(subcommand)]
    pub action: RuntimeAction,
}

/// Runtime subcommands
#[derive(Subcommand, Debug)]
pub enum RuntimeAction {
    /// Build the runtime image from the core image
    Build(RuntimeBuildArgs),

    /// Delete cached runtime layers
    DeleteCache(DeleteCacheArgs),
}

/// Arguments for runtime build
#[derive(Args, Debug)]
pub struct RuntimeBuildArgs {
    /// Cache namespace (defaults to <project>/cache/runtime/<version>)
    #[arg(short, long)]
    pub cache_prefix: Option<String>,

    /// Image name (defaults to <project>-runtime)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Image tag (defaults to the valkey version)
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Keep the final image's layers instead of squashing them
    #[arg(long)]
    pub no_squash: bool,

    /// Strip the package manager from the final image
    #[arg(long)]
    pub remove_package_manager: bool,

    /// Modules to add, as NAME[=VERSION] separated by commas
    #[arg(short, long, value_delimiter = ',')]
    pub modules: Vec<ModuleRef>,
}

/// Arguments for the module command
#[derive(Parser, Debug)]
pub struct ModuleArgs {
    /// Module name
    pub module: ModuleKind,

    #[command(subcommand)]
    pub action: ModuleAction,
}

/// Module subcommands
#[derive(Subcommand, Debug)]
pub enum ModuleAction {
    /// Build the module image
    Build {
        /// Module version ("latest" uses the spec's current version)
        #[arg(long, default_value = LATEST)]
        module_version: String,

        /// Cache namespace (defaults to <project>/cache/<module>/<module version>)
        #[arg(short, long)]
        cache_prefix: Option<String>,
    },

    /// Delete cached module layers
    DeleteCache {
        /// Module version ("latest" uses the spec's current version)
        #[arg(long, default_value = LATEST)]
        module_version: String,

        #[command(flatten)]
        args: DeleteCacheArgs,
    },
}

/// Arguments for delete-cache
#[derive(Args, Debug)]
pub struct DeleteCacheArgs {
    /// Cache namespace (defaults to the recipe's namespace)
    #[arg(short, long)]
    pub cache_prefix: Option<String>,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the prune command
#[derive(Parser, Debug)]
pub struct PruneArgs {
    /// Substring matched against image names
    pub prefix: String,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the key command
#[derive(Parser, Debug)]
pub struct KeyArgs {
    /// Image the step would run on
    #[arg(short, long)]
    pub image: String,

    /// Step environment (KEY=VALUE)
    #[arg(short, long, value_parser = parse_env_var)]
    pub env: Vec<(String, String)>,

    /// Extra cache-key entries (KEY=VALUE, VALUE parsed as JSON when valid)
    #[arg(short = 'x', long, value_parser = parse_env_var)]
    pub extra: Vec<(String, String)>,

    /// Key length in hex characters (12-64, default 12)
    #[arg(short, long, value_parser = parse_key_length)]
    pub length: Option<usize>,

    /// Step command
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Parse a KEY=VALUE pair
fn parse_env_var(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE format: no '=' found in '{s}'"))?;
    if pos == 0 {
        return Err(format!("invalid KEY=VALUE format: empty key in '{s}'"));
    }
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Parse a key length within the supported digest range
fn parse_key_length(s: &str) -> Result<usize, String> {
    let length: usize = s
        .parse()
        .map_err(|_| format!("invalid key length '{s}': expected a number"))?;
    if !(DEFAULT_KEY_LENGTH..=MAX_KEY_LENGTH).contains(&length) {
        return Err(format!(
            "key length must be between {DEFAULT_KEY_LENGTH} and {MAX_KEY_LENGTH}, got {length}"
        ));
    }
    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_var_valid() {
        let (k, v) = parse_env_var("CFLAGS=-O2").unwrap();
        assert_eq!(k, "CFLAGS");
        assert_eq!(v, "-O2");
    }

    #[test]
    fn parse_env_var_with_equals() {
        let (k, v) = parse_env_var("FOO=bar=baz").unwrap();
        assert_eq!(k, "FOO");
        assert_eq!(v, "bar=baz");
    }

    #[test]
    fn parse_env_var_invalid() {
        assert!(parse_env_var("FOO").is_err());
        assert!(parse_env_var("=bar").is_err());
    }

    #[test]
    fn cli_parses_core_build() {
        let cli = Cli::parse_from(["kiln", "core", "build", "--cache-prefix", "ci/core"]);
        match cli.command {
            Commands::Core(CoreArgs {
                action: CoreAction::Build { cache_prefix },
            }) => assert_eq!(cache_prefix.as_deref(), Some("ci/core")),
            other => panic!("expected core build, got {other:?}"),
        }
    }

    #[test]
    fn cli_parses_runtime_build_overrides() {
        let cli = Cli::parse_from([
            "kiln", "runtime", "build", "--name", "my/valkey", "--tag", "dev", "--no-squash",
        ]);
        match cli.command {
            Commands::Runtime(RuntimeArgs {
                action: RuntimeAction::Build(args),
            }) => {
                assert_eq!(args.name.as_deref(), Some("my/valkey"));
                assert_eq!(args.tag.as_deref(), Some("dev"));
                assert!(args.no_squash);
                assert!(!args.remove_package_manager);
            }
            other => panic!("expected runtime build, got {other:?}"),
        }
    }

    #[test]
    fn cli_parses_runtime_modules() {
        let cli = Cli::parse_from([
            "kiln", "runtime", "build", "--modules", "valkey-json=1.0.0,valkey-bloom",
        ]);
        match cli.command {
            Commands::Runtime(RuntimeArgs {
                action: RuntimeAction::Build(args),
            }) => assert_eq!(
                args.modules,
                vec![
                    ModuleRef {
                        kind: ModuleKind::ValkeyJson,
                        version: "1.0.0".to_string(),
                    },
                    ModuleRef::latest(ModuleKind::ValkeyBloom),
                ]
            ),
            other => panic!("expected runtime build, got {other:?}"),
        }
    }

    #[test]
    fn runtime_rejects_unknown_module() {
        let err = Cli::try_parse_from(["kiln", "runtime", "build", "--modules", "valkey-graph"])
            .unwrap_err();
        assert!(err.to_string().contains("unknown module 'valkey-graph'"));
    }

    #[test]
    fn cli_parses_module_build() {
        let cli = Cli::parse_from([
            "kiln",
            "module",
            "valkey-search",
            "build",
            "--module-version",
            "1.0.0",
        ]);
        match cli.command {
            Commands::Module(ModuleArgs {
                module,
                action:
                    ModuleAction::Build {
                        module_version,
                        cache_prefix,
                    },
            }) => {
                assert_eq!(module, ModuleKind::ValkeySearch);
                assert_eq!(module_version, "1.0.0");
                assert!(cache_prefix.is_none());
            }
            other => panic!("expected module build, got {other:?}"),
        }
    }

    #[test]
    fn cli_parses_module_delete_cache_defaults() {
        let cli = Cli::parse_from(["kiln", "module", "valkey-json", "delete-cache", "-y"]);
        match cli.command {
            Commands::Module(ModuleArgs {
                action: ModuleAction::DeleteCache { module_version, args },
                ..
            }) => {
                assert_eq!(module_version, "latest");
                assert!(args.yes);
            }
            other => panic!("expected module delete-cache, got {other:?}"),
        }
    }

    #[test]
    fn cli_parses_delete_cache() {
        let cli = Cli::parse_from(["kiln", "runtime", "delete-cache", "-y"]);
        match cli.command {
            Commands::Runtime(RuntimeArgs {
                action: RuntimeAction::DeleteCache(args),
            }) => {
                assert!(args.yes);
                assert!(args.cache_prefix.is_none());
            }
            other => panic!("expected runtime delete-cache, got {other:?}"),
        }
    }

    #[test]
    fn cli_parses_prune() {
        let cli = Cli::parse_from(["kiln", "prune", "valkey/cache", "--yes"]);
        match cli.command {
            Commands::Prune(args) => {
                assert_eq!(args.prefix, "valkey/cache");
                assert!(args.yes);
            }
            other => panic!("expected prune, got {other:?}"),
        }
    }

    #[test]
    fn cli_parses_key() {
        let cli = Cli::parse_from([
            "kiln", "key", "--image", "alpine:3", "--env", "A=1", "--extra", "step=deps", "--",
            "echo", "hi",
        ]);
        match cli.command {
            Commands::Key(args) => {
                assert_eq!(args.image, "alpine:3");
                assert_eq!(args.env, vec![("A".to_string(), "1".to_string())]);
                assert_eq!(args.extra, vec![("step".to_string(), "deps".to_string())]);
                assert_eq!(args.command, vec!["echo", "hi"]);
            }
            other => panic!("expected key, got {other:?}"),
        }
    }

    #[test]
    fn parse_key_length_bounds() {
        assert_eq!(parse_key_length("12").unwrap(), 12);
        assert_eq!(parse_key_length("64").unwrap(), 64);
        assert!(parse_key_length("4").is_err());
        assert!(parse_key_length("65").is_err());
        assert!(parse_key_length("long").is_err());
    }

    #[test]
    fn key_rejects_out_of_range_length() {
        let parsed = |length: &str| {
            Cli::try_parse_from(["kiln", "key", "-i", "alpine:3", "--length", length, "--", "true"])
        };
        assert!(parsed("4").is_err());
        assert!(parsed("100").is_err());
        match parsed("64").unwrap().command {
            Commands::Key(args) => assert_eq!(args.length, Some(64)),
            other => panic!("expected key, got {other:?}"),
        }
    }

    #[test]
    fn key_requires_command() {
        assert!(Cli::try_parse_from(["kiln", "key", "--image", "alpine:3"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["kiln", "prune", "x", "-vv", "--spec", "b.toml"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.spec, Some(PathBuf::from("b.toml")));
    }
}
