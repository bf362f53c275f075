//! Optional valkey modules
//!
//! Each module is configured under `[modules.<name>]` with a `current`
//! version and a table of buildable versions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Version request that resolves to the module's `current` version
pub const LATEST: &str = "latest";

/// Modules kiln knows how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleKind {
    /// Native JSON data type
    ValkeyJson,
    /// Vector similarity search
    ValkeySearch,
    /// Bloom filters
    ValkeyBloom,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 3] = [Self::ValkeyJson, Self::ValkeySearch, Self::ValkeyBloom];

    /// Name used in the build spec and on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Self::ValkeyJson => "valkey-json",
            Self::ValkeySearch => "valkey-search",
            Self::ValkeyBloom => "valkey-bloom",
        }
    }

    /// Name used in image repositories and cache namespaces
    pub fn stem(&self) -> &'static str {
        match self {
            Self::ValkeyJson => "valkeyjson",
            Self::ValkeySearch => "valkeysearch",
            Self::ValkeyBloom => "valkeybloom",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::ValkeyJson => "ValkeyJSON",
            Self::ValkeySearch => "ValkeySearch",
            Self::ValkeyBloom => "ValkeyBloom",
        }
    }

    /// Shared library installed under `<prefix>/modules`
    pub fn library(&self) -> String {
        format!("{}.so", self.stem())
    }

    /// Shell script compiling the checked-out sources in `src_dir`
    pub fn compile_script(&self, src_dir: &str, build: &ModuleBuildConfig) -> String {
        let mut parts: Vec<String> = vec![format!("cd {}", src_dir)];
        let env_prefix = build
            .env
            .iter()
            .map(|e| format!("{} ", e))
            .collect::<String>();
        let flags = build
            .flags
            .iter()
            .map(|f| format!(" {}", f))
            .collect::<String>();

        match self {
            Self::ValkeyJson | Self::ValkeySearch => {
                parts.push("mkdir -p build".to_string());
                parts.push("cd build".to_string());
                parts.push(format!("{}cmake ..{}", env_prefix, flags));
                parts.push(format!("make -j{}", build.cpu));
            }
            Self::ValkeyBloom => {
                parts.push(format!(
                    "{}cargo build --release -j {}{}",
                    env_prefix, build.cpu, flags
                ));
            }
        }
        parts.join(" && ")
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|k| k.name()).collect();
                format!("unknown module '{}' (expected one of: {})", s, known.join(", "))
            })
    }
}

/// A module requested on the command line as `name[=version]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRef {
    pub kind: ModuleKind,
    /// Requested version, `latest` when omitted
    pub version: String,
}

impl ModuleRef {
    pub fn latest(kind: ModuleKind) -> Self {
        Self {
            kind,
            version: LATEST.to_string(),
        }
    }
}

impl fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.kind, self.version)
    }
}

impl FromStr for ModuleRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, version) = match s.split_once('=') {
            Some((name, version)) => (name.trim(), version.trim()),
            None => (s.trim(), ""),
        };
        let kind = name.parse()?;
        let version = if version.is_empty() { LATEST } else { version };
        Ok(Self {
            kind,
            version: version.to_string(),
        })
    }
}

/// `[modules.<name>]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Version used when `latest` (or nothing) is requested
    pub current: String,

    #[serde(default)]
    pub versions: BTreeMap<String, ModuleVersion>,
}

impl ModuleConfig {
    /// Look up a version, mapping `latest` and blank requests to `current`
    pub fn resolve(&self, requested: &str) -> Option<(&str, &ModuleVersion)> {
        let wanted = match requested.trim() {
            "" | LATEST => self.current.as_str(),
            other => other,
        };
        self.versions
            .get_key_value(wanted)
            .map(|(version, config)| (version.as_str(), config))
    }
}

/// `[modules.<name>.versions."<version>"]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleVersion {
    /// Git repository cloned at the version tag
    pub source_url: String,

    #[serde(default)]
    pub build: ModuleBuildConfig,

    #[serde(default)]
    pub runtime: ModuleRuntimeConfig,
}

/// Module compile settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleBuildConfig {
    /// Packages needed to compile
    pub dependencies: Vec<String>,

    /// Extra build-tool flags
    pub flags: Vec<String>,

    /// `KEY=VALUE` assignments prefixed to the build command
    pub env: Vec<String>,

    /// Parallel build jobs
    pub cpu: u32,
}

impl Default for ModuleBuildConfig {
    fn default() -> Self {
        Self {
            dependencies: Vec::new(),
            flags: Vec::new(),
            env: Vec::new(),
            cpu: 4,
        }
    }
}

/// Packages a module needs inside the runtime image
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleRuntimeConfig {
    pub dependencies: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(toml: &str) -> ModuleConfig {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn module_kind_round_trips_names() {
        for kind in ModuleKind::ALL {
            assert_eq!(kind.name().parse::<ModuleKind>().unwrap(), kind);
        }
        let err = "valkey-graph".parse::<ModuleKind>().unwrap_err();
        assert!(err.contains("valkey-graph"));
        assert!(err.contains("valkey-json, valkey-search, valkey-bloom"));
    }

    #[test]
    fn module_ref_defaults_to_latest() {
        let parsed: ModuleRef = "valkey-bloom".parse().unwrap();
        assert_eq!(parsed, ModuleRef::latest(ModuleKind::ValkeyBloom));

        let pinned: ModuleRef = "valkey-json=1.0.0".parse().unwrap();
        assert_eq!(pinned.kind, ModuleKind::ValkeyJson);
        assert_eq!(pinned.version, "1.0.0");
        assert_eq!(pinned.to_string(), "valkey-json=1.0.0");

        let blank: ModuleRef = "valkey-search=".parse().unwrap();
        assert_eq!(blank.version, LATEST);

        assert!("json=1.0.0".parse::<ModuleRef>().is_err());
    }

    #[test]
    fn resolve_maps_latest_to_current() {
        let config = module(
            r#"
            current = "1.0.0"
            [versions."1.0.0"]
            source_url = "https://github.com/valkey-io/valkey-json.git"
            [versions."0.9.0"]
            source_url = "https://github.com/valkey-io/valkey-json.git"
            "#,
        );

        assert_eq!(config.resolve("latest").unwrap().0, "1.0.0");
        assert_eq!(config.resolve("").unwrap().0, "1.0.0");
        assert_eq!(config.resolve("0.9.0").unwrap().0, "0.9.0");
        assert!(config.resolve("2.0.0").is_none());
    }

    #[test]
    fn version_sections_get_defaults() {
        let config = module(
            r#"
            current = "1.0.0"
            [versions."1.0.0"]
            source_url = "u"
            "#,
        );
        let (_, version) = config.resolve(LATEST).unwrap();
        assert_eq!(version.build.cpu, 4);
        assert!(version.build.flags.is_empty());
        assert!(version.runtime.dependencies.is_empty());
    }

    #[test]
    fn cmake_modules_build_out_of_tree() {
        let build = ModuleBuildConfig {
            flags: vec!["-DCMAKE_BUILD_TYPE=Release".to_string()],
            env: vec!["CC=gcc-13".to_string(), "CXX=g++-13".to_string()],
            cpu: 8,
            ..Default::default()
        };
        assert_eq!(
            ModuleKind::ValkeySearch.compile_script("/tmp/valkeysearch-1.0.0", &build),
            "cd /tmp/valkeysearch-1.0.0 && mkdir -p build && cd build && \
             CC=gcc-13 CXX=g++-13 cmake .. -DCMAKE_BUILD_TYPE=Release && make -j8"
        );
    }

    #[test]
    fn bloom_builds_with_cargo() {
        let build = ModuleBuildConfig::default();
        assert_eq!(
            ModuleKind::ValkeyBloom.compile_script("/tmp/valkeybloom-1.0.0", &build),
            "cd /tmp/valkeybloom-1.0.0 && cargo build --release -j 4"
        );
        assert_eq!(ModuleKind::ValkeyBloom.library(), "valkeybloom.so");
    }
}
