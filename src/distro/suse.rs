//! openSUSE / SLE package management via zypper

use crate::cache::{BuildSession, StepOutcome, StepRequest};
use crate::distro::{Distro, PackageArgs};
use crate::error::KilnResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// zypper-based distribution
#[derive(Debug, Clone, Copy, Default)]
pub struct Suse;

impl Suse {
    fn zypper(
        args: &PackageArgs,
        action: &str,
        action_flags: &[&str],
        extra: &[String],
        packages: &[String],
    ) -> Vec<String> {
        let mut cmd = vec!["zypper".to_string(), "--non-interactive".to_string()];
        cmd.extend(args.flags.iter().cloned());
        cmd.push(action.to_string());
        cmd.extend(action_flags.iter().map(|s| s.to_string()));
        cmd.extend(extra.iter().cloned());
        cmd.extend(packages.iter().cloned());
        cmd
    }

    fn install_command(packages: &[String], args: &PackageArgs) -> Vec<String> {
        Self::zypper(args, "install", &["--no-recommends"], &args.install_flags, packages)
    }
}

#[async_trait]
impl Distro for Suse {
    async fn refresh_package_repository(
        &self,
        session: &mut BuildSession<'_>,
        args: &PackageArgs,
    ) -> KilnResult<()> {
        let cmd = Self::zypper(args, "refresh", &[], &[], &[]);
        session.run_uncached(&cmd, None).await
    }

    async fn install_packages(
        &self,
        session: &mut BuildSession<'_>,
        packages: &[String],
        extra_cache_keys: Option<BTreeMap<String, Value>>,
        args: &PackageArgs,
    ) -> KilnResult<Option<StepOutcome>> {
        if packages.is_empty() {
            debug!("No packages to install");
            return Ok(None);
        }

        let cmd = Self::install_command(packages, args);
        match extra_cache_keys {
            Some(extra) => {
                let step = StepRequest {
                    command: cmd,
                    env: None,
                    extra: Some(extra),
                };
                session.run_cached(&step).await.map(Some)
            }
            None => {
                session.run_uncached(&cmd, None).await?;
                Ok(None)
            }
        }
    }

    async fn remove_packages(
        &self,
        session: &mut BuildSession<'_>,
        packages: &[String],
        args: &PackageArgs,
    ) -> KilnResult<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let cmd = Self::zypper(args, "remove", &["--clean-deps"], &args.remove_flags, packages);
        session.run_uncached(&cmd, None).await
    }

    async fn clean_package_repository_cache(
        &self,
        session: &mut BuildSession<'_>,
        args: &PackageArgs,
    ) -> KilnResult<()> {
        let cmd = Self::zypper(args, "clean", &["--all"], &args.clean_flags, &[]);
        session.run_uncached(&cmd, None).await
    }

    async fn remove_package_manager(&self, session: &mut BuildSession<'_>) -> KilnResult<()> {
        let cmd = [
            "sh",
            "-c",
            "rpm -e --nodeps --allmatches zypper rpm libzypp && \
             rm -rf /var/lib/rpm /var/cache/zypp /usr/lib/sysimage/rpm",
        ]
        .map(String::from);
        session.run_uncached(&cmd, None).await
    }

    fn name(&self) -> &'static str {
        "suse"
    }
}
