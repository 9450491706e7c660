//! Configuration layering: defaults, then the TOML file, then flags.

use anyhow::Context;

use nodecycle_core::{CycleConfig, RunMode};

use crate::Cli;

/// Build and validate the run configuration.
pub fn load(cli: &Cli) -> anyhow::Result<CycleConfig> {
    let mut config = match &cli.config {
        Some(path) => CycleConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CycleConfig::default(),
    };
    apply_flags(&mut config, cli)?;
    config.validate()?;
    Ok(config)
}

fn apply_flags(config: &mut CycleConfig, cli: &Cli) -> anyhow::Result<()> {
    if let Some(cluster) = &cli.cluster_name {
        config.cluster_name = cluster.clone();
    }
    if let Some(mode) = cli.run_mode {
        config.run_mode = RunMode::try_from(mode).map_err(anyhow::Error::msg)?;
    }
    if cli.dry_run {
        config.dry_run = true;
    }
    if !cli.groups.is_empty() {
        config.group_names = cli.groups.clone();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["nodecycle"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn flags_only() {
        let cli = parse(&["-c", "prod", "--run-mode", "3", "-g", "ng-a", "-g", "ng-b"]);
        let config = load(&cli).unwrap();
        assert_eq!(config.cluster_name, "prod");
        assert_eq!(config.run_mode, RunMode::CordonBeforeDrain);
        assert_eq!(config.group_names, vec!["ng-a", "ng-b"]);
        assert!(!config.dry_run);
    }

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodecycle.toml");
        std::fs::write(
            &path,
            "cluster_name = \"staging\"\nrun_mode = 2\ngroup_names = [\"ng-file\"]\n",
        )
        .unwrap();

        let cli = parse(&[
            "--config",
            path.to_str().unwrap(),
            "--cluster-name",
            "prod",
            "--dry-run",
        ]);
        let config = load(&cli).unwrap();
        assert_eq!(config.cluster_name, "prod");
        assert_eq!(config.run_mode, RunMode::ScaleAllFirst);
        assert_eq!(config.group_names, vec!["ng-file"]);
        assert!(config.dry_run);
    }

    #[test]
    fn missing_cluster_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodecycle.toml");
        std::fs::write(&path, "run_mode = 1\n").unwrap();
        let cli = parse(&["--config", path.to_str().unwrap()]);
        assert!(load(&cli).is_err());
    }

    #[test]
    fn run_mode_out_of_range_fails_to_parse() {
        assert!(Cli::try_parse_from(["nodecycle", "-c", "prod", "--run-mode", "5"]).is_err());
    }
}
