use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use hopchain_core::{ChainConfig, PlacementMode, TeardownRecord};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("hopchain")
        .version(hopchain_core::VERSION)
        .about("Hopchain configuration checks, ledger audit and teardown plans")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("check")
                .about("Validate a chain configuration file")
                .arg(
                    Arg::new("config")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the TOML configuration"),
                ),
        )
        .subcommand(
            Command::new("audit")
                .about("Print name,access_key_id per principal from a teardown record")
                .arg(
                    Arg::new("record")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to generated_resources.json"),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the audit text here instead of stdout"),
                ),
        )
        .subcommand(
            Command::new("plan")
                .about("Print ordered teardown steps for a teardown record")
                .arg(
                    Arg::new("record")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to generated_resources.json"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    let output = match matches.subcommand() {
        Some(("check", args)) => check(path_arg(args, "config")?)?,
        Some(("audit", args)) => {
            let text = audit(path_arg(args, "record")?)?;
            if let Some(out) = args.get_one::<PathBuf>("out") {
                std::fs::write(out, &text)
                    .with_context(|| format!("writing {}", out.display()))?;
                tracing::info!(path = %out.display(), "audit text written");
                String::new()
            } else {
                text
            }
        }
        Some(("plan", args)) => plan(path_arg(args, "record")?, args.get_flag("json"))?,
        _ => unreachable!("subcommand required"),
    };
    print!("{output}");
    Ok(())
}

fn path_arg<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a Path> {
    args.get_one::<PathBuf>(name)
        .map(PathBuf::as_path)
        .with_context(|| format!("missing <{name}>"))
}

fn check(path: &Path) -> Result<String> {
    let config = ChainConfig::from_file(path)
        .with_context(|| format!("invalid configuration {}", path.display()))?;

    let mode = match &config.dispatch {
        None => "local".to_string(),
        Some(d) => {
            let placement = match d.placement {
                PlacementMode::Shared => "shared unit",
                PlacementMode::PerHop => "unit per hop",
            };
            format!("remote ({placement}, {} shard(s), role {})", d.shards, d.role_name)
        }
    };

    Ok(format!(
        "hops: {}\nprincipal: {} ({}*)\npolicy: {}\nactivation: {} x {}s\nmode: {}\nteardown record: {}\naudit text: {}\n",
        config.hops,
        config.principal_kind,
        config.principal_prefix,
        config.policy.reference(),
        config.activation.max_attempts,
        config.activation.delay_secs,
        mode,
        config.output.teardown_path.display(),
        config.output.audit_path.display(),
    ))
}

fn audit(path: &Path) -> Result<String> {
    let record = TeardownRecord::read_json(path)
        .with_context(|| format!("reading teardown record {}", path.display()))?;
    Ok(record.audit_text())
}

fn plan(path: &Path, json: bool) -> Result<String> {
    let record = TeardownRecord::read_json(path)
        .with_context(|| format!("reading teardown record {}", path.display()))?;
    let steps = record.plan();
    tracing::info!(steps = steps.len(), "teardown plan built");

    if json {
        let mut out = serde_json::to_string_pretty(&steps)?;
        out.push('\n');
        return Ok(out);
    }
    Ok(steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{:>3}. {step}\n", i + 1))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = r#"{
  "roles": [{ "role_name": "HopExecutionRole", "role_id": "arn:role/HopExecutionRole", "policies": ["policy/Exec"] }],
  "work_units": [{ "unit_name": "hop-unit-1", "role_name": "HopExecutionRole", "state": "active" }],
  "principals": [
    { "name": "nested_user_1", "kind": "user", "hop": 1, "access_key_id": "AKIA0001", "policies": ["policy/Read"] },
    { "name": "nested_user_2", "kind": "user", "hop": 2, "access_key_id": "AKIA0002", "policies": ["policy/Read"] }
  ]
}"#;

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn audit_prints_one_line_per_principal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "generated_resources.json", RECORD);
        assert_eq!(
            audit(&path).unwrap(),
            "nested_user_1,AKIA0001\nnested_user_2,AKIA0002\n"
        );
    }

    #[test]
    fn plan_starts_with_newest_principal_and_ends_with_role() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "generated_resources.json", RECORD);
        let text = plan(&path, false).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 9);
        assert!(lines[0].contains("detach policy/Read from user nested_user_2"));
        assert!(lines[8].contains("delete execution role HopExecutionRole"));

        let json: serde_json::Value = serde_json::from_str(&plan(&path, true).unwrap()).unwrap();
        assert_eq!(json[0]["action"], "detach_principal_policy");
    }

    #[test]
    fn check_rejects_config_without_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "chain.toml", "hops = 2\n");
        assert!(check(&path).is_err());
    }

    #[test]
    fn check_summarises_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "chain.toml",
            "hops = 2\npolicy = { type = \"managed\", arn = \"policy/Read\" }\n",
        );
        let summary = check(&path).unwrap();
        assert!(summary.contains("hops: 2"));
        assert!(summary.contains("mode: local"));
        assert!(summary.contains("activation: 6 x 10s"));
    }
}
