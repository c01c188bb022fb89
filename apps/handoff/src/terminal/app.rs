use crate::config::{ConfigError, TargetSettings, TerraformSource};
use crate::provision::coordinator::{Coordinator, HandoffPaths, RunOutcome};
use crate::provision::descriptor::ResourceDescriptor;
use crate::provision::inventory::render;
use crate::provision::lock::read_holder;
use crate::provision::provider::{ProviderError, ProviderReport};
use crate::provision::runner::AnsibleRunner;
use crate::provision::trigger::TriggerStore;
use crate::terminal::cli::{Cli, Command, RenderArgs, RunArgs, StatusArgs};
use crate::terminal::error::CliError;
use crate::transport::ssh::SshProbe;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info};

pub async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Run(args) => run_handoff(args).await,
        Command::Render(args) => render_inventory(args).await,
        Command::Status(args) => show_status(args).await,
    }
}

async fn run_handoff(args: RunArgs) -> Result<(), CliError> {
    let file = args.source.load_file()?;
    let settings = args.resolve(&file)?;
    let descriptor = load_descriptor(&settings.target).await?;
    tokio::fs::create_dir_all(&settings.work_dir).await?;

    info!(
        target: "handoff::app",
        resource_id = %descriptor.resource_id,
        address = %descriptor.public_address,
        generation = %descriptor.generation,
        work_dir = %settings.work_dir.display(),
        max_attempts = settings.policy.max_attempts,
        worst_case_secs = settings.policy.worst_case().as_secs(),
        "starting handoff"
    );

    let coordinator = Coordinator::new(
        Arc::new(SshProbe::new(settings.ssh.clone())),
        Arc::new(AnsibleRunner::new(settings.runner.clone())),
        &settings.work_dir,
    );
    match coordinator
        .run(&descriptor, &settings.params, &settings.policy)
        .await?
    {
        RunOutcome::Applied { trigger, inventory } => {
            println!(
                "applied: {} (trigger {}, inventory {})",
                descriptor.resource_id,
                trigger.short(),
                inventory.display()
            );
            Ok(())
        }
        RunOutcome::Skipped { trigger, inventory } => {
            println!(
                "skipped: {} already configured for trigger {} (inventory {})",
                descriptor.resource_id,
                trigger.short(),
                inventory.display()
            );
            Ok(())
        }
        RunOutcome::Failed(reason) => Err(CliError::Outcome(reason)),
    }
}

async fn render_inventory(args: RenderArgs) -> Result<(), CliError> {
    let file = args.source.load_file()?;
    let target = args.target.resolve(&file);
    let params = args.deploy.resolve(&file);
    let descriptor = load_descriptor(&target).await?;
    let record = render(&descriptor, &params)?;

    match &args.output {
        Some(path) => {
            record.write_to(path).await?;
            info!(
                target: "handoff::app",
                path = %path.display(),
                sha256 = %record.sha256(),
                "inventory written"
            );
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(record.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

async fn show_status(args: StatusArgs) -> Result<(), CliError> {
    let file = args.source.load_file()?;
    let target = args.target.resolve(&file);
    let report = load_report(&target).await?;
    let resource_id = report
        .resource_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(ConfigError::Missing("resource id"))?;
    let paths = HandoffPaths::new(&args.source.work_dir(&file), &resource_id);
    debug!(target: "handoff::app", trigger = %paths.trigger.display(), "reading trigger record");

    let record = TriggerStore::new(&paths.trigger).load().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    match record {
        Some(record) => println!(
            "{resource_id}: applied generation {} at {} (trigger {}, inventory sha256 {})",
            record.generation,
            record.applied_at_unix,
            record.trigger.short(),
            record.inventory_sha256
        ),
        None => println!("{resource_id}: no configuration run recorded"),
    }
    if let Some(holder) = read_holder(&paths.lock) {
        println!(
            "{resource_id}: run in progress (pid {}, since {})",
            holder.pid, holder.acquired_at_unix
        );
    }
    Ok(())
}

/// Terraform outputs (when configured) with command-line values on top.
pub async fn load_report(target: &TargetSettings) -> Result<ProviderReport, ProviderError> {
    let reported = match &target.terraform {
        TerraformSource::None => ProviderReport::default(),
        TerraformSource::OutputFile(path) => {
            ProviderReport::from_terraform_file(path, &target.terraform_keys).await?
        }
        TerraformSource::Directory { program, dir } => {
            ProviderReport::from_terraform_dir(program, dir, &target.terraform_keys).await?
        }
    };
    Ok(reported.overridden_by(target.overrides.clone()))
}

pub async fn load_descriptor(target: &TargetSettings) -> Result<ResourceDescriptor, CliError> {
    let ssh_key = target.require_ssh_key()?;
    let report = load_report(target).await?;
    Ok(report.into_descriptor(target.admin_user.clone(), ssh_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::provider::TerraformKeys;
    use std::path::PathBuf;

    fn target(terraform: TerraformSource) -> TargetSettings {
        TargetSettings {
            admin_user: "ubuntu".into(),
            ssh_key: Some(PathBuf::from("/keys/id")),
            terraform,
            terraform_keys: TerraformKeys::default(),
            overrides: ProviderReport::default(),
        }
    }

    #[tokio::test]
    async fn descriptor_merges_terraform_file_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outputs.json");
        std::fs::write(
            &path,
            r#"{"instance_id": {"value": "i-1"}, "public_ip": {"value": "203.0.113.5"}}"#,
        )
        .unwrap();

        let mut settings = target(TerraformSource::OutputFile(path));
        settings.overrides.generation = Some("g7".into());
        let descriptor = load_descriptor(&settings).await.unwrap();
        assert_eq!(descriptor.resource_id, "i-1");
        assert_eq!(descriptor.public_address, "203.0.113.5");
        assert_eq!(descriptor.generation.as_str(), "g7");
        assert_eq!(descriptor.credential_reference, PathBuf::from("/keys/id"));
    }

    #[tokio::test]
    async fn descriptor_requires_ssh_key() {
        let mut settings = target(TerraformSource::None);
        settings.ssh_key = None;
        let err = load_descriptor(&settings).await.unwrap_err();
        assert!(matches!(err, CliError::Config(ConfigError::Missing("ssh key"))));
    }

    #[tokio::test]
    async fn missing_output_file_is_a_provider_error() {
        let settings = target(TerraformSource::OutputFile(PathBuf::from(
            "/nonexistent/outputs.json",
        )));
        let err = load_report(&settings).await.unwrap_err();
        assert!(matches!(err, ProviderError::Read { .. }));
    }
}
