/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! git-assure - sign git history on publish and verify it on fetch.

use anyhow::Result;
use clap::{Parser, Subcommand};
use git_assure::commands::{self, setup_downstream::SetupDownstreamArgs, setup_publish::SetupPublishArgs, Checkout};
use git_assure::remote_helper::{self, HelperArgs};
use std::path::PathBuf;

const HELP: &str = "\
git-assure understands the following commands:

  setup-publish: run in a git tree, configures for push
      [--remote NAME] [--branch NAME] [--rotate] [--artifact NAME] [--bundle-tool]
  extract-tool WHERE: writes 'assure-tool' to WHERE
  setup-downstream: run in a clone, verifies fetches from the remote
      [--remote NAME] [--branch NAME] (--verify-key VK | --from ARTIFACT)
  post-commit: signs HEAD (run by the installed hook)
  sign [REV]: signs an existing commit
  verify [REV] [--remote NAME] [--branch NAME]: checks a commit's signature
  pull [--remote NAME] [--branch NAME]: fetches, verifies and fast-forwards
  bindings: lists trusted keys per remote branch
  help, --help: prints this message

global options: --repo DIR, --config FILE, --verbose
";

/// git-assure - signed and verified git history
#[derive(Parser)]
#[command(name = "git-assure")]
#[command(author, version, about, long_about = None)]
#[command(disable_help_subcommand = true)]
#[command(override_help = HELP)]
struct Cli {
    /// Checkout to operate on (defaults to the current directory)
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    /// Configuration file (can also be set via GIT_ASSURE_CONFIG)
    #[arg(long, env = "GIT_ASSURE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the available commands
    Help,

    /// Configure this checkout to sign a branch and push the signatures
    SetupPublish {
        #[arg(long, default_value = "origin")]
        remote: String,

        /// Branch to sign (defaults to the current branch)
        #[arg(long)]
        branch: Option<String>,

        /// Replace an existing signing key
        #[arg(long)]
        rotate: bool,

        /// Name of the generated downstream artifact
        #[arg(long)]
        artifact: Option<String>,

        /// Copy this executable beside the artifact as 'assure-tool'
        #[arg(long)]
        bundle_tool: bool,
    },

    /// Write 'assure-tool' to WHERE
    ExtractTool {
        #[arg(value_name = "WHERE")]
        destination: PathBuf,
    },

    /// Configure this checkout to verify a remote branch
    SetupDownstream {
        #[arg(long)]
        remote: Option<String>,

        #[arg(long)]
        branch: Option<String>,

        #[arg(long, conflicts_with = "from")]
        verify_key: Option<String>,

        /// Read remote, branch and key from a generated artifact
        #[arg(long, value_name = "ARTIFACT")]
        from: Option<PathBuf>,
    },

    /// Sign HEAD (run by the post-commit hook)
    PostCommit,

    /// Sign an existing commit
    Sign {
        #[arg(default_value = "HEAD")]
        revision: String,
    },

    /// Check a local commit against a branch's trusted key
    Verify {
        #[arg(default_value = "HEAD")]
        revision: String,

        #[arg(long, default_value = "origin")]
        remote: String,

        #[arg(long)]
        branch: Option<String>,
    },

    /// Fetch through the verification proxy and fast-forward
    Pull {
        #[arg(long, default_value = "origin")]
        remote: String,

        #[arg(long)]
        branch: Option<String>,
    },

    /// List trust bindings
    Bindings,

    /// Serve the git remote-helper protocol (run by git)
    #[command(hide = true)]
    RemoteHelper(HelperArgs),
}

#[derive(Parser)]
#[command(name = "git-remote-assure", version)]
struct HelperCli {
    #[command(flatten)]
    args: HelperArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let argv0 = std::env::args_os().next().map(PathBuf::from).unwrap_or_default();
    if remote_helper::invoked_as_helper(&argv0) {
        return remote_helper::run(HelperCli::parse().args).await;
    }

    let cli = Cli::parse();
    let command = match cli.command {
        Some(Commands::RemoteHelper(args)) => return remote_helper::run(args).await,
        command => command,
    };

    git_assure::init_tracing(cli.verbose, "warn");

    let command = match command {
        None | Some(Commands::Help) => {
            print!("{}", HELP);
            return Ok(());
        }
        Some(Commands::ExtractTool { destination }) => {
            return commands::extract_tool::run(&destination).await;
        }
        Some(command) => command,
    };

    let checkout = Checkout::open(cli.repo.as_deref(), cli.config.as_deref()).await?;

    match command {
        Commands::SetupPublish {
            remote,
            branch,
            rotate,
            artifact,
            bundle_tool,
        } => {
            commands::setup_publish::run(
                &checkout,
                SetupPublishArgs {
                    remote,
                    branch,
                    rotate,
                    artifact,
                    bundle_tool,
                },
            )
            .await?
        }
        Commands::SetupDownstream {
            remote,
            branch,
            verify_key,
            from,
        } => {
            commands::setup_downstream::run(
                &checkout,
                SetupDownstreamArgs {
                    remote,
                    branch,
                    verify_key,
                    from,
                },
            )
            .await?
        }
        Commands::PostCommit => commands::post_commit::run(&checkout).await?,
        Commands::Sign { revision } => commands::sign::run(&checkout, &revision).await?,
        Commands::Verify {
            revision,
            remote,
            branch,
        } => commands::verify::run(&checkout, &revision, &remote, branch).await?,
        Commands::Pull { remote, branch } => {
            commands::pull::run(&checkout, &remote, branch).await?
        }
        Commands::Bindings => commands::bindings::run(&checkout).await?,
        Commands::Help | Commands::ExtractTool { .. } | Commands::RemoteHelper(_) => {}
    }

    Ok(())
}
