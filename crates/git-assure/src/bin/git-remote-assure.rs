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

//! git-remote-assure - remote helper git runs for `assure::<url>` remotes.
//!
//! Usage (by git): `git-remote-assure <remote> <url>`.

use anyhow::Result;
use clap::Parser;
use git_assure::remote_helper::{self, HelperArgs};

#[derive(Parser)]
#[command(name = "git-remote-assure")]
#[command(author, version, about = "Verifying remote helper for assure:: remotes", long_about = None)]
struct Cli {
    #[command(flatten)]
    args: HelperArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    remote_helper::run(Cli::parse().args).await
}
