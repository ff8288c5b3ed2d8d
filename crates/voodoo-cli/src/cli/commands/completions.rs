//! `voodoo completions <shell>` – print a completion script.

use clap::CommandFactory;
use clap_complete::{generate, Shell};

use crate::cli::Cli;

pub fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "voodoo", &mut std::io::stdout());
}
