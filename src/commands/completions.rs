use anyhow::Result;
use clap::{Args, CommandFactory, ValueEnum};
use clap_complete::{generate, shells};
use std::io::Write;

use crate::Cli;

#[derive(Args, Debug)]
pub struct CompletionsCommand {
    /// Shell to generate completions for
    #[arg(value_enum)]
    shell: Shell,

    /// Output to file instead of stdout
    #[arg(short, long)]
    output: Option<String>,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    Posh, // PowerShell
    Elvish,
}

impl CompletionsCommand {
    pub fn execute(&self) -> Result<()> {
        match &self.output {
            Some(path) => {
                let mut file = std::fs::File::create(path)?;
                self.generate_into(&mut file);
                println!("Completions written to {}", path);
            }
            None => self.generate_into(&mut std::io::stdout()),
        }

        Ok(())
    }

    fn generate_into(&self, writer: &mut dyn Write) {
        let mut cmd = Cli::command();
        match self.shell {
            Shell::Bash => generate(shells::Bash, &mut cmd, "spoctl", writer),
            Shell::Zsh => generate(shells::Zsh, &mut cmd, "spoctl", writer),
            Shell::Fish => generate(shells::Fish, &mut cmd, "spoctl", writer),
            Shell::Posh => generate(shells::PowerShell, &mut cmd, "spoctl", writer),
            Shell::Elvish => generate(shells::Elvish, &mut cmd, "spoctl", writer),
        }
    }
}
