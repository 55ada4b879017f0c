use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use clap_complete::aot::{Bash, Fish, PowerShell, Zsh};

#[derive(Clone, Debug, Parser)]
pub enum Commands {
    ManPages(ManPageOptions),
    ShellCompletions(CompletionOptions),
}

#[derive(Clone, Debug, Parser)]
pub struct ManPageOptions {
    #[arg(long)]
    pub out: PathBuf,
}

#[derive(Clone, Debug, Parser)]
pub struct CompletionOptions {
    #[arg(long)]
    pub out: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let sh = xshell::Shell::new()?;
    let commands = Commands::parse();
    match commands {
        Commands::ManPages(gen_options) => generate_man_pages(gen_options, &sh),
        Commands::ShellCompletions(gen_options) => generate_shell_completions(gen_options),
    }
}

fn generate_man_pages(gen_options: ManPageOptions, sh: &xshell::Shell) -> anyhow::Result<()> {
    let out = &gen_options.out;
    sh.create_dir(out)?;

    // shipped next to the pages for packagers
    let example_config = sh.read_file("vrprofile/etc/example-config.toml")?;
    sh.write_file(out.join("vrprofile.example.toml"), example_config)?;

    clap_mangen::generate_to(vrprofile::command::Options::command(), out)?;
    Ok(())
}

fn generate_shell_completions(gen_options: CompletionOptions) -> anyhow::Result<()> {
    let mut cli = vrprofile::command::Options::command();
    let out = &gen_options.out;
    clap_complete::generate_to(Bash, &mut cli, "vrprofile", out)?;
    clap_complete::generate_to(Fish, &mut cli, "vrprofile", out)?;
    clap_complete::generate_to(Zsh, &mut cli, "vrprofile", out)?;
    clap_complete::generate_to(PowerShell, &mut cli, "vrprofile", out)?;
    Ok(())
}
