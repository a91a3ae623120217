//! Renders man pages for `powervs-vm` and each of its subcommands into
//! `OUT_DIR`.

use std::env;
use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Command, CommandFactory};
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

const BIN_NAME: &str = "powervs-vm";

fn render(man: Man, path: &Path) -> Result<(), Box<dyn Error>> {
    let mut page = Vec::new();
    man.render(&mut page)?;
    fs::write(path, page)?;
    Ok(())
}

fn subcommand_pages(command: &Command, out_dir: &Path) -> Result<(), Box<dyn Error>> {
    for sub in command.get_subcommands() {
        let title = format!("{BIN_NAME}-{}", sub.get_name());
        let path = out_dir.join(format!("{title}.1"));
        render(Man::new(sub.clone()).title(title), &path)?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR is unset"))?;

    let command = Cli::command().name(BIN_NAME);
    subcommand_pages(&command, &out_dir)?;
    render(Man::new(command), &out_dir.join(format!("{BIN_NAME}.1")))
}
