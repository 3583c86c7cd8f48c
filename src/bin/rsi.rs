use std::path::{Path, PathBuf};

use structopt::StructOpt;

use rsi_tool::Rsi;

#[derive(Debug, StructOpt)]
#[structopt(about = "Converts BYOND icons to RSIs. Example: from_dmi foo.dmi foo.rsi")]
enum Opt {
    /// Will create an RSI from a BYOND DMI file.
    #[structopt(name = "from_dmi")]
    FromDmi {
        /// The DMI file to read from.
        #[structopt(parse(from_os_str))]
        input: PathBuf,

        /// The RSI to output to.
        #[structopt(parse(from_os_str))]
        output: PathBuf,
    },
}

fn main() -> eyre::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match Opt::from_args() {
        Opt::FromDmi { input, output } => from_dmi(&input, &output),
    }
}

fn from_dmi(input: &Path, output: &Path) -> eyre::Result<()> {
    let rsi = Rsi::from_dmi(input)?;

    rsi.write(output)?;

    Ok(())
}
