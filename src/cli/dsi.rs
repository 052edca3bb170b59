use anyhow::Result;
use indicatif::MultiProgress;

use super::command::{Cli, DsiArgs};
use crate::input::InputReader;
use crate::report::DsiReport;
use esframe::structs::ac4_dsi::Ac4Dsi;

pub fn cmd_dsi(args: &DsiArgs, _cli: &Cli, _multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Decoding AC-4 descriptor: {}", args.input.display());

    let data = InputReader::new(&args.input)?.read_all()?;
    let dsi = Ac4Dsi::parse(&data)?;

    log::debug!("Decoded {} presentations from {} bytes", dsi.presentations.len(), data.len());

    print!("{}", DsiReport::new(&dsi).to_yaml()?);

    Ok(())
}
