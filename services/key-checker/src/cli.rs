//! Command line flags
//!
//! `key-checker [--config PATH] [--keys PATH|-] [--serve] [--output PATH] [--reveal-keys]`

use crate::error::{Error, Result};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub config: Option<String>,
    /// Key file, `-` for stdin; stdin when absent
    pub keys: Option<String>,
    pub serve: bool,
    /// Report file; stdout when absent
    pub output: Option<String>,
    pub reveal_keys: bool,
}

impl CliArgs {
    /// Parse arguments without the program name.
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut cli = CliArgs::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => cli.config = Some(value(&mut iter, "--config")?),
                "--keys" => cli.keys = Some(value(&mut iter, "--keys")?),
                "--output" => cli.output = Some(value(&mut iter, "--output")?),
                "--serve" => cli.serve = true,
                "--reveal-keys" => cli.reveal_keys = true,
                other => return Err(Error::UnknownArgument(other.to_string())),
            }
        }
        Ok(cli)
    }
}

fn value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &'static str) -> Result<String> {
    iter.next().cloned().ok_or(Error::MissingArgValue(flag))
}
