//! Command line: exactly one of `-s` (send) or `-r` (receive).

use std::ffi::OsString;
use std::fmt;
use std::path::Path;

use clap::{App, AppSettings, Arg, ArgGroup};

static SEND_ARG: &str = "send";
static RECEIVE_ARG: &str = "receive";
static MODE_GROUP: &str = "mode";

pub const USAGE: &str = "FORMAT: stress_client [-r | -s]";

/// Which half of the stress test this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Send,
    Receive,
}

impl Mode {
    /// log file for this mode, relative to the working directory
    pub fn log_path(self) -> &'static Path {
        match self {
            Mode::Send => Path::new("./sender.log"),
            Mode::Receive => Path::new("./receiver.log"),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Mode::Send => f.write_str("sender"),
            Mode::Receive => f.write_str("receiver"),
        }
    }
}

fn app() -> App<'static, 'static> {
    App::new("stress_client")
        .about("Message queue stress client")
        .setting(AppSettings::DisableHelpFlags)
        .setting(AppSettings::DisableVersion)
        .arg(
            Arg::with_name(SEND_ARG)
                .short("s")
                .help("publish a message every 30 seconds and log each acknowledgment"),
        )
        .arg(
            Arg::with_name(RECEIVE_ARG)
                .short("r")
                .help("consume from the queue and log each received message"),
        )
        .group(
            ArgGroup::with_name(MODE_GROUP)
                .args(&[SEND_ARG, RECEIVE_ARG])
                .required(true),
        )
}

/// Parse the process arguments, program name included.
///
/// Anything other than a single `-s` or `-r` is an error; the caller prints
/// [`USAGE`] and exits.
pub fn parse_mode<I, T>(args: I) -> Result<Mode, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = app().get_matches_from_safe(args)?;
    if matches.is_present(SEND_ARG) {
        Ok(Mode::Send)
    } else {
        Ok(Mode::Receive)
    }
}
