use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use dfusuffix::*;

/// Add, verify or remove the USB DFU suffix of a firmware image.
///
/// Without --add or --remove the suffix of INPUT is verified and its
/// identifiers are printed.
#[derive(Parser, Debug)]
#[command(
    name = "dfusuffix",
    version,
    about = "Add, verify and remove USB DFU suffixes on firmware images"
)]
struct Cli {
    /// The firmware image to read
    #[arg()]
    input: PathBuf,

    /// Where to write the result of --add / --remove (defaults to INPUT)
    #[arg()]
    output: Option<PathBuf>,

    /// Identifiers for a new suffix as hex vid:pid or vid:pid:rev
    #[arg(short = 'v', long = "vidpid", default_value = "FFFF:FFFF:FFFF")]
    vidpid: String,

    /// Append a suffix
    #[arg(short = 'A', long = "add", conflicts_with = "remove")]
    add: bool,

    /// Strip the suffix (its CRC must be valid)
    #[arg(short = 'R', long = "remove")]
    remove: bool,

    /// Add a suffix even if the image already seems to have one
    #[arg(short = 'f', long = "force")]
    force: bool,

    /// Debug output on stderr
    #[arg(long = "verbose")]
    verbose: bool,
}

fn add(input: &Path, output: &Path, ids: DeviceIds, force: bool) -> Result<()> {
    add_suffix(input, output, ids, force)
}

// The identifiers are only used when adding a suffix.
fn verify(input: &Path, _ids: DeviceIds) -> Result<()> {
    let report = verify_suffix(input)?;
    print_verify_report(&report)?;
    Ok(())
}

fn remove(input: &Path, output: &Path, _ids: DeviceIds, _force: bool) -> Result<()> {
    remove_suffix(input, output)
}

fn run(cli: &Cli) -> i32 {
    // Rejected before touching any file.
    let ids = match cli.vidpid.parse::<DeviceIds>() {
        Ok(ids) => ids,
        Err(e) => {
            eprintln!("dfusuffix: {e}");
            return e.exit_code();
        }
    };
    log::debug!("identifiers: {ids}");

    let output = cli.output.as_deref().unwrap_or(&cli.input);

    let result = if cli.add {
        add(&cli.input, output, ids, cli.force)
    } else if cli.remove {
        remove(&cli.input, output, ids, cli.force)
    } else {
        verify(&cli.input, ids)
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("dfusuffix: {}: {}", cli.input.display(), e);
            e.exit_code()
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    log::debug!("Parsed CLI options: {:?}", cli);

    process::exit(run(&cli));
}
