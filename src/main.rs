//! hostcall - CLI

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use hostcall::util::logger;
use hostcall::{run, HostOptions, NAME, VERSION};

/// Host a WebAssembly runtime and call one guest function
#[derive(Parser, Debug)]
#[command(name = "hostcall")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    /// i64 arguments passed to the function
    #[arg(value_name = "ARGS", allow_negative_numbers = true, default_values_t = [2i64, 2])]
    args: Vec<i64>,

    /// Guest module to import
    #[arg(short, long, default_value = "Sample")]
    module: String,

    /// Exported function to call
    #[arg(short, long, default_value = "add")]
    function: String,

    /// Runtime home (default: derived from the executable location)
    #[arg(long, value_name = "DIR")]
    home: Option<PathBuf>,

    /// Guest code directory (default: derived from the executable location)
    #[arg(long, value_name = "DIR")]
    app_dir: Option<PathBuf>,

    /// Program name reported to the runtime
    #[arg(long, value_name = "NAME", default_value = hostcall::config::DEFAULT_PROGRAM_NAME)]
    program_name: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        logger::init_debug();
        eprintln!("hostcall version: {}", VERSION);
        eprintln!("Host: {}", std::env::consts::OS);
    } else {
        logger::init_cli();
    }

    let options = HostOptions {
        home: args.home,
        app_dir: args.app_dir,
        module: args.module,
        function: args.function,
        args: args.args,
        program_name: args.program_name,
    };
    let call = format!(
        "{}.{}({})",
        options.module,
        options.function,
        options
            .args
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );

    #[cfg(feature = "rnnoise")]
    {
        use hostcall::audio::{denoise_pcm, Denoiser, FRAME_SIZE};

        let mut denoiser = Denoiser::new();
        let (_, vad) = denoise_pcm(&mut denoiser, &[0i16; FRAME_SIZE]);
        println!("VAD probability: {}", vad);
    }

    let result = run(&options).with_context(|| format!("Failed to call {}", call))?;
    println!("{} = {}", call, result);

    Ok(())
}
