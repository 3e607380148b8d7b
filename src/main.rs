use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use hotwatch::notify::Event;
use hotwatch::{
    blocking::{Flow, Hotwatch},
    EventKind,
};
use miette::{bail, miette, IntoDiagnostic, Result};

use vm16::{Air, Outcome, RunEnvironment, RunState};

/// vm16 assembles and runs programs for a small 16-bit machine.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.asm` or `.bin` file to run
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run text `.asm` or binary `.bin` file and print the final machine state
    Run {
        /// `.asm` or `.bin` file to run
        name: PathBuf,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Create binary `.bin` file to run later or view compiled data
    Compile {
        /// `.asm` file to compile
        name: PathBuf,
        /// Destination to output .bin file
        dest: Option<PathBuf>,
        /// Also write a `.txt` file with one binary string per word
        #[arg(short, long)]
        text: bool,
        /// Print address, encoding and disassembly of every word
        #[arg(short, long)]
        listing: bool,
    },
    /// Check a `.asm` file without running or outputting binary
    Check {
        /// File to check
        name: PathBuf,
    },
    /// Print the disassembly of a binary `.bin` file
    Disasm {
        /// `.bin` file to read
        name: PathBuf,
    },
    /// Place a watch on a `.asm` file to receive constant assembler updates
    Watch {
        /// `.asm` file to watch
        name: PathBuf,
    },
}

#[derive(clap::Args, Default)]
struct RunOpts {
    /// Print every executed instruction to stderr
    #[arg(long)]
    trace: bool,
    /// Instructions executed between host pauses
    #[arg(long, default_value_t = RunEnvironment::DEFAULT_STEPS_PER_SLICE)]
    steps_per_slice: u32,
    /// Stop after this many instructions
    #[arg(long)]
    max_steps: Option<u64>,
    /// Milliseconds to sleep between slices
    #[arg(long)]
    pace_ms: Option<u64>,
    /// Write the video window to a PPM image after the run
    #[arg(long)]
    vram: Option<PathBuf>,
}

fn main() -> miette::Result<()> {
    use MsgColor::*;
    let args = Args::parse();
    vm16::env::init();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(vm16::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    if let Some(command) = args.command {
        match command {
            Command::Run { name, opts } => run(&name, &opts),
            Command::Compile {
                name,
                dest,
                text,
                listing,
            } => {
                file_message(Green, "Assembling", &name);
                let contents = fs::read_to_string(&name).into_diagnostic()?;
                let air = vm16::assemble(&contents)?;
                let words = air.emit();

                let out_file_name = match dest {
                    Some(dest) => dest,
                    None => name.with_extension("bin"),
                };
                let mut file = File::create(&out_file_name).into_diagnostic()?;
                file.write_all(&vm16::to_bytes(&words)).into_diagnostic()?;

                message(Green, "Finished", "emit binary");
                file_message(Green, "Saved", &out_file_name);

                if text {
                    let text_file_name = out_file_name.with_extension("txt");
                    fs::write(&text_file_name, vm16::to_text(&words)).into_diagnostic()?;
                    file_message(Green, "Saved", &text_file_name);
                }
                if listing {
                    print!("{}", vm16::listing(&words));
                }
                Ok(())
            }
            Command::Check { name } => {
                file_message(Green, "Checking", &name);
                let contents = fs::read_to_string(&name).into_diagnostic()?;
                let air = vm16::assemble(&contents)?;
                message(Green, "Success", &format!("{} instructions, no errors found!", air.len()));
                Ok(())
            }
            Command::Disasm { name } => {
                let words = read_binary(&name)?;
                print!("{}", vm16::listing(&words));
                Ok(())
            }
            Command::Watch { name } => watch(name),
        }
    } else {
        if let Some(path) = args.path {
            run(&path, &RunOpts::default_run())
        } else {
            println!("\n~ vm16 v{VERSION} ~");
            println!("{SHORT_INFO}");
            std::process::exit(0);
        }
    }
}

impl RunOpts {
    /// Options for the bare `vm16 <file>` form, same as `run` without flags.
    fn default_run() -> Self {
        RunOpts {
            steps_per_slice: RunEnvironment::DEFAULT_STEPS_PER_SLICE,
            ..Default::default()
        }
    }
}

enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path) {
    let right = format!("target {}", right.display());
    message(color, left, &right);
}

fn message(color: MsgColor, left: &str, right: &str) {
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    println!("{left:>12} {right}");
}

fn read_binary(name: &Path) -> Result<Vec<u16>> {
    let buffer = fs::read(name).into_diagnostic()?;
    vm16::from_bytes(&buffer).ok_or_else(|| miette!("File is not aligned to 16 bits"))
}

fn run(name: &Path, opts: &RunOpts) -> Result<()> {
    file_message(MsgColor::Green, "Assembling", name);
    let state = match name.extension().and_then(|ext| ext.to_str()) {
        Some("bin") => RunState::from_raw(&read_binary(name)?)?,
        Some("asm") => {
            let contents = fs::read_to_string(name).into_diagnostic()?;
            let air: Air = vm16::assemble(&contents)?;
            RunState::try_from(&air)?
        }
        Some(_) => bail!("File has unknown extension. Exiting..."),
        None => bail!("File has no extension. Exiting..."),
    };

    let mut program = RunEnvironment::new(state);
    program.set_trace(opts.trace || vm16::env::is_trace_enabled());
    program.set_steps_per_slice(opts.steps_per_slice);
    program.set_max_steps(opts.max_steps);
    program.set_pace(opts.pace_ms.map(Duration::from_millis));

    message(MsgColor::Green, "Running", "emitted binary");
    let outcome = program.run();
    print!("{}", program.state().dump());

    if let Some(path) = &opts.vram {
        write_ppm(path, program.state())?;
        file_message(MsgColor::Green, "Saved", path);
    }

    let steps = program.steps();
    match outcome {
        Outcome::Halted => {
            message(MsgColor::Green, "Completed", &format!("halted after {steps} steps"));
            Ok(())
        }
        Outcome::StepLimit => {
            message(MsgColor::Cyan, "Stopped", &format!("step limit reached after {steps} steps"));
            Ok(())
        }
        Outcome::Faulted(fault) => {
            message(MsgColor::Red, "Faulted", &format!("after {steps} steps"));
            Err(miette!(
                code = "run::fault",
                help = "the machine halts on the first fault",
                "{fault}"
            ))
        }
    }
}

/// Binary PPM of the video window.
fn write_ppm(path: &Path, state: &RunState) -> Result<()> {
    let mut out = format!("P6\n{} {}\n255\n", vm16::VRAM_WIDTH, vm16::VRAM_HEIGHT).into_bytes();
    for pixel in state.vram() {
        out.extend_from_slice(&vm16::rgb565_to_rgb888(*pixel));
    }
    fs::write(path, out).into_diagnostic()
}

fn watch(name: PathBuf) -> Result<()> {
    if !name.is_file() {
        bail!("File does not exist. Exiting...")
    }
    // Editors often replace the file instead of writing it, so watch its directory
    let dir = name
        .parent()
        .filter(|dir| dir.is_dir())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    watch_banner(&name, None);
    let mut watcher =
        Hotwatch::new_with_custom_delay(Duration::from_millis(500)).into_diagnostic()?;
    watcher
        .watch(dir, move |event: Event| {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Remove(_)) {
                watch_banner(&name, Some("file change detected"));
                // Let the editor finish writing
                sleep(Duration::from_millis(50));
                recheck(&name);
            }
            Flow::Continue
        })
        .into_diagnostic()?;
    watcher.run();
    Ok(())
}

fn watch_banner(name: &Path, reason: Option<&str>) {
    // Clear screen and move cursor to top left
    print!("\x1B[2J\x1B[2;1H");
    file_message(MsgColor::Green, "Watching", name);
    if let Some(reason) = reason {
        message(MsgColor::Green, "Re-checking", reason);
    }
    message(MsgColor::Cyan, "Help", "press CTRL+C to exit");
}

fn recheck(name: &Path) {
    let contents = match fs::read_to_string(name) {
        Ok(contents) => contents,
        Err(e) => {
            eprintln!("{e}. Exiting...");
            std::process::exit(1)
        }
    };
    match vm16::assemble(&contents) {
        Ok(air) => message(
            MsgColor::Green,
            "Success",
            &format!("{} instructions, no errors found!", air.len()),
        ),
        Err(e) => println!("\n{e:?}"),
    }
}

const SHORT_INFO: &str = r"
vm16 assembles and runs programs for a 16-bit register machine.
Please use `-h` or `--help` to access the usage instructions.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
