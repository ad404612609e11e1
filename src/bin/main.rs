use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use argh::FromArgs;
use log::{error, info, warn, LevelFilter};
use libespmig_cli_r::abort_window::ProgressWindow;
use libespmig_cli_r::catalog::PartitionCatalog;
use libespmig_cli_r::config::{generate_template_config_file, Config};
use libespmig_cli_r::error::{ConfigError, Error, OtaError};
use libespmig_cli_r::flash::ImageFileFlash;
use libespmig_cli_r::migrator::MigrationOutcome;
use libespmig_cli_r::ota::ProcessRestart;
use libespmig_cli_r::partition::{PartitionSubtype, PartitionType};
use libespmig_cli_r::table::CandidateTableImage;
use libespmig_cli_r::{check_candidate_image, list_partitions, run, run_boot_switch, run_migration};

#[derive(FromArgs)]
/// espmig command line multi call tool,
/// migrate the ESP partition table of a flash image in place
/// and switch its OTA boot slot
struct CmdProg {
    /// config file (defaults apply when omitted)
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,
    /// flash image file to operate on
    #[argh(option, short = 'i')]
    image: Option<PathBuf>,
    /// verbose logging
    #[argh(switch, short = 'v')]
    verbose: bool,
    #[argh(subcommand)]
    /// subcommand
    mode: Mode,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Mode {
    List(ListMode),
    Check(CheckMode),
    Migrate(MigrateMode),
    Switch(SwitchMode),
    Run(RunMode),
    Template(TemplateMode),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "list", example = "espmig -i flash.bin list --type data")]
/// list partitions of the live table
struct ListMode {
    /// partition type (app, data or a number)
    #[argh(option, short = 't', long = "type")]
    ty: Option<String>,
    /// partition subtype (needs --type)
    #[argh(option, short = 's')]
    subtype: Option<String>,
    /// partition label
    #[argh(option, short = 'l')]
    label: Option<String>,
}

#[derive(FromArgs)]
#[argh(
    subcommand,
    name = "check",
    description = "Decode and validate a candidate table without modifying flash. \
With -i the live table is checked against the size gate too.",
    example = "espmig check partition-table.bin",
    example = "espmig -i flash.bin check partition-table.bin"
)]
/// check candidate partition table
struct CheckMode {
    /// candidate partition table binary
    #[argh(positional)]
    candidate: PathBuf,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "migrate", example = "espmig -i flash.bin migrate partition-table.bin")]
/// replace the partition table once the target partition is validated
struct MigrateMode {
    /// candidate partition table binary
    #[argh(positional)]
    candidate: PathBuf,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "switch")]
/// select the other OTA slot for the next boot and restart
struct SwitchMode {}

#[derive(FromArgs)]
#[argh(subcommand, name = "run", example = "espmig -c espmig.toml -i flash.bin run partition-table.bin")]
/// list, migrate, then switch the boot slot when ota.enabled is set
struct RunMode {
    /// candidate partition table binary
    #[argh(positional)]
    candidate: PathBuf,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "template")]
/// write a template config file
struct TemplateMode {
    /// output file
    #[argh(positional)]
    output: PathBuf,
}

fn main() -> ExitCode {
    let args: CmdProg = argh::from_env();
    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();

    let ret = match load_config(&args.config) {
        Ok(config) => dispatch(&args, &config),
        Err(e) => Err(e.into()),
    };
    match ret {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_fatal() => {
            error!("{}", e);
            error!("The partition table region may be unusable, reflash the device");
            ExitCode::from(2)
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(1)
        }
    }
}

fn load_config(path: &Option<PathBuf>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => Config::from_file(path),
        None => Ok(Config::default()),
    }
}

fn open_image(image: &Option<PathBuf>) -> Result<ImageFileFlash, Error> {
    let path = image
        .as_ref()
        .ok_or_else(|| ConfigError::Invalid("this mode needs --image <flash image>".to_string()))?;
    Ok(ImageFileFlash::open(path)?)
}

fn read_candidate(path: &PathBuf) -> Result<CandidateTableImage, Error> {
    let bytes = fs::read(path).map_err(ConfigError::from)?;
    info!("Candidate table {} ({} bytes)", path.display(), bytes.len());
    Ok(CandidateTableImage::new(bytes)?)
}

fn dispatch(args: &CmdProg, config: &Config) -> Result<(), Error> {
    match &args.mode {
        Mode::List(list) => {
            let ty = match &list.ty {
                Some(name) => Some(PartitionType::parse(name).ok_or_else(|| {
                    ConfigError::Invalid(format!("unknown partition type '{}'", name))
                })?),
                None => None,
            };
            let subtype = match (&list.subtype, ty) {
                (Some(name), Some(ty)) => Some(PartitionSubtype::parse(ty, name).ok_or_else(|| {
                    ConfigError::Invalid(format!("unknown subtype '{}' for type {}", name, ty))
                })?),
                (Some(_), None) => {
                    return Err(ConfigError::Invalid("--subtype needs --type".to_string()).into());
                }
                (None, _) => None,
            };
            let mut flash = open_image(&args.image)?;
            list_partitions(&mut flash, config.table.offset, ty, subtype, list.label.as_deref())?;
            Ok(())
        }
        Mode::Check(check) => {
            let image = read_candidate(&check.candidate)?;
            let target = config.migration.target()?;
            let live = match &args.image {
                Some(_) => {
                    let mut flash = open_image(&args.image)?;
                    Some(PartitionCatalog::load(&mut flash, config.table.offset)?)
                }
                None => None,
            };
            let report = check_candidate_image(&image, &target, live.as_ref())?;
            if report.is_ok() {
                println!("Check done, {} partitions, no problems", report.entries);
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{} problem(s) in candidate table", report.problems.len())).into())
            }
        }
        Mode::Migrate(migrate) => {
            let image = read_candidate(&migrate.candidate)?;
            let mut flash = open_image(&args.image)?;
            report_migration(run_migration(&mut flash, &mut ProgressWindow::default(), config, &image))
        }
        Mode::Switch(_) => {
            let mut flash = open_image(&args.image)?;
            match run_boot_switch(&mut flash, &mut ProgressWindow::default(), &mut ProcessRestart, config) {
                Error::Ota(OtaError::NoAlternateSlot(label)) => {
                    println!("No alternate OTA slot besides '{}', boot slot unchanged", label);
                    Ok(())
                }
                stopped => Err(stopped),
            }
        }
        Mode::Run(run_mode) => {
            let image = read_candidate(&run_mode.candidate)?;
            let mut flash = open_image(&args.image)?;
            let report = run(&mut flash, &mut ProgressWindow::default(), &mut ProcessRestart, config, &image)?;
            report_migration(report.migration.map_err(Error::from))?;
            if let Some(stopped) = report.boot_switch {
                warn!("Boot slot unchanged: {}", stopped);
            }
            Ok(())
        }
        Mode::Template(template) => {
            generate_template_config_file(&template.output)?;
            println!("Template written to {}", template.output.display());
            Ok(())
        }
    }
}

/// Non-fatal migration aborts are expected outcomes, not failures of the tool
fn report_migration(result: Result<MigrationOutcome, Error>) -> Result<(), Error> {
    match result {
        Ok(MigrationOutcome::Applied) => {
            println!("Done, partition table replaced");
            Ok(())
        }
        Ok(MigrationOutcome::AlreadyApplied) => {
            println!("Nothing to do, partition table already migrated");
            Ok(())
        }
        Err(Error::Migration(e)) if !e.is_fatal() => {
            println!("Migration skipped: {}", e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}
