//! Print what an import of a URDF file produces.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use hashbrown::HashMap;
use tracing::error;
use tracing_subscriber::EnvFilter;

use robot_parse::{ImportConfig, Importer, RobotAssembly};

/// Inspect the kinematic tree, drive gains and merged frames of a robot description
#[derive(Parser)]
#[command(name = "robot-info", version)]
struct Cli {
    /// URDF file to import
    urdf: PathBuf,

    /// TOML import configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory that asset references resolve against (default: the URDF's directory)
    #[arg(long)]
    asset_root: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .without_time()
        .compact()
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{}", message);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let config = match &cli.config {
        Some(path) => ImportConfig::from_file(path).map_err(|e| e.to_string())?,
        None => ImportConfig::default(),
    };

    let (root, relative) = split_path(&cli.urdf, cli.asset_root.as_deref())?;
    let assembly = Importer::new(config)
        .import_file(&root, &relative)
        .map_err(|e| e.to_string())?;
    print_assembly(&assembly);
    Ok(())
}

/// Asset root and descriptor path relative to it.
fn split_path(urdf: &Path, asset_root: Option<&Path>) -> Result<(PathBuf, PathBuf), String> {
    match asset_root {
        Some(root) => {
            let relative = urdf.strip_prefix(root).unwrap_or(urdf);
            Ok((root.to_path_buf(), relative.to_path_buf()))
        }
        None => {
            let file = urdf
                .file_name()
                .ok_or_else(|| format!("'{}' is not a file path", urdf.display()))?;
            let dir = urdf.parent().unwrap_or_else(|| Path::new(""));
            Ok((dir.to_path_buf(), PathBuf::from(file)))
        }
    }
}

fn print_assembly(assembly: &RobotAssembly) {
    println!("robot: {}", assembly.name());
    if let Some(anchor) = assembly.anchor() {
        println!("anchored by '{}' at '{}'", anchor.joint, anchor.link);
    }

    println!("\ntree:");
    let mut depth = HashMap::new();
    for (link, joint) in assembly.links_depth_first() {
        let level = link
            .parent
            .as_ref()
            .and_then(|p| depth.get(p).copied())
            .map_or(0, |d: usize| d + 1);
        depth.insert(link.name.clone(), level);
        let via = joint
            .map(|j| format!(" <- {} ({})", j.name, j.kind))
            .unwrap_or_default();
        println!(
            "{}{} [{:.3} kg]{}",
            "  ".repeat(level),
            link.name,
            link.mass(),
            via
        );
    }

    println!("\ndrives:");
    for joint in assembly.model().joints.values() {
        if let Some(drive) = &joint.drive {
            let target = drive
                .target
                .map_or_else(|| "invalid".to_string(), |t| t.to_string());
            println!(
                "  {:<24} {:<9} inertia {:>10.4e}  stiffness {:>10.4e}  damping {:>10.4e}",
                joint.name, target, drive.effective_inertia, drive.strength, drive.damping
            );
        }
    }

    println!("\nframes:");
    for link in assembly.model().links.values() {
        for frame in &link.frames {
            let t = frame.pose.translation.vector;
            println!(
                "  {:<24} on {:<20} at ({:.3}, {:.3}, {:.3})",
                frame.name, link.name, t.x, t.y, t.z
            );
        }
    }

    for joint in assembly.loop_joints() {
        println!("loop joint '{}': {} -> {}", joint.name, joint.parent, joint.child);
    }
    for warning in assembly.session().warnings() {
        println!("warning: {warning}");
    }
    for error in assembly.session().config_errors() {
        println!("config error: {error}");
    }
}
