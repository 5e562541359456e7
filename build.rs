// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

const DEFAULT_DB_PATH: &str = "/var/lib/modsmith/modsmith.db";

fn db_path_arg() -> Arg {
    Arg::new("db_path")
        .short('d')
        .long("db-path")
        .value_name("PATH")
        .default_value(DEFAULT_DB_PATH)
        .help("Database path")
}

fn host_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("root")
            .short('r')
            .long("root")
            .default_value(".")
            .help("Host application root directory"),
    )
    .arg(
        Arg::new("theme")
            .short('t')
            .long("theme")
            .help("Default theme directory (default: <root>/Themes/default)"),
    )
}

fn build_cli() -> Command {
    Command::new("modsmith")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Modsmith Contributors")
        .about("Package modification engine with undo, theme fan-out and install history")
        .subcommand_required(false)
        .subcommand(
            Command::new("init")
                .about("Initialize the Modsmith database")
                .arg(db_path_arg()),
        )
        .subcommand(
            host_args(Command::new("apply"))
                .about("Apply a modification document to the host tree")
                .arg(Arg::new("document").required(true).help("Path to the modification XML"))
                .arg(
                    Arg::new("undo")
                        .long("undo")
                        .action(ArgAction::SetTrue)
                        .help("Reverse the document instead of applying it"),
                )
                .arg(
                    Arg::new("dry_run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Report what would change without writing"),
                )
                .arg(
                    Arg::new("backup")
                        .long("backup")
                        .action(ArgAction::SetTrue)
                        .help("Keep a <file>~ copy of every overwritten file"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the action log as JSON"),
                ),
        )
        .subcommand(
            host_args(Command::new("install"))
                .about("Install or upgrade a package archive (tar.gz or zip)")
                .arg(Arg::new("archive").required(true).help("Path to the package archive"))
                .arg(db_path_arg())
                .arg(
                    Arg::new("app_version")
                        .short('a')
                        .long("app-version")
                        .required(true)
                        .help("Host application version"),
                )
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Apply even when the dry run reports failures"),
                )
                .arg(
                    Arg::new("backup")
                        .long("backup")
                        .action(ArgAction::SetTrue)
                        .help("Keep a <file>~ copy of every overwritten file"),
                )
                .arg(
                    Arg::new("actor")
                        .long("actor")
                        .default_value("modsmith")
                        .help("Name recorded as the installing member"),
                ),
        )
        .subcommand(
            host_args(Command::new("uninstall"))
                .about("Uninstall an installed package")
                .arg(Arg::new("package_id").required(true).help("Package id, e.g. author:package"))
                .arg(db_path_arg())
                .arg(
                    Arg::new("app_version")
                        .short('a')
                        .long("app-version")
                        .required(true)
                        .help("Host application version"),
                )
                .arg(
                    Arg::new("archive")
                        .long("archive")
                        .help("Package archive (default: the archive kept at install time)"),
                )
                .arg(
                    Arg::new("actor")
                        .long("actor")
                        .default_value("modsmith")
                        .help("Name recorded as the removing member"),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List installed packages")
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("history")
                .about("Show every install record of a package")
                .arg(Arg::new("package_id").required(true).help("Package id"))
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("check")
                .about("Check a version against a version expression")
                .arg(Arg::new("candidate").required(true).help("Version, e.g. 2.0.4"))
                .arg(
                    Arg::new("expression")
                        .required(true)
                        .help("Expression, e.g. \"2.0 - 2.0.99, 2.1 RC*\""),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("modsmith.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
