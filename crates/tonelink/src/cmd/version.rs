use serde::Serialize;
use tonelink_frame::HEADER;
use tonelink_registry::Registry;

use crate::cmd::{Globals, VersionArgs};
use crate::exit::{registry_error, CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct BuildInfo {
    name: &'static str,
    version: &'static str,
    target: &'static str,
    rustc: &'static str,
    git_hash: &'static str,
    sysex_header: String,
    builtin_parameters: usize,
}

pub fn run(args: VersionArgs, globals: &Globals) -> CliResult<i32> {
    if !args.extended {
        println!("tonelink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let builtin = Registry::builtin().map_err(|err| registry_error("built-in table invalid", err))?;
    let info = BuildInfo {
        name: "tonelink",
        version: env!("CARGO_PKG_VERSION"),
        target: env!("TONELINK_BUILD_TARGET"),
        rustc: option_env!("RUSTC_VERSION").unwrap_or("unknown"),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown"),
        sysex_header: HEADER
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" "),
        builtin_parameters: builtin.len(),
    };

    match globals.format {
        OutputFormat::Json => print_json(&info),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("name: {}", info.name);
            println!("version: {}", info.version);
            println!("target: {}", info.target);
            println!("rustc: {}", info.rustc);
            println!("git_hash: {}", info.git_hash);
            println!("sysex_header: {}", info.sysex_header);
            println!("builtin_parameters: {}", info.builtin_parameters);
        }
    }
    Ok(SUCCESS)
}
