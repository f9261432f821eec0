use crate::cmd::{load_registry, Globals, ParamsArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::print_params;

pub fn run(_args: ParamsArgs, globals: &Globals) -> CliResult<i32> {
    let registry = load_registry(globals)?;
    print_params(&registry, globals.format);
    Ok(SUCCESS)
}
