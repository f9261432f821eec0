use tonelink_control::ControllerConfig;
use tonelink_registry::{Parameter, RegistryError};

use crate::cmd::{connect_amp, load_registry, AmpSession, Globals, SetArgs};
use crate::exit::{control_error, registry_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_values, ValueRow};

pub async fn run(args: SetArgs, globals: &Globals) -> CliResult<i32> {
    let registry = load_registry(globals)?;
    let param = registry
        .require(&args.key)
        .map_err(|err| registry_error("set", err))?;
    if param.is_virtual() {
        return Err(CliError::new(
            USAGE,
            format!("{} has no hardware address and cannot be set on the amp", args.key),
        ));
    }
    let value = parse_value(param, &args.value)?;

    let AmpSession {
        controller,
        receiver: _receiver,
        events: _events,
    } = connect_amp(&args.path, registry, ControllerConfig::default()).await?;
    controller
        .set_parameter_manually(&args.key, value)
        .await
        .map_err(|err| control_error("set failed", err))?;

    let row = controller.with_registry(|r| r.get(&args.key).map(|p| ValueRow::new(p, value)));
    if let Some(row) = row {
        print_values(&[row], globals.format);
    }
    Ok(SUCCESS)
}

/// Accept a number or one of the parameter's labels (case-insensitive).
fn parse_value(param: &Parameter, input: &str) -> CliResult<u8> {
    let range = param.range();
    let value = match input.trim().parse::<u8>() {
        Ok(value) => value,
        Err(_) => {
            let index = param
                .labels()
                .iter()
                .position(|label| label.eq_ignore_ascii_case(input.trim()))
                .ok_or_else(|| {
                    CliError::new(
                        USAGE,
                        format!("invalid value for {}: {input}", param.key()),
                    )
                })?;
            u8::try_from(index)
                .ok()
                .and_then(|index| range.min.checked_add(index))
                .ok_or_else(|| CliError::new(USAGE, format!("invalid value for {}: {input}", param.key())))?
        }
    };

    if !range.contains(value) {
        return Err(registry_error(
            "set",
            RegistryError::OutOfRange {
                key: param.key().to_string(),
                value,
                min: range.min,
                max: range.max,
            },
        ));
    }
    Ok(value)
}
