use std::collections::HashMap;

use tonelink_control::{run_amp_link, ControlEvent, ControllerConfig};
use tonelink_registry::{Address, Registry, RegistryError};

use crate::cmd::{connect_amp, load_registry, parse_duration, AmpSession, Globals, ReadArgs};
use crate::exit::{
    control_error, registry_error, CliError, CliResult, SUCCESS, TIMEOUT, TRANSPORT_ERROR, USAGE,
};
use crate::output::{print_values, ValueRow};

pub async fn run(args: ReadArgs, globals: &Globals) -> CliResult<i32> {
    let registry = load_registry(globals)?;
    let timeout = parse_duration(&args.timeout)?;
    let mut config = ControllerConfig::default();
    config.sequencer.inter_read_delay = parse_duration(&args.delay)?;

    let wanted = wanted_reads(&registry, &args.keys)?;
    let AmpSession {
        controller,
        receiver,
        mut events,
    } = connect_amp(&args.path, registry, config).await?;

    let keys: Vec<&str> = wanted.iter().map(|(key, _)| key.as_str()).collect();
    let collect = async {
        let report = controller
            .bulk_read(&keys)
            .await
            .map_err(|err| control_error("read failed", err))?;

        // Answers are keyed by whichever parameter owns the address in the
        // amp's current mode, so match them up by address.
        let mut values: HashMap<Address, u8> = HashMap::new();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        while !wanted.iter().all(|(_, address)| values.contains_key(address)) {
            tokio::select! {
                event = events.recv() => match event {
                    Some(ControlEvent::ValueUpdate { key, value, .. }) => {
                        let address = controller
                            .with_registry(|r| r.get(&key).and_then(|p| p.address()));
                        if let Some(address) = address {
                            values.insert(address, value);
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
                () = &mut deadline => break,
            }
        }
        Ok::<_, CliError>((report, values))
    };

    let (report, values) = tokio::select! {
        result = collect => result?,
        result = run_amp_link(&controller, receiver) => {
            result.map_err(|err| control_error("amp link failed", err))?;
            return Err(CliError::new(TRANSPORT_ERROR, "amp closed the connection"));
        }
    };

    let mut rows = Vec::with_capacity(wanted.len());
    let mut missing = Vec::new();
    for (key, address) in &wanted {
        let row = values.get(address).and_then(|value| {
            controller.with_registry(|r| r.get(key).map(|p| ValueRow::new(p, *value)))
        });
        match row {
            Some(row) => rows.push(row),
            None => missing.push(key.as_str()),
        }
    }
    print_values(&rows, globals.format);

    if !report.is_complete() {
        for (key, err) in &report.failed {
            eprintln!("error: read of {key} failed: {err}");
        }
        return Ok(TRANSPORT_ERROR);
    }
    if !missing.is_empty() {
        eprintln!("error: no answer for {}", missing.join(", "));
        return Ok(TIMEOUT);
    }
    Ok(SUCCESS)
}

/// Keys to read with their addresses, in request order.
///
/// With no keys given, every address is read once, for the parameter that
/// owns it in the current mode.
fn wanted_reads(registry: &Registry, keys: &[String]) -> CliResult<Vec<(String, Address)>> {
    if keys.is_empty() {
        let mut seen = Vec::new();
        let mut out = Vec::new();
        for param in registry.iter() {
            let Some(address) = param.address() else {
                continue;
            };
            let owns = registry
                .resolve(address)
                .is_some_and(|owner| owner.key() == param.key());
            if owns && !seen.contains(&address) {
                seen.push(address);
                out.push((param.key().to_string(), address));
            }
        }
        return Ok(out);
    }

    let mut out: Vec<(String, Address)> = Vec::with_capacity(keys.len());
    for key in keys {
        let param = registry
            .get(key)
            .ok_or_else(|| registry_error("read", RegistryError::UnknownParameter(key.clone())))?;
        let address = param.address().ok_or_else(|| {
            CliError::new(USAGE, format!("{key} has no hardware address and cannot be read"))
        })?;
        if !out.iter().any(|(k, _)| k == key) {
            out.push((key.clone(), address));
        }
    }
    Ok(out)
}
