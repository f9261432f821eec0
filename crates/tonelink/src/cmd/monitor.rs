use std::future::pending;

use tonelink_control::{run_amp_link, run_pedal_link, ControllerConfig, PedalConfig};
use tonelink_transport::connect;
use tracing::{info, warn};

use crate::cmd::{connect_amp, load_registry, AmpSession, Globals, MonitorArgs};
use crate::exit::{
    control_error, io_error, registry_error, transport_error, CliError, CliResult, SUCCESS,
    TRANSPORT_ERROR, USAGE,
};
use crate::output::print_event;

pub async fn run(args: MonitorArgs, globals: &Globals) -> CliResult<i32> {
    let registry = load_registry(globals)?;
    if let Some(key) = &args.select {
        registry
            .require(key)
            .map_err(|err| registry_error("select", err))?;
    }

    let mut config = ControllerConfig::default();
    if let Some(codes) = &args.footswitch_codes {
        config.pedal = pedal_codes(codes, config.pedal)?;
    }
    if let Some(polarity) = args.polarity {
        config.pedal.polarity = polarity.into();
    }

    // Connect the pedal before the amp so a bad pedal path fails fast.
    let pedal = match &args.pedal {
        Some(path) => Some(
            connect(path)
                .await
                .map_err(|err| transport_error("connect to pedal failed", err))?,
        ),
        None => None,
    };

    let AmpSession {
        controller,
        receiver,
        mut events,
    } = connect_amp(&args.path, registry, config).await?;

    let setup = async {
        if let Some(key) = &args.select {
            controller
                .select_parameter(key)
                .await
                .map_err(|err| control_error("select failed", err))?;
        }
        if !args.no_initial_read {
            let report = controller
                .read_all()
                .await
                .map_err(|err| control_error("initial read failed", err))?;
            info!(sent = report.sent.len(), failed = report.failed.len(), "initial read issued");
        }
        pending::<CliResult<()>>().await
    };

    let pedal_link = async {
        // Keep the pedal's outbound half open for as long as we listen.
        let Some((_pedal_tx, pedal_rx)) = pedal else {
            return pending::<()>().await;
        };
        if let Err(err) = run_pedal_link(&controller, pedal_rx).await {
            warn!(error = %err, "pedal link ended");
        }
        pending::<()>().await
    };

    let printer = async {
        let mut printed = 0usize;
        while let Some(event) = events.recv().await {
            print_event(&event, globals.format);
            printed += 1;
            if args.count.is_some_and(|count| printed >= count) {
                break;
            }
        }
    };

    tokio::select! {
        result = run_amp_link(&controller, receiver) => {
            result.map_err(|err| control_error("amp link failed", err))?;
            eprintln!("amp disconnected");
            Ok(TRANSPORT_ERROR)
        }
        result = setup => result.map(|()| SUCCESS),
        () = pedal_link => Ok(SUCCESS),
        () = printer => Ok(SUCCESS),
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| io_error("signal handler failed", err))?;
            info!("interrupted");
            Ok(SUCCESS)
        }
    }
}

fn pedal_codes(codes: &[u8], base: PedalConfig) -> CliResult<PedalConfig> {
    let [previous_cc, next_cc, expression_cc] = codes else {
        return Err(CliError::new(
            USAGE,
            "--footswitch-codes takes exactly three numbers: PREV,NEXT,EXPR",
        ));
    };
    let config = PedalConfig {
        previous_cc: *previous_cc,
        next_cc: *next_cc,
        expression_cc: *expression_cc,
        ..base
    };
    config
        .validate()
        .map_err(|err| control_error("footswitch codes", err))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_distinct_codes_accepted() {
        let config = pedal_codes(&[20, 21, 11], PedalConfig::default()).unwrap();
        assert_eq!(
            (config.previous_cc, config.next_cc, config.expression_cc),
            (20, 21, 11)
        );
    }

    #[test]
    fn wrong_count_or_duplicates_rejected() {
        assert_eq!(
            pedal_codes(&[20, 21], PedalConfig::default()).unwrap_err().code,
            USAGE
        );
        assert_eq!(
            pedal_codes(&[20, 20, 11], PedalConfig::default()).unwrap_err().code,
            USAGE
        );
        assert_eq!(
            pedal_codes(&[20, 21, 200], PedalConfig::default()).unwrap_err().code,
            USAGE
        );
    }
}
