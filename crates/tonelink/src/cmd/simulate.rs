use std::time::{Duration, Instant};

use bytes::Bytes;
use tonelink::sim::VirtualAmp;
use tonelink_registry::ValueRange;
use tonelink_transport::{BridgeListener, BridgeSender, PacketReceiver, PacketSender};
use tracing::{debug, info, warn};

use crate::cmd::{load_registry, parse_duration, Globals, SimulateArgs};
use crate::exit::{io_error, registry_error, sim_error, transport_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_activity, OutputFormat};

pub async fn run(args: SimulateArgs, globals: &Globals) -> CliResult<i32> {
    let registry = load_registry(globals)?;
    let interval = parse_duration(&args.interval)?;
    let wiggle = match &args.wiggle {
        Some(key) => {
            let param = registry
                .require(key)
                .map_err(|err| registry_error("wiggle", err))?;
            if param.is_virtual() {
                return Err(CliError::new(
                    USAGE,
                    format!("{key} has no hardware address; nothing to turn"),
                ));
            }
            Some(Knob {
                key: key.clone(),
                range: param.range(),
                rising: true,
            })
        }
        None => None,
    };

    let listener =
        BridgeListener::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    let amp = VirtualAmp::new(registry);

    tokio::select! {
        result = serve(&listener, amp, wiggle, interval, globals.format) => result.map(|()| SUCCESS),
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| io_error("signal handler failed", err))?;
            info!("interrupted");
            Ok(SUCCESS)
        }
    }
}

/// A knob the simulator sweeps back and forth.
#[derive(Debug)]
struct Knob {
    key: String,
    range: ValueRange,
    rising: bool,
}

impl Knob {
    fn next(&mut self, current: u8) -> u8 {
        let step = (self.range.span() / 8).max(1);
        if self.rising && current.saturating_add(step) > self.range.max {
            self.rising = false;
        } else if !self.rising && current < self.range.min.saturating_add(step) {
            self.rising = true;
        }
        let next = if self.rising {
            current.saturating_add(step)
        } else {
            current.saturating_sub(step)
        };
        self.range.clamp(next)
    }
}

/// Serve one controller at a time, forever.
async fn serve(
    listener: &BridgeListener,
    mut amp: VirtualAmp,
    mut wiggle: Option<Knob>,
    interval: Duration,
    format: OutputFormat,
) -> CliResult<()> {
    loop {
        let (mut tx, mut rx) = listener
            .accept()
            .await
            .map_err(|err| transport_error("accept failed", err))?;
        info!("controller connected");

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                packet = rx.recv_packet() => match packet {
                    Ok(Some(packet)) => {
                        let exchange = amp
                            .handle_packet(&packet, Instant::now())
                            .map_err(|err| sim_error("bad request", err))?;
                        for activity in &exchange.activity {
                            print_activity(activity, format);
                        }
                        if !send_all(&mut tx, exchange.replies).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("controller disconnected");
                        break;
                    }
                    Err(err) => {
                        warn!(error = %err, "controller link failed");
                        break;
                    }
                },
                _ = ticker.tick(), if wiggle.is_some() => {
                    let Some(knob) = wiggle.as_mut() else {
                        continue;
                    };
                    let current = amp.value(&knob.key).unwrap_or(knob.range.min);
                    let value = knob.next(current);
                    let packets = amp
                        .turn_knob(&knob.key, value)
                        .map_err(|err| sim_error("knob turn failed", err))?;
                    debug!(key = %knob.key, value, "turning knob");
                    if !send_all(&mut tx, packets).await {
                        break;
                    }
                }
            }
        }
    }
}

async fn send_all(tx: &mut BridgeSender, packets: Vec<Bytes>) -> bool {
    for packet in packets {
        if let Err(err) = tx.send_packet(packet).await {
            warn!(error = %err, "reply not delivered");
            return false;
        }
    }
    true
}
