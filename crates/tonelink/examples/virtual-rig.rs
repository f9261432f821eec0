//! A controller driving a virtual amp over an in-memory link.
//!
//! Run with:
//!   cargo run --example virtual-rig
//!
//! Prints every controller event as JSON, one per line.

use std::error::Error;
use std::time::{Duration, Instant};

use tonelink::control::{run_amp_link, Controller, ControllerConfig, EventSink};
use tonelink::registry::Registry;
use tonelink::sim::VirtualAmp;
use tonelink::transport::memory::{duplex, DEFAULT_CAPACITY};
use tonelink::transport::{PacketReceiver, PacketSender};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let ((ctrl_tx, ctrl_rx), (mut amp_tx, mut amp_rx)) = duplex(DEFAULT_CAPACITY);

    let mut amp = VirtualAmp::new(Registry::builtin()?);
    let (sink, mut events) = EventSink::channel();
    let controller = Controller::new(Registry::builtin()?, ControllerConfig::default(), sink)?;
    controller.attach_amp(ctrl_tx).await;

    let amp_side = async {
        // Someone turns the reverb knob once the controller has gone quiet.
        let knob = tokio::time::sleep(Duration::from_secs(4));
        tokio::pin!(knob);
        let mut turned = false;

        loop {
            let replies = tokio::select! {
                packet = amp_rx.recv_packet() => match packet? {
                    Some(packet) => amp.handle_packet(&packet, Instant::now())?.replies,
                    None => break,
                },
                () = &mut knob, if !turned => {
                    turned = true;
                    amp.turn_knob("reverb_level", 70)?
                }
            };
            for reply in replies {
                amp_tx.send_packet(reply).await?;
            }
        }
        Ok::<(), Box<dyn Error>>(())
    };

    let script = async {
        let report = controller.read_all().await?;
        eprintln!("issued {} reads", report.sent.len());
        controller.set_parameter_manually("gain", 80).await?;
        controller.select_parameter("flanger_rate").await?;
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok::<(), Box<dyn Error>>(())
    };

    tokio::select! {
        result = run_amp_link(&controller, ctrl_rx) => result?,
        result = amp_side => result?,
        result = script => result?,
    }

    while let Ok(event) = events.try_recv() {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}
