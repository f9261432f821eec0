//! Link pumps.
//!
//! Each pump drains one device link into the controller until the link
//! closes, then tears down the state tied to that link. Run them alongside
//! whatever drives the controller, e.g. with `tokio::join!`.

use std::time::Instant;

use tonelink_transport::{PacketReceiver, PacketSender};
use tracing::{debug, warn};

use crate::controller::Controller;
use crate::error::Result;
use crate::now;

/// Feed packets from the amp into `controller` until the link closes.
///
/// The controller must already have the matching sender attached. On return
/// the amp link is detached.
pub async fn run_amp_link<S, R>(controller: &Controller<S>, mut receiver: R) -> Result<()>
where
    S: PacketSender,
    R: PacketReceiver,
{
    let result = loop {
        match receiver.recv_packet().await {
            Ok(Some(packet)) => {
                controller.handle_amp_packet(&packet, now());
            }
            Ok(None) => {
                debug!("amp link closed");
                break Ok(());
            }
            Err(err) => {
                warn!(error = %err, "amp link failed");
                break Err(err.into());
            }
        }
    };
    controller.detach_amp().await;
    result
}

/// Feed packets from the pedal into `controller` until the link closes,
/// flushing throttled pedal writes on time.
pub async fn run_pedal_link<S, R>(controller: &Controller<S>, mut receiver: R) -> Result<()>
where
    S: PacketSender,
    R: PacketReceiver,
{
    controller.attach_pedal();
    let result = loop {
        let deadline = controller.next_flush_deadline();
        tokio::select! {
            packet = receiver.recv_packet() => match packet {
                Ok(Some(packet)) => {
                    if let Err(err) = controller.handle_pedal_packet(&packet, now()).await {
                        warn!(error = %err, "pedal input not applied");
                    }
                }
                Ok(None) => {
                    debug!("pedal link closed");
                    break Ok(());
                }
                Err(err) => {
                    warn!(error = %err, "pedal link failed");
                    break Err(err.into());
                }
            },
            () = sleep_until(deadline) => {
                if let Err(err) = controller.flush_pedal(now()).await {
                    warn!(error = %err, "pedal flush failed");
                }
            }
        }
    };

    // The last position still goes out even though the pedal is gone.
    if let Some(deadline) = controller.next_flush_deadline() {
        sleep_until(Some(deadline)).await;
        if let Err(err) = controller.flush_pedal(now()).await {
            warn!(error = %err, "pedal flush failed");
        }
    }
    controller.detach_pedal();
    result
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::BytesMut;
    use tonelink_frame::{
        decode, encode_write, wrap_control_change, wrap_sysex, ControlChange, FramerConfig,
        SysexMessage, SysexReassembler, TIMESTAMP,
    };
    use tonelink_registry::{Address, Registry};
    use tonelink_transport::memory::{channel, duplex, MemoryReceiver, MemorySender};

    use super::*;
    use crate::controller::ControllerConfig;
    use crate::events::{ControlEvent, EventSink, Link};

    const GAIN: Address = Address::new([0x20, 0, 0, 0x01]);

    fn controller() -> (Controller<MemorySender>, tokio::sync::mpsc::UnboundedReceiver<ControlEvent>) {
        let (sink, events) = EventSink::channel();
        let controller = Controller::new(
            Registry::builtin().unwrap(),
            ControllerConfig::default(),
            sink,
        )
        .unwrap();
        (controller, events)
    }

    /// Answers every read with `value` until the controller hangs up.
    async fn simulated_amp(mut tx: MemorySender, mut rx: MemoryReceiver, value: u8) {
        let mut reassembler = SysexReassembler::new();
        while let Ok(Some(packet)) = rx.recv_packet().await {
            for body in reassembler.push(&packet, std::time::Instant::now()) {
                let Some(decoded) = decode(&body) else { continue };
                if let SysexMessage::Request { address, .. } = decoded.message {
                    let mut reply = BytesMut::new();
                    encode_write(address, value, &mut reply).unwrap();
                    for packet in wrap_sysex(&reply, &FramerConfig::default()).unwrap() {
                        tx.send_packet(packet).await.unwrap();
                    }
                }
            }
        }
    }

    fn writes(rx: &mut MemoryReceiver) -> Vec<(Address, u8)> {
        let mut reassembler = SysexReassembler::new();
        let mut out = Vec::new();
        while let Some(packet) = rx.try_recv_packet() {
            for body in reassembler.push(&packet, std::time::Instant::now()) {
                if let Some(SysexMessage::Data { address, value }) =
                    decode(&body).map(|d| d.message)
                {
                    out.push((address, value));
                }
            }
        }
        out
    }

    #[tokio::test]
    async fn amp_answers_flow_back_through_the_pump() {
        let (controller, mut events) = controller();
        let ((ctl_tx, ctl_rx), (amp_tx, amp_rx)) = duplex(64);
        controller.attach_amp(ctl_tx).await;
        let amp = tokio::spawn(simulated_amp(amp_tx, amp_rx, 33));

        let driver = async {
            controller.read("gain").await.unwrap();
            loop {
                match events.recv().await.unwrap() {
                    ControlEvent::ValueUpdate {
                        key,
                        value,
                        spontaneous,
                    } => {
                        assert_eq!((key.as_str(), value, spontaneous), ("gain", 33, false));
                        break;
                    }
                    _ => continue,
                }
            }
            controller.detach_amp().await;
        };

        let (pumped, ()) = tokio::join!(run_amp_link(&controller, ctl_rx), driver);
        pumped.unwrap();
        amp.await.unwrap();

        assert_eq!(controller.value("gain"), Some(33));
        assert!(!controller.is_amp_connected().await);
    }

    #[tokio::test]
    async fn closed_amp_link_detaches() {
        let (controller, mut events) = controller();
        let ((ctl_tx, ctl_rx), (amp_tx, _amp_rx)) = duplex(8);
        controller.attach_amp(ctl_tx).await;
        drop(amp_tx);

        run_amp_link(&controller, ctl_rx).await.unwrap();
        assert!(!controller.is_amp_connected().await);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen.last(),
            Some(&ControlEvent::ConnectionState {
                link: Link::Amp,
                connected: false
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pedal_pump_sends_first_and_last_position() {
        let (controller, _events) = controller();
        let (ctl_tx, mut amp_rx) = channel(64);
        controller.attach_amp(ctl_tx).await;
        controller.select_parameter("gain").await.unwrap();

        let (mut pedal_tx, pedal_rx) = channel(16);
        let driver = async move {
            // Maps onto gain 50, 52, 55, 58, 61.
            for raw in [64u8, 66, 70, 74, 77] {
                let packet = wrap_control_change(
                    ControlChange {
                        channel: 0,
                        controller: 127,
                        value: raw,
                    },
                    TIMESTAMP,
                )
                .unwrap();
                pedal_tx.send_packet(packet).await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
        };

        let (pumped, ()) = tokio::join!(run_pedal_link(&controller, pedal_rx), driver);
        pumped.unwrap();

        assert_eq!(writes(&mut amp_rx), vec![(GAIN, 50), (GAIN, 61)]);
        assert_eq!(controller.value("gain"), Some(61));
        assert!(!controller.is_pedal_connected());
    }
}
