//! The control core.
//!
//! A [`Controller`] owns the registry and all arbitration state. Inbound amp
//! packets are reassembled, classified and applied; pedal input is mapped,
//! held back by pickup when needed, and throttled on its way to the amp.
//!
//! State sits behind a plain mutex that is never held across an await, so
//! every operation sees a consistent snapshot and sends happen outside it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tonelink_frame::{decode, decode_control_changes, SysexMessage, SysexReassembler};
use tonelink_registry::{Address, LinkedWrite, Registry, RegistryError};
use tonelink_transport::PacketSender;
use tracing::{debug, info, trace, warn};

use crate::classifier::{Classifier, ClassifierConfig, Origin};
use crate::error::{ControlError, Result};
use crate::events::{ControlEvent, EventSink, Link, Severity};
use crate::lock;
use crate::pedal::{scale_to_range, PedalAction, PedalConfig, PedalInput, Polarity};
use crate::pickup::{PedalDecision, PickupArbiter, PickupState, CAPTURE_THRESHOLD};
use crate::sequencer::{BulkReadReport, Sequencer, SequencerConfig};
use crate::throttle::{Throttle, ThrottleConfig};

/// Configuration for a [`Controller`].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub sequencer: SequencerConfig,
    pub classifier: ClassifierConfig,
    pub throttle: ThrottleConfig,
    pub pedal: PedalConfig,
    /// Pickup release distance. Default: 3.
    pub capture_threshold: u8,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sequencer: SequencerConfig::default(),
            classifier: ClassifierConfig::default(),
            throttle: ThrottleConfig::default(),
            pedal: PedalConfig::default(),
            capture_threshold: CAPTURE_THRESHOLD,
        }
    }
}

/// A value the amp reported, after classification and clamping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundValue {
    pub key: String,
    pub value: u8,
    pub origin: Origin,
}

#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    address: Address,
    value: u8,
}

#[derive(Debug)]
struct State {
    registry: Registry,
    reassembler: SysexReassembler,
    arbiter: PickupArbiter,
    pedal: PedalInput,
    throttle: Throttle<PendingWrite>,
    selected: Option<String>,
    /// Last raw expression position, 0-127.
    pedal_raw: Option<u8>,
    pedal_connected: bool,
}

/// Arbitrates control of amp parameters between callers, the amp's own
/// knobs and the pedal.
#[derive(Debug)]
pub struct Controller<S> {
    state: Mutex<State>,
    sequencer: Sequencer<S>,
    classifier: Arc<Mutex<Classifier>>,
    events: EventSink,
}

impl<S: PacketSender> Controller<S> {
    pub fn new(registry: Registry, config: ControllerConfig, events: EventSink) -> Result<Self> {
        let classifier = Arc::new(Mutex::new(Classifier::with_config(config.classifier)));
        let state = State {
            registry,
            reassembler: SysexReassembler::with_config(&config.sequencer.framer),
            arbiter: PickupArbiter::with_threshold(config.capture_threshold),
            pedal: PedalInput::new(config.pedal)?,
            throttle: Throttle::new(config.throttle),
            selected: None,
            pedal_raw: None,
            pedal_connected: false,
        };
        Ok(Self {
            state: Mutex::new(state),
            sequencer: Sequencer::new(classifier.clone(), config.sequencer),
            classifier,
            events,
        })
    }

    // Links

    pub async fn attach_amp(&self, sender: S) {
        self.sequencer.attach(sender).await;
        info!("amp link attached");
        self.events.emit(ControlEvent::ConnectionState {
            link: Link::Amp,
            connected: true,
        });
    }

    /// Drop the amp link. Outstanding reads, partial messages, held pedal
    /// writes and pickup are discarded, and every value becomes unconfirmed.
    pub async fn detach_amp(&self) {
        let was_attached = self.sequencer.close().await;
        {
            let mut st = lock(&self.state);
            st.reassembler.reset();
            st.arbiter.reset();
            st.throttle.clear();
            st.registry.mark_unsynced();
        }
        if was_attached {
            info!("amp link detached");
            self.events.emit(ControlEvent::ConnectionState {
                link: Link::Amp,
                connected: false,
            });
        }
    }

    pub async fn is_amp_connected(&self) -> bool {
        self.sequencer.is_connected().await
    }

    pub fn attach_pedal(&self) {
        lock(&self.state).pedal_connected = true;
        info!("pedal link attached");
        self.events.emit(ControlEvent::ConnectionState {
            link: Link::Pedal,
            connected: true,
        });
    }

    pub fn detach_pedal(&self) {
        let was_attached = {
            let mut st = lock(&self.state);
            st.pedal_raw = None;
            st.arbiter.reset();
            st.throttle.clear();
            std::mem::replace(&mut st.pedal_connected, false)
        };
        lock(&self.classifier).clear();
        if was_attached {
            info!("pedal link detached");
            self.events.emit(ControlEvent::ConnectionState {
                link: Link::Pedal,
                connected: false,
            });
        }
    }

    pub fn is_pedal_connected(&self) -> bool {
        lock(&self.state).pedal_connected
    }

    // Selection

    /// Make `key` the parameter the pedal controls.
    ///
    /// If the parameter needs the amp in a particular mode, the mode switch
    /// is sent when the amp is connected.
    pub async fn select_parameter(&self, key: &str) -> Result<()> {
        let linked = {
            let mut guard = lock(&self.state);
            let st = &mut *guard;
            let linked = st.registry.require(key)?.linked().to_vec();
            st.selected = Some(key.to_string());
            Self::engage(st, key);
            linked
        };
        debug!(key, "parameter selected");
        self.events.emit(ControlEvent::SelectionChanged {
            key: key.to_string(),
        });

        if !linked.is_empty() && !self.sequencer.is_connected().await {
            debug!(key, "amp not connected; mode switch not sent");
            return Ok(());
        }
        self.send_linked(&linked).await
    }

    /// Select the parameter after the current one, wrapping around.
    pub async fn select_next(&self) -> Result<Option<String>> {
        self.select_step(1).await
    }

    /// Select the parameter before the current one, wrapping around.
    pub async fn select_previous(&self) -> Result<Option<String>> {
        self.select_step(-1).await
    }

    async fn select_step(&self, step: isize) -> Result<Option<String>> {
        let next = {
            let st = lock(&self.state);
            match &st.selected {
                Some(current) => st.registry.neighbor(current, step).map(str::to_string),
                None => st.registry.keys().next().map(str::to_string),
            }
        };
        let Some(key) = next else {
            return Ok(None);
        };
        self.select_parameter(&key).await?;
        Ok(Some(key))
    }

    // Caller-initiated operations

    /// Set a parameter from the UI or CLI.
    ///
    /// Hardware parameters are written to the amp first, after any mode
    /// switch they need; the local value changes only once that succeeded.
    pub async fn set_parameter_manually(&self, key: &str, value: u8) -> Result<()> {
        let (address, linked) = {
            let st = lock(&self.state);
            let param = st.registry.require(key)?;
            let range = param.range();
            if !range.contains(value) {
                return Err(RegistryError::OutOfRange {
                    key: key.to_string(),
                    value,
                    min: range.min,
                    max: range.max,
                }
                .into());
            }
            (param.address(), param.linked().to_vec())
        };

        if let Some(address) = address {
            if !self.sequencer.is_connected().await {
                return Err(ControlError::NotConnected(Link::Amp));
            }
            self.send_linked(&linked).await?;
            self.sequencer.write(address, value).await?;
        }

        {
            let mut guard = lock(&self.state);
            let st = &mut *guard;
            st.registry.set_value(key, value)?;
            if st.selected.as_deref() == Some(key) {
                // A held pedal value would overwrite what was just set.
                st.throttle.clear();
                Self::engage(st, key);
            }
        }
        debug!(key, value, "parameter set");
        self.events.emit(ControlEvent::ValueUpdate {
            key: key.to_string(),
            value,
            spontaneous: false,
        });
        Ok(())
    }

    /// Ask the amp for a parameter's value. The answer arrives as a
    /// [`ControlEvent::ValueUpdate`].
    pub async fn read(&self, key: &str) -> Result<()> {
        let address = {
            let st = lock(&self.state);
            st.registry
                .require(key)?
                .address()
                .ok_or_else(|| ControlError::VirtualParameter(key.to_string()))?
        };
        self.sequencer.read(address).await
    }

    /// Read several parameters, paced. Virtual parameters are skipped;
    /// unknown keys and failed reads are reported without stopping the rest.
    pub async fn bulk_read<K: AsRef<str>>(&self, keys: &[K]) -> Result<BulkReadReport<String>> {
        if !self.sequencer.is_connected().await {
            return Err(ControlError::NotConnected(Link::Amp));
        }

        let mut unknown: Vec<(String, ControlError)> = Vec::new();
        let items: Vec<(String, Address)> = {
            let st = lock(&self.state);
            keys.iter()
                .map(AsRef::as_ref)
                .filter_map(|key| match st.registry.get(key) {
                    Some(param) => match param.address() {
                        Some(address) => Some((key.to_string(), address)),
                        None => {
                            trace!(key, "skipping virtual parameter");
                            None
                        }
                    },
                    None => {
                        unknown.push((
                            key.to_string(),
                            RegistryError::UnknownParameter(key.to_string()).into(),
                        ));
                        None
                    }
                })
                .collect()
        };

        let mut report = self.sequencer.bulk_read(&items).await;
        report.failed.extend(unknown);
        for (key, err) in &report.failed {
            self.events
                .log(Severity::Warn, format!("read of {key} failed: {err}"));
        }
        Ok(report)
    }

    /// Read every parameter the amp currently exposes: one read per address,
    /// for whichever parameter owns it in the active mode.
    pub async fn read_all(&self) -> Result<BulkReadReport<String>> {
        let keys: Vec<String> = {
            let st = lock(&self.state);
            let mut seen = HashSet::new();
            st.registry
                .iter()
                .filter(|param| {
                    param.address().is_some_and(|address| {
                        st.registry
                            .resolve(address)
                            .is_some_and(|owner| owner.key() == param.key())
                            && seen.insert(address)
                    })
                })
                .map(|param| param.key().to_string())
                .collect()
        };
        self.bulk_read(&keys).await
    }

    // Pedal configuration

    pub fn configure_footswitch_codes(
        &self,
        previous_cc: u8,
        next_cc: u8,
        expression_cc: u8,
    ) -> Result<()> {
        lock(&self.state)
            .pedal
            .set_codes(previous_cc, next_cc, expression_cc)?;
        info!(previous_cc, next_cc, expression_cc, "footswitch codes updated");
        Ok(())
    }

    pub fn set_footswitch_polarity(&self, polarity: Polarity) {
        lock(&self.state).pedal.set_polarity(polarity);
        info!(?polarity, "footswitch polarity updated");
    }

    pub fn pedal_config(&self) -> PedalConfig {
        lock(&self.state).pedal.config().clone()
    }

    // Inbound paths

    /// Feed one packet from the amp. Returns the values it carried.
    pub fn handle_amp_packet(&self, packet: &[u8], now: Instant) -> Vec<InboundValue> {
        let mut guard = lock(&self.state);
        let st = &mut *guard;
        let mut applied = Vec::new();

        for body in st.reassembler.push(packet, now) {
            let Some(decoded) = decode(&body) else {
                trace!(len = body.len(), "ignoring sysex that is not a parameter message");
                continue;
            };
            if !decoded.checksum_ok() {
                warn!(
                    address = %decoded.message.address(),
                    received = ?decoded.checksum,
                    expected = decoded.expected_checksum,
                    "checksum mismatch; using value anyway"
                );
            }
            let SysexMessage::Data { address, value } = decoded.message else {
                trace!("ignoring read request from the amp");
                continue;
            };
            if let Some(inbound) = self.apply_inbound(st, address, value, now) {
                applied.push(inbound);
            }
        }
        applied
    }

    fn apply_inbound(
        &self,
        st: &mut State,
        address: Address,
        value: u8,
        now: Instant,
    ) -> Option<InboundValue> {
        let origin = lock(&self.classifier).classify(address, now);

        let Some(key) = st.registry.resolve(address).map(|p| p.key().to_string()) else {
            let err = ControlError::UnknownAddress(address);
            warn!(error = %err, value, "dropping value");
            self.events.log(Severity::Warn, err.to_string());
            return None;
        };
        let stored = match st.registry.apply_hardware_value(&key, value) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(key, error = %err, "could not store value");
                return None;
            }
        };

        // Read answers only update the value; pickup moves on selection,
        // manual sets and physical changes.
        if origin == Origin::Spontaneous && st.arbiter.on_spontaneous(&key) {
            self.events.log(
                Severity::Info,
                format!("{key} changed on the amp; pedal pickup released"),
            );
        }

        debug!(key, value = stored, ?origin, "value from amp");
        self.events.emit(ControlEvent::ValueUpdate {
            key: key.clone(),
            value: stored,
            spontaneous: origin == Origin::Spontaneous,
        });
        Some(InboundValue {
            key,
            value: stored,
            origin,
        })
    }

    /// Feed one packet from the pedal.
    pub async fn handle_pedal_packet(&self, packet: &[u8], now: Instant) -> Result<()> {
        for cc in decode_control_changes(packet) {
            let action = lock(&self.state).pedal.handle(&cc);
            match action {
                Some(PedalAction::Previous) => {
                    self.select_previous().await?;
                }
                Some(PedalAction::Next) => {
                    self.select_next().await?;
                }
                Some(PedalAction::Expression(raw)) => self.pedal_sample(raw, now).await?,
                None => {}
            }
        }
        Ok(())
    }

    /// Apply one raw expression position (0-127) to the selected parameter.
    pub async fn pedal_sample(&self, raw: u8, now: Instant) -> Result<()> {
        if raw > 0x7F {
            let err = ControlError::OutOfRangeSample(raw);
            warn!(error = %err, "dropping pedal sample");
            self.events.log(Severity::Warn, err.to_string());
            return Err(err);
        }

        let write = {
            let mut guard = lock(&self.state);
            let st = &mut *guard;
            st.pedal_raw = Some(raw);
            let Some(key) = st.selected.clone() else {
                trace!(raw, "no parameter selected; pedal ignored");
                return Ok(());
            };
            let Some(param) = st.registry.get(&key) else {
                return Ok(());
            };
            let address = param.address();
            let value = scale_to_range(raw, param.range());

            match st.arbiter.on_sample(&key, value) {
                PedalDecision::Track(position) => {
                    self.events.emit(ControlEvent::PedalPosition {
                        key,
                        value: position,
                    });
                    None
                }
                PedalDecision::Apply(value) => {
                    st.registry.set_value(&key, value)?;
                    self.events.emit(ControlEvent::PedalPosition {
                        key: key.clone(),
                        value,
                    });
                    self.events.emit(ControlEvent::ValueUpdate {
                        key,
                        value,
                        spontaneous: false,
                    });
                    address.and_then(|address| st.throttle.offer(PendingWrite { address, value }, now))
                }
            }
        };

        match write {
            Some(write) => self.send_pedal_write(write).await,
            None => Ok(()),
        }
    }

    /// Send a held pedal value once its trailing delay has passed.
    /// Returns `true` if something was sent.
    pub async fn flush_pedal(&self, now: Instant) -> Result<bool> {
        let pending = lock(&self.state).throttle.flush(now);
        match pending {
            Some(write) => {
                self.send_pedal_write(write).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// When [`flush_pedal`](Self::flush_pedal) next has work to do.
    pub fn next_flush_deadline(&self) -> Option<Instant> {
        lock(&self.state).throttle.deadline()
    }

    // Queries

    pub fn value(&self, key: &str) -> Option<u8> {
        lock(&self.state).registry.get(key).map(|p| p.current())
    }

    pub fn selected(&self) -> Option<String> {
        lock(&self.state).selected.clone()
    }

    pub fn pickup_state(&self) -> PickupState {
        lock(&self.state).arbiter.state().clone()
    }

    /// Run `f` against the registry.
    pub fn with_registry<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        f(&lock(&self.state).registry)
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    // Helpers

    fn engage(st: &mut State, key: &str) -> bool {
        let Some(param) = st.registry.get(key) else {
            return false;
        };
        let target = param.current();
        let pedal = st.pedal_raw.map(|raw| scale_to_range(raw, param.range()));
        st.arbiter.engage(key, target, pedal)
    }

    async fn send_linked(&self, linked: &[LinkedWrite]) -> Result<()> {
        for write in linked {
            self.sequencer.write(write.address, write.value).await?;
            let updated = lock(&self.state)
                .registry
                .apply_linked_write(write.address, write.value);
            if let Some(key) = updated {
                trace!(key, value = write.value, "mode switched");
                self.events.emit(ControlEvent::ValueUpdate {
                    key,
                    value: write.value,
                    spontaneous: false,
                });
            }
        }
        Ok(())
    }

    async fn send_pedal_write(&self, write: PendingWrite) -> Result<()> {
        match self.sequencer.write(write.address, write.value).await {
            Err(ControlError::NotConnected(_)) => {
                trace!("amp not connected; pedal value kept locally");
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::{Bytes, BytesMut};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tonelink_frame::{encode_write, wrap_control_change, wrap_sysex, ControlChange, FramerConfig, TIMESTAMP};
    use tonelink_transport::memory::{channel, MemoryReceiver, MemorySender};

    use super::*;

    const GAIN: Address = Address::new([0x20, 0, 0, 0x01]);
    const MOD_TYPE: Address = Address::new([0x20, 0, 0x20, 0x00]);
    const MOD_RATE: Address = Address::new([0x20, 0, 0x20, 0x01]);

    struct Rig {
        controller: Controller<MemorySender>,
        amp: MemoryReceiver,
        events: UnboundedReceiver<ControlEvent>,
    }

    async fn rig() -> Rig {
        let (sink, events) = EventSink::channel();
        let controller = Controller::new(
            Registry::builtin().unwrap(),
            ControllerConfig::default(),
            sink,
        )
        .unwrap();
        let (tx, amp) = channel(64);
        controller.attach_amp(tx).await;
        let mut rig = Rig {
            controller,
            amp,
            events,
        };
        rig.drain_events();
        rig
    }

    impl Rig {
        /// Messages the controller sent to the amp so far.
        fn sent(&mut self) -> Vec<SysexMessage> {
            let mut reassembler = SysexReassembler::new();
            let mut out = Vec::new();
            while let Some(packet) = self.amp.try_recv_packet() {
                for body in reassembler.push(&packet, Instant::now()) {
                    out.push(decode(&body).unwrap().message);
                }
            }
            out
        }

        fn drain_events(&mut self) -> Vec<ControlEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        fn amp_reports(&self, address: Address, value: u8) -> Vec<InboundValue> {
            self.controller
                .handle_amp_packet(&amp_packet(address, value), Instant::now())
        }
    }

    fn amp_packet(address: Address, value: u8) -> Bytes {
        let mut body = BytesMut::new();
        encode_write(address, value, &mut body).unwrap();
        wrap_sysex(&body, &FramerConfig::default()).unwrap().remove(0)
    }

    fn data(address: Address, value: u8) -> SysexMessage {
        SysexMessage::Data { address, value }
    }

    /// Raw pedal position that maps onto `value` in a 0-100 range.
    fn raw_for(value: u8) -> u8 {
        ((u32::from(value) * 127 + 50) / 100) as u8
    }

    #[tokio::test]
    async fn read_answer_is_a_response() {
        let mut rig = rig().await;
        rig.controller.read("gain").await.unwrap();
        assert_eq!(
            rig.sent(),
            vec![SysexMessage::Request {
                address: GAIN,
                length: 1
            }]
        );

        let applied = rig.amp_reports(GAIN, 77);
        assert_eq!(
            applied,
            vec![InboundValue {
                key: "gain".into(),
                value: 77,
                origin: Origin::Response
            }]
        );
        assert_eq!(rig.controller.value("gain"), Some(77));
        assert_eq!(
            rig.drain_events(),
            vec![ControlEvent::ValueUpdate {
                key: "gain".into(),
                value: 77,
                spontaneous: false
            }]
        );
    }

    #[tokio::test]
    async fn knob_turn_is_spontaneous() {
        let mut rig = rig().await;
        let applied = rig.amp_reports(GAIN, 12);
        assert_eq!(applied[0].origin, Origin::Spontaneous);
        assert!(matches!(
            rig.drain_events().as_slice(),
            [ControlEvent::ValueUpdate {
                spontaneous: true,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn out_of_range_hardware_value_is_clamped() {
        let rig = rig().await;
        // booster_drive tops out at 120.
        let applied = rig.amp_reports(Address::new([0x20, 0, 0x10, 0x01]), 127);
        assert_eq!(applied[0].value, 120);
    }

    #[tokio::test]
    async fn unknown_address_is_dropped_with_a_log() {
        let mut rig = rig().await;
        assert!(rig.amp_reports(Address::new([0x7F, 0, 0, 0]), 5).is_empty());
        assert!(matches!(
            rig.drain_events().as_slice(),
            [ControlEvent::Log {
                severity: Severity::Warn,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn manual_set_writes_then_updates() {
        let mut rig = rig().await;
        rig.controller.set_parameter_manually("gain", 64).await.unwrap();
        assert_eq!(rig.sent(), vec![data(GAIN, 64)]);
        assert_eq!(rig.controller.value("gain"), Some(64));

        let err = rig
            .controller
            .set_parameter_manually("gain", 101)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::Registry(RegistryError::OutOfRange { .. })
        ));
        assert!(rig.sent().is_empty());
        assert_eq!(rig.controller.value("gain"), Some(64));
    }

    #[tokio::test]
    async fn manual_set_needs_amp_but_virtual_does_not() {
        let rig = rig().await;
        rig.controller.detach_amp().await;

        let err = rig
            .controller
            .set_parameter_manually("gain", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::NotConnected(Link::Amp)));

        rig.controller
            .set_parameter_manually("pedal_volume", 30)
            .await
            .unwrap();
        assert_eq!(rig.controller.value("pedal_volume"), Some(30));
    }

    #[tokio::test]
    async fn virtual_parameters_cannot_be_read() {
        let rig = rig().await;
        let err = rig.controller.read("pedal_volume").await.unwrap_err();
        assert!(matches!(err, ControlError::VirtualParameter(_)));
    }

    #[tokio::test]
    async fn selecting_a_mode_parameter_switches_mode() {
        let mut rig = rig().await;
        rig.controller.select_parameter("flanger_rate").await.unwrap();
        assert_eq!(rig.sent(), vec![data(MOD_TYPE, 1)]);
        assert_eq!(rig.controller.value("mod_type"), Some(1));

        let applied = rig.amp_reports(MOD_RATE, 9);
        assert_eq!(applied[0].key, "flanger_rate");

        rig.controller
            .set_parameter_manually("tremolo_rate", 70)
            .await
            .unwrap();
        assert_eq!(rig.sent(), vec![data(MOD_TYPE, 3), data(MOD_RATE, 70)]);
        assert_eq!(rig.amp_reports(MOD_RATE, 71)[0].key, "tremolo_rate");
    }

    #[tokio::test(start_paused = true)]
    async fn bulk_read_skips_virtual_and_reports_unknown() {
        let mut rig = rig().await;
        let report = rig
            .controller
            .bulk_read(&["gain", "pedal_volume", "nope", "bass"])
            .await
            .unwrap();
        assert_eq!(report.sent, vec!["gain".to_string(), "bass".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "nope");
        assert_eq!(rig.sent().len(), 2);
    }

    /// Fails every packet whose last address byte is `fail_on`.
    struct FailingSender {
        fail_on: u8,
    }

    impl PacketSender for FailingSender {
        async fn send_packet(&mut self, packet: Bytes) -> tonelink_transport::Result<()> {
            if packet.get(13) == Some(&self.fail_on) {
                return Err(tonelink_transport::TransportError::Closed);
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bulk_read_logs_each_failed_key_once() {
        let (sink, mut events) = EventSink::channel();
        let controller = Controller::new(
            Registry::builtin().unwrap(),
            ControllerConfig::default(),
            sink,
        )
        .unwrap();
        // bass sits at 20 00 00 03.
        controller.attach_amp(FailingSender { fail_on: 0x03 }).await;
        while events.try_recv().is_ok() {}

        let report = controller
            .bulk_read(&["gain", "bass", "nope", "treble"])
            .await
            .unwrap();
        assert_eq!(report.sent, vec!["gain".to_string(), "treble".to_string()]);
        let failed: Vec<&str> = report.failed.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(failed, vec!["bass", "nope"]);

        let mut logs = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ControlEvent::Log { message, severity } = event {
                assert_eq!(severity, Severity::Warn);
                logs.push(message);
            }
        }
        assert_eq!(logs.len(), 2);
        assert_eq!(logs.iter().filter(|m| m.contains("bass")).count(), 1);
        assert_eq!(logs.iter().filter(|m| m.contains("nope")).count(), 1);
        assert!(!logs.iter().any(|m| m.contains("gain") || m.contains("treble")));
    }

    #[tokio::test(start_paused = true)]
    async fn read_all_reads_each_address_once() {
        let mut rig = rig().await;
        let report = rig.controller.read_all().await.unwrap();
        // mod_type defaults to chorus, so only chorus_rate reads the shared address.
        assert!(report.sent.contains(&"chorus_rate".to_string()));
        assert!(!report.sent.contains(&"flanger_rate".to_string()));
        assert!(!report.sent.contains(&"pedal_volume".to_string()));
        let requests = rig.sent();
        let unique: HashSet<_> = requests.iter().map(SysexMessage::address).collect();
        assert_eq!(unique.len(), requests.len());
    }

    #[tokio::test]
    async fn bulk_read_without_amp_fails_fast() {
        let rig = rig().await;
        rig.controller.detach_amp().await;
        assert!(matches!(
            rig.controller.bulk_read(&["gain"]).await,
            Err(ControlError::NotConnected(Link::Amp))
        ));
    }

    #[tokio::test]
    async fn pedal_picks_up_when_crossing_held_value() {
        let mut rig = rig().await;
        rig.controller.attach_pedal();
        rig.controller.set_parameter_manually("gain", 50).await.unwrap();
        rig.controller.select_parameter("gain").await.unwrap();
        rig.sent();
        rig.drain_events();

        let t0 = Instant::now();
        for (i, value) in [70u8, 60, 54].into_iter().enumerate() {
            rig.controller
                .pedal_sample(raw_for(value), t0 + Duration::from_millis(40 * i as u64))
                .await
                .unwrap();
            assert_eq!(rig.controller.value("gain"), Some(50), "held at {value}");
        }
        assert!(rig.sent().is_empty());
        assert!(rig
            .drain_events()
            .iter()
            .all(|e| matches!(e, ControlEvent::PedalPosition { .. })));

        rig.controller
            .pedal_sample(raw_for(48), t0 + Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(rig.controller.value("gain"), Some(48));
        assert_eq!(rig.sent(), vec![data(GAIN, 48)]);
        assert_eq!(rig.controller.pickup_state(), PickupState::Inactive);
    }

    #[tokio::test]
    async fn knob_turn_releases_pickup() {
        let mut rig = rig().await;
        rig.controller.attach_pedal();
        rig.controller.pedal_sample(127, Instant::now()).await.unwrap();
        rig.controller.select_parameter("gain").await.unwrap();
        assert!(matches!(
            rig.controller.pickup_state(),
            PickupState::Active { target: 50, .. }
        ));

        rig.amp_reports(GAIN, 20);
        assert_eq!(rig.controller.pickup_state(), PickupState::Inactive);
        assert!(rig.drain_events().iter().any(|e| matches!(
            e,
            ControlEvent::Log {
                severity: Severity::Info,
                ..
            }
        )));

        rig.sent();
        rig.controller.pedal_sample(127, Instant::now()).await.unwrap();
        assert_eq!(rig.controller.value("gain"), Some(100));
        assert_eq!(rig.sent(), vec![data(GAIN, 100)]);
    }

    #[tokio::test]
    async fn late_read_answer_leaves_pedal_in_control() {
        let mut rig = rig().await;
        rig.controller.attach_pedal();
        rig.controller.pedal_sample(raw_for(50), Instant::now()).await.unwrap();
        rig.controller.select_parameter("gain").await.unwrap();
        assert_eq!(rig.controller.pickup_state(), PickupState::Inactive);

        let t0 = Instant::now();
        rig.controller.read("gain").await.unwrap();
        rig.controller.pedal_sample(raw_for(90), t0).await.unwrap();
        assert_eq!(rig.controller.value("gain"), Some(90));
        rig.sent();

        // The amp answers the read with the value it had before the pedal moved.
        let applied = rig.amp_reports(GAIN, 50);
        assert_eq!(applied[0].origin, Origin::Response);
        assert_eq!(rig.controller.pickup_state(), PickupState::Inactive);

        rig.controller
            .pedal_sample(raw_for(94), t0 + Duration::from_millis(40))
            .await
            .unwrap();
        assert_eq!(rig.controller.value("gain"), Some(94));
        assert_eq!(rig.sent(), vec![data(GAIN, 94)]);
    }

    #[tokio::test]
    async fn pedal_writes_are_throttled_and_flushed() {
        let mut rig = rig().await;
        rig.controller.attach_pedal();
        rig.controller.pedal_sample(raw_for(50), Instant::now()).await.unwrap();
        rig.controller.select_parameter("gain").await.unwrap();
        assert_eq!(rig.controller.pickup_state(), PickupState::Inactive);
        rig.sent();

        let t0 = Instant::now();
        for (i, value) in [52u8, 55, 58, 61].into_iter().enumerate() {
            rig.controller
                .pedal_sample(raw_for(value), t0 + Duration::from_millis(5 * i as u64))
                .await
                .unwrap();
        }
        assert_eq!(rig.sent(), vec![data(GAIN, 52)]);
        assert_eq!(rig.controller.value("gain"), Some(61));

        let deadline = rig.controller.next_flush_deadline().unwrap();
        assert_eq!(deadline, t0 + Duration::from_millis(15 + 150));
        assert!(!rig.controller.flush_pedal(t0 + Duration::from_millis(100)).await.unwrap());
        assert!(rig.controller.flush_pedal(deadline).await.unwrap());
        assert_eq!(rig.sent(), vec![data(GAIN, 61)]);
        assert_eq!(rig.controller.next_flush_deadline(), None);
    }

    #[tokio::test]
    async fn pedal_without_selection_does_nothing() {
        let mut rig = rig().await;
        rig.controller.pedal_sample(100, Instant::now()).await.unwrap();
        assert!(rig.sent().is_empty());
        assert!(rig.drain_events().is_empty());
    }

    #[tokio::test]
    async fn out_of_range_sample_is_rejected() {
        let rig = rig().await;
        rig.controller.select_parameter("gain").await.unwrap();
        let err = rig.controller.pedal_sample(200, Instant::now()).await.unwrap_err();
        assert!(matches!(err, ControlError::OutOfRangeSample(200)));
        assert_eq!(rig.controller.value("gain"), Some(50));
    }

    #[tokio::test]
    async fn virtual_parameter_follows_pedal_without_traffic() {
        let mut rig = rig().await;
        rig.controller.attach_pedal();
        rig.controller.pedal_sample(127, Instant::now()).await.unwrap();
        rig.controller.select_parameter("pedal_volume").await.unwrap();
        rig.controller.pedal_sample(0, Instant::now()).await.unwrap();
        assert_eq!(rig.controller.value("pedal_volume"), Some(0));
        assert!(rig.sent().is_empty());
    }

    #[tokio::test]
    async fn footswitches_step_through_parameters() {
        let rig = rig().await;
        let press = |controller| {
            wrap_control_change(
                ControlChange {
                    channel: 0,
                    controller,
                    value: 127,
                },
                TIMESTAMP,
            )
            .unwrap()
        };
        let release = |controller| {
            wrap_control_change(
                ControlChange {
                    channel: 0,
                    controller,
                    value: 0,
                },
                TIMESTAMP,
            )
            .unwrap()
        };

        let now = Instant::now();
        rig.controller.handle_pedal_packet(&press(81), now).await.unwrap();
        assert_eq!(rig.controller.selected().as_deref(), Some("amp_type"));
        rig.controller.handle_pedal_packet(&release(81), now).await.unwrap();
        rig.controller.handle_pedal_packet(&press(81), now).await.unwrap();
        assert_eq!(rig.controller.selected().as_deref(), Some("gain"));
        rig.controller.handle_pedal_packet(&release(80), now).await.unwrap();
        rig.controller.handle_pedal_packet(&press(80), now).await.unwrap();
        rig.controller.handle_pedal_packet(&release(80), now).await.unwrap();
        rig.controller.handle_pedal_packet(&press(80), now).await.unwrap();
        assert_eq!(rig.controller.selected().as_deref(), Some("pedal_volume"));
    }

    #[tokio::test]
    async fn footswitch_codes_and_polarity_are_configurable() {
        let rig = rig().await;
        rig.controller.configure_footswitch_codes(20, 21, 11).unwrap();
        rig.controller.set_footswitch_polarity(Polarity::NormallyClosed);
        assert!(rig.controller.configure_footswitch_codes(1, 1, 2).is_err());
        assert_eq!(rig.controller.pedal_config().next_cc, 21);

        let packet = wrap_control_change(
            ControlChange {
                channel: 3,
                controller: 21,
                value: 0,
            },
            TIMESTAMP,
        )
        .unwrap();
        rig.controller
            .handle_pedal_packet(&packet, Instant::now())
            .await
            .unwrap();
        assert_eq!(rig.controller.selected().as_deref(), Some("amp_type"));
    }

    #[tokio::test]
    async fn detach_resets_link_state() {
        let mut rig = rig().await;
        rig.controller.read("gain").await.unwrap();
        rig.amp_reports(GAIN, 30);
        rig.controller.read("bass").await.unwrap();
        rig.drain_events();

        rig.controller.detach_amp().await;
        assert!(!rig.controller.is_amp_connected().await);
        assert!(!rig.controller.with_registry(|r| r.require("gain").unwrap().is_synced()));
        assert_eq!(
            rig.drain_events(),
            vec![ControlEvent::ConnectionState {
                link: Link::Amp,
                connected: false
            }]
        );

        // The late bass answer no longer matches anything.
        let (tx, _amp) = channel(8);
        rig.controller.attach_amp(tx).await;
        let applied = rig.amp_reports(Address::new([0x20, 0, 0, 0x03]), 40);
        assert_eq!(applied[0].origin, Origin::Spontaneous);
    }
}
